//! Library directory scan: enumerate supported image files and split them
//! into cache hits (nothing to do) and paths that still need processing.

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::cache::TileCache;
use crate::error::{IndexError, Result};

/// Supported raster formats, matched case-insensitively on the extension.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png", "gif"];

fn has_image_extension(path: &Path) -> bool {
    // Suffix match on the lowercased file name rather than
    // `Path::extension`, so a bare dotfile like `.png` still counts.
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_lowercase();
    IMAGE_EXTENSIONS
        .iter()
        .any(|ext| name.strip_suffix(ext).is_some_and(|stem| stem.ends_with('.')))
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Absolute paths that have no cache entry yet, in traversal order.
    pub pending: Vec<PathBuf>,
    /// Files already present in the cache.
    pub cache_hits: usize,
}

/// Walk `root` recursively and partition supported files against the cache.
///
/// Only an untraversable root is fatal. A file whose absolute path cannot
/// be resolved is logged and skipped; directories and unsupported
/// extensions are skipped silently.
pub fn scan_library(root: &Path, cache: &TileCache) -> Result<ScanOutcome> {
    let mut outcome = ScanOutcome::default();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                if e.depth() == 0 {
                    return Err(IndexError::Scan {
                        path: root.to_path_buf(),
                        source: e,
                    });
                }
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };

        if !entry.file_type().is_file() || !has_image_extension(entry.path()) {
            continue;
        }

        let abspath = match entry.path().canonicalize() {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "cannot resolve absolute path, skipping");
                continue;
            }
        };

        if cache.contains(&abspath)? {
            outcome.cache_hits += 1;
        } else {
            outcome.pending.push(abspath);
        }
    }

    info!(
        pending = outcome.pending.len(),
        cached = outcome.cache_hits,
        "library scan complete"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgb;
    use tempfile::TempDir;

    fn cache_in(dir: &TempDir) -> TileCache {
        TileCache::open(&dir.path().join("cache.bin")).unwrap()
    }

    #[test]
    fn finds_supported_extensions_case_insensitively() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        for name in ["a.jpg", "b.JPEG", "c.Png", "d.gif", "e.txt", "f.webp", "noext"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/g.png"), b"x").unwrap();

        let outcome = scan_library(dir.path(), &cache).unwrap();
        assert_eq!(outcome.pending.len(), 5);
        assert_eq!(outcome.cache_hits, 0);
        assert!(outcome.pending.iter().all(|p| p.is_absolute()));
    }

    #[test]
    fn bare_dotfile_named_like_extension_is_indexed() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        std::fs::write(dir.path().join(".png"), b"x").unwrap();
        std::fs::write(dir.path().join(".GIF"), b"x").unwrap();
        std::fs::write(dir.path().join("png"), b"x").unwrap();
        std::fs::write(dir.path().join("x.apng"), b"x").unwrap();

        let outcome = scan_library(dir.path(), &cache).unwrap();
        assert_eq!(outcome.pending.len(), 2);
    }

    #[test]
    fn cached_files_are_counted_not_emitted() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        let cached = dir.path().join("cached.png");
        std::fs::write(&cached, b"x").unwrap();
        cache
            .put(&cached.canonicalize().unwrap(), Rgb::new(1, 2, 3))
            .unwrap();
        std::fs::write(dir.path().join("fresh.png"), b"x").unwrap();

        let outcome = scan_library(dir.path(), &cache).unwrap();
        assert_eq!(outcome.cache_hits, 1);
        assert_eq!(outcome.pending.len(), 1);
        assert!(outcome.pending[0].ends_with("fresh.png"));
    }

    #[test]
    fn missing_root_is_a_scan_error() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);

        let err = scan_library(&dir.path().join("no-such-dir"), &cache).unwrap_err();
        assert!(matches!(err, IndexError::Scan { .. }));
    }
}
