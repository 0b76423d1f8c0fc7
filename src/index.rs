//! In-memory color index: quantized 24-bit color -> tile candidates.
//!
//! Rebuilt from the cache on every run, after all workers and the writer
//! have settled; single-threaded append while building, read-only once
//! handed to a consumer. Buckets are kept sparsely, keyed by observed
//! colors, so memory tracks the number of distinct averages in the library
//! rather than the full 16.7M-slot color space.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::cache::TileCache;
use crate::color::Rgb;
use crate::error::Result;

/// Total number of quantized 24-bit colors (256^3).
pub const COLOR_SPACE_SIZE: usize = 256 * 256 * 256;

/// One size class of the bucket-population histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClass {
    /// How many buckets hold exactly this many tiles.
    pub buckets: usize,
    /// Color of one bucket in this class, echoed in the report when the
    /// class contains a single bucket.
    pub sample: Rgb,
}

#[derive(Debug, Default)]
pub struct ColorIndex {
    buckets: HashMap<u32, Vec<PathBuf>>,
    total_files: usize,
}

impl ColorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `path` to the bucket for `color`.
    pub fn insert(&mut self, color: Rgb, path: PathBuf) {
        self.buckets.entry(color.key()).or_default().push(path);
        self.total_files += 1;
    }

    /// Exact-bucket lookup. Empty slice when no tile averages to `color`.
    pub fn candidates(&self, color: Rgb) -> &[PathBuf] {
        self.buckets.get(&color.key()).map_or(&[], Vec::as_slice)
    }

    /// Closest populated bucket under Euclidean channel distance, for
    /// consumers whose target color has no exact match.
    pub fn nearest(&self, color: Rgb) -> Option<(Rgb, &[PathBuf])> {
        self.buckets
            .iter()
            .min_by(|(a, _), (b, _)| {
                let da = color.distance(Rgb::from_key(**a));
                let db = color.distance(Rgb::from_key(**b));
                da.total_cmp(&db)
            })
            .map(|(key, files)| (Rgb::from_key(*key), files.as_slice()))
    }

    /// Sum of all bucket populations; equals the number of cache entries
    /// whose backing files existed when the index was built.
    pub fn total_files(&self) -> usize {
        self.total_files
    }

    /// Number of populated buckets.
    pub fn populated_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn max_population(&self) -> usize {
        self.buckets.values().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Population histogram over the populated buckets, keyed by bucket
    /// size. The size-0 class is implicit: `COLOR_SPACE_SIZE` minus
    /// [`populated_buckets`](Self::populated_buckets).
    pub fn population_histogram(&self) -> BTreeMap<usize, SizeClass> {
        let mut histogram: BTreeMap<usize, SizeClass> = BTreeMap::new();
        for (key, files) in &self.buckets {
            let entry = histogram.entry(files.len()).or_insert(SizeClass {
                buckets: 0,
                sample: Rgb::from_key(*key),
            });
            entry.buckets += 1;
            entry.sample = Rgb::from_key(*key);
        }
        histogram
    }

    /// Iterate populated buckets (bucket color, member tiles).
    pub fn iter(&self) -> impl Iterator<Item = (Rgb, &[PathBuf])> + '_ {
        self.buckets
            .iter()
            .map(|(key, files)| (Rgb::from_key(*key), files.as_slice()))
    }

    /// Whether any bucket references `path`.
    pub fn references(&self, path: &Path) -> bool {
        self.buckets.values().any(|files| files.iter().any(|f| f == path))
    }
}

/// Build the index from the cache's current contents. Runs after all work
/// has settled; reconciliation already removed entries for vanished files,
/// so every bucket member is backed by a file that existed at startup.
pub fn build_color_index(cache: &TileCache) -> Result<ColorIndex> {
    let mut index = ColorIndex::new();
    cache.scan(|path, color| index.insert(color, path.to_path_buf()))?;
    Ok(index)
}
