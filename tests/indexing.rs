//! End-to-end indexing runs over temp-dir libraries with synthetic PNGs.

use std::path::{Path, PathBuf};

use image::{Rgb as ImgRgb, RgbImage};
use tempfile::TempDir;

use mosaic_index::{build_color_index, pipeline, scan_library, Rgb, TileCache};

fn write_solid_png(dir: &Path, name: &str, color: [u8; 3]) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(10, 10, ImgRgb(color))
        .save(&path)
        .expect("write fixture png");
    path.canonicalize().expect("canonicalize fixture path")
}

fn index_once(lib: &Path, cache: &TileCache, workers: usize) -> pipeline::PipelineOutcome {
    cache.reconcile().expect("reconcile");
    let scan = scan_library(lib, cache).expect("scan");
    pipeline::run(cache, scan.pending, workers, |_| {}).expect("pipeline run")
}

#[test]
fn solid_color_library_indexes_exactly() {
    let lib = TempDir::new().unwrap();
    let db = TempDir::new().unwrap();
    let cache = TileCache::open(&db.path().join("database.bin")).unwrap();

    let red = write_solid_png(lib.path(), "red.png", [255, 0, 0]);
    let green = write_solid_png(lib.path(), "green.png", [0, 255, 0]);
    let blue = write_solid_png(lib.path(), "blue.png", [0, 0, 255]);

    let outcome = index_once(lib.path(), &cache, 2);
    assert_eq!(outcome.processed, 3);
    assert_eq!(outcome.succeeded, 3);

    assert_eq!(cache.get(&red).unwrap(), Some(Rgb::new(255, 0, 0)));
    assert_eq!(cache.get(&green).unwrap(), Some(Rgb::new(0, 255, 0)));
    assert_eq!(cache.get(&blue).unwrap(), Some(Rgb::new(0, 0, 255)));

    let index = build_color_index(&cache).unwrap();
    assert_eq!(index.candidates(Rgb::new(255, 0, 0)).to_vec(), vec![red.clone()]);
    assert_eq!(index.total_files(), 3);
}

#[test]
fn second_run_is_all_cache_hits() {
    let lib = TempDir::new().unwrap();
    let db = TempDir::new().unwrap();
    let cache = TileCache::open(&db.path().join("database.bin")).unwrap();

    write_solid_png(lib.path(), "a.png", [1, 2, 3]);
    write_solid_png(lib.path(), "b.jpg", [4, 5, 6]);

    let first = index_once(lib.path(), &cache, 2);
    assert_eq!(first.processed, 2);

    // Unchanged library: the scanner must report 100% cache hits and emit
    // zero new work, so no image is decoded again.
    cache.reconcile().unwrap();
    let rescan = scan_library(lib.path(), &cache).unwrap();
    assert_eq!(rescan.cache_hits, 2);
    assert!(rescan.pending.is_empty());

    let second = pipeline::run(&cache, rescan.pending, 2, |_| {}).unwrap();
    assert_eq!(second.processed, 0);
}

#[test]
fn corrupt_image_is_logged_not_cached() {
    let lib = TempDir::new().unwrap();
    let db = TempDir::new().unwrap();
    let cache = TileCache::open(&db.path().join("database.bin")).unwrap();

    let corrupt = lib.path().join("broken.png");
    std::fs::write(&corrupt, b"\x89PNG\r\n\x1a\xff\xff\xff truncated").unwrap();
    let corrupt = corrupt.canonicalize().unwrap();
    write_solid_png(lib.path(), "ok.png", [9, 9, 9]);

    let outcome = index_once(lib.path(), &cache, 2);
    assert_eq!(outcome.processed, 2);
    assert_eq!(outcome.succeeded, 1);
    assert_eq!(outcome.failed, 1);
    assert!(!cache.contains(&corrupt).unwrap());
}

#[test]
fn wide_image_average_is_center_color() {
    let lib = TempDir::new().unwrap();
    let db = TempDir::new().unwrap();
    let cache = TileCache::open(&db.path().join("database.bin")).unwrap();

    // 20x10: white border columns, distinct 10x10 center block. The crop
    // must exclude the border entirely.
    let mut img = RgbImage::from_pixel(20, 10, ImgRgb([255, 255, 255]));
    for y in 0..10 {
        for x in 5..15 {
            img.put_pixel(x, y, ImgRgb([30, 60, 90]));
        }
    }
    let path = lib.path().join("wide.png");
    img.save(&path).unwrap();
    let path = path.canonicalize().unwrap();

    index_once(lib.path(), &cache, 1);
    assert_eq!(cache.get(&path).unwrap(), Some(Rgb::new(30, 60, 90)));
}

#[test]
fn deleted_file_is_reconciled_out_of_cache_and_index() {
    let lib = TempDir::new().unwrap();
    let db = TempDir::new().unwrap();
    let db_path = db.path().join("database.bin");

    let doomed;
    {
        let cache = TileCache::open(&db_path).unwrap();
        doomed = write_solid_png(lib.path(), "doomed.png", [50, 50, 50]);
        write_solid_png(lib.path(), "keeper.png", [100, 100, 100]);
        index_once(lib.path(), &cache, 2);
        assert!(cache.contains(&doomed).unwrap());
    }

    std::fs::remove_file(&doomed).unwrap();

    // Next run: reconciliation drops the stale entry before the index is
    // populated, so no bucket references the deleted path.
    let cache = TileCache::open(&db_path).unwrap();
    index_once(lib.path(), &cache, 2);
    assert!(!cache.contains(&doomed).unwrap());

    let index = build_color_index(&cache).unwrap();
    assert!(!index.references(&doomed));
    assert_eq!(index.total_files(), 1);
}

#[test]
fn live_workers_never_exceed_budget_plus_writer() {
    let lib = TempDir::new().unwrap();
    let db = TempDir::new().unwrap();
    let cache = TileCache::open(&db.path().join("database.bin")).unwrap();

    for i in 0..12u8 {
        write_solid_png(lib.path(), &format!("t{i}.png"), [i, i, i]);
    }

    cache.reconcile().unwrap();
    let scan = scan_library(lib.path(), &cache).unwrap();

    // Budget of 2 workers plus the writer's slot: the live counter must
    // never read above 3 at any sampling point, and in particular must
    // never underflow into an absurd value.
    let budget = 2;
    let mut max_live = 0usize;
    let outcome = pipeline::run(&cache, scan.pending, budget, |counters| {
        max_live = max_live.max(counters.live_workers());
    })
    .unwrap();

    assert_eq!(outcome.processed, 12);
    assert!(
        max_live <= budget + 1,
        "observed {max_live} live workers with budget {budget}"
    );
}

#[test]
fn bucket_sum_matches_cache_entry_count() {
    let lib = TempDir::new().unwrap();
    let db = TempDir::new().unwrap();
    let cache = TileCache::open(&db.path().join("database.bin")).unwrap();

    for (i, color) in [[255u8, 0, 0], [255, 0, 0], [0, 255, 0], [12, 34, 56]]
        .iter()
        .enumerate()
    {
        write_solid_png(lib.path(), &format!("t{i}.png"), *color);
    }

    index_once(lib.path(), &cache, 3);

    let index = build_color_index(&cache).unwrap();
    let bucket_sum: usize = index.iter().map(|(_, files)| files.len()).sum();
    assert_eq!(bucket_sum, cache.len().unwrap() as usize);
    assert_eq!(index.total_files(), bucket_sum);
    assert_eq!(index.candidates(Rgb::new(255, 0, 0)).len(), 2);
}
