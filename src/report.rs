//! Progress and summary reporting.
//!
//! While the scheduler runs, one structured log line per second carries
//! throughput, ETA, live workers, the writer's saved cursor, and byte
//! throughput; an indicatif bar mirrors the same numbers on stderr. After
//! the run settles, the color index is summarized as a bucket-population
//! histogram plus a nearest-palette distribution.

use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::color::{nearest_palette_index, PALETTE};
use crate::index::{ColorIndex, COLOR_SPACE_SIZE};
use crate::pipeline::Counters;

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

pub struct ProgressReporter {
    total: usize,
    begin: Instant,
    last: Instant,
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} {prefix:.cyan.bold} [{bar:35.green}] {percent:>3}% {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░"),
        );
        bar.set_prefix("Indexing");
        Self {
            total,
            begin: Instant::now(),
            last: Instant::now(),
            bar,
        }
    }

    /// Emit one telemetry line if the report interval has elapsed. Called
    /// from the driver loop on every iteration; cheap when below interval.
    pub fn tick(&mut self, counters: &Counters) {
        if self.last.elapsed() < REPORT_INTERVAL {
            return;
        }
        self.last = Instant::now();

        let processed = counters.processed();
        let elapsed_secs = self.begin.elapsed().as_secs().max(1);
        let speed = processed as u64 / elapsed_secs;
        let percent = if self.total > 0 {
            processed * 100 / self.total
        } else {
            100
        };
        let eta = if speed > 0 {
            format_duration(Duration::from_secs(
                (self.total.saturating_sub(processed)) as u64 / speed,
            ))
        } else {
            String::new()
        };
        let done_mb = counters.bytes_done() / 1024 / 1024;
        let data_speed = done_mb / elapsed_secs;

        info!(
            speed_per_sec = speed,
            percent,
            eta = %eta,
            workers = counters.live_workers(),
            processed,
            total = self.total,
            saved = counters.saved(),
            data_mb = done_mb,
            data_mb_per_sec = data_speed,
            "indexing progress"
        );

        self.bar.set_position(processed as u64);
        self.bar
            .set_message(format!("{speed}/s saved={} {eta}", counters.saved()));
    }

    pub fn finish(self) {
        self.bar.finish_and_clear();
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}

/// Post-run summary: bucket-population histogram (the empty class is
/// implicit in the sparse index and reported as the remainder of the color
/// space) and per-palette nearest-match counts.
pub fn log_index_summary(index: &ColorIndex) {
    info!(
        tiles = index.total_files(),
        buckets = index.populated_buckets(),
        max_bucket = index.max_population(),
        "color index built"
    );

    info!(
        population = 0,
        buckets = COLOR_SPACE_SIZE - index.populated_buckets(),
        "bucket population distribution"
    );
    for (population, class) in index.population_histogram() {
        if class.buckets == 1 {
            info!(
                population,
                buckets = class.buckets,
                color = %class.sample,
                "bucket population distribution"
            );
        } else {
            info!(population, buckets = class.buckets, "bucket population distribution");
        }
    }

    let mut palette_counts = vec![0usize; PALETTE.len()];
    for (color, _) in index.iter() {
        palette_counts[nearest_palette_index(color)] += 1;
    }
    for (pc, count) in PALETTE.iter().zip(palette_counts) {
        info!(name = pc.name, count, "palette color distribution");
    }
}
