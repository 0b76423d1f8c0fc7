//! The indexing pipeline: a bounded pool of worker threads computing average
//! colors, fed by an admission-controlled driver loop, drained by a single
//! persistence-writer thread that commits to the cache in submission order.
//!
//! Thread roles:
//! - driver: iterates the work list once, admitting items into the pool with
//!   a short retry backoff when the pool is saturated;
//! - workers (N): each processes one image at a time, marks its slot done and
//!   never touches another slot;
//! - writer: walks the work list from index 0, waits for each slot to settle,
//!   and commits successful records. Commits are strictly in submission
//!   order even when workers finish out of order, so the saved cursor is a
//!   durable prefix of the work list.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, TrySendError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::cache::{CacheWriter, TileCache};
use crate::color::{average_color, Rgb};
use crate::error::{IndexError, Result};

/// Backoff while the pool rejects admission, and the writer's re-check
/// interval while the slot at its cursor is still in flight.
const ADMISSION_RETRY: Duration = Duration::from_millis(10);
const WRITER_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct SlotState {
    done: bool,
    /// `Some` only when the worker succeeded; carries the averaged color.
    color: Option<Rgb>,
}

/// One entry of the work list. The assigned worker is the sole mutator
/// until `done` is set; afterwards the slot is read-only and observed
/// exactly once by the writer.
pub struct WorkSlot {
    path: PathBuf,
    state: Mutex<SlotState>,
    settled: Condvar,
}

impl WorkSlot {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: Mutex::new(SlotState::default()),
            settled: Condvar::new(),
        }
    }

    fn mark_done(&self, color: Option<Rgb>) {
        let mut state = lock_recovering(&self.state);
        state.done = true;
        state.color = color;
        drop(state);
        self.settled.notify_all();
    }

    /// Block (with periodic timeout re-checks) until the slot settles,
    /// returning the successful color if there is one.
    fn wait_settled(&self) -> Option<Rgb> {
        let mut state = lock_recovering(&self.state);
        while !state.done {
            state = match self.settled.wait_timeout(state, WRITER_POLL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        state.color
    }
}

fn lock_recovering<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Shared pipeline counters. Mutated by workers and the writer, read
/// lock-free by the reporter; eventually-consistent reads are fine for
/// telemetry.
#[derive(Debug)]
pub struct Counters {
    /// Writer thread (1) plus every dispatched-but-unfinished item.
    live_workers: AtomicUsize,
    processed: AtomicUsize,
    succeeded: AtomicUsize,
    bytes_done: AtomicU64,
    /// The writer's cursor: length of the durably committed prefix.
    saved: AtomicUsize,
}

impl Counters {
    fn new() -> Self {
        Self {
            // The writer holds a budget slot from the start.
            live_workers: AtomicUsize::new(1),
            processed: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            bytes_done: AtomicU64::new(0),
            saved: AtomicUsize::new(0),
        }
    }

    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::Relaxed)
    }
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::Relaxed)
    }
    pub fn bytes_done(&self) -> u64 {
        self.bytes_done.load(Ordering::Relaxed)
    }
    pub fn saved(&self) -> usize {
        self.saved.load(Ordering::Relaxed)
    }
}

/// Final tallies of one pipeline run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOutcome {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub bytes_done: u64,
}

/// Run the full scheduler + writer over `pending`, calling `on_tick` once
/// per driver iteration so the caller can report progress.
///
/// Per-item failures are contained: a file that cannot be opened or decoded
/// is logged, marked done-but-failed, and excluded from persistence; the
/// run itself only fails if the writer's cache connection cannot be opened.
pub fn run<F>(
    cache: &TileCache,
    pending: Vec<PathBuf>,
    worker_budget: usize,
    mut on_tick: F,
) -> Result<PipelineOutcome>
where
    F: FnMut(&Counters),
{
    let total = pending.len();
    let slots: Arc<Vec<WorkSlot>> = Arc::new(pending.into_iter().map(WorkSlot::new).collect());
    let counters = Arc::new(Counters::new());

    let cache_writer = cache.writer()?;
    let writer_handle = {
        let slots = Arc::clone(&slots);
        let counters = Arc::clone(&counters);
        thread::spawn(move || run_writer(&slots, &cache_writer, &counters))
    };

    // Rendezvous channel: admission succeeds only when a worker is parked
    // waiting, so dispatched items never pile up beyond the budget.
    let (tx, rx) = mpsc::sync_channel::<usize>(0);
    let rx = Arc::new(Mutex::new(rx));

    let mut worker_handles = Vec::with_capacity(worker_budget);
    for _ in 0..worker_budget.max(1) {
        let slots = Arc::clone(&slots);
        let counters = Arc::clone(&counters);
        let rx = Arc::clone(&rx);
        worker_handles.push(thread::spawn(move || loop {
            let next = lock_recovering(&rx).recv();
            match next {
                Ok(i) => run_worker(&slots[i], &counters),
                Err(_) => break,
            }
        }));
    }

    // Admission loop: one pass over the work list, retrying the same item
    // under backpressure. Terminates when the live counter returns to zero,
    // i.e. every dispatched item finished and the writer drained the list.
    let mut next = 0;
    loop {
        if next < total {
            // Count the item before handing it off: the worker's decrement
            // must never be able to precede our increment, or the counter
            // would transiently underflow.
            counters.live_workers.fetch_add(1, Ordering::Relaxed);
            match tx.try_send(next) {
                Ok(()) => next += 1,
                Err(TrySendError::Full(_)) => {
                    counters.live_workers.fetch_sub(1, Ordering::Relaxed);
                    thread::sleep(ADMISSION_RETRY);
                }
                Err(TrySendError::Disconnected(_)) => {
                    counters.live_workers.fetch_sub(1, Ordering::Relaxed);
                    break;
                }
            }
        } else {
            thread::sleep(ADMISSION_RETRY);
        }

        on_tick(&counters);

        if counters.live_workers.load(Ordering::Relaxed) == 0 {
            break;
        }
    }

    drop(tx);
    for handle in worker_handles {
        let _ = handle.join();
    }
    let _ = writer_handle.join();

    let outcome = PipelineOutcome {
        processed: counters.processed(),
        succeeded: counters.succeeded(),
        failed: counters.processed().saturating_sub(counters.succeeded()),
        bytes_done: counters.bytes_done(),
    };
    info!(
        processed = outcome.processed,
        succeeded = outcome.succeeded,
        failed = outcome.failed,
        "pipeline settled"
    );
    Ok(outcome)
}

/// Process one slot. The whole computation sits behind a panic boundary so
/// a malformed image can never take down the pool; the slot is always
/// marked done and the budget slot always released.
fn run_worker(slot: &WorkSlot, counters: &Counters) {
    let result = catch_unwind(AssertUnwindSafe(|| compute_tile_color(&slot.path)));

    let color = match result {
        Ok((bytes, Ok(color))) => {
            counters.bytes_done.fetch_add(bytes, Ordering::Relaxed);
            counters.succeeded.fetch_add(1, Ordering::Relaxed);
            Some(color)
        }
        Ok((bytes, Err(e))) => {
            counters.bytes_done.fetch_add(bytes, Ordering::Relaxed);
            warn!(path = %slot.path.display(), error = %e, "image processing failed");
            None
        }
        Err(_) => {
            error!(path = %slot.path.display(), "image processing panicked");
            None
        }
    };

    slot.mark_done(color);
    counters.processed.fetch_add(1, Ordering::Relaxed);
    counters.live_workers.fetch_sub(1, Ordering::Relaxed);
}

/// Open, decode, and average one image. Returns the byte count alongside the
/// result so throughput accounting covers decode failures whose stat
/// succeeded.
fn compute_tile_color(path: &Path) -> (u64, Result<Rgb>) {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) => {
            return (
                0,
                Err(IndexError::FileAccess(format!("{}: {e}", path.display()))),
            )
        }
    };
    let bytes = meta.len();

    let img = match image::open(path) {
        Ok(img) => img,
        Err(e) => return (bytes, Err(IndexError::Decode(e))),
    };

    (bytes, Ok(average_color(&img)))
}

/// Writer thread body: drain the work list in submission order, committing
/// each successful record. A commit failure drops that single record and
/// the writer moves on.
fn run_writer(slots: &[WorkSlot], cache_writer: &CacheWriter, counters: &Counters) {
    for (i, slot) in slots.iter().enumerate() {
        if let Some(color) = slot.wait_settled() {
            if let Err(e) = cache_writer.put(&slot.path, color) {
                error!(path = %slot.path.display(), error = %e, "cache commit failed, record dropped");
            }
        }
        counters.saved.store(i + 1, Ordering::Relaxed);
    }
    counters.live_workers.fetch_sub(1, Ordering::Relaxed);
}
