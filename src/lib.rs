pub mod cache;
pub mod color;
pub mod error;
pub mod index;
pub mod logging;
pub mod pipeline;
pub mod report;
pub mod scanner;

pub use cache::{CacheWriter, ReconcileStats, TileCache};
pub use color::{average_color, nearest_palette_index, PaletteColor, Rgb, PALETTE};
pub use error::{IndexError, Result};
pub use index::{build_color_index, ColorIndex, SizeClass, COLOR_SPACE_SIZE};
pub use pipeline::{Counters, PipelineOutcome};
pub use report::{log_index_summary, ProgressReporter};
pub use scanner::{scan_library, ScanOutcome, IMAGE_EXTENSIONS};
