pub mod error;
pub mod handler;
pub mod progress;
pub mod target;

pub use error::FetchError;
pub use handler::{DownloadHandler, FetchOutcome, FileFetcher, DEFAULT_CHUNK_SIZE};
pub use progress::{
    BarProgress, NoProgress, ProgressObserver, ProgressThrottler, TracingProgress,
    TransferProgress,
};
pub use target::{local_filename, sanitize_component, DownloadTarget};
