mod cancellation;
mod handle;
mod launcher;
mod types;

pub use cancellation::{CancellationToken, StopSignal};
pub use handle::WorkerHandle;
pub use launcher::{CollectorLauncher, CollectorProcess, CommandLauncher, LaunchedCollector};
pub use types::{ActivityClock, CollectorExit, WorkerEvent, WorkerFailure, WorkerOptions};
