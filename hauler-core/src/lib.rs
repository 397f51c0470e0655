pub mod downloader;
pub mod errors;
pub mod event;
pub mod http;
pub mod logging;
pub mod metric;
pub mod parallel;
pub mod pump;
pub mod range;
pub mod resolver;
pub mod result;
pub mod settings;
pub mod storage;

pub use downloader::{Destination, Downloader};
pub use errors::{HaulerError, Result};
pub use event::{spawn_observer, EventReceiver, EventSender, FetchState, TransferEvent};
pub use metric::{TimeUnit, TransferMetric};
pub use resolver::{DefaultPathResolver, FileType, PathResolver};
pub use result::{Delivered, SizeClamp, TransferOutcome, TransferResult};
pub use settings::{EngineConfig, Settings, SettingsProvider};
pub use tokio_util::sync::CancellationToken;
