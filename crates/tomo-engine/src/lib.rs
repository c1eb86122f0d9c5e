//! # tomo-engine
//!
//! Measures the quality of experience a video player would get from a
//! specific cache server. A session downloads the media over HTTP for a
//! bounded wall-clock budget, rebuilds the media timeline from container
//! tags (or from the byte count and encoding rate when the container has
//! none to offer) and emulates a player's buffer to count stalls.
//!
//! ```no_run
//! use tomo_engine::{Downloader, EngineConfig, SessionOutcome};
//!
//! # async fn measure() -> Result<(), tomo_engine::DownloadError> {
//! let downloader = Downloader::new(EngineConfig::default())?;
//! match downloader.run("http://cache.example/videoplayback", None, 30.0).await? {
//!     SessionOutcome::Completed(result) => println!("{} stalls", result.interruptions),
//!     SessionOutcome::Redirected { redirect_url, .. } => println!("moved to {redirect_url:?}"),
//!     SessionOutcome::Unreachable { status_code } => println!("unreachable: {status_code:?}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod media;
pub mod playback;
pub mod probe;
pub mod result;
pub mod session;
pub mod throughput;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use connection::{Connection, ConnectionManager, OpenStream};
pub use error::{ContainerError, DownloadError};
pub use media::{MediaTag, MediaTagSource, TimestampStrategy};
pub use playback::{PlaybackEmulator, PlaybackState, PlaybackThresholds};
pub use probe::{ContainerProber, MediaInfo, MetadataProber, ProbeOutcome};
pub use result::{DownloadResult, SessionOutcome};
pub use session::{Downloader, SessionReport, TagSourceFactory};
