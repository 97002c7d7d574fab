//! Transfer producers driven by the benchmark runner.
//!
//! A transfer moves data once (one GET, one POST) and reports every chunk
//! it moves through a [`ChunkSink`]. It stops early when the sink says time
//! is up.

#[cfg(test)]
pub mod fixture;
mod http;
mod junk;
#[cfg(test)]
pub mod mock;

use thiserror::Error;

use crate::bench::{ChunkSink, TimeExpired};

pub use http::{build_client, DownloadTransfer, UploadTransfer};
pub use junk::{CallbackReader, JunkReader};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),
    #[error("transfer I/O failed")]
    Io(#[from] std::io::Error),
    #[error("server responded with status {status}")]
    Status { status: reqwest::StatusCode },
    /// The run stopped accepting work mid-transfer. Not a failure.
    #[error(transparent)]
    TimeExpired(#[from] TimeExpired),
}

pub trait Transfer: Send + Sync {
    /// Run one transfer to completion, reporting each chunk to `sink`.
    ///
    /// Returns `Ok` on end of stream or when `sink` signalled expiry.
    fn run_once(&self, sink: &ChunkSink) -> Result<(), TransferError>;
}
