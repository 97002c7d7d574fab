use std::time::Duration;

use thiserror::Error;

use crate::transfer::TransferError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("initial concurrency must be at least 1")]
    NoConcurrency,
    #[error("maximum concurrency {max} is below initial concurrency {initial}")]
    CeilingBelowInitial { initial: usize, max: usize },
    #[error("benchmark duration must be greater than zero")]
    ZeroDuration,
    #[error("sample resolution {resolution:?} must be non-zero and no longer than the duration {duration:?}")]
    BadResolution { resolution: Duration, duration: Duration },
    #[error("benchmark duration {duration:?} is too long")]
    DurationTooLong { duration: Duration },
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid benchmark configuration")]
    Config(#[from] ConfigError),
    #[error("transfer failed during benchmark")]
    Transfer(#[source] TransferError),
    #[error("no transfer completed before every slot failed ({failed} failures)")]
    NoSuccessfulTransfers {
        failed: usize,
        #[source]
        last: TransferError,
    },
    #[error("benchmark interrupted")]
    Interrupted,
}
