use std::time::Duration;

use thiserror::Error;

/// An error produced while loading a cache entry.
///
/// This error enum is intended to be fanned out to every caller waiting on the
/// same load, which is why it is `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The upstream call backing this entry failed.
    ///
    /// The attached string contains the upstream's error message.
    #[error("upstream request failed: {0}")]
    Upstream(String),
    /// The upstream call backing this entry did not complete in time.
    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),
    /// The task performing the load went away without producing a result.
    ///
    /// This can only happen during shutdown, when the runtime drops the
    /// spawned load before it settles.
    #[error("load was cancelled")]
    Cancelled,
}

/// The contents of a cache lookup, either `Ok(T)` or an error denoting the
/// reason why the value could not be loaded.
pub type CacheContents<T = ()> = Result<T, CacheError>;
