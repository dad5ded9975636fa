use super::Viewer;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Outcome of classifying one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Allowed,
    Blocked,
    /// Not yet classified. Treated as allowed: new content is shown by
    /// default on the assumption that background classification will tag it
    /// before the next poll.
    Unknown,
}

#[derive(Debug, Error)]
pub enum OracleError {
    /// The classification backend is gone entirely. Treated as a filter-wide
    /// failure rather than a per-image one.
    #[error("classification backend unavailable: {0}")]
    Unavailable(String),

    #[error("classification failed: {0}")]
    Failed(String),
}

/// Capability interface to the external restricted-content classifier.
///
/// Implementations are injected at startup; there is no runtime probing for
/// an oracle. `None` at the filter level means the feature is absent.
#[async_trait]
pub trait ClassificationOracle: Send + Sync {
    /// Whether restricted-content filtering applies to this (named) viewer.
    /// Anonymous viewers are enforced unconditionally and never reach this.
    async fn restriction_enforced(&self, viewer: &Viewer) -> Result<bool, OracleError>;

    /// True when `classify_fast` is backed by precomputed data and should be
    /// preferred over a full scan.
    fn supports_fast_check(&self) -> bool {
        false
    }

    /// Non-scanning classification from precomputed data. The default is
    /// `Unknown` for oracles that cannot answer without scanning.
    async fn classify_fast(&self, path: &Path) -> Result<Classification, OracleError> {
        let _ = path;
        Ok(Classification::Unknown)
    }

    /// Full classification of the image at `path`.
    async fn classify(&self, path: &Path) -> Result<Classification, OracleError>;

    fn name(&self) -> &str;
}

pub type DynOracle = Arc<dyn ClassificationOracle>;

/// No-op oracle: never enforces, allows everything. Useful as an explicit
/// stand-in when wiring the filter without a real classifier.
pub struct NullOracle;

impl NullOracle {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClassificationOracle for NullOracle {
    async fn restriction_enforced(&self, viewer: &Viewer) -> Result<bool, OracleError> {
        debug!(
            "null oracle: no enforcement for {}",
            viewer.name().unwrap_or("anonymous")
        );
        Ok(false)
    }

    async fn classify(&self, path: &Path) -> Result<Classification, OracleError> {
        debug!("null oracle: allowing {:?}", path);
        Ok(Classification::Allowed)
    }

    fn name(&self) -> &str {
        "Null Classification Oracle (Allow All)"
    }
}
