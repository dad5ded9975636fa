// Access filtering: narrows image lists to what a viewer may see, consulting
// an external classification oracle through two layers of TTL-bounded caches.
mod oracle;
mod viewer;

pub use oracle::{Classification, ClassificationOracle, DynOracle, NullOracle, OracleError};
pub use viewer::{
    Viewer, create_signed_cookie, is_authenticated, verify_signed_cookie, viewer_cookie_header,
};

use crate::catalog::ImageRecord;
use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Permission filter over catalog records.
///
/// Two caches sit in front of the oracle: a per-image decision cache keyed by
/// absolute path (long TTL; decisions are viewer-independent), and a
/// per-request result cache keyed by viewer identity plus a fingerprint of
/// the candidate set (short TTL, because the underlying catalog mutates).
pub struct AccessFilter {
    oracle: Option<DynOracle>,
    decisions: Cache<String, bool>,
    requests: Cache<(String, String), Arc<Vec<String>>>,
}

impl AccessFilter {
    pub fn new(oracle: Option<DynOracle>, config: &crate::AccessConfig) -> Self {
        let decisions = Cache::builder()
            .max_capacity(config.content_cache_capacity)
            .time_to_live(Duration::from_secs(config.content_cache_ttl_secs))
            .build();
        let requests = Cache::builder()
            .max_capacity(config.request_cache_capacity)
            .time_to_live(Duration::from_secs(config.request_cache_ttl_secs))
            .build();
        Self {
            oracle,
            decisions,
            requests,
        }
    }

    pub fn oracle_name(&self) -> Option<&str> {
        self.oracle.as_deref().map(ClassificationOracle::name)
    }

    /// Narrow `records` to the subset `viewer` may see, preserving order.
    /// Never fails: every error path resolves to a policy outcome.
    pub async fn filter_records(
        &self,
        viewer: &Viewer,
        records: Vec<ImageRecord>,
        root: &Path,
    ) -> Vec<ImageRecord> {
        let paths: Vec<String> = records
            .iter()
            .map(|record| record.relative_path.clone())
            .collect();
        let allowed = self.filter_paths(viewer, paths, root).await;
        let allowed: std::collections::HashSet<String> = allowed.into_iter().collect();
        records
            .into_iter()
            .filter(|record| allowed.contains(&record.relative_path))
            .collect()
    }

    /// Single-image gate for the serving path.
    pub async fn permits(&self, viewer: &Viewer, relative_path: &str, root: &Path) -> bool {
        let allowed = self
            .filter_paths(viewer, vec![relative_path.to_string()], root)
            .await;
        !allowed.is_empty()
    }

    /// Core of the filter, operating on relative paths.
    pub async fn filter_paths(
        &self,
        viewer: &Viewer,
        paths: Vec<String>,
        root: &Path,
    ) -> Vec<String> {
        // Without an oracle the feature is absent: fail open.
        let Some(oracle) = self.oracle.clone() else {
            return paths;
        };

        match self.filter_inner(&oracle, viewer, &paths, root).await {
            Ok(allowed) => allowed,
            Err(e) => {
                // Filter-wide failure: anonymous viewers see nothing, named
                // viewers see everything. Intentionally asymmetric.
                error!("access filter failed ({}), applying failure policy", e);
                if viewer.is_anonymous() {
                    Vec::new()
                } else {
                    paths
                }
            }
        }
    }

    async fn filter_inner(
        &self,
        oracle: &DynOracle,
        viewer: &Viewer,
        paths: &[String],
        root: &Path,
    ) -> Result<Vec<String>, OracleError> {
        let request_key = (viewer.cache_key(), fingerprint(paths));
        if let Some(allowed) = self.requests.get(&request_key).await {
            return Ok(allowed.as_ref().clone());
        }

        // Anonymous viewers are always enforced. For named viewers the oracle
        // decides; if that check itself errors, default to enforced.
        let enforced = if viewer.is_anonymous() {
            true
        } else {
            match oracle.restriction_enforced(viewer).await {
                Ok(enforced) => enforced,
                Err(e) => {
                    warn!(
                        "enforcement check failed for {}, defaulting to enforced: {}",
                        viewer.cache_key(),
                        e
                    );
                    true
                }
            }
        };

        if !enforced {
            let allowed = paths.to_vec();
            self.requests
                .insert(request_key, Arc::new(allowed.clone()))
                .await;
            return Ok(allowed);
        }

        let mut allowed = Vec::with_capacity(paths.len());
        for path in paths {
            let absolute = root.join(path);
            match self.is_blocked(oracle, &absolute).await {
                Ok(true) => {
                    debug!("filtered restricted image {}", path);
                }
                Ok(false) => allowed.push(path.clone()),
                // Backend gone entirely: escalate to the filter-wide policy.
                Err(e @ OracleError::Unavailable(_)) => return Err(e),
                Err(e) => {
                    // Per-image failure: exclude for anonymous viewers,
                    // include for named ones.
                    warn!("classification of {} failed: {}", path, e);
                    if !viewer.is_anonymous() {
                        allowed.push(path.clone());
                    }
                }
            }
        }

        self.requests
            .insert(request_key, Arc::new(allowed.clone()))
            .await;
        Ok(allowed)
    }

    /// Cached per-image block decision. Decisions are resolved against an
    /// unrestricted probe and shared across viewers.
    async fn is_blocked(&self, oracle: &DynOracle, absolute: &Path) -> Result<bool, OracleError> {
        let key = absolute.to_string_lossy().into_owned();
        if let Some(blocked) = self.decisions.get(&key).await {
            return Ok(blocked);
        }

        let classification = if oracle.supports_fast_check() {
            oracle.classify_fast(absolute).await?
        } else {
            oracle.classify(absolute).await?
        };
        // Unknown means not yet classified: show it.
        let blocked = classification == Classification::Blocked;
        self.decisions.insert(key, blocked).await;
        Ok(blocked)
    }
}

/// Order-independent digest of a candidate path set.
fn fingerprint(paths: &[String]) -> String {
    let mut sorted: Vec<&str> = paths.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    for path in sorted {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockOracle {
        blocked: HashSet<String>,
        enforced_for_named: bool,
        enforcement_error: bool,
        classify_error: Option<fn() -> OracleError>,
        fast: bool,
        classify_calls: AtomicUsize,
        fast_calls: AtomicUsize,
    }

    impl MockOracle {
        fn new() -> Self {
            Self {
                blocked: HashSet::new(),
                enforced_for_named: true,
                enforcement_error: false,
                classify_error: None,
                fast: false,
                classify_calls: AtomicUsize::new(0),
                fast_calls: AtomicUsize::new(0),
            }
        }

        fn blocking(names: &[&str]) -> Self {
            let mut oracle = Self::new();
            oracle.blocked = names.iter().map(|n| n.to_string()).collect();
            oracle
        }

        fn lookup(&self, path: &Path) -> Classification {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            if self.blocked.contains(name) {
                Classification::Blocked
            } else {
                Classification::Allowed
            }
        }
    }

    #[async_trait]
    impl ClassificationOracle for MockOracle {
        async fn restriction_enforced(&self, _viewer: &Viewer) -> Result<bool, OracleError> {
            if self.enforcement_error {
                return Err(OracleError::Failed("enforcement lookup broke".into()));
            }
            Ok(self.enforced_for_named)
        }

        fn supports_fast_check(&self) -> bool {
            self.fast
        }

        async fn classify_fast(&self, path: &Path) -> Result<Classification, OracleError> {
            self.fast_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.lookup(path))
        }

        async fn classify(&self, path: &Path) -> Result<Classification, OracleError> {
            self.classify_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(make_error) = self.classify_error {
                return Err(make_error());
            }
            Ok(self.lookup(path))
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn filter_with(oracle: MockOracle) -> (AccessFilter, Arc<MockOracle>) {
        let oracle = Arc::new(oracle);
        let filter = AccessFilter::new(Some(oracle.clone() as DynOracle), &test_config());
        (filter, oracle)
    }

    fn test_config() -> crate::AccessConfig {
        crate::AccessConfig {
            content_cache_capacity: 64,
            content_cache_ttl_secs: 3600,
            request_cache_capacity: 16,
            request_cache_ttl_secs: 60,
        }
    }

    fn paths(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn no_oracle_fails_open() {
        let filter = AccessFilter::new(None, &test_config());
        let root = Path::new("/out");
        let result = filter
            .filter_paths(&Viewer::Anonymous, paths(&["a.png", "b.png"]), root)
            .await;
        assert_eq!(result, paths(&["a.png", "b.png"]));
    }

    #[tokio::test]
    async fn anonymous_viewer_loses_blocked_images() {
        let (filter, _) = filter_with(MockOracle::blocking(&["x.png"]));
        let root = Path::new("/out");
        let result = filter
            .filter_paths(&Viewer::Anonymous, paths(&["a.png", "x.png"]), root)
            .await;
        assert_eq!(result, paths(&["a.png"]));
        assert!(!filter.permits(&Viewer::Anonymous, "x.png", root).await);
        assert!(filter.permits(&Viewer::Anonymous, "a.png", root).await);
    }

    #[tokio::test]
    async fn named_viewer_with_enforcement_disabled_sees_everything() {
        let mut oracle = MockOracle::blocking(&["x.png"]);
        oracle.enforced_for_named = false;
        let (filter, oracle) = filter_with(oracle);
        let root = Path::new("/out");

        let viewer = Viewer::Named("alice".to_string());
        let result = filter
            .filter_paths(&viewer, paths(&["a.png", "x.png"]), root)
            .await;
        assert_eq!(result, paths(&["a.png", "x.png"]));
        // With enforcement off, no image is ever classified.
        assert_eq!(oracle.classify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn named_viewer_with_enforcement_enabled_is_filtered() {
        let (filter, _) = filter_with(MockOracle::blocking(&["x.png"]));
        let root = Path::new("/out");
        let viewer = Viewer::Named("alice".to_string());
        let result = filter
            .filter_paths(&viewer, paths(&["a.png", "x.png"]), root)
            .await;
        assert_eq!(result, paths(&["a.png"]));
    }

    #[tokio::test]
    async fn enforcement_check_error_fails_closed() {
        let mut oracle = MockOracle::blocking(&["x.png"]);
        oracle.enforcement_error = true;
        let (filter, _) = filter_with(oracle);
        let root = Path::new("/out");

        let viewer = Viewer::Named("alice".to_string());
        let result = filter
            .filter_paths(&viewer, paths(&["a.png", "x.png"]), root)
            .await;
        // Enforcement could not be resolved, so filtering applied anyway.
        assert_eq!(result, paths(&["a.png"]));
    }

    #[tokio::test]
    async fn per_image_error_is_asymmetric_by_viewer() {
        let mut oracle = MockOracle::new();
        oracle.classify_error = Some(|| OracleError::Failed("scan crashed".into()));
        let (filter, _) = filter_with(oracle);
        let root = Path::new("/out");

        let anonymous = filter
            .filter_paths(&Viewer::Anonymous, paths(&["a.png"]), root)
            .await;
        assert!(anonymous.is_empty());

        let named = filter
            .filter_paths(&Viewer::Named("alice".to_string()), paths(&["a.png"]), root)
            .await;
        assert_eq!(named, paths(&["a.png"]));
    }

    #[tokio::test]
    async fn backend_unavailable_applies_filter_wide_policy() {
        let mut oracle = MockOracle::new();
        oracle.classify_error = Some(|| OracleError::Unavailable("backend gone".into()));
        let (filter, _) = filter_with(oracle);
        let root = Path::new("/out");

        let anonymous = filter
            .filter_paths(&Viewer::Anonymous, paths(&["a.png", "b.png"]), root)
            .await;
        assert!(anonymous.is_empty());

        let named = filter
            .filter_paths(
                &Viewer::Named("alice".to_string()),
                paths(&["a.png", "b.png"]),
                root,
            )
            .await;
        assert_eq!(named, paths(&["a.png", "b.png"]));
    }

    #[tokio::test]
    async fn repeated_requests_hit_the_request_cache() {
        let (filter, oracle) = filter_with(MockOracle::blocking(&["x.png"]));
        let root = Path::new("/out");
        let candidates = paths(&["a.png", "x.png"]);

        let first = filter
            .filter_paths(&Viewer::Anonymous, candidates.clone(), root)
            .await;
        let calls_after_first = oracle.classify_calls.load(Ordering::SeqCst);
        let second = filter
            .filter_paths(&Viewer::Anonymous, candidates, root)
            .await;

        assert_eq!(first, second);
        assert_eq!(
            oracle.classify_calls.load(Ordering::SeqCst),
            calls_after_first
        );
    }

    #[tokio::test]
    async fn decision_cache_is_shared_across_viewers() {
        let (filter, oracle) = filter_with(MockOracle::blocking(&["x.png"]));
        let root = Path::new("/out");

        filter
            .filter_paths(&Viewer::Anonymous, paths(&["a.png", "x.png"]), root)
            .await;
        let calls = oracle.classify_calls.load(Ordering::SeqCst);

        // Different viewer, same images: request cache misses (different
        // key), but per-image decisions are already cached.
        filter
            .filter_paths(
                &Viewer::Named("alice".to_string()),
                paths(&["a.png", "x.png"]),
                root,
            )
            .await;
        assert_eq!(oracle.classify_calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn fast_variant_is_preferred_when_offered() {
        let mut oracle = MockOracle::blocking(&["x.png"]);
        oracle.fast = true;
        let (filter, oracle) = filter_with(oracle);
        let root = Path::new("/out");

        let result = filter
            .filter_paths(&Viewer::Anonymous, paths(&["a.png", "x.png"]), root)
            .await;
        assert_eq!(result, paths(&["a.png"]));
        assert!(oracle.fast_calls.load(Ordering::SeqCst) > 0);
        assert_eq!(oracle.classify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_classification_is_shown() {
        struct UnknownOracle;

        #[async_trait]
        impl ClassificationOracle for UnknownOracle {
            async fn restriction_enforced(&self, _viewer: &Viewer) -> Result<bool, OracleError> {
                Ok(true)
            }
            async fn classify(&self, _path: &Path) -> Result<Classification, OracleError> {
                Ok(Classification::Unknown)
            }
            fn name(&self) -> &str {
                "unknown"
            }
        }

        let filter = AccessFilter::new(Some(Arc::new(UnknownOracle)), &test_config());
        let result = filter
            .filter_paths(&Viewer::Anonymous, paths(&["new.png"]), Path::new("/out"))
            .await;
        assert_eq!(result, paths(&["new.png"]));
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let a = fingerprint(&paths(&["a.png", "b.png"]));
        let b = fingerprint(&paths(&["b.png", "a.png"]));
        let c = fingerprint(&paths(&["a.png", "c.png"]));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
