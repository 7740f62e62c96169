use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use promgate_cache::{CacheContents, CacheError};
use tokio::time::sleep;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use super::*;

/// Sets up the test logger so that console output is captured by the test
/// runner.
fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("promgate_cf=trace,promgate_cache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Counting stand-in for the real Cloud Controller client.
///
/// With `timeout` set, every operation records its call and resolves to
/// [`CacheError::Timeout`].
#[derive(Default)]
struct MockAccessor {
    timeout: AtomicBool,
    org_calls: AtomicUsize,
    space_calls: AtomicUsize,
    app_calls: AtomicUsize,
    summary_calls: AtomicUsize,
    domain_calls: AtomicUsize,
}

impl MockAccessor {
    fn record(&self, counter: &AtomicUsize) -> CacheContents<()> {
        counter.fetch_add(1, Ordering::Relaxed);
        if self.timeout.load(Ordering::Relaxed) {
            Err(CacheError::Timeout(Duration::from_millis(250)))
        } else {
            Ok(())
        }
    }

    /// Call counts in operation order: org, space, apps, summary, domains.
    fn counts(&self) -> [usize; 5] {
        [
            self.org_calls.load(Ordering::Relaxed),
            self.space_calls.load(Ordering::Relaxed),
            self.app_calls.load(Ordering::Relaxed),
            self.summary_calls.load(Ordering::Relaxed),
            self.domain_calls.load(Ordering::Relaxed),
        ]
    }
}

#[async_trait]
impl CfAccessor for MockAccessor {
    async fn retrieve_org_id(&self, org_name: &str) -> CacheContents<ListOrganizationsResponse> {
        self.record(&self.org_calls)?;
        Ok(ListOrganizationsResponse {
            resources: vec![OrgResource {
                id: format!("{org_name}-id"),
                name: org_name.to_owned(),
            }],
        })
    }

    async fn retrieve_space_id(
        &self,
        _org_id: &str,
        space_name: &str,
    ) -> CacheContents<ListSpacesResponse> {
        self.record(&self.space_calls)?;
        Ok(ListSpacesResponse {
            resources: vec![SpaceResource {
                id: format!("{space_name}-id"),
                name: space_name.to_owned(),
            }],
        })
    }

    async fn retrieve_all_application_ids_in_space(
        &self,
        _org_id: &str,
        space_id: &str,
    ) -> CacheContents<ListApplicationsResponse> {
        self.record(&self.app_calls)?;
        Ok(ListApplicationsResponse {
            resources: vec![AppResource {
                id: format!("app-in-{space_id}"),
                name: "app".to_owned(),
            }],
        })
    }

    async fn retrieve_space_summary(
        &self,
        space_id: &str,
    ) -> CacheContents<GetSpaceSummaryResponse> {
        self.record(&self.summary_calls)?;
        Ok(GetSpaceSummaryResponse {
            space_id: space_id.to_owned(),
            apps: vec![AppSummary {
                id: format!("app-in-{space_id}"),
                name: "app".to_owned(),
                urls: vec!["app.example.org".to_owned()],
                instances: 2,
            }],
        })
    }

    async fn retrieve_all_domains(
        &self,
        org_id: &str,
    ) -> CacheContents<ListOrganizationDomainsResponse> {
        self.record(&self.domain_calls)?;
        Ok(ListOrganizationDomainsResponse {
            resources: vec![DomainResource {
                id: format!("domain-of-{org_id}"),
                name: "example.org".to_owned(),
                internal: false,
            }],
        })
    }
}

fn subject() -> (Arc<MockAccessor>, CfAccessorCache) {
    let mock = Arc::new(MockAccessor::default());
    let cache = CfAccessorCache::new(mock.clone(), &CacheConfig::default());
    (mock, cache)
}

/// Warms one entry in every category, using the same dummy keys the other
/// assertions use.
async fn warm_all_categories(subject: &CfAccessorCache) {
    subject.retrieve_org_id("dummy").await.await.unwrap();
    subject.retrieve_space_id("dummy1", "dummy2").await.await.unwrap();
    subject
        .retrieve_all_application_ids_in_space("dummy1", "dummy2")
        .await
        .await
        .unwrap();
    subject.retrieve_space_summary("dummy").await.await.unwrap();
    subject.retrieve_all_domains("dummy").await.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cached_retrieval() {
    setup();
    let (mock, subject) = subject();

    let response = subject.retrieve_org_id("dummy").await.await.unwrap();
    assert_eq!(response.resources[0].id, "dummy-id");

    // the second retrieval is answered from the cache
    let response = subject.retrieve_org_id("dummy").await.await.unwrap();
    assert_eq!(response.resources[0].id, "dummy-id");
    assert_eq!(mock.org_calls.load(Ordering::Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_retrievals_share_one_call() {
    setup();
    let (mock, subject) = subject();

    let (first, second) = futures::join!(
        subject.retrieve_space_summary("dummy"),
        subject.retrieve_space_summary("dummy"),
    );
    let (first, second) = futures::join!(first, second);

    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(mock.summary_calls.load(Ordering::Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_cache_applications() {
    setup();
    let (mock, subject) = subject();
    warm_all_categories(&subject).await;
    assert_eq!(mock.counts(), [1, 1, 1, 1, 1]);

    subject.invalidate_cache_applications();

    // both application maps were cleared, all other categories were not
    warm_all_categories(&subject).await;
    assert_eq!(mock.counts(), [1, 1, 2, 2, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_cache_space() {
    setup();
    let (mock, subject) = subject();
    warm_all_categories(&subject).await;
    assert_eq!(mock.counts(), [1, 1, 1, 1, 1]);

    subject.invalidate_cache_space();

    warm_all_categories(&subject).await;
    assert_eq!(mock.counts(), [1, 2, 1, 1, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_cache_org() {
    setup();
    let (mock, subject) = subject();
    warm_all_categories(&subject).await;
    assert_eq!(mock.counts(), [1, 1, 1, 1, 1]);

    subject.invalidate_cache_org();

    warm_all_categories(&subject).await;
    assert_eq!(mock.counts(), [2, 1, 1, 1, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_cache_domain() {
    setup();
    let (mock, subject) = subject();
    warm_all_categories(&subject).await;
    assert_eq!(mock.counts(), [1, 1, 1, 1, 1]);

    subject.invalidate_cache_domain();

    warm_all_categories(&subject).await;
    assert_eq!(mock.counts(), [1, 1, 1, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_not_cached_org() {
    setup();
    let (mock, subject) = subject();
    mock.timeout.store(true, Ordering::Relaxed);

    assert!(subject.retrieve_org_id("dummy").await.await.is_err());
    assert_eq!(mock.org_calls.load(Ordering::Relaxed), 1);

    // the failure left no entry behind, so the retry reaches upstream
    assert!(subject.retrieve_org_id("dummy").await.await.is_err());
    assert_eq!(mock.org_calls.load(Ordering::Relaxed), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_not_cached_space() {
    setup();
    let (mock, subject) = subject();
    mock.timeout.store(true, Ordering::Relaxed);

    assert!(subject.retrieve_space_id("dummy1", "dummy2").await.await.is_err());
    assert_eq!(mock.space_calls.load(Ordering::Relaxed), 1);

    assert!(subject.retrieve_space_id("dummy1", "dummy2").await.await.is_err());
    assert_eq!(mock.space_calls.load(Ordering::Relaxed), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_not_cached_apps_in_space() {
    setup();
    let (mock, subject) = subject();
    mock.timeout.store(true, Ordering::Relaxed);

    assert!(
        subject
            .retrieve_all_application_ids_in_space("dummy1", "dummy2")
            .await
            .await
            .is_err()
    );
    assert_eq!(mock.app_calls.load(Ordering::Relaxed), 1);

    assert!(
        subject
            .retrieve_all_application_ids_in_space("dummy1", "dummy2")
            .await
            .await
            .is_err()
    );
    assert_eq!(mock.app_calls.load(Ordering::Relaxed), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_not_cached_space_summary() {
    setup();
    let (mock, subject) = subject();
    mock.timeout.store(true, Ordering::Relaxed);

    assert!(subject.retrieve_space_summary("dummy").await.await.is_err());
    assert_eq!(mock.summary_calls.load(Ordering::Relaxed), 1);

    assert!(subject.retrieve_space_summary("dummy").await.await.is_err());
    assert_eq!(mock.summary_calls.load(Ordering::Relaxed), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_not_cached_domains() {
    setup();
    let (mock, subject) = subject();
    mock.timeout.store(true, Ordering::Relaxed);

    assert!(subject.retrieve_all_domains("dummy").await.await.is_err());
    assert_eq!(mock.domain_calls.load(Ordering::Relaxed), 1);

    assert!(subject.retrieve_all_domains("dummy").await.await.is_err());
    assert_eq!(mock.domain_calls.load(Ordering::Relaxed), 2);
}

#[tokio::test(start_paused = true)]
async fn test_recovers_after_timeout() {
    setup();
    let (mock, subject) = subject();

    mock.timeout.store(true, Ordering::Relaxed);
    assert!(subject.retrieve_org_id("dummy").await.await.is_err());

    mock.timeout.store(false, Ordering::Relaxed);

    // the failure was not memoized, the retry goes through
    let response = subject.retrieve_org_id("dummy").await.await.unwrap();
    assert_eq!(response.resources[0].id, "dummy-id");
    assert_eq!(mock.org_calls.load(Ordering::Relaxed), 2);

    // and the successful response is cached again
    subject.retrieve_org_id("dummy").await.await.unwrap();
    assert_eq!(mock.org_calls.load(Ordering::Relaxed), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_never_served_from_cache() {
    setup();
    let mock = Arc::new(MockAccessor::default());
    mock.timeout.store(true, Ordering::Relaxed);
    let subject = CfAccessorCache::new(mock.clone(), &CacheConfig::default());

    // no interleaving of the load tasks may ever leave a failed request in
    // the cache, so every single retrieval has to reach upstream
    for _ in 0..1000 {
        assert!(subject.retrieve_org_id("dummy").await.await.is_err());
    }
    assert_eq!(mock.org_calls.load(Ordering::Relaxed), 1000);
}

#[tokio::test(start_paused = true)]
async fn test_background_refresh_hits_upstream() {
    setup();
    let mock = Arc::new(MockAccessor::default());
    let config = CacheConfig {
        refresh_application: Duration::from_millis(200),
        expire_application: Duration::from_secs(10),
        ..CacheConfig::default()
    };
    let subject = CfAccessorCache::new(mock.clone(), &config);

    subject.retrieve_space_summary("dummy").await.await.unwrap();
    assert_eq!(mock.summary_calls.load(Ordering::Relaxed), 1);

    sleep(Duration::from_millis(1050)).await;

    // the entry was refreshed in the background without a caller paying
    let refreshed = mock.summary_calls.load(Ordering::Relaxed);
    assert!(refreshed >= 2);

    // and the retrieval itself is still answered from the cache
    let response = subject.retrieve_space_summary("dummy").await.await.unwrap();
    assert_eq!(response.space_id, "dummy");
    assert_eq!(mock.summary_calls.load(Ordering::Relaxed), refreshed);
}
