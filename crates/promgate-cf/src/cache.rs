use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture, Shared};
use promgate_cache::{CacheContents, CacheError, RefreshingCache};

use crate::accessor::{
    CfAccessor, GetSpaceSummaryResponse, ListApplicationsResponse, ListOrganizationDomainsResponse,
    ListOrganizationsResponse, ListSpacesResponse,
};
use crate::config::CacheConfig;

/// A settled upstream response, shareable between any number of callers.
///
/// Awaiting a clone never re-triggers the underlying upstream call; every
/// clone resolves to the same memoized outcome.
pub type SharedRequest<T> = Shared<BoxFuture<'static, CacheContents<T>>>;

/// Key of the space-id cache: spaces are only unique per organization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpaceCacheKey {
    pub org_id: String,
    pub space_name: String,
}

/// Key of the apps-in-space cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppsInSpaceCacheKey {
    pub org_id: String,
    pub space_id: String,
}

/// Caching decorator around a [`CfAccessor`].
///
/// The five retrieval operations mirror the accessor one-to-one but return
/// the cached [`SharedRequest`] handle, so concurrent callers for the same
/// key share a single upstream invocation. The caches form four independently
/// invalidatable categories:
///
/// - *org*: `retrieve_org_id`
/// - *space*: `retrieve_space_id`
/// - *applications*: `retrieve_all_application_ids_in_space` and
///   `retrieve_space_summary`
/// - *domain*: `retrieve_all_domains`
///
/// Invalidating one category never touches entries of another.
///
/// A request that fails or times out is never committed to its cache: the
/// loader delivers the error to every waiter of that load, and the next
/// retrieval for that key calls upstream again. Retrying is therefore always
/// safe for callers.
pub struct CfAccessorCache {
    orgs: RefreshingCache<String, SharedRequest<ListOrganizationsResponse>>,
    spaces: RefreshingCache<SpaceCacheKey, SharedRequest<ListSpacesResponse>>,
    apps_in_space: RefreshingCache<AppsInSpaceCacheKey, SharedRequest<ListApplicationsResponse>>,
    space_summaries: RefreshingCache<String, SharedRequest<GetSpaceSummaryResponse>>,
    domains: RefreshingCache<String, SharedRequest<ListOrganizationDomainsResponse>>,
}

impl fmt::Debug for CfAccessorCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CfAccessorCache")
            .field("orgs", &self.orgs.len())
            .field("spaces", &self.spaces.len())
            .field("apps_in_space", &self.apps_in_space.len())
            .field("space_summaries", &self.space_summaries.len())
            .field("domains", &self.domains.len())
            .finish()
    }
}

impl CfAccessorCache {
    /// Creates the caching decorator in front of `parent`.
    ///
    /// Each partition loader performs the upstream call itself and only
    /// commits a request handle that settled successfully, so a failed call
    /// is delivered to the waiters of that one load and leaves no entry
    /// behind.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(parent: Arc<dyn CfAccessor>, config: &CacheConfig) -> Self {
        let orgs = RefreshingCache::new("cf.org", config.expire_org, config.refresh_org, {
            let parent = Arc::clone(&parent);
            move |org_name: &String| {
                let parent = Arc::clone(&parent);
                let org_name = org_name.clone();
                async move {
                    let request = async move { parent.retrieve_org_id(&org_name).await }
                        .boxed()
                        .shared();
                    request.clone().await?;
                    Ok(request)
                }
                .boxed()
            }
        });

        let spaces =
            RefreshingCache::new("cf.space", config.expire_space, config.refresh_space, {
                let parent = Arc::clone(&parent);
                move |key: &SpaceCacheKey| {
                    let parent = Arc::clone(&parent);
                    let key = key.clone();
                    async move {
                        let request = async move {
                            parent.retrieve_space_id(&key.org_id, &key.space_name).await
                        }
                        .boxed()
                        .shared();
                        request.clone().await?;
                        Ok(request)
                    }
                    .boxed()
                }
            });

        let apps_in_space = RefreshingCache::new(
            "cf.apps_in_space",
            config.expire_application,
            config.refresh_application,
            {
                let parent = Arc::clone(&parent);
                move |key: &AppsInSpaceCacheKey| {
                    let parent = Arc::clone(&parent);
                    let key = key.clone();
                    async move {
                        let request = async move {
                            parent
                                .retrieve_all_application_ids_in_space(&key.org_id, &key.space_id)
                                .await
                        }
                        .boxed()
                        .shared();
                        request.clone().await?;
                        Ok(request)
                    }
                    .boxed()
                }
            },
        );

        let space_summaries = RefreshingCache::new(
            "cf.space_summary",
            config.expire_application,
            config.refresh_application,
            {
                let parent = Arc::clone(&parent);
                move |space_id: &String| {
                    let parent = Arc::clone(&parent);
                    let space_id = space_id.clone();
                    async move {
                        let request = async move { parent.retrieve_space_summary(&space_id).await }
                            .boxed()
                            .shared();
                        request.clone().await?;
                        Ok(request)
                    }
                    .boxed()
                }
            },
        );

        let domains =
            RefreshingCache::new("cf.domain", config.expire_domain, config.refresh_domain, {
                let parent = Arc::clone(&parent);
                move |org_id: &String| {
                    let parent = Arc::clone(&parent);
                    let org_id = org_id.clone();
                    async move {
                        let request = async move { parent.retrieve_all_domains(&org_id).await }
                            .boxed()
                            .shared();
                        request.clone().await?;
                        Ok(request)
                    }
                    .boxed()
                }
            });

        Self {
            orgs,
            spaces,
            apps_in_space,
            space_summaries,
            domains,
        }
    }

    /// Resolves an organization by name, from the *org* cache when possible.
    pub async fn retrieve_org_id(&self, org_name: &str) -> SharedRequest<ListOrganizationsResponse> {
        self.orgs
            .get(&org_name.to_owned())
            .await
            .unwrap_or_else(failed_request)
    }

    /// Resolves a space by org id and name, from the *space* cache when
    /// possible.
    pub async fn retrieve_space_id(
        &self,
        org_id: &str,
        space_name: &str,
    ) -> SharedRequest<ListSpacesResponse> {
        let key = SpaceCacheKey {
            org_id: org_id.to_owned(),
            space_name: space_name.to_owned(),
        };
        self.spaces.get(&key).await.unwrap_or_else(failed_request)
    }

    /// Lists the application ids in a space, from the *applications* cache
    /// when possible.
    pub async fn retrieve_all_application_ids_in_space(
        &self,
        org_id: &str,
        space_id: &str,
    ) -> SharedRequest<ListApplicationsResponse> {
        let key = AppsInSpaceCacheKey {
            org_id: org_id.to_owned(),
            space_id: space_id.to_owned(),
        };
        self.apps_in_space
            .get(&key)
            .await
            .unwrap_or_else(failed_request)
    }

    /// Fetches a space summary, from the *applications* cache when possible.
    pub async fn retrieve_space_summary(
        &self,
        space_id: &str,
    ) -> SharedRequest<GetSpaceSummaryResponse> {
        self.space_summaries
            .get(&space_id.to_owned())
            .await
            .unwrap_or_else(failed_request)
    }

    /// Lists the domains of an organization, from the *domain* cache when
    /// possible.
    pub async fn retrieve_all_domains(
        &self,
        org_id: &str,
    ) -> SharedRequest<ListOrganizationDomainsResponse> {
        self.domains
            .get(&org_id.to_owned())
            .await
            .unwrap_or_else(failed_request)
    }

    /// Clears the *applications* category, which spans both the apps-in-space
    /// and the space-summary cache.
    pub fn invalidate_cache_applications(&self) {
        tracing::debug!("invalidating application caches");
        self.apps_in_space.clear();
        self.space_summaries.clear();
    }

    /// Clears the *space* category.
    pub fn invalidate_cache_space(&self) {
        tracing::debug!("invalidating space cache");
        self.spaces.clear();
    }

    /// Clears the *org* category.
    pub fn invalidate_cache_org(&self) {
        tracing::debug!("invalidating org cache");
        self.orgs.clear();
    }

    /// Clears the *domain* category.
    pub fn invalidate_cache_domain(&self) {
        tracing::debug!("invalidating domain cache");
        self.domains.clear();
    }
}

/// A request that settles immediately with `error`, handed out when the load
/// for a key failed. Nothing is committed in that case, so the next retrieval
/// for the key calls upstream again.
fn failed_request<T: Clone + Send + Sync + 'static>(error: CacheError) -> SharedRequest<T> {
    future::ready(Err(error)).boxed().shared()
}
