//! # Cloud Foundry upstream access
//!
//! The gateway discovers its scrape targets through a handful of Cloud
//! Foundry API queries: resolving org and space names to ids, listing the
//! applications of a space, fetching space summaries, and listing an org's
//! domains. Those queries are slow and rate-limited, so the gateway never
//! talks to the [`CfAccessor`] directly; it goes through the
//! [`CfAccessorCache`] decorator, which answers from four independently
//! invalidatable cache categories and deduplicates concurrent requests.
//!
//! What is cached is the shared response handle itself, not just its
//! resolved value: callers get a [`SharedRequest`] that any number of tasks
//! can await without re-triggering the upstream call. Requests that fail or
//! time out are never committed to the cache, so retries always reach
//! upstream.

mod accessor;
mod cache;
mod config;
#[cfg(test)]
mod tests;

pub use accessor::{
    AppResource, AppSummary, CfAccessor, DomainResource, GetSpaceSummaryResponse,
    ListApplicationsResponse, ListOrganizationDomainsResponse, ListOrganizationsResponse,
    ListSpacesResponse, OrgResource, SpaceResource,
};
pub use cache::{AppsInSpaceCacheKey, CfAccessorCache, SharedRequest, SpaceCacheKey};
pub use config::CacheConfig;
