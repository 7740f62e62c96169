use async_trait::async_trait;
use promgate_cache::CacheContents;
use serde::{Deserialize, Serialize};

/// An organization as returned by an organizations listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgResource {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOrganizationsResponse {
    pub resources: Vec<OrgResource>,
}

/// A space as returned by a spaces listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceResource {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSpacesResponse {
    pub resources: Vec<SpaceResource>,
}

/// An application as returned by an applications listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppResource {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListApplicationsResponse {
    pub resources: Vec<AppResource>,
}

/// One application inside a space summary, with the routes the gateway
/// scrapes its instances through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSummary {
    pub id: String,
    pub name: String,
    pub urls: Vec<String>,
    pub instances: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetSpaceSummaryResponse {
    pub space_id: String,
    pub apps: Vec<AppSummary>,
}

/// A domain as returned by an organization's domains listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainResource {
    pub id: String,
    pub name: String,
    pub internal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOrganizationDomainsResponse {
    pub resources: Vec<DomainResource>,
}

/// Asynchronous access to the Cloud Foundry API queries the gateway needs.
///
/// Implementations perform the actual network calls. The trait is also the
/// seam the caching decorator wraps, so every operation is keyed purely by
/// string identifiers. A timed-out call resolves to
/// [`CacheError::Timeout`](promgate_cache::CacheError::Timeout); callers must
/// be prepared for any call to fail.
#[async_trait]
pub trait CfAccessor: Send + Sync + 'static {
    /// Looks an organization up by name, to resolve its id.
    async fn retrieve_org_id(&self, org_name: &str) -> CacheContents<ListOrganizationsResponse>;

    /// Looks a space up by name within an organization, to resolve its id.
    async fn retrieve_space_id(
        &self,
        org_id: &str,
        space_name: &str,
    ) -> CacheContents<ListSpacesResponse>;

    /// Lists the ids of all applications in a space.
    async fn retrieve_all_application_ids_in_space(
        &self,
        org_id: &str,
        space_id: &str,
    ) -> CacheContents<ListApplicationsResponse>;

    /// Fetches the summary of a space, including the routes of its
    /// applications.
    async fn retrieve_space_summary(
        &self,
        space_id: &str,
    ) -> CacheContents<GetSpaceSummaryResponse>;

    /// Lists all domains of an organization.
    async fn retrieve_all_domains(
        &self,
        org_id: &str,
    ) -> CacheContents<ListOrganizationDomainsResponse>;
}
