use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Expiry and refresh settings for the Cloud Foundry caches, one pair per
/// category.
///
/// Durations deserialize in humantime format (`"300s"`, `"2h"`). Applications
/// churn much faster than orgs, spaces, or domains, so their defaults are an
/// order of magnitude shorter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(with = "humantime_serde")]
    pub refresh_org: Duration,
    #[serde(with = "humantime_serde")]
    pub refresh_space: Duration,
    #[serde(with = "humantime_serde")]
    pub refresh_application: Duration,
    #[serde(with = "humantime_serde")]
    pub refresh_domain: Duration,

    #[serde(with = "humantime_serde")]
    pub expire_org: Duration,
    #[serde(with = "humantime_serde")]
    pub expire_space: Duration,
    #[serde(with = "humantime_serde")]
    pub expire_application: Duration,
    #[serde(with = "humantime_serde")]
    pub expire_domain: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_org: Duration::from_secs(3600),
            refresh_space: Duration::from_secs(3600),
            refresh_application: Duration::from_secs(300),
            refresh_domain: Duration::from_secs(3600),

            expire_org: Duration::from_secs(7200),
            expire_space: Duration::from_secs(7200),
            expire_application: Duration::from_secs(600),
            expire_domain: Duration::from_secs(7200),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durations_parse_humantime() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"refresh_application": "90s", "expire_application": "5m"}"#)
                .unwrap();

        assert_eq!(config.refresh_application, Duration::from_secs(90));
        assert_eq!(config.expire_application, Duration::from_secs(300));
        // everything else keeps its default
        assert_eq!(config.refresh_org, Duration::from_secs(3600));
    }
}
