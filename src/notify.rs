//! Notifier Module
//!
//! Thin adapter to external media-management services, invoked after a
//! successful migration. A notification failure is logged and never
//! escalated: by the time we notify, the data is already safely committed
//! to the slow tier.

use crate::config::NotifyConfig;
use crate::validator::ItemId;
use crate::{ManagerError, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Interface for post-migration notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notify the service responsible for `label` that `id` finished
    /// migrating and is ready for import.
    async fn notify(&self, label: &str, id: &ItemId) -> Result<()>;
}

/// Notifier for Sonarr/Radarr-style services: a GET to the manual-import
/// endpoint carrying the download identifier, authenticated with an API-key
/// header. The item's category label selects the service.
pub struct ArrNotifier {
    config: NotifyConfig,
    client: reqwest::Client,
}

impl ArrNotifier {
    pub fn new(config: NotifyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                ManagerError::ConfigError(format!("Failed to build notifier HTTP client: {}", e))
            })?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl Notifier for ArrNotifier {
    async fn notify(&self, label: &str, id: &ItemId) -> Result<()> {
        if !self.config.enabled {
            debug!("Notifications disabled, skipping: id={}", id);
            return Ok(());
        }

        let service = self
            .config
            .services
            .iter()
            .find(|s| s.tag.eq_ignore_ascii_case(label));

        let service = match service {
            Some(s) => s,
            None => {
                debug!(
                    "Label does not match any notification service, skipping: label={}, id={}",
                    label, id
                );
                return Ok(());
            }
        };

        let url = format!(
            "{}/api/v3/manualimport",
            service.base_url.trim_end_matches('/')
        );
        info!(
            "Notifying {} of completed migration: id={}, url={}",
            service.name, id, url
        );

        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &service.api_key)
            .query(&[("downloadId", id.as_str())])
            .send()
            .await
            .map_err(|e| {
                ManagerError::NotifyUnreachable(format!(
                    "{} notification failed: id={}, error={}",
                    service.name, id, e
                ))
            })?;

        if response.status().is_success() {
            info!(
                "{} notification successful: id={}, status={}",
                service.name,
                id,
                response.status()
            );
            Ok(())
        } else {
            warn!(
                "{} notification returned unexpected status: id={}, status={}",
                service.name,
                id,
                response.status()
            );
            Err(ManagerError::NotifyUnreachable(format!(
                "{} returned status {}",
                service.name,
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotifyService;
    use std::time::Duration;

    fn test_id() -> ItemId {
        ItemId::new(&"b".repeat(40)).unwrap()
    }

    #[tokio::test]
    async fn test_disabled_notifier_is_noop() {
        let notifier = ArrNotifier::new(NotifyConfig {
            enabled: false,
            services: vec![],
            timeout: Duration::from_secs(1),
        })
        .unwrap();

        assert!(notifier.notify("sonarr", &test_id()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unmatched_label_is_skipped() {
        let notifier = ArrNotifier::new(NotifyConfig {
            enabled: true,
            services: vec![NotifyService {
                name: "sonarr".to_string(),
                base_url: "http://127.0.0.1:1".to_string(),
                api_key: "key".to_string(),
                tag: "sonarr".to_string(),
            }],
            timeout: Duration::from_secs(1),
        })
        .unwrap();

        // "movies" matches no configured tag, so no request is attempted
        assert!(notifier.notify("movies", &test_id()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_service_reports_unreachable() {
        let notifier = ArrNotifier::new(NotifyConfig {
            enabled: true,
            services: vec![NotifyService {
                name: "sonarr".to_string(),
                base_url: "http://127.0.0.1:1".to_string(),
                api_key: "key".to_string(),
                tag: "sonarr".to_string(),
            }],
            timeout: Duration::from_secs(1),
        })
        .unwrap();

        let err = notifier.notify("SONARR", &test_id()).await.unwrap_err();
        assert!(matches!(err, ManagerError::NotifyUnreachable(_)));
    }
}
