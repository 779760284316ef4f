//! Network status reconciliation
//!
//! The router status collector publishes the network view of every site as a
//! ConfigMap (`data.NetworkStatus` holds JSON). The handler turns it into
//! per-site records and passes them to a `NetworkStatusSink`.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument};

use crate::config::NETWORK_STATUS_FILE;
use crate::error::{Error, Result};
use crate::fs::FsChangeHandler;

const NETWORK_STATUS_KEY: &str = "NetworkStatus";
const LINK_STATUS_UP: &str = "up";

// -----------------------------------------------------------------------------
// Network status document
// -----------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatusInfo {
    #[serde(default)]
    pub site_status: Vec<SiteStatusInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteStatusInfo {
    #[serde(default)]
    pub site: SiteInfo,
    #[serde(default)]
    pub router_status: Vec<RouterStatusInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SiteInfo {
    pub identity: String,
    pub name: String,
    pub namespace: String,
    pub platform: String,
    pub version: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterStatusInfo {
    pub links: Vec<LinkInfo>,
    pub access_points: Vec<AccessPointInfo>,
    pub listeners: Vec<ListenerInfo>,
    pub connectors: Vec<ConnectorInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkInfo {
    pub name: String,
    pub status: String,
    pub peer: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AccessPointInfo {
    pub identity: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListenerInfo {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectorInfo {
    pub dest_host: String,
    pub address: String,
}

#[derive(Debug, Deserialize)]
struct ConfigMap {
    #[serde(default)]
    data: HashMap<String, String>,
}

// -----------------------------------------------------------------------------
// Site records
// -----------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SiteRecord {
    pub id: String,
    pub name: String,
    pub platform: String,
    pub namespace: String,
    pub version: String,
    pub links: Vec<LinkRecord>,
    pub services: Vec<ServiceRecord>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkRecord {
    pub name: String,
    pub remote_site_id: String,
    pub remote_site_name: String,
    pub operational: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceRecord {
    pub routing_key: String,
    pub connectors: Vec<String>,
    pub listeners: Vec<String>,
}

/// Parse the network status ConfigMap written by the status collector
pub fn parse_network_status(raw: &str) -> Result<NetworkStatusInfo> {
    let config_map: ConfigMap = serde_yaml::from_str(raw)?;
    let status = config_map.data.get(NETWORK_STATUS_KEY).ok_or_else(|| {
        Error::ConfigError(format!("{NETWORK_STATUS_KEY} not present in ConfigMap"))
    })?;
    Ok(serde_json::from_str(status)?)
}

/// Derive one record per site. Links are only reported when their peer is a
/// known router access point; services are keyed by routing address.
pub fn extract_site_records(status: &NetworkStatusInfo) -> Vec<SiteRecord> {
    let mut access_points: HashMap<&str, &str> = HashMap::new();
    let mut site_names: HashMap<&str, &str> = HashMap::new();
    for site in &status.site_status {
        site_names.insert(&site.site.identity, &site.site.name);
        for router in &site.router_status {
            for ap in &router.access_points {
                access_points.insert(&ap.identity, &site.site.identity);
            }
        }
    }

    status
        .site_status
        .iter()
        .map(|site| {
            let mut record = SiteRecord {
                id: site.site.identity.clone(),
                name: site.site.name.clone(),
                platform: site.site.platform.clone(),
                namespace: site.site.namespace.clone(),
                version: site.site.version.clone(),
                ..Default::default()
            };
            let mut services: BTreeMap<&str, ServiceRecord> = BTreeMap::new();

            for router in &site.router_status {
                for link in &router.links {
                    if link.name.is_empty() || link.peer.is_empty() {
                        continue;
                    }
                    if let Some(remote) = access_points.get(link.peer.as_str()) {
                        record.links.push(LinkRecord {
                            name: link.name.clone(),
                            remote_site_id: remote.to_string(),
                            remote_site_name: site_names
                                .get(remote)
                                .map(|n| n.to_string())
                                .unwrap_or_default(),
                            operational: link.status.eq_ignore_ascii_case(LINK_STATUS_UP),
                        });
                    }
                }
                for connector in &router.connectors {
                    if connector.address.is_empty() || connector.dest_host.is_empty() {
                        continue;
                    }
                    service_entry(&mut services, &connector.address)
                        .connectors
                        .push(connector.dest_host.clone());
                }
                for listener in &router.listeners {
                    if listener.address.is_empty() || listener.name.is_empty() {
                        continue;
                    }
                    service_entry(&mut services, &listener.address)
                        .listeners
                        .push(listener.name.clone());
                }
            }

            record.services = services.into_values().collect();
            record
        })
        .collect()
}

fn service_entry<'m, 'a>(
    services: &'m mut BTreeMap<&'a str, ServiceRecord>,
    address: &'a str,
) -> &'m mut ServiceRecord {
    services.entry(address).or_insert_with(|| ServiceRecord {
        routing_key: address.to_string(),
        ..Default::default()
    })
}

// -----------------------------------------------------------------------------
// Handler
// -----------------------------------------------------------------------------

/// Consumer of decoded network status
#[async_trait]
pub trait NetworkStatusSink: Send + Sync {
    async fn update(&self, records: Vec<SiteRecord>);
    /// The network status is no longer available
    async fn reset(&self);
}

/// Default sink: logs a summary of the network
pub struct NetworkStatusLogger;

#[async_trait]
impl NetworkStatusSink for NetworkStatusLogger {
    async fn update(&self, records: Vec<SiteRecord>) {
        let links: usize = records.iter().map(|r| r.links.len()).sum();
        info!(sites = records.len(), links, "Network status updated");
        for record in &records {
            debug!(
                site = %record.id,
                name = %record.name,
                platform = %record.platform,
                services = record.services.len(),
                "Site in network"
            );
        }
    }

    async fn reset(&self) {
        info!("Network status reset");
    }
}

pub struct NetworkStatusHandler {
    sink: Arc<dyn NetworkStatusSink>,
}

impl NetworkStatusHandler {
    pub fn new(sink: Arc<dyn NetworkStatusSink>) -> Self {
        Self { sink }
    }

    /// Log once the namespace stop signal fires
    pub fn watch_stop(&self, stop: CancellationToken) {
        tokio::spawn(
            async move {
                stop.cancelled().await;
                info!("Stop event processing");
            }
            .in_current_span(),
        );
    }

    async fn reconcile(&self, name: &Path) {
        let raw = match tokio::fs::read_to_string(name).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(path = %name.display(), error = %e, "Unable to read network status");
                return;
            }
        };
        if raw.trim().is_empty() {
            debug!(path = %name.display(), "Network status is empty");
            return;
        }
        match parse_network_status(&raw) {
            Ok(status) => self.sink.update(extract_site_records(&status)).await,
            Err(e) => {
                error!(path = %name.display(), error = %e, "Unable to parse network status");
            }
        }
    }
}

#[async_trait]
impl FsChangeHandler for NetworkStatusHandler {
    async fn on_base_path_added(&self, _base_path: &Path) {}

    async fn on_create(&self, name: &Path) {
        self.reconcile(name).await;
    }

    async fn on_update(&self, name: &Path) {
        self.reconcile(name).await;
    }

    async fn on_remove(&self, _name: &Path) {
        self.sink.reset().await;
    }

    fn filter(&self, name: &Path) -> bool {
        name.file_name().is_some_and(|f| f == NETWORK_STATUS_FILE)
    }
}
