//! Rendered router configuration
//!
//! `skrouterd.json` is a JSON array of `[entityType, attributes]` pairs. The
//! controller only needs enough of it to locate the local router: the site
//! identity carried in the `router` entity metadata, and the port of the
//! first TLS-enabled `normal` listener.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::NamespacePaths;
use crate::error::{Error, Result};

const LOCAL_HOST: &str = "127.0.0.1";
const ROLE_NORMAL: &str = "normal";

/// Client credential files presented to the local router
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsFiles {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsFiles {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            ca: dir.join("ca.crt"),
            cert: dir.join("tls.crt"),
            key: dir.join("tls.key"),
        }
    }
}

/// Where and how to subscribe to the router heartbeats of one site
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterTarget {
    pub namespace: String,
    pub site_id: String,
    pub url: String,
    pub address: String,
    pub tls: TlsFiles,
}

impl RouterTarget {
    /// Resolve the heartbeat target from the namespace runtime directory
    pub fn resolve(namespace: &str, paths: &NamespacePaths) -> Result<Self> {
        let file = paths.router_config_file();
        let raw = std::fs::read_to_string(&file).map_err(|e| {
            Error::RouterConfigError(format!("unable to read {}: {e}", file.display()))
        })?;
        let config = RouterConfig::parse(&raw)?;
        let site_id = config.site_id()?;
        let port = config.normal_tls_port()?;

        Ok(Self {
            namespace: namespace.to_string(),
            url: format!("amqps://{LOCAL_HOST}:{port}"),
            address: heartbeat_address(&site_id),
            site_id,
            tls: TlsFiles::in_dir(&paths.client_certs_dir()),
        })
    }
}

pub fn heartbeat_address(site_id: &str) -> String {
    format!("/mc/sfe.{site_id}.heartbeats")
}

#[derive(Deserialize)]
struct SiteMetadata {
    #[serde(default)]
    id: String,
}

/// Parsed entity list of a rendered router configuration
#[derive(Debug, Default)]
pub struct RouterConfig {
    entities: Vec<(String, Map<String, Value>)>,
}

impl RouterConfig {
    pub fn parse(raw: &str) -> Result<Self> {
        let entries: Vec<(String, Map<String, Value>)> = serde_json::from_str(raw)?;
        Ok(Self { entities: entries })
    }

    fn entities<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Map<String, Value>> + 'a {
        self.entities
            .iter()
            .filter(move |(entity, _)| entity == kind)
            .map(|(_, attrs)| attrs)
    }

    /// Site identity from the `router` entity metadata
    pub fn site_id(&self) -> Result<String> {
        let metadata = self
            .entities("router")
            .find_map(|attrs| attrs.get("metadata").and_then(Value::as_str))
            .ok_or_else(|| Error::RouterConfigError("router metadata not found".into()))?;
        let metadata: SiteMetadata = serde_json::from_str(metadata)?;
        if metadata.id.is_empty() {
            return Err(Error::RouterConfigError(
                "router metadata does not carry a site id".into(),
            ));
        }
        Ok(metadata.id)
    }

    /// Port of the first `normal` listener with an `sslProfile`
    pub fn normal_tls_port(&self) -> Result<u16> {
        let listener = self
            .entities("listener")
            .find(|attrs| {
                let role = attrs.get("role").and_then(Value::as_str);
                matches!(role, None | Some(ROLE_NORMAL)) && attrs.contains_key("sslProfile")
            })
            .ok_or_else(|| Error::RouterConfigError("no TLS listener with role normal".into()))?;

        match listener.get("port") {
            Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
        .ok_or_else(|| Error::RouterConfigError("invalid listener port".into()))
    }
}
