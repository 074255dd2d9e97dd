//! DDI resources returned by the hawkBit server.
//!
//! Deployment chunk and artifact fields are individually optional: their
//! absence is diagnosed after the action id is known so the failure can be
//! reported back to the server, matching the processing order of
//! [`crate::agent`].

use serde::Deserialize;

/// A `_links` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub href: String,
}

/// Hyperlinks of the controller base resource.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BaseLinks {
    #[serde(rename = "configData")]
    pub config_data: Option<Link>,
    #[serde(rename = "deploymentBase")]
    pub deployment_base: Option<Link>,
    #[serde(rename = "cancelAction")]
    pub cancel_action: Option<Link>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Polling {
    /// Suggested poll interval as `HH:MM:SS`.
    pub sleep: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BaseConfig {
    pub polling: Option<Polling>,
}

/// `GET /<tenant>/controller/v1/<controllerId>` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerBase {
    pub config: Option<BaseConfig>,
    #[serde(rename = "_links", default)]
    pub links: BaseLinks,
}

impl ControllerBase {
    /// Server-advertised poll interval in seconds, if present and well formed.
    pub fn sleep_seconds(&self) -> Option<u64> {
        let sleep = self.config.as_ref()?.polling.as_ref()?.sleep.as_deref()?;
        parse_sleep(sleep)
    }
}

/// Parses the DDI `HH:MM:SS` polling interval.
pub fn parse_sleep(s: &str) -> Option<u64> {
    let mut parts = s.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes > 59 || seconds > 59 {
        return None;
    }
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// Artifact download links; HTTPS is favoured over the HTTP variant.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactLinks {
    pub download: Option<Link>,
    #[serde(rename = "download-http")]
    pub download_http: Option<Link>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hashes {
    pub sha1: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkArtifact {
    pub size: Option<u64>,
    pub hashes: Option<Hashes>,
    #[serde(rename = "_links", default)]
    pub links: ArtifactLinks,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chunk {
    pub name: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<ChunkArtifact>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Deployment {
    /// One of `skip`, `attempt`, `forced`.
    pub download: String,
    /// One of `skip`, `attempt`, `forced`.
    pub update: String,
    #[serde(rename = "maintenanceWindow")]
    pub maintenance_window: Option<String>,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
}

/// `GET` response of the `deploymentBase` link.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentBase {
    pub id: String,
    pub deployment: Deployment,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelAction {
    #[serde(rename = "stopId")]
    pub stop_id: String,
}

/// `GET` response of the `cancelAction` link.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelBase {
    #[serde(rename = "cancelAction")]
    pub cancel_action: CancelAction,
}
