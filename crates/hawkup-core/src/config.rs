//! Agent configuration: ini-style file with `[client]` and `[device]` sections.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ini::Ini;
use url::Url;

const DEFAULT_TENANT: &str = "DEFAULT";
const DEFAULT_CONNECT_TIMEOUT: u64 = 20;
const DEFAULT_TIMEOUT: u64 = 60;
const DEFAULT_RETRY_WAIT: u64 = 5 * 60;
const DEFAULT_LOW_SPEED_TIME: u64 = 60;
const DEFAULT_LOW_SPEED_RATE: u32 = 100;
const DEFAULT_LOG_LEVEL: &str = "message";

/// Error raised while loading or validating the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] ini::Error),
    #[error("missing section '{0}'")]
    MissingSection(&'static str),
    #[error("missing key '{0}' in section '{1}'")]
    MissingKey(&'static str, &'static str),
    #[error("key '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Immutable agent configuration, loaded once at startup.
///
/// All durations are in seconds; `low_speed_rate` is a bytes/s threshold
/// below which a download is aborted after `low_speed_time`.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// hawkBit server as `host` or `host:port`.
    pub hawkbit_server: String,
    /// Use HTTPS for all requests.
    pub ssl: bool,
    /// Verify the server TLS certificate.
    pub ssl_verify: bool,
    /// Client TLS key handed to the installer for streaming installations.
    pub ssl_key: Option<String>,
    /// Client TLS certificate handed to the installer for streaming installations.
    pub ssl_cert: Option<String>,
    /// Target security token; mutually exclusive with `gateway_token`.
    pub auth_token: Option<String>,
    /// Gateway security token; mutually exclusive with `auth_token`.
    pub gateway_token: Option<String>,
    pub tenant_id: String,
    pub controller_id: String,
    /// Where the software bundle is written. Required unless `stream_bundle`.
    pub bundle_download_location: Option<PathBuf>,
    pub connect_timeout: u64,
    pub timeout: u64,
    /// Poll interval fallback when the server does not advertise one, and
    /// the wait after a failed poll.
    pub retry_wait: u64,
    pub low_speed_time: u64,
    pub low_speed_rate: u32,
    /// Resume interrupted downloads instead of failing the deployment.
    pub resume_downloads: bool,
    /// Skip the download and hand the bundle URL directly to the installer.
    pub stream_bundle: bool,
    /// Reboot after a successful installation.
    pub post_update_reboot: bool,
    /// One of error, critical, warning, message, info, debug.
    pub log_level: String,
    /// Device attributes sent with the `configData` identification request.
    pub device_attributes: BTreeMap<String, String>,
}

impl AgentConfig {
    /// Loads and validates the configuration from an ini-style file.
    pub fn load(path: &Path) -> Result<AgentConfig, ConfigError> {
        let ini = Ini::load_from_file(path)?;
        let client = ini
            .section(Some("client"))
            .ok_or(ConfigError::MissingSection("client"))?;

        let hawkbit_server = required(client, "hawkbit_server")?;
        // fail fast on an unusable server address
        Url::parse(&format!("http://{hawkbit_server}")).map_err(|e| ConfigError::Invalid {
            key: "hawkbit_server",
            reason: e.to_string(),
        })?;

        let auth_token = client.get("auth_token").map(str::to_owned);
        let gateway_token = client.get("gateway_token").map(str::to_owned);
        if auth_token.is_none() && gateway_token.is_none() {
            return Err(ConfigError::Invalid {
                key: "auth_token",
                reason: "neither auth_token nor gateway_token is set".into(),
            });
        }
        if auth_token.is_some() && gateway_token.is_some() {
            return Err(ConfigError::Invalid {
                key: "auth_token",
                reason: "both auth_token and gateway_token are set".into(),
            });
        }

        let stream_bundle = bool_key(client, "stream_bundle", false)?;
        let bundle_download_location = client
            .get("bundle_download_location")
            .map(PathBuf::from);
        if bundle_download_location.is_none() && !stream_bundle {
            return Err(ConfigError::MissingKey("bundle_download_location", "client"));
        }

        let connect_timeout = int_key(client, "connect_timeout", DEFAULT_CONNECT_TIMEOUT)?;
        let timeout = int_key(client, "timeout", DEFAULT_TIMEOUT)?;
        if timeout > 0 && connect_timeout > 0 && timeout < connect_timeout {
            return Err(ConfigError::Invalid {
                key: "timeout",
                reason: format!(
                    "timeout ({timeout}) must be greater than connect_timeout ({connect_timeout})"
                ),
            });
        }

        let device_attributes = ini
            .section(Some("device"))
            .ok_or(ConfigError::MissingSection("device"))?
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();

        Ok(AgentConfig {
            hawkbit_server,
            ssl: bool_key(client, "ssl", true)?,
            ssl_verify: bool_key(client, "ssl_verify", true)?,
            ssl_key: client.get("ssl_key").map(str::to_owned),
            ssl_cert: client.get("ssl_cert").map(str::to_owned),
            auth_token,
            gateway_token,
            tenant_id: client
                .get("tenant_id")
                .unwrap_or(DEFAULT_TENANT)
                .to_owned(),
            controller_id: required(client, "target_name")?,
            bundle_download_location,
            connect_timeout,
            timeout,
            retry_wait: int_key(client, "retry_wait", DEFAULT_RETRY_WAIT)?,
            low_speed_time: int_key(client, "low_speed_time", DEFAULT_LOW_SPEED_TIME)?,
            low_speed_rate: int_key(client, "low_speed_rate", u64::from(DEFAULT_LOW_SPEED_RATE))?
                as u32,
            resume_downloads: bool_key(client, "resume_downloads", false)?,
            stream_bundle,
            post_update_reboot: bool_key(client, "post_update_reboot", false)?,
            log_level: client
                .get("log_level")
                .unwrap_or(DEFAULT_LOG_LEVEL)
                .to_owned(),
            device_attributes,
        })
    }

    /// URL scheme selected by the `ssl` flag.
    pub fn scheme(&self) -> &'static str {
        if self.ssl {
            "https"
        } else {
            "http"
        }
    }
}

fn required(section: &ini::Properties, key: &'static str) -> Result<String, ConfigError> {
    section
        .get(key)
        .map(str::to_owned)
        .ok_or(ConfigError::MissingKey(key, "client"))
}

fn bool_key(section: &ini::Properties, key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match section.get(key) {
        None => Ok(default),
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            other => Err(ConfigError::Invalid {
                key,
                reason: format!("expected a boolean, got '{other}'"),
            }),
        },
    }
}

fn int_key(section: &ini::Properties, key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match section.get(key) {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|e| ConfigError::Invalid {
            key,
            reason: format!("expected an integer: {e}"),
        }),
    }
}
