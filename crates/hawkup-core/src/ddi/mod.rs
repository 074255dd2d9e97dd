//! hawkBit DDI client: REST requests, feedback posts and bundle download.
//!
//! REST requests exchange JSON and succeed only on HTTP 200. Feedback posts
//! go through the retriable wrapper which absorbs transient 409/429 answers;
//! resource `GET`s do not. The bundle download is a separate range-capable
//! byte-stream transfer with a low-speed abort.

pub mod resources;
pub mod status;

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use curl::easy::{Easy, List};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::checksum;
use crate::config::AgentConfig;
use crate::error::AgentError;
use status::{Execution, Finished, StatusDocument};

const USER_AGENT: &str = concat!("hawkup/", env!("CARGO_PKG_VERSION"));

/// Average download speed of the last transfer, in bytes per second.
///
/// `curl::easy::Easy` exposes `CURLINFO_SIZE_DOWNLOAD` (`download_size`) but
/// not `CURLINFO_SPEED_DOWNLOAD`, so this calls `curl_easy_getinfo` directly
/// through the handle's public raw pointer, mirroring the crate's own
/// internal `getopt_double` helper.
fn download_speed(easy: &Easy) -> Result<f64, curl::Error> {
    unsafe {
        let mut speed: f64 = 0.0;
        let rc = curl_sys::curl_easy_getinfo(easy.raw(), curl_sys::CURLINFO_SPEED_DOWNLOAD, &mut speed);
        if rc != curl_sys::CURLE_OK {
            return Err(curl::Error::new(rc));
        }
        Ok(speed)
    }
}

/// Total attempts for feedback requests answered with HTTP 409/429.
const MAX_RETRIES_ON_API_ERROR: u32 = 10;

/// Pause between those attempts.
const API_ERROR_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Maximum redirects followed during a bundle download.
const MAX_DOWNLOAD_REDIRECTS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
}

impl HttpMethod {
    fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
        }
    }
}

/// REST response body.
#[derive(Debug, Default)]
pub struct RestPayload {
    body: Vec<u8>,
}

impl RestPayload {
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn as_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Deserializes the body as JSON.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, AgentError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| AgentError::Parse(format!("invalid JSON response: {e}")))
    }
}

/// Client for the DDI REST API of one hawkBit server.
#[derive(Debug, Clone)]
pub struct DdiClient {
    config: Arc<AgentConfig>,
}

impl DdiClient {
    pub fn new(config: Arc<AgentConfig>) -> Self {
        DdiClient { config }
    }

    /// The full `Authorization` header, either target or gateway token.
    /// Config validation guarantees exactly one of them is set.
    pub fn auth_header(&self) -> String {
        match (&self.config.auth_token, &self.config.gateway_token) {
            (Some(t), _) => format!("Authorization: TargetToken {t}"),
            (_, Some(t)) => format!("Authorization: GatewayToken {t}"),
            (None, None) => unreachable!("config validation requires a token"),
        }
    }

    /// Base poll resource: `<scheme>://<server>/<tenant>/controller/v1/<id>`.
    pub fn base_url(&self) -> String {
        format!(
            "{}://{}/{}/controller/v1/{}",
            self.config.scheme(),
            self.config.hawkbit_server,
            self.config.tenant_id,
            self.config.controller_id
        )
    }

    fn api_url(&self, suffix: &str) -> String {
        format!("{}/{}", self.base_url(), suffix)
    }

    pub fn config_data_url(&self) -> String {
        self.api_url("configData")
    }

    pub fn deployment_feedback_url(&self, action_id: &str) -> String {
        self.api_url(&format!("deploymentBase/{action_id}/feedback"))
    }

    pub fn cancel_feedback_url(&self, stop_id: &str) -> String {
        self.api_url(&format!("cancelAction/{stop_id}/feedback"))
    }

    fn new_easy(&self) -> Result<Easy, AgentError> {
        let mut easy = Easy::new();
        easy.useragent(USER_AGENT)?;
        easy.connect_timeout(Duration::from_secs(self.config.connect_timeout))?;
        easy.ssl_verify_peer(self.config.ssl_verify)?;
        easy.ssl_verify_host(self.config.ssl_verify)?;
        Ok(easy)
    }

    /// Performs a REST request with an optional JSON body.
    ///
    /// Success iff HTTP 200; any other status fails with
    /// [`AgentError::Http`] carrying the server's response body, any curl
    /// failure with [`AgentError::Transport`].
    pub fn rest_request(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&str>,
    ) -> Result<RestPayload, AgentError> {
        let mut easy = self.new_easy()?;
        easy.url(url)?;
        easy.custom_request(method.as_str())?;
        easy.timeout(Duration::from_secs(self.config.timeout))?;

        if let Some(body) = body {
            debug!("request body: {body}");
            easy.post_fields_copy(body.as_bytes())?;
        }

        let mut headers = List::new();
        headers.append("Accept: application/json;charset=UTF-8")?;
        headers.append(&self.auth_header())?;
        if body.is_some() {
            headers.append("Content-Type: application/json;charset=UTF-8")?;
        }
        easy.http_headers(headers)?;

        let mut payload = Vec::new();
        {
            let mut transfer = easy.transfer();
            transfer.write_function(|data| {
                payload.extend_from_slice(data);
                Ok(data.len())
            })?;
            transfer.perform()?;
        }

        let code = easy.response_code()?;
        let payload = RestPayload { body: payload };
        if code != 200 {
            return Err(AgentError::Http {
                code,
                body: (!payload.is_empty()).then(|| payload.as_text().into_owned()),
            });
        }
        if !payload.is_empty() {
            debug!("response body: {}", payload.as_text());
        }
        Ok(payload)
    }

    /// Like [`DdiClient::rest_request`], but retries HTTP 409 (Conflict) and
    /// 429 (Too Many Requests) with a short pause, up to
    /// [`MAX_RETRIES_ON_API_ERROR`] attempts. Other errors propagate
    /// immediately.
    pub fn rest_request_retriable(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&str>,
    ) -> Result<RestPayload, AgentError> {
        let mut retry_count = 0;
        loop {
            match self.rest_request(method, url, body) {
                Err(err)
                    if (err.is_http(409) || err.is_http(429))
                        && retry_count < MAX_RETRIES_ON_API_ERROR =>
                {
                    retry_count += 1;
                    debug!("{err}. Trying again ({retry_count}/{MAX_RETRIES_ON_API_ERROR})..");
                    thread::sleep(API_ERROR_RETRY_PAUSE);
                }
                other => return other,
            }
        }
    }

    /// `GET`s a resource and deserializes its JSON body. Not retried.
    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, AgentError> {
        self.rest_request(HttpMethod::Get, url, None)?.parse_json()
    }

    /// Posts feedback for an action. The detail is logged locally at a
    /// severity matching the reported result.
    pub fn feedback(
        &self,
        url: &str,
        id: &str,
        detail: &str,
        finished: Finished,
        execution: Execution,
    ) -> Result<(), AgentError> {
        if finished == Finished::Failure {
            warn!("{detail}");
        } else {
            info!("{detail}");
        }

        let doc = StatusDocument::feedback(id, detail, finished, execution);
        let body = serde_json::to_string(&doc)?;
        self.rest_request_retriable(HttpMethod::Post, url, Some(&body))?;
        Ok(())
    }

    /// Progress feedback: `finished=none, execution=proceeding`.
    pub fn feedback_progress(&self, url: &str, id: &str, detail: &str) -> Result<(), AgentError> {
        self.feedback(url, id, detail, Finished::None, Execution::Proceeding)
    }

    /// `PUT`s the identification document with the device attributes.
    pub fn put_config_data(&self) -> Result<(), AgentError> {
        let doc = StatusDocument::config_data(&self.config.device_attributes);
        let body = serde_json::to_string(&doc)?;
        self.rest_request_retriable(HttpMethod::Put, &self.config_data_url(), Some(&body))?;
        Ok(())
    }

    /// Downloads `url` to `dest`, appending from `resume_from` when non-zero.
    ///
    /// HTTP 200, 206 (partial) and 416 (range not satisfiable, i.e. the file
    /// is already complete on disk) count as success. Aborts when throughput
    /// stays below the configured low-speed rate for the configured time.
    /// Returns the SHA-1 of the final on-disk file (when requested) and the
    /// average transfer speed in bytes/s.
    pub fn download(
        &self,
        url: &str,
        dest: &Path,
        resume_from: u64,
        want_digest: bool,
    ) -> Result<(Option<String>, f64), AgentError> {
        if resume_from > 0 {
            debug!("resuming download from offset {resume_from}");
        }

        let mut file: File = if resume_from > 0 {
            OpenOptions::new().append(true).open(dest)?
        } else {
            File::create(dest)?
        };

        let mut easy = self.new_easy()?;
        easy.url(url)?;
        easy.follow_location(true)?;
        easy.max_redirections(MAX_DOWNLOAD_REDIRECTS)?;
        easy.tcp_keepalive(true)?;
        easy.low_speed_time(Duration::from_secs(self.config.low_speed_time))?;
        easy.low_speed_limit(self.config.low_speed_rate)?;
        easy.resume_from(resume_from)?;

        let mut headers = List::new();
        headers.append(&self.auth_header())?;
        headers.append("Accept: application/octet-stream")?;
        easy.http_headers(headers)?;

        {
            let mut transfer = easy.transfer();
            transfer.write_function(|data| match file.write_all(data) {
                Ok(()) => Ok(data.len()),
                Err(e) => {
                    warn!("bundle write failed: {e}");
                    Ok(0) // abort transfer
                }
            })?;
            transfer.perform()?;
        }

        let code = easy.response_code()?;
        let speed = download_speed(&easy).unwrap_or(0.0);
        if code != 200 && code != 206 && code != 416 {
            return Err(AgentError::Http { code, body: None });
        }

        drop(file);
        let digest = if want_digest {
            Some(checksum::sha1_file(dest)?)
        } else {
            None
        };

        Ok((digest, speed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn test_config(auth: Option<&str>, gateway: Option<&str>) -> Arc<AgentConfig> {
        Arc::new(AgentConfig {
            hawkbit_server: "hawkbit.example.com:8080".into(),
            ssl: false,
            ssl_verify: true,
            ssl_key: None,
            ssl_cert: None,
            auth_token: auth.map(str::to_owned),
            gateway_token: gateway.map(str::to_owned),
            tenant_id: "DEFAULT".into(),
            controller_id: "device7".into(),
            bundle_download_location: Some("/tmp/bundle.raucb".into()),
            connect_timeout: 20,
            timeout: 60,
            retry_wait: 300,
            low_speed_time: 60,
            low_speed_rate: 100,
            resume_downloads: false,
            stream_bundle: false,
            post_update_reboot: false,
            log_level: "message".into(),
            device_attributes: BTreeMap::new(),
        })
    }

    #[test]
    fn api_urls() {
        let ddi = DdiClient::new(test_config(Some("tok"), None));
        assert_eq!(
            ddi.base_url(),
            "http://hawkbit.example.com:8080/DEFAULT/controller/v1/device7"
        );
        assert_eq!(
            ddi.deployment_feedback_url("12"),
            "http://hawkbit.example.com:8080/DEFAULT/controller/v1/device7/deploymentBase/12/feedback"
        );
        assert_eq!(
            ddi.cancel_feedback_url("12"),
            "http://hawkbit.example.com:8080/DEFAULT/controller/v1/device7/cancelAction/12/feedback"
        );
        assert_eq!(
            ddi.config_data_url(),
            "http://hawkbit.example.com:8080/DEFAULT/controller/v1/device7/configData"
        );
    }

    #[test]
    fn auth_header_picks_configured_token() {
        let ddi = DdiClient::new(test_config(Some("tt"), None));
        assert_eq!(ddi.auth_header(), "Authorization: TargetToken tt");
        let ddi = DdiClient::new(test_config(None, Some("gt")));
        assert_eq!(ddi.auth_header(), "Authorization: GatewayToken gt");
    }
}
