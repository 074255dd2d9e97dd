//! The update agent: polling loop and deployment lifecycle.
//!
//! One agent polls one hawkBit server. The polling thread owns the agent and
//! serializes all action mutations except the transitions performed by the
//! download worker, which shares the action store through [`AgentShared`].

mod cancel;
mod deployment;
mod download;

pub use deployment::Artifact;

use std::fs;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::action::{Action, ActionState};
use crate::config::AgentConfig;
use crate::ddi::resources::ControllerBase;
use crate::ddi::status::{Execution, Finished};
use crate::ddi::DdiClient;
use crate::error::AgentError;
use crate::installer::{Installer, UpdateMonitor};

/// Fixed short poll interval while an action is being processed, so cancel
/// requests are picked up promptly.
const ACTIVE_POLL_INTERVAL: u64 = 5;

/// State shared between the polling thread, the download worker and the
/// installer monitor.
pub(crate) struct AgentShared {
    pub config: Arc<AgentConfig>,
    pub ddi: DdiClient,
    pub action: Action,
    pub installer: Arc<dyn Installer>,
    pub run_once: bool,
}

/// The polling agent. Construct one per process with the loaded
/// configuration and an installer backend, then call [`UpdateAgent::run`].
pub struct UpdateAgent {
    shared: Arc<AgentShared>,
    download_thread: Option<JoinHandle<bool>>,
    interval_sec: u64,
    last_run_sec: u64,
}

impl UpdateAgent {
    pub fn new(config: Arc<AgentConfig>, installer: Arc<dyn Installer>, run_once: bool) -> Self {
        let retry_wait = config.retry_wait;
        let ddi = DdiClient::new(Arc::clone(&config));
        UpdateAgent {
            shared: Arc::new(AgentShared {
                config,
                ddi,
                action: Action::new(),
                installer,
                run_once,
            }),
            download_thread: None,
            // make the very first tick poll immediately
            interval_sec: retry_wait,
            last_run_sec: retry_wait,
        }
    }

    /// Current action id and state.
    pub fn action_snapshot(&self) -> (Option<String>, ActionState) {
        self.shared.action.snapshot()
    }

    /// Runs the 1 s tick loop until run-once mode completes a full pass.
    /// Returns the pass verdict (and, when a download ran, the worker's).
    pub fn run(mut self) -> bool {
        #[cfg(feature = "systemd")]
        crate::sd::notify_ready();

        let result;
        loop {
            thread::sleep(Duration::from_secs(1));
            #[cfg(feature = "systemd")]
            crate::sd::watchdog_ping();

            self.last_run_sec += 1;
            if self.last_run_sec < self.interval_sec {
                continue;
            }
            self.last_run_sec = 0;

            let ok = self.poll_once();
            if self.shared.run_once {
                result = match self.join_download() {
                    Some(worker) => worker,
                    None => ok,
                };
                break;
            }
        }

        #[cfg(feature = "systemd")]
        crate::sd::notify_stopping();
        result
    }

    /// One full poll pass: fetches the controller base resource and routes
    /// its hyperlinks to the identify, deployment and cancel handlers.
    /// Updates the poll interval from the server's answer.
    pub fn poll_once(&mut self) -> bool {
        info!("checking for new software...");
        let base: ControllerBase = match self.shared.ddi.get_json(&self.shared.ddi.base_url()) {
            Ok(base) => base,
            Err(err) => {
                if err.is_http(401) {
                    if self.shared.config.auth_token.is_some() {
                        warn!("failed to authenticate. Check if auth_token is correct?");
                    }
                    if self.shared.config.gateway_token.is_some() {
                        warn!("failed to authenticate. Check if gateway_token is correct?");
                    }
                } else {
                    warn!("scheduled check for new software failed: {err}");
                }
                self.interval_sec = self.shared.config.retry_wait;
                return false;
            }
        };

        let mut res = true;
        if base.links.config_data.is_some() {
            // the server has asked us to identify ourselves
            res = match self.identify() {
                Ok(()) => true,
                Err(err) => {
                    warn!("{err}");
                    false
                }
            };
        }
        if base.links.deployment_base.is_some() {
            res = match self.process_deployment(&base) {
                Ok(()) => true,
                Err(err @ AgentError::AlreadyInProgress(_)) => {
                    debug!("{err}");
                    false
                }
                Err(err) => {
                    warn!("{err}");
                    false
                }
            };
        } else {
            info!("no new software.");
        }
        if base.links.cancel_action.is_some() {
            res = match self.process_cancel(&base) {
                Ok(()) => true,
                Err(err) => {
                    warn!("{err}");
                    false
                }
            };
        }

        self.interval_sec = self.sleep_interval(&base);
        res
    }

    /// Joins the download worker, returning its verdict if one was running.
    pub fn join_download(&mut self) -> Option<bool> {
        self.download_thread
            .take()
            .map(|worker| worker.join().unwrap_or(false))
    }

    /// `PUT`s the device attributes to the `configData` resource.
    fn identify(&self) -> Result<(), AgentError> {
        debug!("providing meta information to hawkbit server");
        self.shared.ddi.put_config_data()
    }

    /// Next poll interval: a fixed short interval while an action is being
    /// processed, otherwise the server-advertised sleep time with the
    /// configured retry wait as fallback.
    fn sleep_interval(&self, base: &ControllerBase) -> u64 {
        {
            let st = self.shared.action.lock();
            if matches!(
                st.state,
                ActionState::Processing | ActionState::Downloading | ActionState::CancelRequested
            ) {
                return ACTIVE_POLL_INTERVAL;
            }
        }

        match base.sleep_seconds() {
            Some(seconds) => seconds,
            None => {
                warn!(
                    "polling sleep time not found, using fallback: {}s",
                    self.shared.config.retry_wait
                );
                self.shared.config.retry_wait
            }
        }
    }
}

/// Deletes the bundle at the configured download location, if present.
pub(crate) fn cleanup_bundle(config: &AgentConfig) {
    let Some(path) = &config.bundle_download_location else {
        return;
    };
    if !path.is_file() {
        return;
    }
    if let Err(err) = fs::remove_file(path) {
        warn!("failed to delete file {}: {err}", path.display());
    }
}

/// The agent-side handler for installer events: progress and completion
/// callbacks as one object handed to the installer.
pub(crate) struct AgentMonitor {
    shared: Arc<AgentShared>,
}

impl AgentMonitor {
    pub(crate) fn new(shared: Arc<AgentShared>) -> Self {
        AgentMonitor { shared }
    }
}

impl UpdateMonitor for AgentMonitor {
    fn install_progress(&self, message: &str) {
        let st = self.shared.action.lock();
        let Some(id) = st.id.clone() else {
            return;
        };
        let url = self.shared.ddi.deployment_feedback_url(&id);
        if let Err(err) = self.shared.ddi.feedback_progress(&url, &id, message) {
            warn!("{err}");
        }
    }

    fn install_complete(&self, success: bool) {
        let mut st = self.shared.action.lock();
        st.state = if success {
            ActionState::Success
        } else {
            ActionState::Error
        };

        let id = st.id.clone().unwrap_or_default();
        let url = self.shared.ddi.deployment_feedback_url(&id);
        let (detail, finished) = if success {
            ("Software bundle installed successfully.", Finished::Success)
        } else {
            ("Failed to install software bundle.", Finished::Failure)
        };
        if let Err(err) = self
            .shared
            .ddi
            .feedback(&url, &id, detail, finished, Execution::Closed)
        {
            warn!("{err}");
        }

        cleanup_bundle(&self.shared.config);
        drop(st);

        if success && self.shared.config.post_update_reboot {
            reboot_system();
        }
    }
}

#[cfg(target_os = "linux")]
fn reboot_system() {
    unsafe {
        libc::sync();
        if libc::reboot(libc::RB_AUTOBOOT) < 0 {
            error!("failed to reboot: {}", std::io::Error::last_os_error());
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn reboot_system() {
    error!("post-update reboot is only supported on Linux");
}
