//! Deployment processor: descriptor validation, free-space check and
//! download/stream dispatch.

use std::io;
use std::path::Path;
use std::sync::{Arc, MutexGuard};
use std::thread;

use tracing::{debug, info, warn};

use crate::action::{ActionInner, ActionState};
use crate::ddi::resources::{ControllerBase, DeploymentBase};
use crate::ddi::status::{Execution, Finished};
use crate::error::{AgentError, ProtocolViolation};
use crate::installer::InstallRequest;

use super::{cleanup_bundle, download, AgentMonitor, AgentShared, UpdateAgent};

/// Descriptor of the single software bundle in the active deployment.
///
/// Created by the deployment processor under the action mutex, owned by the
/// download worker (or the streaming path) until a terminal transition.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub version: String,
    pub size: u64,
    pub download_url: String,
    pub feedback_url: String,
    /// Declared hex digest of the bundle.
    pub sha1: String,
    /// Server-declared maintenance window: `available`, `unavailable` or absent.
    pub maintenance_window: Option<String>,
    /// Derived from `deployment.update != "skip"`.
    pub do_install: bool,
}

impl Artifact {
    /// Builds the artifact from a deployment descriptor, enforcing the
    /// single-chunk/single-artifact contract and favouring the HTTPS
    /// download link over the HTTP variant.
    fn from_deployment(
        dep: &DeploymentBase,
        feedback_url: String,
        do_install: bool,
    ) -> Result<Artifact, AgentError> {
        if dep.deployment.chunks.len() > 1 {
            return Err(AgentError::Protocol(ProtocolViolation::MultiChunks));
        }
        let chunk = dep
            .deployment
            .chunks
            .first()
            .ok_or_else(|| AgentError::Parse("deployment has no chunks".into()))?;

        if chunk.artifacts.len() > 1 {
            return Err(AgentError::Protocol(ProtocolViolation::MultiArtifacts));
        }
        let artifact = chunk
            .artifacts
            .first()
            .ok_or_else(|| AgentError::Parse("deployment chunk has no artifacts".into()))?;

        let name = chunk
            .name
            .clone()
            .ok_or_else(|| AgentError::Parse("deployment chunk is missing 'name'".into()))?;
        let version = chunk
            .version
            .clone()
            .ok_or_else(|| AgentError::Parse("deployment chunk is missing 'version'".into()))?;
        let size = artifact
            .size
            .ok_or_else(|| AgentError::Parse("deployment artifact is missing 'size'".into()))?;
        let sha1 = artifact
            .hashes
            .as_ref()
            .and_then(|h| h.sha1.clone())
            .ok_or_else(|| AgentError::Parse("deployment artifact is missing 'hashes.sha1'".into()))?;
        let download_url = artifact
            .links
            .download
            .as_ref()
            .or(artifact.links.download_http.as_ref())
            .map(|link| link.href.clone())
            .ok_or(AgentError::Protocol(ProtocolViolation::MissingDownloadUrl))?;

        Ok(Artifact {
            name,
            version,
            size,
            download_url,
            feedback_url,
            sha1,
            maintenance_window: dep.deployment.maintenance_window.clone(),
            do_install,
        })
    }
}

impl UpdateAgent {
    /// Processes a deployment offered by the controller base response.
    ///
    /// Holds the action mutex for the whole pass (the streaming path
    /// releases it around the installer call). On failure the partial bundle
    /// is removed, the state returns to idle and, once the action id is
    /// known, a failure/closed feedback is sent.
    pub(crate) fn process_deployment(&mut self, base: &ControllerBase) -> Result<(), AgentError> {
        let shared = Arc::clone(&self.shared);
        let mut st = shared.action.lock();

        if st.state.in_progress() {
            // no need to tell hawkBit about this
            return Err(AgentError::AlreadyInProgress(
                st.id.clone().unwrap_or_default(),
            ));
        }
        st.state = ActionState::Processing;

        let href = match &base.links.deployment_base {
            Some(link) => link.href.clone(),
            None => {
                let err = AgentError::Parse("'_links.deploymentBase.href' missing".into());
                return deployment_failed(&shared, &mut st, None, err);
            }
        };

        let dep: DeploymentBase = match shared.ddi.get_json(&href) {
            Ok(dep) => dep,
            Err(err) => return deployment_failed(&shared, &mut st, None, err),
        };

        let maintenance_msg = dep
            .deployment
            .maintenance_window
            .as_deref()
            .map(|w| format!(" (maintenance window is '{w}')"))
            .unwrap_or_default();

        if dep.deployment.download == "skip" {
            info!("hawkBit requested to skip download, not downloading yet{maintenance_msg}.");
            st.state = ActionState::None;
            return Ok(());
        }

        let do_install = dep.deployment.update != "skip";
        if !do_install {
            info!(
                "hawkBit requested to skip installation, not invoking the installer yet{maintenance_msg}."
            );
        }

        if !do_install && st.id.as_deref() == Some(dep.id.as_str()) {
            debug!("deployment {} is still waiting{maintenance_msg}.", dep.id);
            st.state = ActionState::None;
            return Ok(());
        }

        // purge any previously downloaded bundle when the deployment changes
        if st.id.as_deref() != Some(dep.id.as_str()) {
            cleanup_bundle(&shared.config);
        } else {
            debug!("continuing scheduled deployment {}{maintenance_msg}.", dep.id);
        }

        st.id = Some(dep.id.clone());
        let feedback_url = shared.ddi.deployment_feedback_url(&dep.id);

        let artifact = match Artifact::from_deployment(&dep, feedback_url.clone(), do_install) {
            Ok(artifact) => artifact,
            Err(err) => return deployment_failed(&shared, &mut st, Some(&feedback_url), err),
        };

        info!(
            "new software ready for download (name: {}, version: {}, size: {} bytes, URL: {})",
            artifact.name, artifact.version, artifact.size, artifact.download_url
        );

        if shared.config.stream_bundle {
            return self.start_streaming_installation(&shared, st, &artifact);
        }

        let dest = match shared.config.bundle_download_location.clone() {
            Some(dest) => dest,
            None => {
                let err = AgentError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    "no bundle download location configured",
                ));
                return deployment_failed(&shared, &mut st, Some(&feedback_url), err);
            }
        };

        match available_space(&dest) {
            Ok(avail) if avail < artifact.size => {
                let err = AgentError::InsufficientSpace {
                    need: artifact.size,
                    avail,
                };
                return deployment_failed(&shared, &mut st, Some(&feedback_url), err);
            }
            Ok(_) => {}
            Err(err) => return deployment_failed(&shared, &mut st, Some(&feedback_url), err),
        }

        // release the previous worker before handing over the artifact
        if let Some(previous) = self.download_thread.take() {
            let _ = previous.join();
        }
        let worker_shared = Arc::clone(&shared);
        self.download_thread = Some(thread::spawn(move || download::run(worker_shared, artifact)));

        Ok(())
    }

    /// Streaming installation: no download, the installer gets the bundle
    /// URL together with the authorization header and TLS options. Shares
    /// the cancel window with the download path; there is no digest stage.
    fn start_streaming_installation(
        &self,
        shared: &Arc<AgentShared>,
        mut st: MutexGuard<'_, ActionInner>,
        artifact: &Artifact,
    ) -> Result<(), AgentError> {
        // the deployment might already be canceled
        if st.state == ActionState::CancelRequested {
            st.state = ActionState::Canceled;
            shared.action.signal();
            return Ok(());
        }

        if !artifact.do_install {
            st.state = ActionState::None;
            return Ok(());
        }

        st.state = ActionState::Installing;
        shared.action.signal();
        drop(st);

        let request = InstallRequest {
            bundle: artifact.download_url.clone(),
            auth_header: Some(shared.ddi.auth_header()),
            ssl_key: shared.config.ssl_key.clone(),
            ssl_cert: shared.config.ssl_cert.clone(),
            ssl_verify: shared.config.ssl_verify,
        };
        let monitor = Arc::new(AgentMonitor::new(Arc::clone(shared)));
        if !shared.installer.install(request, monitor, shared.run_once) {
            return Err(AgentError::StreamInstall);
        }

        Ok(())
    }
}

/// Deployment-failed cleanup: best-effort failure feedback (when the action
/// id is known), bundle removal and return to the idle state.
fn deployment_failed(
    shared: &AgentShared,
    st: &mut ActionInner,
    feedback_url: Option<&str>,
    err: AgentError,
) -> Result<(), AgentError> {
    if let (Some(url), Some(id)) = (feedback_url, st.id.as_deref()) {
        if let Err(feedback_err) =
            shared
                .ddi
                .feedback(url, id, &err.to_string(), Finished::Failure, Execution::Closed)
        {
            warn!("{feedback_err}");
        }
    }
    cleanup_bundle(&shared.config);
    st.state = ActionState::None;
    Err(err)
}

/// Free bytes of the file system holding `path`'s parent directory.
#[cfg(unix)]
fn available_space(path: &Path) -> Result<u64, AgentError> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("/"));
    let cpath = CString::new(dir.as_os_str().as_bytes())
        .map_err(|_| AgentError::Parse(format!("path {} contains NUL", path.display())))?;

    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statvfs(cpath.as_ptr(), &mut stat) } != 0 {
        let err = io::Error::last_os_error();
        return Err(AgentError::Io(io::Error::new(
            err.kind(),
            format!("failed to calculate free space for {}: {err}", path.display()),
        )));
    }

    Ok(stat.f_bsize as u64 * stat.f_bavail as u64)
}

#[cfg(not(unix))]
fn available_space(_path: &Path) -> Result<u64, AgentError> {
    Ok(u64::MAX)
}
