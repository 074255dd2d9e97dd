//! Download worker: resumable bundle transfer, digest validation and
//! installer dispatch.
//!
//! Runs outside the action mutex except for the short critical sections
//! around state transitions. Checks for a cancel request at three points:
//! on start, between download retries and immediately before the transition
//! to installing.

use std::fs;
use std::sync::{Arc, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::action::{ActionInner, ActionState};
use crate::ddi::status::{Execution, Finished};
use crate::installer::InstallRequest;

use super::{cleanup_bundle, AgentMonitor, AgentShared, Artifact};

/// Pause before resuming an interrupted download.
const RESUME_PAUSE: Duration = Duration::from_millis(500);

/// Downloads the artifact, verifies its checksum and hands it to the
/// installer. Returns whether the download (and, when the worker waited for
/// it, the installation) succeeded.
pub(crate) fn run(shared: Arc<AgentShared>, artifact: Artifact) -> bool {
    let Some(dest) = shared.config.bundle_download_location.clone() else {
        warn!("no bundle download location configured");
        return false;
    };

    {
        let mut st = shared.action.lock();
        if st.state == ActionState::CancelRequested {
            return canceled(&shared, st);
        }
        st.state = ActionState::Downloading;
    }

    info!("start downloading: {}", artifact.download_url);

    let (digest, speed) = loop {
        // resume from whatever is already on disk
        let resume_from = fs::metadata(&dest).map(|m| m.len()).unwrap_or(0);

        match shared
            .ddi
            .download(&artifact.download_url, &dest, resume_from, true)
        {
            Ok(result) => break result,
            Err(err) => {
                if !shared.config.resume_downloads || !err.is_resumable_transport() {
                    return failed(&shared, &artifact, &format!("Download failed: {err}"));
                }
                debug!("{err}, resuming download..");

                let st = shared.action.lock();
                if st.state == ActionState::CancelRequested {
                    return canceled(&shared, st);
                }
                drop(st);

                thread::sleep(RESUME_PAUSE);
            }
        }
    };

    // notify hawkBit that the download is complete
    let msg = format!("Download complete. {:.2} MB/s", speed / (1024.0 * 1024.0));
    {
        let st = shared.action.lock();
        let id = st.id.clone().unwrap_or_default();
        if let Err(err) = shared.ddi.feedback_progress(&artifact.feedback_url, &id, &msg) {
            warn!("{err}");
        }
    }

    let digest = digest.unwrap_or_default();
    if !digest.eq_ignore_ascii_case(&artifact.sha1) {
        return failed(
            &shared,
            &artifact,
            &format!(
                "Software: {} V{}. Invalid checksum: {digest} expected {}",
                artifact.name, artifact.version, artifact.sha1
            ),
        );
    }

    {
        let mut st = shared.action.lock();
        // download-only deployment: report it done unless the maintenance
        // window forbids installation for now
        if !artifact.do_install
            && artifact
                .maintenance_window
                .as_deref()
                .map_or(true, |w| w == "available")
        {
            st.state = ActionState::Success;
            let id = st.id.clone().unwrap_or_default();
            if let Err(err) = shared.ddi.feedback(
                &artifact.feedback_url,
                &id,
                "File checksum OK.",
                Finished::Success,
                Execution::Downloaded,
            ) {
                warn!("{err}");
            }
            return true;
        }

        let id = st.id.clone().unwrap_or_default();
        if let Err(err) =
            shared
                .ddi
                .feedback_progress(&artifact.feedback_url, &id, "File checksum OK.")
        {
            warn!("{err}");
        }
    }

    // last chance to cancel before installation starts
    {
        let mut st = shared.action.lock();
        if st.state == ActionState::CancelRequested {
            return canceled(&shared, st);
        }

        if !artifact.do_install {
            // deployment stays pending until the maintenance window opens
            st.state = ActionState::None;
            return true;
        }

        st.state = ActionState::Installing;
        shared.action.signal();
    }

    let request = InstallRequest {
        bundle: dest.display().to_string(),
        auth_header: None,
        ssl_key: None,
        ssl_cert: None,
        ssl_verify: shared.config.ssl_verify,
    };
    let monitor = Arc::new(AgentMonitor::new(Arc::clone(&shared)));
    shared.installer.install(request, monitor, shared.run_once)
}

/// Terminal cancel handling; called with the action locked.
fn canceled(shared: &AgentShared, mut st: MutexGuard<'_, ActionInner>) -> bool {
    st.state = ActionState::Canceled;
    cleanup_bundle(&shared.config);
    shared.action.signal();
    false
}

/// Terminal failure handling: failure feedback, error state, bundle cleanup.
fn failed(shared: &AgentShared, artifact: &Artifact, detail: &str) -> bool {
    let mut st = shared.action.lock();
    let id = st.id.clone().unwrap_or_default();
    if let Err(err) = shared.ddi.feedback(
        &artifact.feedback_url,
        &id,
        detail,
        Finished::Failure,
        Execution::Closed,
    ) {
        warn!("{err}");
    }
    st.state = ActionState::Error;
    cleanup_bundle(&shared.config);
    shared.action.signal();
    false
}
