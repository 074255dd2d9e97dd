//! Cancel processor: coordinates a server cancel request with the action
//! store, waiting for the download worker to observe the cancel window.

use tracing::{debug, info};

use crate::action::ActionState;
use crate::ddi::resources::{CancelBase, ControllerBase};
use crate::ddi::status::{Execution, Finished};
use crate::error::AgentError;

use super::UpdateAgent;

impl UpdateAgent {
    /// Processes a cancel request offered by the controller base response.
    ///
    /// When the request targets the active action and installation has not
    /// started, the state is flipped to cancel-requested and the call blocks
    /// on the condition variable until the worker resolves it. The feedback
    /// sent afterwards depends on the state the action ended up in.
    pub(crate) fn process_cancel(&self, base: &ControllerBase) -> Result<(), AgentError> {
        let shared = &self.shared;
        let href = base
            .links
            .cancel_action
            .as_ref()
            .map(|link| link.href.clone())
            .ok_or_else(|| AgentError::Parse("'_links.cancelAction.href' missing".into()))?;

        let cancel: CancelBase = shared.ddi.get_json(&href)?;
        let stop_id = cancel.cancel_action.stop_id;
        info!("received cancelation for action {stop_id}");

        let feedback_url = shared.ddi.cancel_feedback_url(&stop_id);

        let mut st = shared.action.lock();
        // cancel the action only if installation has not started yet
        if st.id.as_deref() == Some(stop_id.as_str())
            && matches!(st.state, ActionState::Processing | ActionState::Downloading)
        {
            debug!(
                "action {stop_id} is in state {:?}, waiting for cancel request to be processed",
                st.state
            );
            st.state = ActionState::CancelRequested;
            st = shared.action.wait_while_cancel_requested(st);
        }

        if st.id.as_deref() != Some(stop_id.as_str()) {
            // stale cancel about an old action
            st.state = ActionState::None;
        }

        match st.state {
            ActionState::None => {
                // action unknown, acknowledge the cancelation nonetheless
                debug!("received cancelation for unprocessed action {stop_id}, acknowledging.");
                shared.ddi.feedback(
                    &feedback_url,
                    &stop_id,
                    "Action canceled.",
                    Finished::Success,
                    Execution::Closed,
                )
            }
            ActionState::Canceled => shared.ddi.feedback(
                &feedback_url,
                &stop_id,
                "Action canceled.",
                Finished::Success,
                Execution::Closed,
            ),
            ActionState::Success => {
                debug!("cancelation impossible, installation succeeded already");
                Ok(())
            }
            ActionState::Error => {
                debug!("cancelation impossible, installation failed already");
                Ok(())
            }
            ActionState::Installing => {
                shared.ddi.feedback(
                    &feedback_url,
                    &stop_id,
                    "Cancelation impossible, installation started already.",
                    Finished::Success,
                    Execution::Rejected,
                )?;
                Err(AgentError::Cancelation)
            }
            state => unreachable!("unexpected action state after cancel request: {state:?}"),
        }
    }
}
