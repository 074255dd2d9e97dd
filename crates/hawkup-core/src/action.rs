//! The action store: the single in-process deployment lifecycle object.
//!
//! Exactly one deployment is tracked at a time. All mutations happen under
//! the store's mutex; the condition variable lets the cancel processor wait
//! until the download worker has observed a cancel request.

use std::sync::{Condvar, Mutex, MutexGuard};

/// Lifecycle state of the tracked deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionState {
    /// No deployment is being processed.
    #[default]
    None,
    /// The deployment was canceled before installation started.
    Canceled,
    /// Download or installation failed.
    Error,
    /// Installation (or download-only handling) finished successfully.
    Success,
    /// A deployment descriptor is being fetched and validated.
    Processing,
    /// The download worker is transferring the bundle.
    Downloading,
    /// The installer has been dispatched; cancelation is rejected from here.
    Installing,
    /// The server asked to cancel; the worker has not yet observed it.
    CancelRequested,
}

impl ActionState {
    /// True while a deployment occupies the device, i.e. a new deployment
    /// must be refused.
    pub fn in_progress(self) -> bool {
        matches!(
            self,
            ActionState::Processing
                | ActionState::Downloading
                | ActionState::Installing
                | ActionState::CancelRequested
        )
    }
}

/// Mutable action fields; only accessible through [`Action::lock`].
#[derive(Debug, Default)]
pub struct ActionInner {
    /// Server-issued deployment identifier.
    pub id: Option<String>,
    pub state: ActionState,
}

/// Mutex + condvar around the action fields.
#[derive(Debug, Default)]
pub struct Action {
    inner: Mutex<ActionInner>,
    cond: Condvar,
}

impl Action {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, ActionInner> {
        self.inner.lock().unwrap()
    }

    /// Wakes threads blocked in [`Action::wait_while_cancel_requested`].
    /// The worker signals immediately before releasing the mutex on any
    /// terminal transition so a canceling thread observes the post-cancel
    /// state before reporting it.
    pub fn signal(&self) {
        self.cond.notify_all();
    }

    /// Blocks until the state leaves `CancelRequested`.
    pub fn wait_while_cancel_requested<'a>(
        &self,
        guard: MutexGuard<'a, ActionInner>,
    ) -> MutexGuard<'a, ActionInner> {
        self.cond
            .wait_while(guard, |a| a.state == ActionState::CancelRequested)
            .unwrap()
    }

    /// Current id and state, for observers that do not need to hold the lock.
    pub fn snapshot(&self) -> (Option<String>, ActionState) {
        let st = self.lock();
        (st.id.clone(), st.state)
    }
}
