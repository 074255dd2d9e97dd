//! Installer seam between the agent core and the actual install service.
//!
//! The core hands a bundle (a path, or a URL in streaming mode) to an
//! [`Installer`] and receives progress plus the terminal verdict through the
//! [`UpdateMonitor`] it implements itself. Tests plug in a scripted
//! installer; production wires up [`rauc::RaucBridge`].

pub mod rauc;

use std::sync::Arc;

/// What to install and how to fetch it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    /// Path of the downloaded bundle, or its URL in streaming mode.
    pub bundle: String,
    /// Full `Authorization` header for streaming installations.
    pub auth_header: Option<String>,
    /// Client TLS key for streaming installations.
    pub ssl_key: Option<String>,
    /// Client TLS certificate for streaming installations.
    pub ssl_cert: Option<String>,
    /// Whether the installer should verify the server certificate.
    pub ssl_verify: bool,
}

/// Callbacks implemented by the agent core.
pub trait UpdateMonitor: Send + Sync {
    /// A human-readable progress event from the installer.
    fn install_progress(&self, message: &str);

    /// Terminal installation result. Called exactly once per install.
    fn install_complete(&self, success: bool);
}

/// An installation backend.
pub trait Installer: Send + Sync {
    /// Starts an installation, streaming events to `monitor`.
    ///
    /// With `wait` the call blocks until the terminal result and returns it;
    /// otherwise the installation proceeds in the background and the return
    /// value is `true`. `monitor.install_complete` fires in both modes.
    fn install(&self, request: InstallRequest, monitor: Arc<dyn UpdateMonitor>, wait: bool) -> bool;
}
