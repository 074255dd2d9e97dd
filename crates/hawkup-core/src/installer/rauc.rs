//! RAUC installer bridge over D-Bus.
//!
//! Calls `InstallBundle` on `de.pengutronix.rauc.Installer` and relays the
//! `Operation`/`Progress`/`LastError` property changes as progress events
//! until the `Completed` signal delivers the terminal result code
//! (0 = success).

use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use futures_util::StreamExt;
use tracing::{debug, warn};
use zbus::zvariant::Value;

use super::{InstallRequest, Installer, UpdateMonitor};

#[zbus::proxy(
    interface = "de.pengutronix.rauc.Installer",
    default_service = "de.pengutronix.rauc",
    default_path = "/"
)]
trait RaucInstaller {
    fn install_bundle(
        &self,
        source: &str,
        args: HashMap<&str, Value<'_>>,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    fn completed(&self, result: i32) -> zbus::Result<()>;

    #[zbus(property)]
    fn operation(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn progress(&self) -> zbus::Result<(i32, String, i32)>;

    #[zbus(property)]
    fn last_error(&self) -> zbus::Result<String>;
}

/// RAUC D-Bus bridge. At most one installation runs at a time; a previous
/// install thread is joined before the next one starts.
#[derive(Debug, Default)]
pub struct RaucBridge {
    thread: Mutex<Option<JoinHandle<bool>>>,
}

impl RaucBridge {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Installer for RaucBridge {
    fn install(&self, request: InstallRequest, monitor: Arc<dyn UpdateMonitor>, wait: bool) -> bool {
        let mut slot = self.thread.lock().unwrap();
        if let Some(previous) = slot.take() {
            let _ = previous.join();
        }

        let handle = thread::spawn(move || {
            let success = match run_install(&request, monitor.as_ref()) {
                Ok(result) => result == 0,
                Err(e) => {
                    warn!("RAUC installation failed: {e}");
                    false
                }
            };
            monitor.install_complete(success);
            success
        });

        if wait {
            handle.join().unwrap_or(false)
        } else {
            *slot = Some(handle);
            true
        }
    }
}

/// Runs one installation on the session or system bus and returns RAUC's
/// terminal result code.
///
/// The install thread drives the signal and property streams itself with
/// `async_io::block_on`; the connection's socket I/O runs on zbus's own
/// executor thread.
fn run_install(request: &InstallRequest, monitor: &dyn UpdateMonitor) -> zbus::Result<i32> {
    async_io::block_on(async {
        let connection = if env::var("DBUS_STARTER_BUS_TYPE").as_deref() == Ok("session") {
            zbus::Connection::session().await?
        } else {
            zbus::Connection::system().await?
        };

        debug!("creating RAUC DBUS proxy");
        let proxy = RaucInstallerProxy::new(&connection).await?;

        // subscribe before calling InstallBundle so no event is lost
        let mut completed = proxy.receive_completed().await?.fuse();
        let mut operation = proxy.receive_operation_changed().await.fuse();
        let mut progress = proxy.receive_progress_changed().await.fuse();
        let mut last_error = proxy.receive_last_error_changed().await.fuse();

        let mut args: HashMap<&str, Value<'_>> = HashMap::new();
        if let Some(header) = &request.auth_header {
            args.insert("http-headers", Value::from(vec![header.clone()]));
            args.insert("tls-no-verify", Value::from(!request.ssl_verify));
        }
        if let (Some(key), Some(cert)) = (&request.ssl_key, &request.ssl_cert) {
            args.insert("tls-key", Value::from(key.clone()));
            args.insert("tls-cert", Value::from(cert.clone()));
            args.insert("tls-no-verify", Value::from(!request.ssl_verify));
        }

        debug!("trying to contact RAUC DBUS service");
        proxy.install_bundle(&request.bundle, args).await?;

        loop {
            futures_util::select! {
                signal = completed.next() => match signal {
                    Some(signal) => {
                        let result = signal.args()?.result;
                        if result >= 0 {
                            return Ok(result);
                        }
                    }
                    None => {
                        return Err(zbus::Error::Failure("RAUC DBUS service disappeared".into()));
                    }
                },
                change = operation.next() => {
                    if let Some(change) = change {
                        if let Ok(operation) = change.get().await {
                            monitor.install_progress(&operation);
                        }
                    }
                },
                change = progress.next() => {
                    if let Some(change) = change {
                        if let Ok((percentage, message, _depth)) = change.get().await {
                            monitor.install_progress(&format!("{percentage:3}% {message}"));
                        }
                    }
                },
                change = last_error.next() => {
                    if let Some(change) = change {
                        if let Ok(message) = change.get().await {
                            if !message.is_empty() {
                                monitor.install_progress(&format!("LastError: {message}"));
                            }
                        }
                    }
                },
            }
        }
    })
}
