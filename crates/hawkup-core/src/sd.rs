//! systemd notifications: readiness, stop and watchdog pings.

use sd_notify::NotifyState;
use tracing::warn;

pub fn notify_ready() {
    if let Err(err) = sd_notify::notify(
        false,
        &[
            NotifyState::Ready,
            NotifyState::Status("Init completed, start polling hawkBit for new software."),
        ],
    ) {
        warn!("systemd notify failed: {err}");
    }
}

pub fn notify_stopping() {
    if let Err(err) = sd_notify::notify(
        false,
        &[
            NotifyState::Stopping,
            NotifyState::Status("Stopped polling hawkBit for new software."),
        ],
    ) {
        warn!("systemd notify failed: {err}");
    }
}

/// Pings the service watchdog; a no-op when no watchdog is armed.
/// Called once per tick of the polling loop.
pub fn watchdog_ping() {
    let mut usec = 0;
    if sd_notify::watchdog_enabled(false, &mut usec) {
        let _ = sd_notify::notify(false, &[NotifyState::Watchdog]);
    }
}
