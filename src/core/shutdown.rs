//! # OS termination signals.
//!
//! [`wait_for_shutdown_signal`] completes on `SIGINT`, `SIGTERM`, `SIGQUIT` or
//! `SIGHUP` (the desktop session logging out). The session turns it into a
//! graceful teardown.

/// Waits for a termination signal.
///
/// Each call creates independent signal listeners. Returns `Err` if signal
/// registration fails.
pub async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;
    let mut sighup = signal(SignalKind::hangup())?;

    let name = tokio::select! {
        _ = sigint.recv()  => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
        _ = sighup.recv()  => "SIGHUP",
    };
    Ok(name)
}
