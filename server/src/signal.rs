//! Signal handling for graceful shutdown.

use crate::ShutdownTrigger;

/// Install a SIGINT/SIGTERM handler that trips the server's shutdown
/// trigger. A second signal forces an immediate exit.
pub fn install(trigger: ShutdownTrigger) {
    let mut armed = Some(trigger);
    let mut seen = false;
    ctrlc::set_handler(move || {
        if seen {
            tracing::warn!("second signal, exiting immediately");
            std::process::exit(1);
        }
        seen = true;
        tracing::info!("shutdown signal received");
        if let Some(trigger) = armed.take() {
            trigger.shutdown();
        }
    })
    .expect("failed to install signal handler");
}
