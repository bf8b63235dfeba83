//! Reconnect supervision.
//!
//! The client never reconnects on its own; something has to call
//! [`ControlClient::connect`] again after a `disconnected` event. This
//! module provides that something: a task that watches for disconnects and
//! redials with exponential backoff.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::client::ControlClient;
use crate::events::EventKind;

/// Backoff settings for the reconnect supervisor.
#[derive(Clone, Copy, Debug)]
pub struct SupervisorConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

/// Spawn a supervisor that reconnects the client after every disconnect.
///
/// Gives up for good once a single outage exhausts `max_attempts`; the
/// returned handle can be aborted to stop supervision earlier.
pub fn spawn(client: &ControlClient, config: SupervisorConfig) -> JoinHandle<()> {
    let (notify_tx, mut notify_rx) = mpsc::channel::<()>(1);
    client.on(EventKind::Disconnected, move |_| {
        let notify = notify_tx.clone();
        async move {
            let _ = notify.try_send(());
            Ok(())
        }
    });

    let client = client.clone();
    tokio::spawn(async move {
        while notify_rx.recv().await.is_some() {
            let mut attempt = 0u32;
            let mut delay = config.base_delay;
            loop {
                tokio::time::sleep(delay).await;
                match client.connect().await {
                    Ok(()) => {
                        info!("Reconnected to control endpoint after {attempt} failed attempts");
                        break;
                    }
                    Err(e) => {
                        attempt += 1;
                        if attempt >= config.max_attempts {
                            error!("Giving up on control endpoint after {attempt} attempts: {e}");
                            return;
                        }
                        warn!("Reconnect attempt {attempt} failed: {e}");
                        delay = (delay * 2).min(config.max_delay);
                    }
                }
            }
        }
    })
}
