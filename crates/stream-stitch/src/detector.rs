//! Stream lifecycle detection.
//!
//! Derives a clean session state machine from the noisy sequence of
//! state-change and reconnect notifications the recorder emits, and creates
//! and finalizes [`Stream`](crate::model::Stream) records through the
//! [`StreamService`]. Driven entirely by control-client callbacks, so
//! transitions inherit the client's one-frame-at-a-time ordering and cannot
//! race each other.

use std::sync::Arc;

use chrono::{Duration, Utc};
use obs_control::{
    ClientEvent, ControlClient, EventKind, OutputState, StreamStateChanged, StreamStatus,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::service::StreamService;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Detector-local session state. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Offline,
    Starting,
    Live,
    Stopping,
    Reconnecting,
}

/// Notifications broadcast as the session moves through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Starting,
    Started { common_id: String },
    Reconnected,
    Stopping,
    Stopped { common_id: String },
    Reconnecting,
}

struct DetectorState {
    state: StreamState,
    /// commonId of the session currently being tracked, if any.
    current: Option<String>,
}

/// Derives session boundaries from recorder state changes.
pub struct LifecycleDetector<S> {
    service: Arc<S>,
    state: tokio::sync::Mutex<DetectorState>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl<S: StreamService + 'static> LifecycleDetector<S> {
    pub fn new(service: Arc<S>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            service,
            state: tokio::sync::Mutex::new(DetectorState {
                state: StreamState::Offline,
                current: None,
            }),
            events,
        }
    }

    /// Subscribe to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub async fn current_state(&self) -> StreamState {
        self.state.lock().await.state
    }

    /// commonId of the tracked session, if one is live.
    pub async fn current_stream_id(&self) -> Option<String> {
        self.state.lock().await.current.clone()
    }

    /// Wire the detector onto a control client's listeners.
    ///
    /// Registers `connected` (initial-status backfill), `disconnected`, and
    /// the stream-state listener. Persistence failures during a live
    /// transition propagate into the client's log-and-continue dispatch.
    pub fn attach(self: Arc<Self>, client: &ControlClient) {
        let detector = self.clone();
        let status_client = client.clone();
        client.on(EventKind::Connected, move |_| {
            let detector = detector.clone();
            let client = status_client.clone();
            async move {
                match client.get_stream_status().await {
                    Ok(status) => detector.adopt_initial_status(&status).await,
                    Err(e) => warn!("Initial stream status query failed: {e}"),
                }
                Ok(())
            }
        });

        let detector = self.clone();
        client.on(EventKind::Disconnected, move |_| {
            let detector = detector.clone();
            async move {
                detector.handle_disconnected().await;
                Ok(())
            }
        });

        let detector = self.clone();
        client.on(EventKind::StreamState, move |event| {
            let detector = detector.clone();
            async move {
                if let ClientEvent::StreamState(change) = event {
                    detector.handle_state_change(change).await?;
                }
                Ok(())
            }
        });
    }

    /// Apply one recorder state-change notification.
    pub async fn handle_state_change(&self, change: StreamStateChanged) -> Result<()> {
        let mut guard = self.state.lock().await;
        match change.output_state {
            OutputState::Starting => {
                guard.state = StreamState::Starting;
                self.notify(LifecycleEvent::Starting);
            }
            OutputState::Started | OutputState::Reconnected => {
                if guard.state != StreamState::Live {
                    let was_reconnecting = guard.state == StreamState::Reconnecting;
                    guard.state = StreamState::Live;
                    let common_id = uuid::Uuid::new_v4().to_string();
                    self.service.create_stream(&common_id, Utc::now()).await?;
                    info!("Stream session {common_id} started");
                    guard.current = Some(common_id.clone());
                    self.notify(LifecycleEvent::Started { common_id });
                    if was_reconnecting {
                        self.notify(LifecycleEvent::Reconnected);
                    }
                }
            }
            OutputState::Stopping => {
                guard.state = StreamState::Stopping;
                self.notify(LifecycleEvent::Stopping);
            }
            OutputState::Stopped => {
                guard.state = StreamState::Offline;
                if let Some(common_id) = guard.current.take() {
                    self.service
                        .update_stream_end(&common_id, Utc::now())
                        .await?;
                    info!("Stream session {common_id} ended");
                    self.notify(LifecycleEvent::Stopped { common_id });
                }
            }
            OutputState::Reconnecting => {
                guard.state = StreamState::Reconnecting;
                self.notify(LifecycleEvent::Reconnecting);
            }
        }
        Ok(())
    }

    /// Adopt a session that was already running when the client connected.
    ///
    /// Covers a daemon restart mid-stream: the start time is backfilled
    /// from the reported output duration and the session is created
    /// immediately, without waiting for a future `started` notification.
    /// Creation is best effort; a persistence failure is logged and the
    /// next state change proceeds normally.
    pub async fn adopt_initial_status(&self, status: &StreamStatus) {
        let mut guard = self.state.lock().await;
        if !status.output_active {
            return;
        }
        if status.output_reconnecting {
            debug!("Recorder is reconnecting; deferring session adoption");
            guard.state = StreamState::Reconnecting;
            return;
        }

        guard.state = StreamState::Live;
        let common_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now() - Duration::milliseconds(status.output_duration as i64);
        match self.service.create_stream(&common_id, started_at).await {
            Ok(_) => {
                info!(
                    "Adopted already-live session {common_id} (started {}ms ago)",
                    status.output_duration
                );
                guard.current = Some(common_id);
            }
            Err(e) => warn!("Failed to backfill already-live session: {e}"),
        }
    }

    /// Reset on transport loss.
    ///
    /// The recorder, not the transport, owns session truth: no end time is
    /// written here. If the recorder kept streaming, reconnecting adopts
    /// the session again via the initial-status backfill.
    pub async fn handle_disconnected(&self) {
        let mut guard = self.state.lock().await;
        guard.state = StreamState::Offline;
        if guard.current.take().is_some() {
            debug!("Control connection lost; dropping session tracking without an end time");
        }
    }

    fn notify(&self, event: LifecycleEvent) {
        // Send only fails when nobody is subscribed, which is fine.
        let _ = self.events.send(event);
    }
}
