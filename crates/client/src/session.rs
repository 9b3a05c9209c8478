//! Session controller: event queue, transport lifecycle, and the
//! public subscribe/cancel/snapshot surface.
//!
//! Every input — socket frames, poll resyncs, synthetic notifications —
//! funnels through one mpsc queue consumed by a single apply task, so
//! the reducer always runs single-threaded in arrival order even
//! though the socket reader and the poll timer are independent
//! producers. Consumers only ever see immutable snapshots.

use std::sync::Arc;
use std::time::Duration;

use journ_core::events::WorkflowEvent;
use journ_core::reducer;
use journ_core::session::{NotificationKind, WorkflowSession};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendError, FrameStream, WorkflowBackend};
use crate::config::ClientConfig;
use crate::reconnect::{next_delay, reconnect_loop, ReconnectConfig};
use crate::wire;

/// Broadcast capacity for per-event session updates. Slow receivers
/// observe `RecvError::Lagged` and should fall back to `snapshot()`.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// How long `shutdown` waits for each task to exit cleanly.
const SHUTDOWN_TASK_TIMEOUT: Duration = Duration::from_secs(5);

/// Push-connection state.
///
/// Surfaced to callers as a connectivity indicator only; it never
/// affects the workflow status itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Result of a cancellation request that the server accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// A terminal event confirmed the cancellation.
    Confirmed,
    /// No terminal event arrived within the timeout. The session is
    /// still running; a warning notification was appended.
    Unconfirmed,
}

/// Errors from the session controller.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The cancellation HTTP call failed; the session is unchanged.
    #[error("Cancellation request failed: {0}")]
    CancelRequestFailed(#[source] BackendError),

    /// The subscription's apply task has stopped.
    #[error("Session is closed")]
    Closed,
}

/// A live subscription to one workflow run.
///
/// Created via [`WorkflowSubscription::open`]. Dropping the
/// subscription (or calling [`shutdown`](Self::shutdown)) closes the
/// transport and stops the poll timer without any server side effects.
pub struct WorkflowSubscription {
    workflow_id: String,
    backend: Arc<dyn WorkflowBackend>,
    event_tx: mpsc::UnboundedSender<WorkflowEvent>,
    state_rx: watch::Receiver<Arc<WorkflowSession>>,
    update_tx: broadcast::Sender<Arc<WorkflowSession>>,
    connection_rx: watch::Receiver<ConnectionState>,
    cancel_timeout: Duration,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkflowSubscription {
    /// Open a subscription for one workflow run.
    ///
    /// Spawns the apply task, the socket task, and the poll-fallback
    /// task, and immediately requests a snapshot so the session
    /// fast-forwards past any events emitted before this subscriber
    /// attached.
    pub fn open(
        backend: Arc<dyn WorkflowBackend>,
        workflow_id: impl Into<String>,
        project_id: impl Into<String>,
        config: &ClientConfig,
    ) -> Self {
        let workflow_id = workflow_id.into();
        let initial = Arc::new(WorkflowSession::new(workflow_id.clone(), project_id));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(initial);
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let (connection_tx, connection_rx) = watch::channel(ConnectionState::Disconnected);

        let cancel = CancellationToken::new();
        // Child token: cancelled when the session reaches a terminal
        // status, so the transports stop while the handle stays usable.
        let transport_cancel = cancel.child_token();

        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(run_apply_loop(
            event_rx,
            state_tx,
            update_tx.clone(),
            cancel.clone(),
            transport_cancel.clone(),
        )));

        // Initial fast-forward, independent of the socket handshake.
        {
            let backend = Arc::clone(&backend);
            let workflow_id = workflow_id.clone();
            let event_tx = event_tx.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = fetch_and_resync(backend.as_ref(), &workflow_id, &event_tx).await {
                    tracing::warn!(
                        workflow_id = %workflow_id,
                        error = %e,
                        "Initial snapshot fetch failed; poll fallback will retry",
                    );
                }
            }));
        }

        tasks.push(tokio::spawn(run_socket_loop(
            Arc::clone(&backend),
            workflow_id.clone(),
            event_tx.clone(),
            connection_tx,
            transport_cancel.clone(),
        )));

        tasks.push(tokio::spawn(run_poll_loop(
            Arc::clone(&backend),
            workflow_id.clone(),
            event_tx.clone(),
            state_rx.clone(),
            connection_rx.clone(),
            transport_cancel,
            Duration::from_secs(config.poll_interval_secs),
        )));

        Self {
            workflow_id,
            backend,
            event_tx,
            state_rx,
            update_tx,
            connection_rx,
            cancel_timeout: Duration::from_secs(config.cancel_timeout_secs),
            cancel,
            tasks,
        }
    }

    /// The workflow this subscription tracks.
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Latest session state, synchronously.
    pub fn snapshot(&self) -> WorkflowSession {
        (**self.state_rx.borrow()).clone()
    }

    /// Receive one update per applied event.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<WorkflowSession>> {
        self.update_tx.subscribe()
    }

    /// Watch-style receiver that always holds the latest state.
    pub fn watch(&self) -> watch::Receiver<Arc<WorkflowSession>> {
        self.state_rx.clone()
    }

    /// Connectivity indicator for the push channel.
    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection_rx.clone()
    }

    /// Request cancellation and wait for the server to confirm it.
    ///
    /// Cancellation is cooperative: a 2xx from the cancel endpoint only
    /// means the request was accepted, so this waits up to the
    /// configured timeout for a terminal event. On timeout the session
    /// is left running and exactly one warning notification is
    /// appended.
    pub async fn cancel(&self) -> Result<CancelOutcome, SessionError> {
        self.backend
            .request_cancel(&self.workflow_id)
            .await
            .map_err(SessionError::CancelRequestFailed)?;

        tracing::info!(workflow_id = %self.workflow_id, "Cancellation request accepted");

        let mut state_rx = self.state_rx.clone();
        let wait_for_terminal = async move {
            loop {
                if state_rx.borrow().status.is_terminal() {
                    return true;
                }
                if state_rx.changed().await.is_err() {
                    return false;
                }
            }
        };

        match tokio::time::timeout(self.cancel_timeout, wait_for_terminal).await {
            Ok(true) => Ok(CancelOutcome::Confirmed),
            Ok(false) => Err(SessionError::Closed),
            Err(_) => {
                tracing::warn!(
                    workflow_id = %self.workflow_id,
                    timeout_secs = self.cancel_timeout.as_secs(),
                    "Cancellation unconfirmed within timeout",
                );
                let _ = self.event_tx.send(WorkflowEvent::SystemNotification {
                    kind: NotificationKind::Warning,
                    message: "Cancellation requested but not yet confirmed by the server"
                        .to_string(),
                    malformed: false,
                });
                Ok(CancelOutcome::Unconfirmed)
            }
        }
    }

    /// Stop all tasks and close the transport. No server side effects.
    pub async fn shutdown(mut self) {
        tracing::info!(workflow_id = %self.workflow_id, "Shutting down workflow subscription");
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = tokio::time::timeout(SHUTDOWN_TASK_TIMEOUT, task).await;
        }
    }
}

impl Drop for WorkflowSubscription {
    fn drop(&mut self) {
        // Walking away must stop the socket and poll tasks even
        // without an explicit shutdown call.
        self.cancel.cancel();
    }
}

/// Single consumer of the event queue: applies the reducer and
/// publishes the new state. Stops the transports once the session
/// reaches a terminal status.
async fn run_apply_loop(
    mut event_rx: mpsc::UnboundedReceiver<WorkflowEvent>,
    state_tx: watch::Sender<Arc<WorkflowSession>>,
    update_tx: broadcast::Sender<Arc<WorkflowSession>>,
    cancel: CancellationToken,
    transport_cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            maybe = event_rx.recv() => match maybe {
                Some(event) => event,
                None => break,
            },
        };

        let mut session = (**state_tx.borrow()).clone();
        reducer::apply(&mut session, &event, chrono::Utc::now());
        let shared = Arc::new(session);

        let terminal = shared.status.is_terminal();
        let _ = state_tx.send(Arc::clone(&shared));
        let _ = update_tx.send(shared);

        if terminal && !transport_cancel.is_cancelled() {
            tracing::info!(
                event = event.name(),
                "Workflow reached terminal status; stopping transports",
            );
            transport_cancel.cancel();
        }
    }
}

/// Push-connection loop: connect, resync, process frames, reconnect.
///
/// Runs until the cancellation token is triggered. Every successful
/// (re)connect is followed by a snapshot resync to correct drift
/// accumulated while disconnected, rather than trusting the socket to
/// replay missed frames.
async fn run_socket_loop(
    backend: Arc<dyn WorkflowBackend>,
    workflow_id: String,
    event_tx: mpsc::UnboundedSender<WorkflowEvent>,
    connection_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    let reconnect_config = ReconnectConfig::default();
    let mut first_attempt = true;

    loop {
        let stream = if first_attempt {
            first_attempt = false;
            match backend.connect(&workflow_id).await {
                Ok(stream) => Some(stream),
                Err(e) => {
                    tracing::warn!(
                        workflow_id = %workflow_id,
                        error = %e,
                        "Connection failed, entering reconnect loop",
                    );
                    reconnect_loop(backend.as_ref(), &workflow_id, &reconnect_config, &cancel)
                        .await
                }
            }
        } else {
            reconnect_loop(backend.as_ref(), &workflow_id, &reconnect_config, &cancel).await
        };

        let Some(mut stream) = stream else {
            return; // cancelled
        };

        let _ = connection_tx.send(ConnectionState::Connected);

        // Correct any drift before trusting the live frames.
        if let Err(e) = fetch_and_resync(backend.as_ref(), &workflow_id, &event_tx).await {
            tracing::warn!(
                workflow_id = %workflow_id,
                error = %e,
                "Post-connect snapshot fetch failed",
            );
        }

        process_frames(&mut stream, &workflow_id, &event_tx, &cancel).await;

        let _ = connection_tx.send(ConnectionState::Disconnected);

        if cancel.is_cancelled() {
            return;
        }
        tracing::info!(workflow_id = %workflow_id, "Push connection lost");
    }
}

/// Read raw frames until the stream ends, normalizing each one and
/// handing the canonical event to the apply queue.
async fn process_frames(
    stream: &mut FrameStream,
    workflow_id: &str,
    event_tx: &mpsc::UnboundedSender<WorkflowEvent>,
    cancel: &CancellationToken,
) {
    use futures::StreamExt;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(text)) => handle_frame(&text, workflow_id, event_tx),
            Some(Err(e)) => {
                tracing::error!(workflow_id, error = %e, "Socket receive error");
                return;
            }
            None => return,
        }
    }
}

/// Normalize one text frame and enqueue the canonical event.
///
/// Frames addressed to a foreign workflow are dropped and logged;
/// unparseable frames are logged and never reach the reducer.
fn handle_frame(text: &str, workflow_id: &str, event_tx: &mpsc::UnboundedSender<WorkflowEvent>) {
    match wire::normalize(text) {
        Ok(frame) => {
            if let Some(ref frame_workflow) = frame.workflow_id {
                if frame_workflow != workflow_id {
                    tracing::warn!(
                        workflow_id,
                        frame_workflow = %frame_workflow,
                        "Dropping frame for foreign workflow",
                    );
                    return;
                }
            }
            tracing::debug!(workflow_id, event = frame.event.name(), "Frame normalized");
            let _ = event_tx.send(frame.event);
        }
        Err(e) => {
            tracing::warn!(
                workflow_id,
                error = %e,
                raw_frame = %text,
                "Failed to parse frame",
            );
        }
    }
}

/// Snapshot-poll fallback.
///
/// While the session is not terminal and the push connection is down,
/// fetch a snapshot every `poll_interval` and enqueue a resync. Fetch
/// failures back off exponentially and are surfaced as connectivity
/// warnings only; they never flip the workflow status.
async fn run_poll_loop(
    backend: Arc<dyn WorkflowBackend>,
    workflow_id: String,
    event_tx: mpsc::UnboundedSender<WorkflowEvent>,
    state_rx: watch::Receiver<Arc<WorkflowSession>>,
    connection_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    poll_interval: Duration,
) {
    let backoff = ReconnectConfig {
        initial_delay: poll_interval,
        ..Default::default()
    };
    let mut delay = poll_interval;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let status = state_rx.borrow().status;
        if status.is_terminal() {
            return;
        }
        if *connection_rx.borrow() == ConnectionState::Connected {
            // Push channel is healthy; nothing to do this tick.
            delay = poll_interval;
            continue;
        }

        match fetch_and_resync(backend.as_ref(), &workflow_id, &event_tx).await {
            Ok(()) => {
                delay = poll_interval;
            }
            Err(e) => {
                delay = next_delay(delay, &backoff);
                tracing::warn!(
                    workflow_id = %workflow_id,
                    error = %e,
                    next_delay_ms = delay.as_millis() as u64,
                    "Snapshot poll failed; backing off",
                );
            }
        }
    }
}

/// Fetch the server snapshot and enqueue it as a `Resync` event.
async fn fetch_and_resync(
    backend: &dyn WorkflowBackend,
    workflow_id: &str,
    event_tx: &mpsc::UnboundedSender<WorkflowEvent>,
) -> Result<(), BackendError> {
    let snapshot = backend.fetch_snapshot(workflow_id).await?;
    if snapshot.workflow_id != workflow_id {
        tracing::warn!(
            workflow_id,
            snapshot_workflow = %snapshot.workflow_id,
            "Snapshot names a foreign workflow; ignoring",
        );
        return Ok(());
    }
    tracing::debug!(
        workflow_id,
        status = ?snapshot.status,
        progress = snapshot.progress_percentage,
        "Applying server snapshot",
    );
    let _ = event_tx.send(WorkflowEvent::Resync(snapshot));
    Ok(())
}
