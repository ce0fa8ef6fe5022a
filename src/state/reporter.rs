//! Background task driving one [`StateCoalescer`].

use super::coalescer::{StateCoalescer, SubmitOutcome};
use super::input::StateInput;
use crate::config::{CoalescerConfig, StateNodeConfig};
use crate::error::{BridgeError, Result, StateRejection};
use crate::transport::Publisher;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

type Reply = oneshot::Sender<std::result::Result<SubmitOutcome, StateRejection>>;

struct Request {
    input: StateInput,
    reply: Option<Reply>,
}

/// Handle to a running state node.
///
/// Submissions and the periodic sweep are serialized on one task, so the
/// coalescer needs no locking. Closing the reporter discards whatever is
/// still buffered.
pub struct StateReporter {
    id: String,
    device: String,
    tx: mpsc::UnboundedSender<Request>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StateReporter {
    pub fn spawn(
        config: &StateNodeConfig,
        timing: CoalescerConfig,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let name = if config.name.is_empty() {
            config.device.clone()
        } else {
            config.name.clone()
        };
        let coalescer = StateCoalescer::new(config.device.clone(), name, timing.dwell());

        let task = tokio::spawn(run(coalescer, timing, publisher, rx, cancel.clone()));

        Self {
            id: config.id.clone(),
            device: config.device.clone(),
            tx,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Submit one message and wait for the coalescer's verdict.
    pub async fn submit(&self, input: StateInput) -> Result<SubmitOutcome> {
        let (reply, verdict) = oneshot::channel();
        self.tx
            .send(Request {
                input,
                reply: Some(reply),
            })
            .map_err(|_| BridgeError::ReporterClosed)?;

        match verdict.await {
            Ok(outcome) => Ok(outcome?),
            Err(_) => Err(BridgeError::ReporterClosed),
        }
    }

    /// Submit without waiting. Rejections are only logged.
    pub fn send(&self, input: StateInput) -> Result<()> {
        self.tx
            .send(Request { input, reply: None })
            .map_err(|_| BridgeError::ReporterClosed)
    }

    /// Stop the sweep and drop anything not yet published.
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!("[State] {}: reporter task failed: {}", self.id, e);
        }
    }
}

impl Drop for StateReporter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    mut coalescer: StateCoalescer,
    timing: CoalescerConfig,
    publisher: Arc<dyn Publisher>,
    mut rx: mpsc::UnboundedReceiver<Request>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(timing.sweep_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            request = rx.recv() => {
                let Some(request) = request else { break };
                let outcome = coalescer.submit(&request.input, Instant::now());
                match &outcome {
                    Ok(SubmitOutcome::Duplicate) => {
                        debug!("[State] {}: duplicate state update ignored", coalescer.device());
                    }
                    Ok(SubmitOutcome::Stateless(command)) => {
                        info!("[State] {}: {} carries no state, ignored", coalescer.device(), command);
                    }
                    Ok(SubmitOutcome::Accepted(_)) => {}
                    Err(rejection) => {
                        warn!("[State] {}: {}", coalescer.device(), rejection);
                    }
                }
                if let Some(reply) = request.reply {
                    let _ = reply.send(outcome);
                }
            }
            _ = ticker.tick() => {
                let report = coalescer.sweep(Instant::now(), publisher.as_ref());
                if report.dropped > 0 {
                    debug!(
                        "[State] {}: {} update(s) dropped while offline",
                        coalescer.device(),
                        report.dropped
                    );
                }
            }
        }
    }

    let discarded = coalescer.discard();
    if discarded > 0 {
        info!(
            "[State] {}: closed with {} pending update(s) discarded",
            coalescer.device(),
            discarded
        );
    }
}
