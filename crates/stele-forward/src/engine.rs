use std::sync::{Arc, Mutex};

use stele_store::{ForwardIntakeError, ForwardSink};
use stele_types::{Statement, StatementId};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{validate_targets, ForwardTarget};
use crate::delivery::StatementDelivery;
use crate::error::ForwardResult;
use crate::retry::RetryPolicy;

/// Capacity of the broadcast report channel; slow observers lose old reports
/// rather than slowing delivery.
const REPORT_CHANNEL_CAPACITY: usize = 256;

/// Terminal outcome of one (statement, target) forward.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryReport {
    Delivered {
        target: String,
        statement: StatementId,
        attempts: u32,
    },
    Abandoned {
        target: String,
        statement: StatementId,
        attempts: u32,
        reason: String,
    },
    QueueFull {
        target: String,
        statement: StatementId,
    },
}

struct TargetIntake {
    name: String,
    tx: mpsc::Sender<Statement>,
}

/// The forwarding engine.
///
/// Each active target runs an independent worker behind a bounded queue;
/// one target's outage never blocks another's deliveries or the ingestion
/// path. Every terminal outcome is published on a broadcast channel that
/// nothing waits on.
pub struct Forwarder {
    intakes: Mutex<Option<Vec<TargetIntake>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    reports: broadcast::Sender<DeliveryReport>,
}

impl Forwarder {
    /// Validate the target list wholesale and spawn a worker per active
    /// target. Must run inside a tokio runtime.
    pub fn start(
        targets: Vec<ForwardTarget>,
        delivery: Arc<dyn StatementDelivery>,
    ) -> ForwardResult<Self> {
        validate_targets(&targets)?;

        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        let mut intakes = Vec::new();
        let mut workers = Vec::new();
        for target in targets.into_iter().filter(|t| t.active) {
            let (tx, rx) = mpsc::channel(target.queue_capacity);
            intakes.push(TargetIntake {
                name: target.name.clone(),
                tx,
            });
            workers.push(spawn_worker(target, rx, delivery.clone(), reports.clone()));
        }

        info!(targets = intakes.len(), "forwarding engine started");
        Ok(Self {
            intakes: Mutex::new(Some(intakes)),
            workers: Mutex::new(workers),
            reports,
        })
    }

    /// Subscribe to terminal delivery outcomes.
    pub fn reports(&self) -> broadcast::Receiver<DeliveryReport> {
        self.reports.subscribe()
    }

    /// Number of targets currently accepting forwards.
    pub fn active_targets(&self) -> usize {
        match self.intakes.lock() {
            Ok(guard) => guard.as_ref().map_or(0, Vec::len),
            Err(_) => 0,
        }
    }

    /// Stop intake, let workers drain queued statements, and join them.
    pub async fn shutdown(&self) {
        let intakes = match self.intakes.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        drop(intakes);

        let workers = match self.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };
        for worker in workers {
            let _ = worker.await;
        }
        info!("forwarding engine stopped");
    }
}

impl ForwardSink for Forwarder {
    fn forward(&self, statement: Statement) -> Result<(), ForwardIntakeError> {
        let guard = self
            .intakes
            .lock()
            .map_err(|_| ForwardIntakeError("intake lock poisoned".to_string()))?;
        let Some(intakes) = guard.as_ref() else {
            return Err(ForwardIntakeError("forwarding engine stopped".to_string()));
        };

        for intake in intakes {
            match intake.tx.try_send(statement.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    warn!(target = %intake.name, id = %dropped.id, "forward queue full; dropping");
                    let _ = self.reports.send(DeliveryReport::QueueFull {
                        target: intake.name.clone(),
                        statement: dropped.id,
                    });
                }
                Err(mpsc::error::TrySendError::Closed(dropped)) => {
                    warn!(target = %intake.name, id = %dropped.id, "forward worker gone; dropping");
                }
            }
        }
        Ok(())
    }
}

fn spawn_worker(
    target: ForwardTarget,
    mut rx: mpsc::Receiver<Statement>,
    delivery: Arc<dyn StatementDelivery>,
    reports: broadcast::Sender<DeliveryReport>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let policy = target.retry_policy();
        debug!(target = %target.name, "forward worker started");
        while let Some(statement) = rx.recv().await {
            deliver_with_retry(&target, &policy, statement, delivery.as_ref(), &reports).await;
        }
        debug!(target = %target.name, "forward worker drained");
    })
}

async fn deliver_with_retry(
    target: &ForwardTarget,
    policy: &RetryPolicy,
    statement: Statement,
    delivery: &dyn StatementDelivery,
    reports: &broadcast::Sender<DeliveryReport>,
) {
    let id = statement.id;
    let mut attempt = 0;
    loop {
        match delivery
            .deliver(target, std::slice::from_ref(&statement))
            .await
        {
            Ok(()) => {
                debug!(target = %target.name, %id, attempts = attempt + 1, "statement forwarded");
                let _ = reports.send(DeliveryReport::Delivered {
                    target: target.name.clone(),
                    statement: id,
                    attempts: attempt + 1,
                });
                return;
            }
            Err(err) if err.is_permanent() || attempt >= policy.max_retries => {
                warn!(
                    target = %target.name,
                    %id,
                    attempts = attempt + 1,
                    error = %err,
                    "delivery abandoned"
                );
                let _ = reports.send(DeliveryReport::Abandoned {
                    target: target.name.clone(),
                    statement: id,
                    attempts: attempt + 1,
                    reason: err.to_string(),
                });
                return;
            }
            Err(err) => {
                debug!(
                    target = %target.name,
                    %id,
                    attempt = attempt + 1,
                    error = %err,
                    "delivery attempt failed"
                );
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}
