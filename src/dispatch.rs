//! Concurrent fan-out of the command batch to every target.
//!
//! [`Dispatcher::run`] spawns one task per target, waits for all of them,
//! and only then builds the [`RunReport`]. Each task returns its own result,
//! so there is no shared failure list to synchronize.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinSet;

use crate::config::{PushConfig, Target};
use crate::error::PushError;
use crate::session::{Connector, DeliveryEvent, DeliveryRecorder, Session};

/// What every delivery task needs besides its target.
#[derive(Debug, Clone)]
pub struct DeliveryPlan {
    pub commands: Arc<[String]>,
    pub connect_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl DeliveryPlan {
    pub fn from_config(config: &PushConfig) -> Self {
        Self {
            commands: config.command_batch().into(),
            connect_timeout: config.connect_timeout(),
            write_timeout: config.write_timeout(),
        }
    }
}

/// A target that did not receive the full batch.
#[derive(Debug)]
pub struct TargetFailure {
    pub target: Target,
    pub error: PushError,
}

impl TargetFailure {
    /// True when some commands reached the device before the failure.
    pub fn partial(&self) -> bool {
        self.error.commands_sent() > 0
    }
}

/// Outcome of a run, built after every task has finished.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Targets that received every command, ordered by index.
    pub delivered: Vec<Target>,
    /// One entry per failed target, ordered by index.
    pub failures: Vec<TargetFailure>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failures.len()
    }

    fn sort(&mut self) {
        self.delivered.sort_by_key(|target| target.index);
        self.failures.sort_by_key(|failure| failure.target.index);
    }
}

/// Pushes one command batch to every target derived from a [`PushConfig`].
pub struct Dispatcher<C: Connector> {
    connector: Arc<C>,
    targets: Vec<Target>,
    plan: DeliveryPlan,
    recorder: Option<DeliveryRecorder>,
}

impl<C: Connector> Dispatcher<C> {
    /// Validates `config` and prepares the target list and command batch.
    pub fn new(connector: C, config: &PushConfig) -> Result<Self, PushError> {
        config.validate()?;
        Ok(Self {
            connector: Arc::new(connector),
            targets: config.targets(),
            plan: DeliveryPlan::from_config(config),
            recorder: None,
        })
    }

    /// Records every delivery event of subsequent runs into `recorder`.
    pub fn with_recorder(mut self, recorder: DeliveryRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn plan(&self) -> &DeliveryPlan {
        &self.plan
    }

    /// Delivers the batch to all targets concurrently and waits for all of
    /// them.
    pub async fn run(&self) -> RunReport {
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::with_capacity(self.targets.len());

        for target in &self.targets {
            let connector = Arc::clone(&self.connector);
            let plan = self.plan.clone();
            let recorder = self.recorder.clone();
            let task_target = target.clone();

            let handle = tasks.spawn(async move {
                let result =
                    deliver(connector.as_ref(), &task_target, &plan, recorder.as_ref()).await;
                (task_target, result)
            });
            pending.insert(handle.id(), target.clone());
        }
        debug!("dispatched {} delivery tasks", pending.len());

        let mut report = RunReport::default();
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, (target, result))) => {
                    pending.remove(&id);
                    match result {
                        Ok(_) => report.delivered.push(target),
                        Err(error) => report.failures.push(TargetFailure { target, error }),
                    }
                }
                Err(err) => {
                    let Some(target) = pending.remove(&err.id()) else {
                        warn!("unknown delivery task failed: {err}");
                        continue;
                    };
                    let error = PushError::Task {
                        addr: target.address(),
                        reason: err.to_string(),
                    };
                    report.failures.push(TargetFailure { target, error });
                }
            }
        }

        report.sort();
        info!(
            "run finished: {} delivered, {} failed",
            report.delivered.len(),
            report.failures.len()
        );
        report
    }
}

/// Delivers the batch to one target.
///
/// Opens the session, writes every command in order, and closes the
/// session on every path after it was opened. Returns the number of commands
/// written, or the first error hit.
pub async fn deliver<C: Connector>(
    connector: &C,
    target: &Target,
    plan: &DeliveryPlan,
    recorder: Option<&DeliveryRecorder>,
) -> Result<usize, PushError> {
    let addr = target.address();
    record(recorder, || DeliveryEvent::Connecting {
        target: addr.clone(),
    });

    let connected = match within(plan.connect_timeout, connector.connect(&addr)).await {
        Some(result) => result,
        None => Err(PushError::ConnectTimeout {
            addr: addr.clone(),
            // `within` only returns None when a timeout is set.
            timeout: plan.connect_timeout.unwrap_or_default(),
        }),
    };
    let mut session = match connected {
        Ok(session) => session,
        Err(err) => {
            debug!("{} connect failed: {}", addr, err);
            record(recorder, || DeliveryEvent::ConnectFailed {
                target: addr.clone(),
                reason: err.to_string(),
            });
            return Err(err);
        }
    };
    info!("Connected to {addr}");
    record(recorder, || DeliveryEvent::Connected {
        target: addr.clone(),
    });

    let result = send_batch(&mut session, &addr, plan, recorder).await;

    let close_failure = match within(plan.write_timeout, session.close()).await {
        Some(Ok(())) => None,
        Some(Err(err)) => Some(format!("close failed: {err}")),
        None => Some("close timed out".to_string()),
    };
    drop(session);
    match close_failure {
        None => record(recorder, || DeliveryEvent::Closed {
            target: addr.clone(),
        }),
        Some(reason) => {
            warn!("{} {}", addr, reason);
            record(recorder, || DeliveryEvent::CloseFailed {
                target: addr.clone(),
                reason,
            });
        }
    }

    if let Ok(sent) = result {
        info!("Successfully passed commands to {addr}");
        record(recorder, || DeliveryEvent::Delivered {
            target: addr.clone(),
            commands: sent,
        });
    }
    result
}

async fn send_batch<S: Session>(
    session: &mut S,
    addr: &str,
    plan: &DeliveryPlan,
    recorder: Option<&DeliveryRecorder>,
) -> Result<usize, PushError> {
    for (index, command) in plan.commands.iter().enumerate() {
        let error = match within(plan.write_timeout, session.write_line(command)).await {
            Some(Ok(())) => {
                if let Some(recorder) = recorder {
                    let _ = recorder.record_command(addr, index, command);
                }
                continue;
            }
            Some(Err(source)) => PushError::Write {
                addr: addr.to_string(),
                index,
                command: command.clone(),
                sent: index,
                source,
            },
            None => PushError::WriteTimeout {
                addr: addr.to_string(),
                index,
                command: command.clone(),
                sent: index,
                timeout: plan.write_timeout.unwrap_or_default(),
            },
        };

        debug!("{} aborting batch at command {}: {}", addr, index, error);
        record(recorder, || DeliveryEvent::CommandFailed {
            target: addr.to_string(),
            index,
            command: command.clone(),
            reason: error.to_string(),
        });
        return Err(error);
    }
    Ok(plan.commands.len())
}

/// Awaits `fut`, giving up after `limit` when one is set.
async fn within<F: Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

fn record(recorder: Option<&DeliveryRecorder>, event: impl FnOnce() -> DeliveryEvent) {
    if let Some(recorder) = recorder {
        let _ = recorder.record_event(event());
    }
}
