use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use health::HealthHandle;
use metrics::counter;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use probe_common::api::{QueueStatusResponse, TestState};
use probe_common::TestId;

use crate::children::TestChildren;
use crate::fsm::{spawn_fsm, CancelOutcome, FsmHandle, FsmTimers, TerminalReport};
use crate::status::TestStatus;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How the FSM behind a dispatched test comes to life. A trait seam so the
/// queue can be exercised without Kafka, storage, or a vault.
pub trait FsmSpawner: Send + Sync {
    fn spawn(&self, test_id: TestId, terminal_tx: mpsc::Sender<TerminalReport>) -> FsmHandle;
}

pub struct ProductionFsmSpawner {
    pub children: TestChildren,
    pub timers: FsmTimers,
    pub stash_capacity: usize,
}

impl FsmSpawner for ProductionFsmSpawner {
    fn spawn(&self, test_id: TestId, terminal_tx: mpsc::Sender<TerminalReport>) -> FsmHandle {
        spawn_fsm(
            test_id,
            self.children.clone(),
            self.timers,
            self.stash_capacity,
            terminal_tx,
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    /// Maximum number of pending submissions; enqueue beyond it is refused.
    pub capacity: usize,
    /// How many terminal outcomes to remember; oldest evicted first.
    pub history_capacity: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            capacity: 32,
            history_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueRejection {
    CapacityExceeded,
    Duplicate,
}

#[derive(Debug)]
pub enum CancelResult {
    Cancelled { message: String },
    NotCancelled { message: String },
    NotFound,
}

#[derive(Debug)]
pub enum QueueCommand {
    Enqueue {
        test_id: TestId,
        bucket: String,
        prefix: Option<String>,
        reply: oneshot::Sender<Result<(), QueueRejection>>,
    },
    Cancel {
        test_id: TestId,
        reply: oneshot::Sender<CancelResult>,
    },
    Status {
        test_id: TestId,
        reply: oneshot::Sender<Option<TestStatus>>,
    },
    Snapshot {
        reply: oneshot::Sender<QueueStatusResponse>,
    },
}

#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<QueueCommand>,
}

impl QueueHandle {
    pub async fn send(&self, command: QueueCommand) -> bool {
        self.tx.send(command).await.is_ok()
    }
}

/// Spawn the single-consumer admission queue. The returned JoinHandle lets
/// the supervisor apply its crash-restart policy.
pub fn spawn_queue(
    spawner: Arc<dyn FsmSpawner>,
    settings: QueueSettings,
    health: Option<HealthHandle>,
) -> (QueueHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(64);
    let queue = AdmissionQueue {
        spawner,
        settings,
        health,
        pending: VecDeque::new(),
        active: None,
        history: BoundedHistory::new(settings.history_capacity),
    };
    let join = tokio::spawn(queue.run(rx));
    (QueueHandle { tx }, join)
}

struct QueuedTest {
    test_id: TestId,
    bucket: String,
    prefix: Option<String>,
}

struct AdmissionQueue {
    spawner: Arc<dyn FsmSpawner>,
    settings: QueueSettings,
    health: Option<HealthHandle>,
    pending: VecDeque<QueuedTest>,
    /// The at-most-one test currently bound to an FSM.
    active: Option<FsmHandle>,
    history: BoundedHistory,
}

impl AdmissionQueue {
    async fn run(mut self, mut mailbox: mpsc::Receiver<QueueCommand>) {
        let (terminal_tx, mut terminal_rx) = mpsc::channel::<TerminalReport>(8);
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                command = mailbox.recv() => {
                    let Some(command) = command else { break };
                    self.handle(command, &terminal_tx).await;
                }
                Some(report) = terminal_rx.recv() => {
                    info!(test_id = %report.test_id, state = %report.status.state, "test reached terminal state");
                    self.history.insert(report.test_id, report.status);
                    self.active = None;
                    self.dispatch(&terminal_tx).await;
                }
                _ = heartbeat.tick() => {
                    if let Some(health) = &self.health {
                        health.report_healthy().await;
                    }
                }
            }
        }
    }

    async fn handle(&mut self, command: QueueCommand, terminal_tx: &mpsc::Sender<TerminalReport>) {
        match command {
            QueueCommand::Enqueue {
                test_id,
                bucket,
                prefix,
                reply,
            } => {
                let result = self.enqueue(test_id, bucket, prefix);
                let accepted = result.is_ok();
                drop(reply.send(result));
                if accepted {
                    counter!("probe_queue_admissions_total").increment(1);
                    self.dispatch(terminal_tx).await;
                }
            }
            QueueCommand::Cancel { test_id, reply } => {
                let result = self.cancel(test_id).await;
                drop(reply.send(result));
            }
            QueueCommand::Status { test_id, reply } => {
                drop(reply.send(self.status_of(test_id)));
            }
            QueueCommand::Snapshot { reply } => {
                drop(reply.send(self.snapshot()));
            }
        }
    }

    fn enqueue(
        &mut self,
        test_id: TestId,
        bucket: String,
        prefix: Option<String>,
    ) -> Result<(), QueueRejection> {
        let already_known = self.pending.iter().any(|t| t.test_id == test_id)
            || self
                .active
                .as_ref()
                .is_some_and(|handle| handle.test_id == test_id);
        if already_known {
            return Err(QueueRejection::Duplicate);
        }
        if self.pending.len() >= self.settings.capacity {
            warn!(test_id = %test_id, "queue capacity reached, refusing submission");
            return Err(QueueRejection::CapacityExceeded);
        }

        self.pending.push_back(QueuedTest {
            test_id,
            bucket,
            prefix,
        });
        Ok(())
    }

    /// Bind the head of the queue to a freshly spawned FSM. No-op while a
    /// test is active: at-most-one-active is the invariant here.
    async fn dispatch(&mut self, terminal_tx: &mpsc::Sender<TerminalReport>) {
        if self.active.is_some() {
            return;
        }
        let Some(next) = self.pending.pop_front() else {
            return;
        };

        info!(test_id = %next.test_id, bucket = %next.bucket, "dispatching test");
        counter!("probe_queue_dispatches_total").increment(1);
        let handle = self.spawner.spawn(next.test_id, terminal_tx.clone());
        handle.start(next.bucket, next.prefix).await;
        self.active = Some(handle);
    }

    async fn cancel(&mut self, test_id: TestId) -> CancelResult {
        if let Some(active) = &self.active {
            if active.test_id == test_id {
                return match active.cancel().await {
                    CancelOutcome::Accepted => CancelResult::Cancelled {
                        message: "cancel delivered to the running test".to_string(),
                    },
                    CancelOutcome::Noop => CancelResult::NotCancelled {
                        message: "test already reached a terminal state".to_string(),
                    },
                };
            }
        }

        if let Some(position) = self.pending.iter().position(|t| t.test_id == test_id) {
            self.pending.remove(position);
            let mut status = TestStatus::new(test_id, TestState::Stopped);
            status.cancel_requested = true;
            status.message = Some("cancelled while queued".to_string());
            self.history.insert(test_id, status);
            return CancelResult::Cancelled {
                message: "removed from the queue".to_string(),
            };
        }

        if self.history.get(test_id).is_some() {
            return CancelResult::NotCancelled {
                message: "test already reached a terminal state".to_string(),
            };
        }

        CancelResult::NotFound
    }

    fn status_of(&self, test_id: TestId) -> Option<TestStatus> {
        if let Some(active) = &self.active {
            if active.test_id == test_id {
                return Some(active.status());
            }
        }
        if let Some(position) = self.pending.iter().position(|t| t.test_id == test_id) {
            let mut status = TestStatus::new(test_id, TestState::Queued);
            status.message = Some(format!("position {} in queue", position + 1));
            return Some(status);
        }
        self.history.get(test_id).cloned()
    }

    fn snapshot(&self) -> QueueStatusResponse {
        let mut response = QueueStatusResponse::default();

        let active_status = self.active.as_ref().map(|handle| handle.status());
        let statuses = self.history.iter().chain(active_status.as_ref());
        for status in statuses {
            response.total_tests += 1;
            match status.state {
                TestState::Setup => response.setup_count += 1,
                TestState::Loading => response.loading_count += 1,
                TestState::Loaded => response.loaded_count += 1,
                TestState::Testing => response.testing_count += 1,
                TestState::Completed => response.completed_count += 1,
                TestState::Exception => response.exception_count += 1,
                _ => {}
            }
        }
        response.total_tests += self.pending.len() as u32;
        response.currently_testing = self.active.as_ref().map(|handle| handle.test_id);

        response
    }
}

/// Terminal outcomes, bounded; the oldest entry falls out first.
struct BoundedHistory {
    capacity: usize,
    entries: HashMap<TestId, TestStatus>,
    order: VecDeque<TestId>,
}

impl BoundedHistory {
    fn new(capacity: usize) -> Self {
        BoundedHistory {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn insert(&mut self, test_id: TestId, status: TestStatus) {
        if self.entries.insert(test_id, status).is_none() {
            self.order.push_back(test_id);
        }
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    fn get(&self, test_id: TestId) -> Option<&TestStatus> {
        self.entries.get(&test_id)
    }

    fn iter(&self) -> impl Iterator<Item = &TestStatus> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_evicts_oldest_first() {
        let mut history = BoundedHistory::new(2);
        let (a, b, c) = (TestId::generate(), TestId::generate(), TestId::generate());

        history.insert(a, TestStatus::new(a, TestState::Completed));
        history.insert(b, TestStatus::new(b, TestState::Exception));
        history.insert(c, TestStatus::new(c, TestState::Completed));

        assert!(history.get(a).is_none(), "oldest entry should be evicted");
        assert!(history.get(b).is_some());
        assert!(history.get(c).is_some());
        assert_eq!(history.iter().count(), 2);
    }

    #[test]
    fn history_update_does_not_duplicate_order() {
        let mut history = BoundedHistory::new(2);
        let a = TestId::generate();
        history.insert(a, TestStatus::new(a, TestState::Completed));
        history.insert(a, TestStatus::new(a, TestState::Exception));
        assert_eq!(history.iter().count(), 1);
        assert_eq!(history.get(a).unwrap().state, TestState::Exception);
    }
}
