//! 上传任务生命周期管理
//!
//! Actor-owned registry of live `UploadTask`s: the actor is the only writer
//! to task state, every other component reports outcomes through the handle.
//! UI layers subscribe to a broadcast channel of typed events instead of
//! observing mutable state. Terminal tasks linger for a grace TTL so the UI
//! can show the final state, then the cleanup tick removes them.

use crate::model::{TaskId, TaskState, UploadTask};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::interval;
use tracing::debug;

/// 任务注册表配置
#[derive(Debug, Clone)]
pub struct TaskRegistryConfig {
    /// Grace period before a completed task is removed.
    pub completed_task_ttl: Duration,
    /// Errored tasks stay longer so the badge remains visible.
    pub errored_task_ttl: Duration,
    pub cleanup_interval: Duration,
    /// Broadcast channel capacity for slow subscribers.
    pub event_capacity: usize,
}

impl Default for TaskRegistryConfig {
    fn default() -> Self {
        Self {
            completed_task_ttl: Duration::from_secs(3),
            errored_task_ttl: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(1),
            event_capacity: 256,
        }
    }
}

/// Typed state-change notifications for UI subscribers.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Created(UploadTask),
    Updated(UploadTask),
    Removed(TaskId),
}

enum ActorMessage {
    Create {
        filename: String,
        total_bytes: u64,
        respond_to: oneshot::Sender<TaskId>,
    },
    UpdateProgress {
        id: TaskId,
        progress_percent: u8,
    },
    MarkCompleted {
        id: TaskId,
        message: Option<String>,
    },
    MarkError {
        id: TaskId,
        message: String,
    },
    Get {
        id: TaskId,
        respond_to: oneshot::Sender<Option<UploadTask>>,
    },
    Snapshot {
        respond_to: oneshot::Sender<Vec<UploadTask>>,
    },
    Shutdown,
}

struct TaskRegistryActor {
    tasks: HashMap<TaskId, UploadTask>,
    config: TaskRegistryConfig,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskRegistryActor {
    fn emit(&self, event: TaskEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }

    fn handle_message(&mut self, msg: ActorMessage) {
        match msg {
            ActorMessage::Create {
                filename,
                total_bytes,
                respond_to,
            } => {
                let task = UploadTask {
                    id: TaskId::new(),
                    filename,
                    total_bytes,
                    progress_percent: 0,
                    state: TaskState::Pending,
                    message: None,
                    created_at: Instant::now(),
                    completed_at: None,
                };
                let id = task.id;
                self.emit(TaskEvent::Created(task.clone()));
                self.tasks.insert(id, task);
                let _ = respond_to.send(id);
            }
            ActorMessage::UpdateProgress {
                id,
                progress_percent,
            } => {
                if let Some(task) = self.tasks.get_mut(&id) {
                    if task.state.is_terminal() {
                        return;
                    }
                    task.progress_percent = progress_percent.min(100);
                    task.state = TaskState::Uploading;
                    self.emit(TaskEvent::Updated(self.tasks[&id].clone()));
                }
            }
            ActorMessage::MarkCompleted { id, message } => {
                if let Some(task) = self.tasks.get_mut(&id) {
                    task.state = TaskState::Completed;
                    task.progress_percent = 100;
                    task.message = message;
                    task.completed_at = Some(Instant::now());
                    self.emit(TaskEvent::Updated(self.tasks[&id].clone()));
                }
            }
            ActorMessage::MarkError { id, message } => {
                if let Some(task) = self.tasks.get_mut(&id) {
                    task.state = TaskState::Errored;
                    task.message = Some(message);
                    task.completed_at = Some(Instant::now());
                    self.emit(TaskEvent::Updated(self.tasks[&id].clone()));
                }
            }
            ActorMessage::Get { id, respond_to } => {
                let _ = respond_to.send(self.tasks.get(&id).cloned());
            }
            ActorMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(self.tasks.values().cloned().collect());
            }
            ActorMessage::Shutdown => {}
        }
    }

    fn cleanup_expired(&mut self) {
        let now = Instant::now();
        let config = &self.config;
        let expired: Vec<TaskId> = self
            .tasks
            .iter()
            .filter_map(|(id, task)| {
                let completed_at = task.completed_at?;
                let ttl = match task.state {
                    TaskState::Completed => config.completed_task_ttl,
                    TaskState::Errored => config.errored_task_ttl,
                    _ => return None,
                };
                (now.duration_since(completed_at) >= ttl).then_some(*id)
            })
            .collect();

        for id in expired {
            self.tasks.remove(&id);
            debug!(task_id = %id, "expired task removed");
            self.emit(TaskEvent::Removed(id));
        }
    }

    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<ActorMessage>) {
        let mut cleanup = interval(self.config.cleanup_interval);
        loop {
            tokio::select! {
                msg = receiver.recv() => {
                    match msg {
                        Some(ActorMessage::Shutdown) | None => break,
                        Some(msg) => self.handle_message(msg),
                    }
                }
                _ = cleanup.tick() => {
                    self.cleanup_expired();
                }
            }
        }
    }
}

/// Handle to the registry actor. Cheap to clone.
#[derive(Clone)]
pub struct TaskRegistry {
    sender: mpsc::UnboundedSender<ActorMessage>,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskRegistry {
    pub fn new(config: TaskRegistryConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity);
        let actor = TaskRegistryActor {
            tasks: HashMap::new(),
            config,
            events: events.clone(),
        };
        tokio::spawn(actor.run(receiver));
        Self { sender, events }
    }

    /// Create a task in `Pending` state; returns its id.
    pub async fn add_task(&self, filename: impl Into<String>, total_bytes: u64) -> TaskId {
        let (tx, rx) = oneshot::channel();
        let _ = self.sender.send(ActorMessage::Create {
            filename: filename.into(),
            total_bytes,
            respond_to: tx,
        });
        rx.await.expect("task registry actor stopped")
    }

    /// Move the task to `Uploading` with the given percent.
    pub fn update_progress(&self, id: TaskId, progress_percent: u8) {
        let _ = self.sender.send(ActorMessage::UpdateProgress {
            id,
            progress_percent,
        });
    }

    pub fn mark_completed(&self, id: TaskId, message: Option<String>) {
        let _ = self.sender.send(ActorMessage::MarkCompleted { id, message });
    }

    pub fn mark_error(&self, id: TaskId, message: impl Into<String>) {
        let _ = self.sender.send(ActorMessage::MarkError {
            id,
            message: message.into(),
        });
    }

    pub async fn get(&self, id: TaskId) -> Option<UploadTask> {
        let (tx, rx) = oneshot::channel();
        let _ = self.sender.send(ActorMessage::Get { id, respond_to: tx });
        rx.await.ok().flatten()
    }

    pub async fn snapshot(&self) -> Vec<UploadTask> {
        let (tx, rx) = oneshot::channel();
        let _ = self.sender.send(ActorMessage::Snapshot { respond_to: tx });
        rx.await.unwrap_or_default()
    }

    /// Subscribe to task state-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.sender.send(ActorMessage::Shutdown);
    }
}
