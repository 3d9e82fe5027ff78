//! Task lifecycle events
//!
//! Publish/subscribe bus used by the orchestrator to announce task progress.
//! Each subscriber gets a bounded channel. Publishing never waits: a full
//! subscriber misses the event and a closed one is dropped from the list.

use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::orchestrator::task::Task;

const CHANNEL_BUFFER_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventType {
    TaskSubmitted,
    TaskStarted,
    StepCompleted,
    TaskCompleted,
    TaskFailed,
    /// Subscribe to every event type
    All,
}

#[derive(Debug, Clone)]
pub enum Event {
    TaskSubmitted {
        task_id: String,
        goal: String,
    },
    TaskStarted {
        task_id: String,
    },
    StepCompleted {
        task_id: String,
        step_index: usize,
        action: String,
        success: bool,
    },
    /// Final snapshot of a completed task
    TaskCompleted(Box<Task>),
    /// Final snapshot of a failed task
    TaskFailed(Box<Task>),
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::TaskSubmitted { .. } => EventType::TaskSubmitted,
            Event::TaskStarted { .. } => EventType::TaskStarted,
            Event::StepCompleted { .. } => EventType::StepCompleted,
            Event::TaskCompleted(_) => EventType::TaskCompleted,
            Event::TaskFailed(_) => EventType::TaskFailed,
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            Event::TaskSubmitted { task_id, .. }
            | Event::TaskStarted { task_id }
            | Event::StepCompleted { task_id, .. } => task_id,
            Event::TaskCompleted(task) | Event::TaskFailed(task) => &task.id,
        }
    }

    /// The finished task, for terminal events
    pub fn finished_task(&self) -> Option<&Task> {
        match self {
            Event::TaskCompleted(task) | Event::TaskFailed(task) => Some(task),
            _ => None,
        }
    }
}

pub struct EventBus {
    channels: Mutex<HashMap<EventType, Vec<mpsc::Sender<Event>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub async fn subscribe(&self, event_type: EventType) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        self.channels
            .lock()
            .await
            .entry(event_type)
            .or_default()
            .push(tx);
        rx
    }

    pub async fn publish(&self, event: Event) {
        let mut channels = self.channels.lock().await;
        let event_type = event.event_type();

        for key in [event_type, EventType::All] {
            if let Some(subscribers) = channels.get_mut(&key) {
                subscribers.retain(|tx| match tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("Event subscriber is full, dropping {:?}", event_type);
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
        }
    }

    /// Live subscriber count across all event types
    pub async fn subscriber_count(&self) -> usize {
        self.channels
            .lock()
            .await
            .values()
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .sum()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
