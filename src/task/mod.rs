// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Task Registry & Cancellation Controller
//!
//! One [`LoadTask`] per in-flight load. The registry owns each task's
//! cancellation token and state until the task reaches a terminal state, at
//! which point the entry is released and only its final state is kept in a
//! short history for callers that ask.
//!
//! ```text
//! Pending -> Downloading -> Parsing -> [Decoding] -> Assembling -> Completed
//!    \___________\______________\__________\______________\-----> Cancelled | Failed
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::CodecConfig;
use crate::sync::{resilient_read, resilient_write};

/// Final states remembered after their entries are released.
const FINISHED_HISTORY: usize = 256;

/// Lifecycle state of a load task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Downloading,
    Parsing,
    Decoding,
    Assembling,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Returns true once the task can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Downloading => 1,
            Self::Parsing => 2,
            Self::Decoding => 3,
            Self::Assembling => 4,
            Self::Completed | Self::Failed | Self::Cancelled => 5,
        }
    }

    /// Transitions only move forward. Stages may be skipped (a cache hit
    /// goes straight to parsing, a model without compressed resources never
    /// decodes), `Cancelled` and `Failed` are reachable from every
    /// non-terminal state, and terminal states are final.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Cancelled | Self::Failed => true,
            _ => next.rank() > self.rank(),
        }
    }
}

/// One registered load.
#[derive(Debug, Clone)]
pub struct LoadTask {
    pub id: String,
    pub url: String,
    pub config: CodecConfig,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    token: CancellationToken,
    generation: u64,
}

impl LoadTask {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// What the pipeline holds for the task it is running.
///
/// The generation distinguishes this registration from a later one that
/// reuses the same id, so a stale pipeline cannot touch a newer task.
#[derive(Debug, Clone)]
pub struct TaskTicket {
    pub id: String,
    pub token: CancellationToken,
    generation: u64,
}

impl TaskTicket {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Outcome of [`TaskRegistry::register`].
#[derive(Debug)]
pub enum Registration {
    New(TaskTicket),
    /// A live task already uses this id; nothing was registered.
    AlreadyActive,
}

/// Tracks in-flight loads.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, LoadTask>>,
    finished: RwLock<VecDeque<(String, TaskState)>>,
    next_generation: AtomicU64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task in `Pending`.
    pub fn register(&self, id: &str, url: &str, config: CodecConfig) -> Registration {
        let mut tasks = resilient_write(&self.tasks);
        if tasks.contains_key(id) {
            tracing::debug!(task_id = id, "Task id already active");
            return Registration::AlreadyActive;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let now = Utc::now();
        tasks.insert(
            id.to_string(),
            LoadTask {
                id: id.to_string(),
                url: url.to_string(),
                config,
                state: TaskState::Pending,
                created_at: now,
                updated_at: now,
                token: token.clone(),
                generation,
            },
        );
        tracing::debug!(task_id = id, url, "Task registered");

        Registration::New(TaskTicket {
            id: id.to_string(),
            token,
            generation,
        })
    }

    /// Move the ticket's task to `next`. Returns false for unknown tasks,
    /// stale tickets and backward transitions.
    pub fn transition(&self, ticket: &TaskTicket, next: TaskState) -> bool {
        let mut tasks = resilient_write(&self.tasks);
        let Some(task) = tasks.get_mut(&ticket.id) else {
            return false;
        };
        if task.generation != ticket.generation {
            return false;
        }
        if !task.state.can_transition_to(next) {
            tracing::debug!(task_id = %ticket.id, from = ?task.state, to = ?next, "Rejected state transition");
            return false;
        }
        task.state = next;
        task.updated_at = Utc::now();
        true
    }

    /// Signal a task's cancellation token. Unknown and terminal tasks are a
    /// no-op. The entry itself is released by the pipeline once it observes
    /// the signal.
    pub fn cancel(&self, id: &str) -> bool {
        let mut tasks = resilient_write(&self.tasks);
        match tasks.get_mut(id) {
            Some(task) if !task.state.is_terminal() => {
                task.token.cancel();
                task.state = TaskState::Cancelled;
                task.updated_at = Utc::now();
                tracing::info!(task_id = id, "Task cancelled");
                true
            }
            _ => false,
        }
    }

    /// Run `f` only while the ticket's task is registered and not cancelled.
    ///
    /// The check and `f` happen under the registry lock that [`cancel`]
    /// takes to signal the token, so anything `f` sends is ordered before a
    /// concurrent cancel returns, never after it.
    ///
    /// [`cancel`]: TaskRegistry::cancel
    pub fn while_live<R>(&self, ticket: &TaskTicket, f: impl FnOnce() -> R) -> Option<R> {
        let tasks = resilient_read(&self.tasks);
        let live = tasks
            .get(&ticket.id)
            .is_some_and(|task| task.generation == ticket.generation && !task.token.is_cancelled());
        live.then(f)
    }

    /// Cancel every active task. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<String> = resilient_read(&self.tasks).keys().cloned().collect();
        ids.iter().filter(|id| self.cancel(id)).count()
    }

    /// Release the ticket's entry, recording `final_state` when the task was
    /// not already terminal. Idempotent; stale tickets are ignored.
    pub fn finish(&self, ticket: &TaskTicket, final_state: TaskState) {
        let removed = {
            let mut tasks = resilient_write(&self.tasks);
            let current = tasks
                .get(&ticket.id)
                .is_some_and(|task| task.generation == ticket.generation);
            if current {
                tasks.remove(&ticket.id)
            } else {
                None
            }
        };

        if let Some(task) = removed {
            let state = if task.state.is_terminal() { task.state } else { final_state };
            let mut finished = resilient_write(&self.finished);
            finished.push_back((task.id, state));
            while finished.len() > FINISHED_HISTORY {
                finished.pop_front();
            }
        }
    }

    pub fn state(&self, id: &str) -> Option<TaskState> {
        resilient_read(&self.tasks).get(id).map(|t| t.state)
    }

    /// Current state if active, otherwise the most recent recorded final state.
    pub fn final_state(&self, id: &str) -> Option<TaskState> {
        self.state(id).or_else(|| {
            resilient_read(&self.finished)
                .iter()
                .rev()
                .find(|(task_id, _)| task_id == id)
                .map(|(_, state)| *state)
        })
    }

    pub fn get(&self, id: &str) -> Option<LoadTask> {
        resilient_read(&self.tasks).get(id).cloned()
    }

    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = resilient_read(&self.tasks).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        resilient_read(&self.tasks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
