//! Structured task scopes.
//!
//! A [`TaskScope`] owns every task spawned into it. Scopes nest: a child scope
//! is cancelled whenever its parent is, and dropping a scope aborts whatever
//! is still running in it, so no task can outlive the scope that spawned it.
//!
//! ```text
//! Supervisor scope
//!   ├─ ArrivalSource
//!   ├─ AdmissionController
//!   └─ DirectivePlanner ── DirectivePlanner scope (child)
//!                            ├─ VehicleAgent Car-1a2b3c4d
//!                            └─ VehicleAgent Car-5e6f7a8b
//! ```

use std::collections::HashMap;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{KernelError, Result};

/// What a scope does when one of its children fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Cancel the scope (and with it every sibling) and report the error.
    #[default]
    FailFast,
    /// Log the failure and keep the remaining children running.
    LogAndContinue,
}

/// How a child task ended.
#[derive(Debug)]
pub enum TaskOutcome {
    Completed,
    Cancelled,
    Failed(KernelError),
}

/// A child task that has finished, with its name.
#[derive(Debug)]
pub struct FinishedTask {
    pub name: String,
    pub outcome: TaskOutcome,
}

/// Tally of how the children of a scope ended.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSummary {
    pub completed: usize,
    pub cancelled: usize,
    pub failed: usize,
}

/// A lifetime boundary for a group of tasks.
pub struct TaskScope {
    name: String,
    token: CancellationToken,
    policy: FailurePolicy,
    tasks: JoinSet<TaskOutcome>,
    names: HashMap<Id, String>,
    summary: ScopeSummary,
}

impl std::fmt::Debug for TaskScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScope")
            .field("name", &self.name)
            .field("running", &self.tasks.len())
            .field("cancelled", &self.token.is_cancelled())
            .field("summary", &self.summary)
            .finish()
    }
}

impl TaskScope {
    /// Create a top-level scope.
    pub fn new(name: impl Into<String>, policy: FailurePolicy) -> Self {
        Self::with_token(name.into(), CancellationToken::new(), policy)
    }

    /// Create a scope nested under this one. It inherits the failure policy.
    pub fn child(&self, name: impl Into<String>) -> Self {
        Self::with_token(name.into(), self.token.child_token(), self.policy)
    }

    fn with_token(name: String, token: CancellationToken, policy: FailurePolicy) -> Self {
        Self {
            name,
            token,
            policy,
            tasks: JoinSet::new(),
            names: HashMap::new(),
            summary: ScopeSummary::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Token that fires when this scope (or any ancestor) is cancelled.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Number of children that have not been joined yet.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn summary(&self) -> &ScopeSummary {
        &self.summary
    }

    /// Spawn `task` as a child of this scope.
    ///
    /// The task is dropped at its next suspension point once the scope is
    /// cancelled, and never starts its body if the scope already is. The
    /// name comes back with its outcome from [`join_next`](Self::join_next).
    pub fn spawn<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let token = self.token.clone();

        let abort = self.tasks.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => TaskOutcome::Cancelled,
                result = task => match result {
                    Ok(()) => TaskOutcome::Completed,
                    Err(e) => TaskOutcome::Failed(e),
                },
            }
        });

        debug!(scope = %self.name, task = %name, "Spawned task");
        self.names.insert(abort.id(), name);
    }

    /// Cancel this scope and, recursively, every child and nested scope.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the next child to finish. `None` when no children remain.
    pub async fn join_next(&mut self) -> Option<FinishedTask> {
        let joined = self.tasks.join_next_with_id().await?;

        let (id, outcome) = match joined {
            Ok((id, outcome)) => (id, outcome),
            Err(e) => {
                let id = e.id();
                let task = self.names.get(&id).cloned().unwrap_or_default();
                if e.is_panic() {
                    (id, TaskOutcome::Failed(KernelError::TaskPanicked { task }))
                } else {
                    (id, TaskOutcome::Cancelled)
                }
            }
        };
        let name = self.names.remove(&id).unwrap_or_default();

        match &outcome {
            TaskOutcome::Completed => self.summary.completed += 1,
            TaskOutcome::Cancelled => self.summary.cancelled += 1,
            TaskOutcome::Failed(_) => self.summary.failed += 1,
        }

        Some(FinishedTask { name, outcome })
    }

    /// Apply the failure policy to a finished child.
    ///
    /// Under [`FailurePolicy::FailFast`] a failure cancels the scope and is
    /// returned; otherwise it is logged and swallowed.
    pub fn settle(&self, finished: FinishedTask) -> Result<()> {
        let FinishedTask { name, outcome } = finished;
        let TaskOutcome::Failed(err) = outcome else {
            return Ok(());
        };

        match self.policy {
            FailurePolicy::FailFast => {
                error!(scope = %self.name, task = %name, error = %err, "Task failed, cancelling scope");
                self.cancel();
                Err(err)
            }
            FailurePolicy::LogAndContinue => {
                warn!(scope = %self.name, task = %name, error = %err, "Task failed, continuing");
                Ok(())
            }
        }
    }

    /// Wait until every child has finished or been cancelled.
    ///
    /// Returns the first failure seen under [`FailurePolicy::FailFast`], after
    /// the remaining children have wound down.
    pub async fn join(&mut self) -> Result<ScopeSummary> {
        let mut first_error = None;

        while let Some(finished) = self.join_next().await {
            if let Err(e) = self.settle(finished) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(self.summary.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_join_waits_for_all_children() {
        let mut scope = TaskScope::new("test", FailurePolicy::FailFast);
        for i in 0..3u64 {
            scope.spawn(format!("child-{}", i), async move {
                tokio::time::sleep(Duration::from_millis(5 * i)).await;
                Ok(())
            });
        }
        assert_eq!(scope.len(), 3);

        let summary = scope.join().await.unwrap();
        assert_eq!(summary.completed, 3);
        assert!(scope.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_reaches_nested_scopes() {
        let parent = TaskScope::new("parent", FailurePolicy::FailFast);
        let mut child = parent.child("child");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        child.spawn("sleeper", async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            let _ = tx.send("finished");
            Ok(())
        });

        parent.cancel();
        assert!(child.is_cancelled());

        let summary = child.join().await.unwrap();
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.completed, 0);
        // The body never ran past its suspension point
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_siblings() {
        let mut scope = TaskScope::new("test", FailurePolicy::FailFast);
        scope.spawn("long", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });
        scope.spawn("broken", async {
            Err::<(), _>(KernelError::InvalidConfig("boom".to_string()))
        });

        let err = scope.join().await.unwrap_err();
        assert!(matches!(err, KernelError::InvalidConfig(_)));
        assert!(scope.is_cancelled());
        assert_eq!(scope.summary().failed, 1);
        assert_eq!(scope.summary().cancelled, 1);
    }

    #[tokio::test]
    async fn test_log_and_continue_keeps_siblings() {
        let mut scope = TaskScope::new("test", FailurePolicy::LogAndContinue);
        scope.spawn("ok", async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(())
        });
        scope.spawn("broken", async {
            Err::<(), _>(KernelError::InvalidConfig("boom".to_string()))
        });

        let summary = scope.join().await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert!(!scope.is_cancelled());
    }

    #[tokio::test]
    async fn test_panic_is_reported_with_task_name() {
        let mut scope = TaskScope::new("test", FailurePolicy::LogAndContinue);
        scope.spawn("panicky", async {
            if true {
                panic!("agent blew up");
            }
            Ok(())
        });

        let finished = scope.join_next().await.unwrap();
        assert_eq!(finished.name, "panicky");
        assert!(matches!(
            finished.outcome,
            TaskOutcome::Failed(KernelError::TaskPanicked { ref task }) if task == "panicky"
        ));
    }

    #[tokio::test]
    async fn test_spawn_after_cancel_never_runs() {
        let mut scope = TaskScope::new("test", FailurePolicy::FailFast);
        scope.cancel();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        scope.spawn("late", async move {
            let _ = tx.send(());
            Ok(())
        });

        let finished = scope.join_next().await.unwrap();
        assert!(matches!(finished.outcome, TaskOutcome::Cancelled));
        assert!(rx.try_recv().is_err());
    }
}
