//! 任务生命周期状态机
//!
//! ```text
//! Pending --enqueue--> Queued --claim--> Running --success--> Succeeded
//!                        ^                  |
//!                        +---retry----------+--exhausted--> Failed
//! Queued|Running --pause--> Paused --resume--> Queued
//! 任意非终态 --cancel--> Cancelled
//! ```
//!
//! 另外两条边只由内部流程使用: Queued -> Queued（准入或恢复时重新提交）
//! 与 Queued -> Failed（恢复超时）。

use orchestrator_core::{OrchestratorError, OrchestratorResult};

use crate::entities::{Task, TaskStatus};

pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;

    match (from, to) {
        (Pending, Queued) => true,
        (Queued, Queued) => true,
        (Queued, Running) => true,
        (Running, Succeeded) => true,
        (Running, Queued) => true,
        (Running, Failed) => true,
        (Queued, Failed) => true,
        (Queued | Running, Paused) => true,
        (Paused, Queued) => true,
        (from, Cancelled) => !from.is_terminal(),
        _ => false,
    }
}

/// 校验任务当前状态是否允许迁移到 `to`
pub fn ensure_transition(task: &Task, to: TaskStatus) -> OrchestratorResult<()> {
    if can_transition(task.status, to) {
        Ok(())
    } else {
        Err(OrchestratorError::invalid_transition(task.id, task.status, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn terminal_states_accept_nothing() {
        for from in [Succeeded, Failed, Cancelled] {
            for to in TaskStatus::ALL {
                assert!(!can_transition(from, to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn every_non_terminal_state_can_be_cancelled() {
        for from in [Pending, Queued, Running, Paused] {
            assert!(can_transition(from, Cancelled));
        }
    }

    #[test]
    fn pause_only_from_queued_or_running() {
        assert!(can_transition(Queued, Paused));
        assert!(can_transition(Running, Paused));
        assert!(!can_transition(Pending, Paused));
        assert!(!can_transition(Paused, Paused));
        assert!(can_transition(Paused, Queued));
        assert!(!can_transition(Paused, Running));
    }

    #[test]
    fn running_outcomes() {
        assert!(can_transition(Running, Succeeded));
        assert!(can_transition(Running, Queued));
        assert!(can_transition(Running, Failed));
        assert!(!can_transition(Running, Pending));
        assert!(!can_transition(Pending, Running));
        assert!(!can_transition(Pending, Succeeded));
    }
}
