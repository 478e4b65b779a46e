//! 编排核心
//!
//! 任务状态写入、执行回报处理、优先级准入、后端选择、恢复扫描与控制操作。

pub mod controller;
pub mod lifecycle;
pub mod recovery_service;
pub mod retry_service;
pub mod scheduler;
pub mod state_listener;
pub mod submission;
pub mod supervisor;
pub mod worker_failure_detector;
pub mod worker_registry;

pub use controller::{BulkFailure, BulkOperation, BulkResult, TaskController};
pub use lifecycle::TaskLifecycle;
pub use recovery_service::{RecoveryReport, RecoveryService, RecoverySource};
pub use retry_service::{AttemptCoordinator, RetryPolicyRegistry};
pub use scheduler::{AdmissionReport, Scheduler};
pub use state_listener::StateListener;
pub use submission::{SubmissionService, TaskSubmission};
pub use supervisor::BackendSupervisor;
pub use worker_failure_detector::WorkerFailureDetector;
pub use worker_registry::WorkerRegistry;
