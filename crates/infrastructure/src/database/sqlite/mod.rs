pub mod sqlite_control_action_repository;
pub mod sqlite_task_repository;
pub mod sqlite_worker_repository;

pub use sqlite_control_action_repository::SqliteControlActionRepository;
pub use sqlite_task_repository::SqliteTaskRepository;
pub use sqlite_worker_repository::SqliteWorkerRepository;
