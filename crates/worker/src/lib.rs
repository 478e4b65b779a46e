pub mod actions;
pub mod distributed;
pub mod local_executor;
pub mod runtime;

pub use actions::{ActionRegistry, NoopAction, ShellAction, ShellParams};
pub use distributed::DistributedBackend;
pub use local_executor::LocalExecutor;
pub use runtime::WorkerRuntime;
