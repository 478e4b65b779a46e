//! 部署任务编排引擎的进程组装：运行模式、组件装配与优雅关闭

pub mod app;
pub mod shutdown;

pub use app::{AppMode, Application, Orchestrator};
pub use shutdown::ShutdownManager;
