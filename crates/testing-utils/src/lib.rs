//! # Orchestrator Testing Utils
//!
//! 各crate共享的测试工具：
//!
//! - **Builders**: 带合理默认值的 Task / Worker / 创建请求构造器
//! - **Mocks**: 按脚本返回结果的动作执行器、记录提交的执行后端
//! - **Helpers**: 等待条件成立、直接改写任务状态等常用步骤
//!
//! ```toml
//! [dev-dependencies]
//! orchestrator-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
pub use orchestrator_core::ManualClock;
