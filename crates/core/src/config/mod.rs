//! 编排引擎配置
//!
//! 加载顺序: 默认值 -> TOML配置文件 -> `ORCHESTRATOR_` 前缀的环境变量。
//! 嵌套字段使用双下划线分隔，例如 `ORCHESTRATOR_RECOVERY__TIMEOUT_SECONDS=1800`。

pub mod models;

pub use models::*;
