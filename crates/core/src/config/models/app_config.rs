use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    api_observability::{ApiConfig, EventBusConfig, ObservabilityConfig},
    database::DatabaseConfig,
    dispatcher_worker::{LocalExecutorConfig, SchedulerConfig, WorkerConfig},
    message_queue::MessageQueueConfig,
    resilience::{RateLimitConfig, RecoveryConfig, RetryConfig},
};

/// 编排引擎完整配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub message_queue: MessageQueueConfig,
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
    pub local_executor: LocalExecutorConfig,
    pub retry: RetryConfig,
    pub recovery: RecoveryConfig,
    pub rate_limit: RateLimitConfig,
    pub events: EventBusConfig,
    pub api: ApiConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序:
    /// 1. 默认配置
    /// 2. 配置文件（TOML格式）
    /// 3. 环境变量覆盖（前缀: ORCHESTRATOR_，嵌套分隔符: __）
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/orchestrator.toml",
                "orchestrator.toml",
                "/etc/orchestrator/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("ORCHESTRATOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.message_queue
            .validate()
            .context("消息队列配置验证失败")?;
        self.scheduler.validate().context("调度器配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.local_executor
            .validate()
            .context("本地执行器配置验证失败")?;
        self.retry.validate().context("重试策略配置验证失败")?;
        self.recovery.validate().context("恢复配置验证失败")?;
        self.rate_limit.validate().context("限流配置验证失败")?;
        self.events.validate().context("事件总线配置验证失败")?;
        self.api.validate().context("API配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        if !self.message_queue.distributed_enabled() && !self.local_executor.enabled {
            return Err(anyhow::anyhow!("分布式执行和本地执行器不能同时禁用"));
        }

        Ok(())
    }
}
