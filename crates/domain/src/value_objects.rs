use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use orchestrator_core::config::{QueueConfig, RetryPolicyConfig};
use orchestrator_core::OrchestratorError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low = 1,
    #[default]
    Normal = 5,
    High = 10,
}

impl TaskPriority {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(TaskPriority::Low),
            5 => Some(TaskPriority::Normal),
            10 => Some(TaskPriority::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "normal" => Ok(TaskPriority::Normal),
            "high" => Ok(TaskPriority::High),
            other => Err(OrchestratorError::invalid_params(format!(
                "未知的任务优先级: {other}"
            ))),
        }
    }
}

/// 按任务 kind 绑定的重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    /// 为空表示所有 Transient 错误都可重试
    pub retryable_error_kinds: HashSet<String>,
}

impl RetryPolicy {
    /// delay = min(base_delay * backoff_multiplier^attempt_count, max_delay)
    pub fn delay_for(&self, attempt_count: u32) -> Duration {
        let exponent = i32::try_from(attempt_count).unwrap_or(i32::MAX);
        let raw = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    pub fn is_retryable_kind(&self, kind: &str) -> bool {
        self.retryable_error_kinds.is_empty() || self.retryable_error_kinds.contains(kind)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryPolicyConfig::default())
    }
}

impl From<&RetryPolicyConfig> for RetryPolicy {
    fn from(config: &RetryPolicyConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_secs_f64(config.base_delay_seconds.max(0.0)),
            backoff_multiplier: config.backoff_multiplier,
            max_delay: Duration::from_secs_f64(config.max_delay_seconds.max(0.0)),
            retryable_error_kinds: config.retryable_error_kinds.iter().cloned().collect(),
        }
    }
}

/// 命名的路由队列。`current_depth` 由调度器每轮重新计算，不持久化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub max_depth: usize,
    pub assigned_worker_ids: HashSet<String>,
}

impl QueueSpec {
    pub fn new(name: impl Into<String>, max_depth: usize) -> Self {
        Self {
            name: name.into(),
            max_depth,
            assigned_worker_ids: HashSet::new(),
        }
    }

    pub fn with_workers<I, S>(mut self, workers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assigned_worker_ids = workers.into_iter().map(Into::into).collect();
        self
    }
}

impl From<&QueueConfig> for QueueSpec {
    fn from(config: &QueueConfig) -> Self {
        QueueSpec::new(config.name.clone(), config.max_depth)
            .with_workers(config.assigned_workers.iter().cloned())
    }
}
