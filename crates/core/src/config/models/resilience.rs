use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// 单个任务类型的重试策略
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicyConfig {
    pub max_retries: u32,
    pub base_delay_seconds: f64,
    pub backoff_multiplier: f64,
    pub max_delay_seconds: f64,
    /// 为空表示所有可重试错误都允许重试
    pub retryable_error_kinds: Vec<String>,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_seconds: 5.0,
            backoff_multiplier: 2.0,
            max_delay_seconds: 600.0,
            retryable_error_kinds: Vec::new(),
        }
    }
}

impl RetryPolicyConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_retries == 0 {
            return Err(anyhow::anyhow!("最大尝试次数必须大于0"));
        }

        if self.base_delay_seconds < 0.0 {
            return Err(anyhow::anyhow!("基础重试延迟不能为负数"));
        }

        if self.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数不能小于1"));
        }

        if self.max_delay_seconds < self.base_delay_seconds {
            return Err(anyhow::anyhow!("最大重试延迟不能小于基础延迟"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RetryConfig {
    pub default_policy: RetryPolicyConfig,
    /// 按任务 kind 覆盖的策略
    pub policies: HashMap<String, RetryPolicyConfig>,
    /// 0 表示不加抖动
    pub jitter_factor: f64,
}

impl RetryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.default_policy.validate()?;
        for (kind, policy) in &self.policies {
            policy
                .validate()
                .map_err(|e| anyhow::anyhow!("任务类型 {kind} 的重试策略无效: {e}"))?;
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!("抖动系数必须在0到1之间"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    /// 超过该时长未更新的任务直接标记失败
    pub timeout_seconds: u64,
    /// 超过该时长未更新的任务重新提交
    pub stale_seconds: u64,
    pub startup_stale_seconds: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 300,
            timeout_seconds: 3600,
            stale_seconds: 120,
            startup_stale_seconds: 0,
        }
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_seconds == 0 {
            return Err(anyhow::anyhow!("恢复扫描间隔必须大于0"));
        }

        if self.stale_seconds >= self.timeout_seconds {
            return Err(anyhow::anyhow!("stale阈值必须小于timeout阈值"));
        }

        if self.startup_stale_seconds >= self.timeout_seconds {
            return Err(anyhow::anyhow!("启动时的stale阈值必须小于timeout阈值"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests_per_minute: 200,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled && self.max_requests_per_minute == 0 {
            return Err(anyhow::anyhow!("每分钟最大请求数必须大于0"));
        }
        Ok(())
    }
}
