use serde::{Deserialize, Serialize};

/// 单个队列的配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    pub name: String,
    pub max_depth: usize,
    #[serde(default)]
    pub assigned_workers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub admission_interval_ms: u64,
    /// 未在 `queues` 中声明的队列使用的最大深度
    pub default_max_depth: usize,
    pub default_queue: String,
    pub queues: Vec<QueueConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            admission_interval_ms: 1000,
            default_max_depth: 10,
            default_queue: "default".to_string(),
            queues: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.admission_interval_ms == 0 {
            return Err(anyhow::anyhow!("准入间隔必须大于0"));
        }

        if self.default_max_depth == 0 {
            return Err(anyhow::anyhow!("队列默认最大深度必须大于0"));
        }

        if self.default_queue.is_empty() {
            return Err(anyhow::anyhow!("默认队列名称不能为空"));
        }

        let mut seen = std::collections::HashSet::new();
        for queue in &self.queues {
            if queue.name.is_empty() {
                return Err(anyhow::anyhow!("队列名称不能为空"));
            }
            if queue.max_depth == 0 {
                return Err(anyhow::anyhow!("队列 {} 的最大深度必须大于0", queue.name));
            }
            if !seen.insert(queue.name.as_str()) {
                return Err(anyhow::anyhow!("队列 {} 重复定义", queue.name));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub worker_id: String,
    pub hostname: String,
    /// 该Worker进程消费的队列
    pub queues: Vec<String>,
    pub max_concurrent_tasks: usize,
    pub heartbeat_interval_seconds: u64,
    /// 心跳超过该时长视为离线
    pub heartbeat_stale_seconds: u64,
    pub failure_detection_interval_seconds: u64,
    /// 等待编排核心应答认领的最长时间
    pub claim_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            worker_id: "worker-001".to_string(),
            hostname: "localhost".to_string(),
            queues: vec!["default".to_string()],
            max_concurrent_tasks: 4,
            heartbeat_interval_seconds: 30,
            heartbeat_stale_seconds: 90,
            failure_detection_interval_seconds: 30,
            claim_timeout_seconds: 30,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            return Err(anyhow::anyhow!("Worker ID不能为空"));
        }

        if self.hostname.is_empty() {
            return Err(anyhow::anyhow!("主机名不能为空"));
        }

        if self.queues.is_empty() {
            return Err(anyhow::anyhow!("Worker至少需要消费一个队列"));
        }

        if self.max_concurrent_tasks == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.heartbeat_stale_seconds <= self.heartbeat_interval_seconds {
            return Err(anyhow::anyhow!("心跳过期阈值必须大于心跳间隔"));
        }

        if self.failure_detection_interval_seconds == 0 {
            return Err(anyhow::anyhow!("故障检测间隔必须大于0"));
        }

        if self.claim_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("认领应答超时必须大于0"));
        }

        Ok(())
    }
}

/// 本地回退执行器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalExecutorConfig {
    pub enabled: bool,
    pub concurrency: usize,
}

impl Default for LocalExecutorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: 3,
        }
    }
}

impl LocalExecutorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled && self.concurrency == 0 {
            return Err(anyhow::anyhow!("本地执行器并发数必须大于0"));
        }
        Ok(())
    }
}
