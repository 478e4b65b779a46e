//! 结构化日志
//!
//! 业务事件统一经过 [`StructuredLogger`] 输出，字段命名保持 `task.id` / `worker.id` 形式，
//! 便于 JSON 日志检索。

use std::str::FromStr;

use anyhow::Result;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(anyhow::anyhow!("不支持的日志格式: {other}")),
        }
    }
}

/// 初始化全局日志。`RUST_LOG` 优先于传入的级别
pub fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()?,
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(true),
            )
            .try_init()?,
    }

    Ok(())
}

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_task_created(task_id: i64, kind: &str, queue: &str, owner_id: &str) {
        info!(
            event = "task_created",
            task.id = task_id,
            task.kind = kind,
            task.queue = queue,
            task.owner = owner_id,
            "任务已创建"
        );
    }

    pub fn log_transition(task_id: i64, from: &str, to: &str, actor_id: Option<&str>) {
        info!(
            event = "task_transition",
            task.id = task_id,
            task.from = from,
            task.to = to,
            actor.id = actor_id,
            "任务状态迁移"
        );
    }

    /// 迁移目标已经被其他参与者抢先写入
    pub fn log_transition_lost(task_id: i64, to: &str, reason: &str) {
        debug!(
            event = "task_transition_lost",
            task.id = task_id,
            task.to = to,
            reason = reason,
            "任务状态迁移放弃"
        );
    }

    pub fn log_retry_scheduled(task_id: i64, attempt_count: u32, max_attempts: u32, delay_secs: f64, error: &str) {
        warn!(
            event = "task_retry_scheduled",
            task.id = task_id,
            task.attempt_count = attempt_count,
            task.max_attempts = max_attempts,
            retry.delay_secs = delay_secs,
            task.error = error,
            "任务将在退避后重试"
        );
    }

    pub fn log_task_failed(task_id: i64, reason: &str, attempts: u32, error: &str) {
        error!(
            event = "task_failed",
            task.id = task_id,
            task.reason = reason,
            task.attempts = attempts,
            task.error = error,
            "任务最终失败"
        );
    }

    pub fn log_control_action(task_id: i64, action: &str, actor_id: &str, outcome: &str) {
        info!(
            event = "control_action",
            task.id = task_id,
            control.action = action,
            actor.id = actor_id,
            control.outcome = outcome,
            "控制操作"
        );
    }

    pub fn log_recovery_pass(source: &str, retried: usize, failed: usize, skipped: usize, errors: usize) {
        info!(
            event = "recovery_pass",
            recovery.source = source,
            recovery.retried = retried,
            recovery.failed = failed,
            recovery.skipped = skipped,
            recovery.errors = errors,
            "恢复扫描完成"
        );
    }

    pub fn log_backend_switch(from: Option<&str>, to: Option<&str>) {
        warn!(
            event = "backend_switch",
            backend.from = from,
            backend.to = to,
            "活跃执行后端切换"
        );
    }

    pub fn log_worker_registered(worker_id: &str, hostname: &str, queues: &[String]) {
        info!(
            event = "worker_registered",
            worker.id = worker_id,
            worker.hostname = hostname,
            worker.queues = ?queues,
            "Worker首次心跳，已注册"
        );
    }

    pub fn log_worker_offline(worker_id: &str, last_heartbeat_secs_ago: i64) {
        warn!(
            event = "worker_offline",
            worker.id = worker_id,
            worker.heartbeat_age_secs = last_heartbeat_secs_ago,
            "Worker心跳超时，标记为离线"
        );
    }
}
