//! 编排引擎的指标采集
//!
//! 通过 `metrics` 门面记录，进程启动时由 [`install_prometheus_recorder`] 安装 Prometheus 导出器。

use anyhow::Result;
use metrics::{counter, gauge, histogram, Counter, Histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// 任务、队列、Worker、恢复相关指标
#[derive(Clone)]
pub struct MetricsCollector {
    admission_cycle_duration: Histogram,
    recovery_passes_total: Counter,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            admission_cycle_duration: histogram!("orchestrator_admission_cycle_duration_seconds"),
            recovery_passes_total: counter!("orchestrator_recovery_passes_total"),
        }
    }

    pub fn record_transition(&self, from: &str, to: &str) {
        counter!(
            "orchestrator_task_transitions_total",
            "from" => from.to_string(),
            "to" => to.to_string()
        )
        .increment(1);
    }

    pub fn record_attempt(&self, kind: &str, outcome: &str, duration_ms: u64) {
        counter!(
            "orchestrator_task_attempts_total",
            "kind" => kind.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
        histogram!("orchestrator_task_attempt_duration_seconds", "kind" => kind.to_string())
            .record(duration_ms as f64 / 1000.0);
    }

    pub fn record_retry_scheduled(&self, kind: &str, delay_seconds: f64) {
        counter!("orchestrator_task_retries_total", "kind" => kind.to_string()).increment(1);
        histogram!("orchestrator_task_retry_delay_seconds").record(delay_seconds);
    }

    pub fn record_task_failed(&self, kind: &str, reason: &str) {
        counter!(
            "orchestrator_task_failures_total",
            "kind" => kind.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    pub fn record_submission(&self, backend: &str, success: bool) {
        counter!(
            "orchestrator_submissions_total",
            "backend" => backend.to_string(),
            "result" => if success { "ok" } else { "error" }
        )
        .increment(1);
    }

    pub fn record_recovery_pass(&self, retried: usize, failed: usize, skipped: usize, errors: usize) {
        self.recovery_passes_total.increment(1);
        counter!("orchestrator_recovery_tasks_total", "outcome" => "retried").increment(retried as u64);
        counter!("orchestrator_recovery_tasks_total", "outcome" => "failed").increment(failed as u64);
        counter!("orchestrator_recovery_tasks_total", "outcome" => "skipped").increment(skipped as u64);
        counter!("orchestrator_recovery_tasks_total", "outcome" => "errors").increment(errors as u64);
    }

    pub fn record_control_action(&self, action: &str, outcome: &str) {
        counter!(
            "orchestrator_control_actions_total",
            "action" => action.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }

    pub fn record_audit_write_failure(&self, action: &str) {
        counter!(
            "orchestrator_audit_write_failures_total",
            "action" => action.to_string()
        )
        .increment(1);
    }

    pub fn update_queue_depth(&self, queue: &str, depth: usize, backlog: usize) {
        gauge!("orchestrator_queue_depth", "queue" => queue.to_string()).set(depth as f64);
        gauge!("orchestrator_queue_backlog", "queue" => queue.to_string()).set(backlog as f64);
    }

    pub fn update_online_workers(&self, count: usize) {
        gauge!("orchestrator_online_workers").set(count as f64);
    }

    pub fn update_active_backend(&self, backend: Option<&str>) {
        for name in ["distributed", "local"] {
            let active = backend == Some(name);
            gauge!("orchestrator_active_backend", "backend" => name).set(if active { 1.0 } else { 0.0 });
        }
    }

    pub fn record_admission_cycle(&self, duration_seconds: f64) {
        self.admission_cycle_duration.record(duration_seconds);
    }
}

/// 安装全局 Prometheus 记录器，返回的句柄用于渲染 `/metrics`
pub fn install_prometheus_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("安装Prometheus指标记录器失败: {e}"))?;
    info!("Prometheus指标记录器已安装");
    Ok(handle)
}
