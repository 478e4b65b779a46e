use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::worker_registry::WorkerRegistry;

/// 定期把心跳超时的 Worker 标记为离线
pub struct WorkerFailureDetector {
    registry: Arc<WorkerRegistry>,
    interval: Duration,
}

impl WorkerFailureDetector {
    pub fn new(registry: Arc<WorkerRegistry>, detection_interval_seconds: u64) -> Self {
        Self {
            registry,
            interval: Duration::from_secs(detection_interval_seconds.max(1)),
        }
    }

    /// 执行一次检测，返回本轮标记离线的 Worker 数量
    pub async fn detect_once(&self) -> usize {
        match self.registry.mark_stale_offline().await {
            Ok(marked) => marked.len(),
            Err(e) => {
                error!(error = %e, "Worker失效检测失败");
                0
            }
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Worker失效检测已启动");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.detect_once().await;
                }
            }
        }
        info!("Worker失效检测已停止");
    }
}
