use std::sync::Arc;

use chrono::Duration;
use orchestrator_core::{Clock, OrchestratorResult};
use orchestrator_domain::{Worker, WorkerHeartbeatMessage, WorkerRepository, WorkerStatus};
use orchestrator_infrastructure::{MetricsCollector, StructuredLogger};
use tokio::sync::Mutex;
use tracing::debug;

/// Worker 注册表
///
/// 心跳与完成回报会并发到达，读改写统一经过内部互斥锁串行化。
pub struct WorkerRegistry {
    repo: Arc<dyn WorkerRepository>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    stale_after: Duration,
    write_lock: Mutex<()>,
}

impl WorkerRegistry {
    pub fn new(
        repo: Arc<dyn WorkerRepository>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
        heartbeat_stale_seconds: u64,
    ) -> Self {
        Self {
            repo,
            clock,
            metrics,
            stale_after: Duration::seconds(heartbeat_stale_seconds as i64),
            write_lock: Mutex::new(()),
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// 首次心跳创建 Worker，之后刷新心跳时间、负载和消费队列
    ///
    /// 心跳时间取接收时刻，避免 Worker 本地时钟漂移影响存活判断。
    pub async fn record_heartbeat(&self, heartbeat: &WorkerHeartbeatMessage) -> OrchestratorResult<Worker> {
        let _guard = self.write_lock.lock().await;
        let now = self.clock.now();

        let mut worker = match self.repo.get(&heartbeat.worker_id).await? {
            Some(worker) => worker,
            None => {
                StructuredLogger::log_worker_registered(
                    &heartbeat.worker_id,
                    &heartbeat.hostname,
                    &heartbeat.queues,
                );
                Worker::new(&heartbeat.worker_id, &heartbeat.hostname, now)
            }
        };

        worker.hostname = heartbeat.hostname.clone();
        worker.status = WorkerStatus::Online;
        worker.queues = heartbeat.queues.clone();
        worker.current_task_count = heartbeat.current_task_count;
        worker.last_heartbeat = now;

        self.repo.save(&worker).await?;
        debug!(worker.id = %worker.id, tasks = worker.current_task_count, "心跳已记录");
        Ok(worker)
    }

    /// 任务完成回报，更新成功失败计数和平均耗时
    pub async fn record_completion(
        &self,
        worker_id: &str,
        duration_ms: u64,
        success: bool,
    ) -> OrchestratorResult<Option<Worker>> {
        let _guard = self.write_lock.lock().await;

        let Some(mut worker) = self.repo.get(worker_id).await? else {
            debug!(worker.id = worker_id, "完成回报来自未注册的Worker");
            return Ok(None);
        };
        worker.record_completion(duration_ms, success);
        self.repo.save(&worker).await?;
        Ok(Some(worker))
    }

    /// 心跳超时的 Online Worker 标记为 Offline，返回本轮被标记的 Worker
    ///
    /// 其上的在途任务不在此处处理，由恢复扫描按超时规则收敛。
    pub async fn mark_stale_offline(&self) -> OrchestratorResult<Vec<Worker>> {
        let _guard = self.write_lock.lock().await;
        let now = self.clock.now();

        let mut marked = Vec::new();
        for mut worker in self.repo.list().await? {
            if worker.status == WorkerStatus::Online && !worker.is_heartbeat_fresh(now, self.stale_after) {
                worker.status = WorkerStatus::Offline;
                self.repo.save(&worker).await?;
                StructuredLogger::log_worker_offline(
                    &worker.id,
                    (now - worker.last_heartbeat).num_seconds(),
                );
                marked.push(worker);
            }
        }

        let online = self.online_workers().await?.len();
        self.metrics.update_online_workers(online);
        Ok(marked)
    }

    /// 心跳新鲜且状态为 Online 的 Worker
    pub async fn online_workers(&self) -> OrchestratorResult<Vec<Worker>> {
        let now = self.clock.now();
        Ok(self
            .repo
            .list()
            .await?
            .into_iter()
            .filter(|w| w.is_available(now, self.stale_after))
            .collect())
    }

    pub async fn has_online_workers(&self) -> OrchestratorResult<bool> {
        Ok(!self.online_workers().await?.is_empty())
    }

    pub async fn list(&self) -> OrchestratorResult<Vec<Worker>> {
        self.repo.list().await
    }

    pub async fn get(&self, worker_id: &str) -> OrchestratorResult<Option<Worker>> {
        self.repo.get(worker_id).await
    }
}
