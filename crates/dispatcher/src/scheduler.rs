use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use orchestrator_core::config::SchedulerConfig;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{BackendKind, ExecutionBackend, QueueSpec, Task, TaskStatus, Worker};
use orchestrator_infrastructure::{MetricsCollector, StructuredLogger};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::lifecycle::TaskLifecycle;
use crate::supervisor::BackendSupervisor;
use crate::worker_registry::WorkerRegistry;

/// 一轮准入的统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdmissionReport {
    pub admitted: usize,
    /// 因深度已满、无可用Worker或无可用后端而继续等待的任务
    pub deferred: usize,
    /// 被其他参与者抢先修改的任务
    pub lost: usize,
    pub errors: usize,
}

/// 单个队列在本轮中的视图
#[derive(Debug, Default)]
struct QueueView {
    depth: usize,
    backlog: Vec<Task>,
}

/// 优先级调度器
///
/// 每个队列维护一个按优先级排序的积压列表：高优先级在前，同级按创建时间先进先出。
/// 队列深度由在途任务（已提交的 Queued 与 Running）每轮重新计算。
pub struct Scheduler {
    lifecycle: Arc<TaskLifecycle>,
    supervisor: Arc<BackendSupervisor>,
    registry: Arc<WorkerRegistry>,
    metrics: Arc<MetricsCollector>,
    queues: HashMap<String, QueueSpec>,
    default_max_depth: usize,
    interval: Duration,
}

impl Scheduler {
    pub fn new(
        lifecycle: Arc<TaskLifecycle>,
        supervisor: Arc<BackendSupervisor>,
        registry: Arc<WorkerRegistry>,
        metrics: Arc<MetricsCollector>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            lifecycle,
            supervisor,
            registry,
            metrics,
            queues: config
                .queues
                .iter()
                .map(|q| (q.name.clone(), QueueSpec::from(q)))
                .collect(),
            default_max_depth: config.default_max_depth,
            interval: Duration::from_millis(config.admission_interval_ms),
        }
    }

    pub fn queue_spec(&self, name: &str) -> QueueSpec {
        self.queues
            .get(name)
            .cloned()
            .unwrap_or_else(|| QueueSpec::new(name, self.default_max_depth))
    }

    async fn collect_queues(&self) -> OrchestratorResult<BTreeMap<String, QueueView>> {
        let now = self.lifecycle.now();
        let tasks = self
            .lifecycle
            .repository()
            .list_by_status(&[TaskStatus::Pending, TaskStatus::Queued, TaskStatus::Running])
            .await?;

        let mut views: BTreeMap<String, QueueView> = BTreeMap::new();
        for task in tasks {
            let view = views.entry(task.queue.clone()).or_default();
            if task.is_in_flight() {
                view.depth += 1;
            } else if task.is_admissible(now) {
                view.backlog.push(task);
            }
        }

        for view in views.values_mut() {
            view.backlog.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            });
        }
        Ok(views)
    }

    /// 执行一轮准入
    #[instrument(skip(self))]
    pub async fn run_admission_cycle(&self) -> OrchestratorResult<AdmissionReport> {
        let started = Instant::now();
        let mut report = AdmissionReport::default();
        let mut views = self.collect_queues().await?;

        let waiting: usize = views.values().map(|v| v.backlog.len()).sum();
        if waiting == 0 {
            self.publish_depths(&views);
            self.metrics
                .record_admission_cycle(started.elapsed().as_secs_f64());
            return Ok(report);
        }

        let backend = match self.supervisor.select().await {
            Ok(backend) => backend,
            Err(e @ OrchestratorError::BackendUnavailable(_)) => {
                warn!(waiting, error = %e, "没有可用的执行后端，任务保持等待");
                report.deferred = waiting;
                self.publish_depths(&views);
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        let online = if backend.kind() == BackendKind::Distributed {
            self.registry.online_workers().await?
        } else {
            Vec::new()
        };

        for (name, view) in views.iter_mut() {
            let spec = self.queue_spec(name);
            if backend.kind() == BackendKind::Distributed && !queue_has_worker(&spec, &online) {
                debug!(queue = %name, "队列没有在线的Worker，本轮跳过");
                report.deferred += view.backlog.len();
                continue;
            }

            let backlog = std::mem::take(&mut view.backlog);
            let mut remaining = backlog.into_iter();
            for task in remaining.by_ref() {
                if view.depth >= spec.max_depth {
                    report.deferred += 1;
                    view.backlog.push(task);
                    break;
                }
                match self.admit(&task, backend.as_ref()).await {
                    Ok(true) => {
                        view.depth += 1;
                        report.admitted += 1;
                    }
                    Ok(false) => report.lost += 1,
                    Err(e) => {
                        report.errors += 1;
                        error!(task.id = task.id, queue = %name, error = %e, "任务提交失败，已退回积压队列");
                        view.backlog.push(task);
                    }
                }
            }
            let rest: Vec<Task> = remaining.collect();
            report.deferred += rest.len();
            view.backlog.extend(rest);
        }

        self.publish_depths(&views);
        self.metrics
            .record_admission_cycle(started.elapsed().as_secs_f64());
        if report.admitted > 0 || report.errors > 0 {
            debug!(?report, "准入周期完成");
        }
        Ok(report)
    }

    /// 抢占任务并交给后端；被其他参与者抢先时返回 `Ok(false)`
    async fn admit(&self, task: &Task, backend: &dyn ExecutionBackend) -> OrchestratorResult<bool> {
        let kind = backend.kind();
        let queued = match self
            .lifecycle
            .transition(task, TaskStatus::Queued, None, move |t| {
                t.assign_submission(kind);
            })
            .await
        {
            Ok(queued) => queued,
            Err(e) if e.is_conflict() => {
                StructuredLogger::log_transition_lost(task.id, TaskStatus::Queued.as_str(), "准入时版本冲突");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        match backend.submit(&queued).await {
            Ok(handle) => {
                self.metrics.record_submission(kind.as_str(), true);
                debug!(task.id = queued.id, run.id = %handle.run_id, backend = %kind, "任务已提交");
                Ok(true)
            }
            Err(e) => {
                self.metrics.record_submission(kind.as_str(), false);
                match self
                    .lifecycle
                    .transition(&queued, TaskStatus::Queued, None, |t| t.release_submission())
                    .await
                {
                    Ok(_) => {}
                    Err(release) if release.is_conflict() => {
                        debug!(task.id = queued.id, "提交失败后任务已被其他参与者修改");
                    }
                    Err(release) => {
                        warn!(task.id = queued.id, error = %release, "提交失败后释放任务失败");
                    }
                }
                Err(e)
            }
        }
    }

    fn publish_depths(&self, views: &BTreeMap<String, QueueView>) {
        for (name, view) in views {
            self.metrics
                .update_queue_depth(name, view.depth, view.backlog.len());
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "调度器已启动");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_admission_cycle().await {
                        error!(error = %e, "准入周期执行失败");
                    }
                }
            }
        }
        info!("调度器已停止");
    }
}

/// 分布式执行时队列需要至少一个在线的指派Worker；未指派任何Worker的队列接受所有在线Worker
pub fn queue_has_worker(spec: &QueueSpec, online: &[Worker]) -> bool {
    if spec.assigned_worker_ids.is_empty() && !online.is_empty() {
        return true;
    }
    online
        .iter()
        .any(|w| spec.assigned_worker_ids.contains(&w.id) || w.serves_queue(&spec.name))
}
