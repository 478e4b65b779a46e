#![allow(dead_code)]

use std::sync::Arc;

use orchestrator_core::Clock;
use orchestrator_core::config::{
    MessageQueueConfig, RateLimitConfig, RecoveryConfig, RetryConfig, SchedulerConfig,
};
use orchestrator_domain::{
    AttemptRef, BackendKind, ExecutionBackend, NewTask, Task, TaskRepository, TaskStatus, WorkerHeartbeatMessage,
};
use orchestrator_dispatcher::{
    AttemptCoordinator, BackendSupervisor, RecoveryService, RetryPolicyRegistry, Scheduler,
    SubmissionService, TaskController, TaskLifecycle, WorkerRegistry,
};
use orchestrator_infrastructure::{
    EventBus, InMemoryControlActionRepository, InMemoryTaskRepository, InMemoryWorkerRepository,
    MetricsCollector, RateLimiter,
};
use orchestrator_testing_utils::{ManualClock, RecordingBackend, TestEnv};

pub struct HarnessConfig {
    pub scheduler: SchedulerConfig,
    pub retry: RetryConfig,
    pub recovery: RecoveryConfig,
    pub rate_limit: RateLimitConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            recovery: RecoveryConfig::default(),
            rate_limit: RateLimitConfig {
                enabled: true,
                max_requests_per_minute: 10_000,
            },
        }
    }
}

/// 以内存存储和记录型后端组装的编排核心
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub tasks: Arc<InMemoryTaskRepository>,
    pub audit: Arc<InMemoryControlActionRepository>,
    pub events: EventBus,
    pub metrics: Arc<MetricsCollector>,
    pub lifecycle: Arc<TaskLifecycle>,
    pub registry: Arc<WorkerRegistry>,
    pub local: Arc<RecordingBackend>,
    pub distributed: Arc<RecordingBackend>,
    pub supervisor: Arc<BackendSupervisor>,
    pub coordinator: Arc<AttemptCoordinator>,
    pub scheduler: Arc<Scheduler>,
    pub recovery: Arc<RecoveryService>,
    pub controller: Arc<TaskController>,
    pub submissions: Arc<SubmissionService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(HarnessConfig::default())
    }

    pub fn with_config(config: HarnessConfig) -> Self {
        let clock = Arc::new(ManualClock::default());
        let tasks = Arc::new(InMemoryTaskRepository::new());
        let audit = Arc::new(InMemoryControlActionRepository::new());
        let events = EventBus::new(1024);
        let metrics = Arc::new(MetricsCollector::new());

        let lifecycle = Arc::new(TaskLifecycle::new(
            tasks.clone(),
            events.clone(),
            clock.clone(),
            metrics.clone(),
        ));
        let registry = Arc::new(WorkerRegistry::new(
            Arc::new(InMemoryWorkerRepository::new()),
            clock.clone(),
            metrics.clone(),
            90,
        ));
        let local = RecordingBackend::new(BackendKind::Local);
        let distributed = RecordingBackend::new(BackendKind::Distributed);
        let supervisor = Arc::new(BackendSupervisor::new(
            Some(distributed.clone() as Arc<dyn ExecutionBackend>),
            Some(local.clone() as Arc<dyn ExecutionBackend>),
            registry.clone(),
            metrics.clone(),
        ));
        let policies = Arc::new(RetryPolicyRegistry::new(&config.retry));
        let coordinator = Arc::new(AttemptCoordinator::new(
            lifecycle.clone(),
            policies.clone(),
            metrics.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            lifecycle.clone(),
            supervisor.clone(),
            registry.clone(),
            metrics.clone(),
            &config.scheduler,
        ));
        let recovery = Arc::new(RecoveryService::new(
            lifecycle.clone(),
            supervisor.clone(),
            metrics.clone(),
            config.recovery.clone(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit, clock.clone()));
        let controller = Arc::new(TaskController::new(
            lifecycle.clone(),
            audit.clone(),
            supervisor.clone(),
            rate_limiter.clone(),
            metrics.clone(),
        ));
        let submissions = Arc::new(SubmissionService::new(
            lifecycle.clone(),
            policies,
            rate_limiter,
            &config.scheduler,
        ));

        Self {
            clock,
            tasks,
            audit,
            events,
            metrics,
            lifecycle,
            registry,
            local,
            distributed,
            supervisor,
            coordinator,
            scheduler,
            recovery,
            controller,
            submissions,
        }
    }

    pub async fn create(&self, request: NewTask) -> Task {
        self.tasks.create(&request, self.clock.now()).await.unwrap()
    }

    pub async fn get(&self, id: i64) -> Task {
        self.tasks.get_required(id).await.unwrap()
    }

    /// 构造一个已经在本地后端运行的任务
    pub async fn running(&self, request: NewTask) -> Task {
        let task = self.create(request).await;
        let now = self.clock.now();
        TestEnv::force(self.tasks.as_ref(), &task, |t| {
            t.status = TaskStatus::Running;
            t.assign_submission(BackendKind::Local);
            t.started_at = Some(now);
        })
        .await
        .unwrap()
    }

    /// 构造一个已经提交但尚未被认领的任务
    pub async fn submitted(&self, request: NewTask) -> Task {
        let task = self.create(request).await;
        TestEnv::force(self.tasks.as_ref(), &task, |t| {
            t.status = TaskStatus::Queued;
            t.assign_submission(BackendKind::Local);
        })
        .await
        .unwrap()
    }

    pub fn attempt(task: &Task) -> AttemptRef {
        AttemptRef {
            task_id: task.id,
            run_id: task.run_id.clone().unwrap(),
            backend: task.backend.unwrap(),
            worker_id: task.worker_id.clone(),
        }
    }

    pub async fn heartbeat(&self, worker_id: &str, queues: &[&str]) {
        self.registry
            .record_heartbeat(&WorkerHeartbeatMessage {
                worker_id: worker_id.to_string(),
                hostname: format!("{worker_id}.local"),
                queues: queues.iter().map(|q| q.to_string()).collect(),
                current_task_count: 0,
                timestamp: self.clock.now(),
            })
            .await
            .unwrap();
    }
}

pub fn message_queue_config() -> MessageQueueConfig {
    MessageQueueConfig::default()
}
