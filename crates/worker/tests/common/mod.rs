#![allow(dead_code)]

use std::sync::Arc;

use orchestrator_core::config::{
    LocalExecutorConfig, MessageQueueConfig, RateLimitConfig, RecoveryConfig, RetryConfig,
    RetryPolicyConfig, SchedulerConfig, WorkerConfig,
};
use orchestrator_dispatcher::{
    AttemptCoordinator, BackendSupervisor, RecoveryService, RetryPolicyRegistry, Scheduler,
    StateListener, SubmissionService, TaskController, TaskLifecycle, WorkerRegistry,
};
use orchestrator_domain::{ActionExecutor, ExecutionBackend, ExecutionReporter};
use orchestrator_infrastructure::{
    EventBus, InMemoryControlActionRepository, InMemoryMessageQueue, InMemoryTaskRepository,
    InMemoryWorkerRepository, MetricsCollector, RateLimiter,
};
use orchestrator_testing_utils::ManualClock;
use orchestrator_worker::{DistributedBackend, LocalExecutor, WorkerRuntime};

/// 不等待退避的重试策略
pub fn immediate_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        default_policy: RetryPolicyConfig {
            max_retries,
            base_delay_seconds: 0.0,
            backoff_multiplier: 1.0,
            max_delay_seconds: 0.0,
            retryable_error_kinds: Vec::new(),
        },
        ..RetryConfig::default()
    }
}

pub struct StackOptions {
    pub retry: RetryConfig,
    pub local_concurrency: usize,
    pub scheduler: SchedulerConfig,
}

impl Default for StackOptions {
    fn default() -> Self {
        Self {
            retry: immediate_retry(3),
            local_concurrency: 2,
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// 编排核心加真实执行器
pub struct Stack {
    pub clock: Arc<ManualClock>,
    pub tasks: Arc<InMemoryTaskRepository>,
    pub registry: Arc<WorkerRegistry>,
    pub coordinator: Arc<AttemptCoordinator>,
    pub supervisor: Arc<BackendSupervisor>,
    pub scheduler: Arc<Scheduler>,
    pub recovery: Arc<RecoveryService>,
    pub controller: Arc<TaskController>,
    pub submissions: Arc<SubmissionService>,
    pub local: Arc<LocalExecutor>,
    pub queue: Arc<InMemoryMessageQueue>,
    pub queue_config: MessageQueueConfig,
    pub listener: Arc<StateListener>,
}

impl Stack {
    pub fn new(actions: Arc<dyn ActionExecutor>, options: StackOptions) -> Self {
        let clock = Arc::new(ManualClock::default());
        let tasks = Arc::new(InMemoryTaskRepository::new());
        let metrics = Arc::new(MetricsCollector::new());
        let lifecycle = Arc::new(TaskLifecycle::new(
            tasks.clone(),
            EventBus::new(256),
            clock.clone(),
            metrics.clone(),
        ));
        let registry = Arc::new(WorkerRegistry::new(
            Arc::new(InMemoryWorkerRepository::new()),
            clock.clone(),
            metrics.clone(),
            90,
        ));
        let policies = Arc::new(RetryPolicyRegistry::new(&options.retry));
        let coordinator = Arc::new(AttemptCoordinator::new(
            lifecycle.clone(),
            policies.clone(),
            metrics.clone(),
        ));

        let local = Arc::new(LocalExecutor::new(
            coordinator.clone() as Arc<dyn ExecutionReporter>,
            actions,
            &LocalExecutorConfig {
                enabled: true,
                concurrency: options.local_concurrency,
            },
        ));
        let queue = Arc::new(InMemoryMessageQueue::new());
        let queue_config = MessageQueueConfig::default();
        let distributed = Arc::new(DistributedBackend::new(queue.clone(), queue_config.clone()));

        let supervisor = Arc::new(BackendSupervisor::new(
            Some(distributed as Arc<dyn ExecutionBackend>),
            Some(local.clone() as Arc<dyn ExecutionBackend>),
            registry.clone(),
            metrics.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            lifecycle.clone(),
            supervisor.clone(),
            registry.clone(),
            metrics.clone(),
            &options.scheduler,
        ));
        let recovery = Arc::new(RecoveryService::new(
            lifecycle.clone(),
            supervisor.clone(),
            metrics.clone(),
            RecoveryConfig::default(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(
            &RateLimitConfig {
                enabled: false,
                max_requests_per_minute: 60,
            },
            clock.clone(),
        ));
        let controller = Arc::new(TaskController::new(
            lifecycle.clone(),
            Arc::new(InMemoryControlActionRepository::new()),
            supervisor.clone(),
            rate_limiter.clone(),
            metrics.clone(),
        ));
        let submissions = Arc::new(SubmissionService::new(
            lifecycle,
            policies,
            rate_limiter,
            &options.scheduler,
        ));
        let listener = Arc::new(StateListener::new(
            queue.clone(),
            coordinator.clone(),
            registry.clone(),
            queue_config.clone(),
        ));

        Self {
            clock,
            tasks,
            registry,
            coordinator,
            supervisor,
            scheduler,
            recovery,
            controller,
            submissions,
            local,
            queue,
            queue_config,
            listener,
        }
    }

    pub fn worker(&self, worker_id: &str, actions: Arc<dyn ActionExecutor>) -> WorkerRuntime {
        WorkerRuntime::new(
            WorkerConfig {
                enabled: true,
                worker_id: worker_id.to_string(),
                hostname: format!("{worker_id}.local"),
                queues: vec!["default".to_string()],
                max_concurrent_tasks: 2,
                ..WorkerConfig::default()
            },
            self.queue_config.clone(),
            self.queue.clone(),
            actions,
        )
    }
}
