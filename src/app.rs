use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator_api::{create_app, AppState};
use orchestrator_core::{AppConfig, Clock, SystemClock};
use orchestrator_dispatcher::{
    AttemptCoordinator, BackendSupervisor, RecoveryService, RetryPolicyRegistry, Scheduler,
    StateListener, SubmissionService, TaskController, TaskLifecycle, WorkerFailureDetector,
    WorkerRegistry,
};
use orchestrator_domain::{ActionExecutor, ExecutionBackend, MessageQueue, TaskRepository};
use orchestrator_infrastructure::{
    install_prometheus_recorder, DatabaseManager, EventBus, MessageQueueFactory,
    MetricsCollector, RateLimiter,
};
use orchestrator_worker::{ActionRegistry, DistributedBackend, LocalExecutor, WorkerRuntime};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 编排核心：准入、状态监听、恢复
    Dispatcher,
    /// 仅运行远程Worker
    Worker,
    /// 仅运行API服务器
    Api,
    /// 同一进程内运行全部组件
    All,
}

impl AppMode {
    fn needs_core(self) -> bool {
        self != AppMode::Worker
    }
}

impl FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dispatcher" => Ok(AppMode::Dispatcher),
            "worker" => Ok(AppMode::Worker),
            "api" => Ok(AppMode::Api),
            "all" => Ok(AppMode::All),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {s}")),
        }
    }
}

/// 组装好的编排核心
pub struct Orchestrator {
    pub database: Arc<DatabaseManager>,
    pub tasks: Arc<dyn TaskRepository>,
    pub events: EventBus,
    pub lifecycle: Arc<TaskLifecycle>,
    pub registry: Arc<WorkerRegistry>,
    pub supervisor: Arc<BackendSupervisor>,
    pub scheduler: Arc<Scheduler>,
    pub recovery: Arc<RecoveryService>,
    pub controller: Arc<TaskController>,
    pub submissions: Arc<SubmissionService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub listener: Option<Arc<StateListener>>,
    pub detector: Arc<WorkerFailureDetector>,
    pub local: Option<Arc<LocalExecutor>>,
}

impl Orchestrator {
    async fn build(
        config: &AppConfig,
        message_queue: Option<Arc<dyn MessageQueue>>,
    ) -> Result<Self> {
        let database = Arc::new(
            DatabaseManager::new(&config.database)
                .await
                .context("初始化Job Store失败")?,
        );
        let tasks = database.task_repository();

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let metrics = Arc::new(MetricsCollector::new());
        let events = EventBus::new(config.events.channel_capacity);

        let lifecycle = Arc::new(TaskLifecycle::new(
            tasks.clone(),
            events.clone(),
            clock.clone(),
            metrics.clone(),
        ));
        let registry = Arc::new(WorkerRegistry::new(
            database.worker_repository(),
            clock.clone(),
            metrics.clone(),
            config.worker.heartbeat_stale_seconds,
        ));
        let policies = Arc::new(RetryPolicyRegistry::new(&config.retry));
        let coordinator = Arc::new(AttemptCoordinator::new(
            lifecycle.clone(),
            policies.clone(),
            metrics.clone(),
        ));

        let actions: Arc<dyn ActionExecutor> = Arc::new(ActionRegistry::with_builtin());
        let local = if config.local_executor.enabled {
            Some(Arc::new(LocalExecutor::new(
                coordinator.clone(),
                actions,
                &config.local_executor,
            )))
        } else {
            None
        };
        let distributed = message_queue.clone().map(|mq| {
            Arc::new(DistributedBackend::new(mq, config.message_queue.clone()))
                as Arc<dyn ExecutionBackend>
        });

        let supervisor = Arc::new(BackendSupervisor::new(
            distributed,
            local.clone().map(|l| l as Arc<dyn ExecutionBackend>),
            registry.clone(),
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
            database.control_action_repository(),
            supervisor.clone(),
            rate_limiter.clone(),
            metrics.clone(),
        ));
        let submissions = Arc::new(SubmissionService::new(
            lifecycle.clone(),
            policies,
            rate_limiter.clone(),
            &config.scheduler,
        ));
        let listener = message_queue.map(|mq| {
            Arc::new(StateListener::new(
                mq,
                coordinator.clone(),
                registry.clone(),
                config.message_queue.clone(),
            ))
        });
        let detector = Arc::new(WorkerFailureDetector::new(
            registry.clone(),
            config.worker.failure_detection_interval_seconds,
        ));

        Ok(Self {
            database,
            tasks,
            events,
            lifecycle,
            registry,
            supervisor,
            scheduler,
            recovery,
            controller,
            submissions,
            rate_limiter,
            listener,
            detector,
            local,
        })
    }

    fn api_state(&self, metrics: Option<PrometheusHandle>) -> AppState {
        AppState {
            tasks: self.tasks.clone(),
            submissions: self.submissions.clone(),
            controller: self.controller.clone(),
            registry: self.registry.clone(),
            supervisor: self.supervisor.clone(),
            events: self.events.clone(),
            metrics,
        }
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    message_queue: Option<Arc<dyn MessageQueue>>,
    core: Option<Orchestrator>,
    metrics_handle: Option<PrometheusHandle>,
}

impl Application {
    /// 创建新的应用实例
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let message_queue = MessageQueueFactory::create(&config.message_queue)
            .await
            .context("连接消息代理失败")?;

        if mode == AppMode::Worker && message_queue.is_none() {
            return Err(anyhow::anyhow!("Worker模式需要启用消息代理"));
        }

        let core = if mode.needs_core() {
            Some(Orchestrator::build(&config, message_queue.clone()).await?)
        } else {
            None
        };

        let serves_api = matches!(mode, AppMode::Api | AppMode::All) && config.api.enabled;
        let metrics_handle = if serves_api && config.observability.metrics_enabled {
            match install_prometheus_recorder() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("Prometheus指标导出不可用: {e}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            config,
            mode,
            message_queue,
            core,
            metrics_handle,
        })
    }

    pub fn mode(&self) -> AppMode {
        self.mode
    }

    /// Worker模式下为空
    pub fn core(&self) -> Option<&Orchestrator> {
        self.core.as_ref()
    }

    fn require_core(&self) -> Result<&Orchestrator> {
        self.core
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("当前模式未初始化编排核心"))
    }

    /// 运行应用程序，直到 `shutdown` 被触发
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        let maintenance = shutdown.child_token();
        let pruner = self.core.as_ref().map(|core| {
            tokio::spawn(Arc::clone(&core.rate_limiter).run(maintenance.clone()))
        });

        let result = match self.mode {
            AppMode::Dispatcher => self.run_dispatcher(shutdown).await,
            AppMode::Worker => self.run_worker(shutdown).await,
            AppMode::Api => self.run_api(shutdown).await,
            AppMode::All => self.run_all_components(shutdown).await,
        };

        maintenance.cancel();
        if let Some(handle) = pruner {
            if let Err(e) = handle.await {
                error!("限流清理任务异常退出: {e}");
            }
        }
        if let Some(core) = &self.core {
            core.database.close().await;
        }
        result
    }

    /// 运行编排核心
    async fn run_dispatcher(&self, shutdown: CancellationToken) -> Result<()> {
        let core = self.require_core()?;
        info!("启动Dispatcher服务");

        let report = core
            .recovery
            .recover_on_startup()
            .await
            .context("启动恢复失败")?;
        info!(
            retried = report.retried,
            failed = report.failed,
            skipped = report.skipped,
            "启动恢复完成"
        );

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        if self.config.scheduler.enabled {
            handles.push(tokio::spawn(
                Arc::clone(&core.scheduler).run(shutdown.child_token()),
            ));
        }
        if self.config.recovery.enabled {
            handles.push(tokio::spawn(
                Arc::clone(&core.recovery).run(shutdown.child_token()),
            ));
        }
        if let Some(listener) = &core.listener {
            handles.push(tokio::spawn(
                Arc::clone(listener).run(shutdown.child_token()),
            ));
        }
        handles.push(tokio::spawn(
            Arc::clone(&core.detector).run(shutdown.child_token()),
        ));

        shutdown.cancelled().await;
        info!("Dispatcher收到关闭信号");

        for handle in handles {
            if let Err(e) = handle.await {
                error!("后台任务异常退出: {e}");
            }
        }
        if let Some(local) = &core.local {
            local.shutdown().await;
        }

        info!("Dispatcher服务已停止");
        Ok(())
    }

    /// 运行Worker模式
    async fn run_worker(&self, shutdown: CancellationToken) -> Result<()> {
        let message_queue = self
            .message_queue
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Worker模式需要启用消息代理"))?;
        info!("启动Worker服务: {}", self.config.worker.worker_id);

        let runtime = Arc::new(WorkerRuntime::new(
            self.config.worker.clone(),
            self.config.message_queue.clone(),
            message_queue,
            Arc::new(ActionRegistry::with_builtin()),
        ));
        runtime.run(shutdown).await;

        info!("Worker服务已停止");
        Ok(())
    }

    /// 运行API模式
    async fn run_api(&self, shutdown: CancellationToken) -> Result<()> {
        let core = self.require_core()?;
        let app = create_app(
            core.api_state(self.metrics_handle.clone()),
            self.config.api.cors_enabled,
        );

        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;
        info!("API服务器启动在 http://{}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("API服务器运行失败")?;

        info!("API服务器已停止");
        Ok(())
    }

    /// 运行所有组件；同一进程内的Worker与编排核心共用一个代理连接
    async fn run_all_components(&self, shutdown: CancellationToken) -> Result<()> {
        info!("启动所有组件");

        // 任一组件失败都让其余组件一起退出
        let supervise = |name: &'static str, result: Result<()>| {
            if let Err(e) = &result {
                error!("{name}运行失败: {e:#}");
                shutdown.cancel();
            }
            result
        };

        let dispatcher = async {
            supervise("Dispatcher", self.run_dispatcher(shutdown.child_token()).await)
        };
        let worker = async {
            if self.config.worker.enabled && self.message_queue.is_some() {
                supervise("Worker", self.run_worker(shutdown.child_token()).await)
            } else {
                Ok(())
            }
        };
        let api = async {
            if self.config.api.enabled {
                supervise("API", self.run_api(shutdown.child_token()).await)
            } else {
                Ok(())
            }
        };

        let (dispatcher, worker, api) = tokio::join!(dispatcher, worker, api);
        dispatcher?;
        worker?;
        api?;

        info!("所有组件已停止");
        Ok(())
    }
}
