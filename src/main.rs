use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use orchestrator::shutdown::wait_for_shutdown_signal;
use orchestrator::{AppMode, Application, ShutdownManager};
use orchestrator_core::AppConfig;
use orchestrator_infrastructure::{init_logging, LogFormat};
use tracing::{error, info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// 部署任务编排引擎
#[derive(Debug, Parser)]
#[command(name = "orchestrator", version, about = "部署任务编排引擎")]
struct Cli {
    /// 配置文件路径，未指定时按默认路径查找
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 运行模式
    #[arg(
        short,
        long,
        value_name = "MODE",
        value_parser = ["dispatcher", "worker", "api", "all"],
        default_value = "all"
    )]
    mode: String,

    /// Worker ID (仅在worker模式下使用)
    #[arg(long, value_name = "ID", required_if_eq("mode", "worker"))]
    worker_id: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    log_level: Option<String>,

    /// 日志格式
    #[arg(long, value_name = "FORMAT", default_value = "pretty")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).with_context(|| {
        format!(
            "加载配置文件失败: {}",
            cli.config.as_deref().unwrap_or("<默认路径>")
        )
    })?;

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.observability.log_level.clone());
    init_logging(&log_level, cli.log_format).context("初始化日志系统失败")?;

    info!("启动部署任务编排引擎");
    info!("运行模式: {}", cli.mode);

    if let Some(id) = &cli.worker_id {
        info!("Worker ID: {}", id);
        config.worker.worker_id = id.clone();
    }
    if config.worker.hostname == "localhost" {
        if let Some(name) = hostname::get().ok().and_then(|h| h.into_string().ok()) {
            config.worker.hostname = name;
        }
    }
    config.validate()?;

    let app_mode = parse_app_mode(&cli.mode, &config)?;
    let app = Arc::new(Application::new(config, app_mode).await?);

    let shutdown_manager = ShutdownManager::new();
    let mut app_handle = {
        let app = Arc::clone(&app);
        let shutdown = shutdown_manager.subscribe();
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
        }
        _ = &mut app_handle => {
            warn!("应用提前退出");
            return Ok(());
        }
    }
    shutdown_manager.shutdown();

    if shutdown_manager
        .wait_with_timeout(app_handle, SHUTDOWN_TIMEOUT)
        .await
    {
        info!("应用已优雅关闭");
    } else {
        warn!("应用关闭超时，强制退出");
    }

    info!("部署任务编排引擎已退出");
    Ok(())
}

/// 解析应用运行模式
fn parse_app_mode(mode_str: &str, config: &AppConfig) -> Result<AppMode> {
    let mode: AppMode = mode_str.parse()?;
    match mode {
        AppMode::Dispatcher if !config.scheduler.enabled => {
            Err(anyhow::anyhow!("Dispatcher模式被禁用，请检查配置"))
        }
        AppMode::Worker if !config.worker.enabled => {
            Err(anyhow::anyhow!("Worker模式被禁用，请检查配置"))
        }
        AppMode::Api if !config.api.enabled => {
            Err(anyhow::anyhow!("API模式被禁用，请检查配置"))
        }
        _ => Ok(mode),
    }
}
