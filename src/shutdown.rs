use std::future::Future;
use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 优雅关闭管理器
///
/// 所有后台循环持有同一个令牌的子令牌，触发一次即全部退出。
#[derive(Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅关闭信号
    pub fn subscribe(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// 触发关闭，重复调用无副作用
    pub fn shutdown(&self) {
        if self.token.is_cancelled() {
            debug!("关闭管理器已经触发过关闭");
            return;
        }
        info!("触发系统关闭");
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 等待 `work` 结束，超时返回 false
    pub async fn wait_with_timeout<F>(&self, work: F, timeout: Duration) -> bool
    where
        F: Future,
    {
        match tokio::time::timeout(timeout, work).await {
            Ok(_) => true,
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "等待组件关闭超时");
                false
            }
        }
    }
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_observe_shutdown() {
        let manager = ShutdownManager::new();
        let token = manager.subscribe();
        assert!(!token.is_cancelled());

        manager.shutdown();
        manager.shutdown();

        assert!(manager.is_shutdown());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn wait_with_timeout_reports_overrun() {
        let manager = ShutdownManager::new();
        let finished = manager
            .wait_with_timeout(std::future::pending::<()>(), Duration::from_millis(20))
            .await;
        assert!(!finished);
        assert!(manager.wait_with_timeout(async {}, Duration::from_secs(1)).await);
    }
}
