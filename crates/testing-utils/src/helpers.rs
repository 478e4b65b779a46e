//! 测试辅助函数

use std::future::Future;
use std::time::Duration;

use orchestrator_core::OrchestratorResult;
use orchestrator_domain::{Task, TaskRepository, TaskStatus};
use tokio::time::sleep;

pub struct TestEnv;

impl TestEnv {
    /// 轮询直到条件成立或超时
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }

        condition().await
    }

    /// 等待任务进入指定状态，超时返回最后读到的记录
    pub async fn wait_for_status(
        repo: &dyn TaskRepository,
        task_id: i64,
        status: TaskStatus,
        timeout: Duration,
    ) -> OrchestratorResult<Task> {
        let start = std::time::Instant::now();
        loop {
            let task = repo.get_required(task_id).await?;
            if task.status == status || start.elapsed() >= timeout {
                return Ok(task);
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// 绕过状态机直接改写任务，用于构造测试前置状态
    pub async fn force(
        repo: &dyn TaskRepository,
        task: &Task,
        mutate: impl FnOnce(&mut Task),
    ) -> OrchestratorResult<Task> {
        let mut next = task.clone();
        mutate(&mut next);
        repo.update(&next).await
    }
}
