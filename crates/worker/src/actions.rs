use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use orchestrator_domain::{ActionContext, ActionExecutor, ActionOutput, ActionResult, ExecutionFailure};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

/// 按任务 kind 分发到具体的动作执行器
///
/// 未注册的 kind 返回不可重试错误 `unsupported_kind`。
#[derive(Default, Clone)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn ActionExecutor>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置的 `noop` 与 `shell` 动作
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("noop", Arc::new(NoopAction));
        registry.register("shell", Arc::new(ShellAction));
        registry
    }

    pub fn register(&mut self, kind: impl Into<String>, action: Arc<dyn ActionExecutor>) {
        let kind = kind.into();
        info!(kind = %kind, "注册动作执行器");
        self.actions.insert(kind, action);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn ActionExecutor>> {
        self.actions.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<_> = self.actions.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

#[async_trait]
impl ActionExecutor for ActionRegistry {
    async fn execute(&self, ctx: ActionContext) -> ActionResult {
        match self.get(&ctx.kind) {
            Some(action) => action.execute(ctx).await,
            None => {
                warn!(task.id = ctx.task_id, kind = %ctx.kind, "没有对应的动作执行器");
                Err(ExecutionFailure::permanent(
                    "unsupported_kind",
                    format!("不支持的任务类型: {}", ctx.kind),
                ))
            }
        }
    }
}

/// 什么也不做，直接成功
pub struct NoopAction;

#[async_trait]
impl ActionExecutor for NoopAction {
    async fn execute(&self, ctx: ActionContext) -> ActionResult {
        ctx.report_progress(100, None).await;
        Ok(ActionOutput::default())
    }
}

/// Shell 动作参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellParams {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// 运行一个外部命令，stdout/stderr 逐行写入任务日志
///
/// 取消信号到达时终止子进程。非零退出码按可重试错误 `exit_status` 返回，由重试策略决定是否重试。
pub struct ShellAction;

#[async_trait]
impl ActionExecutor for ShellAction {
    async fn execute(&self, ctx: ActionContext) -> ActionResult {
        let params: ShellParams = serde_json::from_value(ctx.payload.clone()).map_err(|e| {
            ExecutionFailure::permanent("invalid_payload", format!("解析Shell任务参数失败: {e}"))
        })?;

        info!(
            task.id = ctx.task_id,
            attempt = ctx.attempt,
            command = %params.command,
            "执行Shell任务"
        );

        let mut cmd = Command::new(&params.command);
        cmd.args(&params.args)
            .envs(&params.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &params.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ExecutionFailure::permanent("spawn_failed", format!("启动Shell命令失败: {e}"))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutionFailure::transient("io", "无法获取stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecutionFailure::transient("io", "无法获取stderr"))?;

        let pump_stdout = async {
            let mut lines = BufReader::new(stdout).lines();
            let mut last = None;
            while let Ok(Some(line)) = lines.next_line().await {
                ctx.log(line.clone()).await;
                last = Some(line);
            }
            last
        };
        let pump_stderr = async {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                ctx.log(format!("[stderr] {line}")).await;
            }
        };

        let run = async {
            let (last_line, _) = tokio::join!(pump_stdout, pump_stderr);
            (child.wait().await, last_line)
        };

        let (status, last_line) = tokio::select! {
            _ = ctx.cancellation.cancelled() => {
                warn!(task.id = ctx.task_id, "Shell任务被取消，终止子进程");
                return Err(ExecutionFailure::permanent("cancelled", "执行被取消"));
            }
            result = run => result,
        };

        let status = status.map_err(|e| {
            ExecutionFailure::transient("io", format!("等待进程结束失败: {e}"))
        })?;

        if status.success() {
            Ok(ActionOutput { output: last_line })
        } else {
            Err(ExecutionFailure::transient(
                "exit_status",
                format!("命令执行失败，退出码: {:?}", status.code()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use orchestrator_domain::ProgressSink;
    use tokio_util::sync::CancellationToken;

    use super::*;

    #[derive(Default)]
    struct CollectingSink {
        lines: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProgressSink for CollectingSink {
        async fn log(&self, message: String) {
            self.lines.lock().unwrap().push(message);
        }

        async fn progress(&self, _percent: u8, _message: Option<String>) {}
    }

    fn context(kind: &str, payload: serde_json::Value, sink: Arc<CollectingSink>) -> ActionContext {
        ActionContext {
            task_id: 1,
            kind: kind.to_string(),
            payload,
            attempt: 1,
            cancellation: CancellationToken::new(),
            progress: sink,
        }
    }

    #[tokio::test]
    async fn unknown_kind_is_permanent_failure() {
        let registry = ActionRegistry::with_builtin();
        let sink = Arc::new(CollectingSink::default());

        let err = registry
            .execute(context("terraform", serde_json::Value::Null, sink))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.kind, "unsupported_kind");
        assert_eq!(registry.kinds(), vec!["noop", "shell"]);
    }

    #[tokio::test]
    async fn shell_payload_must_name_a_command() {
        let sink = Arc::new(CollectingSink::default());
        let err = ShellAction
            .execute(context("shell", serde_json::json!({"args": []}), sink))
            .await
            .unwrap_err();
        assert_eq!(err.kind, "invalid_payload");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_streams_output_into_logs() {
        let sink = Arc::new(CollectingSink::default());
        let output = ShellAction
            .execute(context(
                "shell",
                serde_json::json!({"command": "sh", "args": ["-c", "echo one; echo two"]}),
                sink.clone(),
            ))
            .await
            .unwrap();

        assert_eq!(output.output.as_deref(), Some("two"));
        assert_eq!(*sink.lines.lock().unwrap(), vec!["one", "two"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_non_zero_exit_is_retryable() {
        let sink = Arc::new(CollectingSink::default());
        let err = ShellAction
            .execute(context(
                "shell",
                serde_json::json!({"command": "sh", "args": ["-c", "exit 3"]}),
                sink,
            ))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.kind, "exit_status");
    }
}
