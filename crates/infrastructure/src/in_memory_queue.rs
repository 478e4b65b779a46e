use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{Message, MessageQueue};
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tracing::{debug, info};

/// 内存消息队列实现
///
/// 使用 Tokio channels 模拟代理，供单进程部署（调度器与Worker运行在同一进程）和测试使用。
/// 每个队列用信号量限制容量，写满时发布失败而不是无限堆积。
#[derive(Debug)]
pub struct InMemoryMessageQueue {
    queues: RwLock<HashMap<String, QueueChannels>>,
    config: InMemoryQueueConfig,
}

#[derive(Debug)]
struct QueueChannels {
    sender: mpsc::UnboundedSender<Message>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
    size: Arc<AtomicU32>,
    capacity: Arc<Semaphore>,
}

#[derive(Debug, Clone)]
pub struct InMemoryQueueConfig {
    /// 单个队列的最大消息数
    pub max_queue_size: usize,
    /// 单次消费最多取出的消息数
    pub max_batch_size: usize,
}

impl Default for InMemoryQueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
            max_batch_size: 64,
        }
    }
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::with_config(InMemoryQueueConfig::default())
    }

    pub fn with_config(config: InMemoryQueueConfig) -> Self {
        info!("创建内存消息队列: {:?}", config);
        Self {
            queues: RwLock::new(HashMap::new()),
            config,
        }
    }

    async fn ensure_queue(&self, queue: &str) {
        if self.queues.read().await.contains_key(queue) {
            return;
        }

        let mut queues = self.queues.write().await;
        queues.entry(queue.to_string()).or_insert_with(|| {
            debug!("创建队列: {}", queue);
            let (sender, receiver) = mpsc::unbounded_channel();
            QueueChannels {
                sender,
                receiver: Arc::new(Mutex::new(receiver)),
                size: Arc::new(AtomicU32::new(0)),
                capacity: Arc::new(Semaphore::new(self.config.max_queue_size)),
            }
        });
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> OrchestratorResult<()> {
        self.ensure_queue(queue).await;

        let queues = self.queues.read().await;
        let channels = queues
            .get(queue)
            .ok_or_else(|| OrchestratorError::MessageQueue(format!("队列 {queue} 不存在")))?;

        let permit = channels
            .capacity
            .try_acquire()
            .map_err(|_| OrchestratorError::MessageQueue(format!("队列 {queue} 已满")))?;

        channels.sender.send(message.clone()).map_err(|e| {
            OrchestratorError::MessageQueue(format!("发布消息到队列 {queue} 失败: {e}"))
        })?;

        // 许可在消息被消费时归还
        permit.forget();
        channels.size.fetch_add(1, Ordering::Relaxed);

        debug!("消息 {} 已发布到队列: {}", message.id, queue);
        Ok(())
    }

    async fn consume_messages(&self, queue: &str) -> OrchestratorResult<Vec<Message>> {
        self.consume_up_to(queue, self.config.max_batch_size).await
    }

    async fn consume_up_to(&self, queue: &str, max: usize) -> OrchestratorResult<Vec<Message>> {
        self.ensure_queue(queue).await;

        let (receiver, size, capacity) = {
            let queues = self.queues.read().await;
            let channels = queues
                .get(queue)
                .ok_or_else(|| OrchestratorError::MessageQueue(format!("队列 {queue} 不存在")))?;
            (
                channels.receiver.clone(),
                channels.size.clone(),
                channels.capacity.clone(),
            )
        };

        let mut messages = Vec::new();
        {
            let mut rx = receiver.lock().await;
            while messages.len() < max.min(self.config.max_batch_size) {
                match rx.try_recv() {
                    Ok(message) => messages.push(message),
                    Err(_) => break,
                }
            }
        }

        if !messages.is_empty() {
            let count = messages.len();
            size.fetch_sub(count as u32, Ordering::Relaxed);
            capacity.add_permits(count);
            debug!("从队列 {} 消费 {} 条消息", queue, count);
        }
        Ok(messages)
    }

    async fn create_queue(&self, queue: &str, durable: bool) -> OrchestratorResult<()> {
        debug!("声明队列 {} (durable: {})", queue, durable);
        self.ensure_queue(queue).await;
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> OrchestratorResult<u32> {
        Ok(self
            .queues
            .read()
            .await
            .get(queue)
            .map(|channels| channels.size.load(Ordering::Relaxed))
            .unwrap_or(0))
    }

    async fn purge_queue(&self, queue: &str) -> OrchestratorResult<()> {
        let mut total = 0;
        loop {
            let drained = self.consume_messages(queue).await?.len();
            if drained == 0 {
                break;
            }
            total += drained;
        }
        info!("队列 {} 已清空，丢弃 {} 条消息", queue, total);
        Ok(())
    }
}
