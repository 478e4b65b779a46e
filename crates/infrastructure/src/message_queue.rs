use std::time::Duration;

use async_trait::async_trait;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
    Queue,
};
use orchestrator_core::config::MessageQueueConfig;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{Message, MessageQueue};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 单次消费最多拉取的消息数
const MAX_BATCH: usize = 32;

/// RabbitMQ消息队列实现
pub struct RabbitMQMessageQueue {
    connection: Connection,
    channel: Mutex<Channel>,
    config: MessageQueueConfig,
}

impl RabbitMQMessageQueue {
    pub async fn new(config: MessageQueueConfig) -> OrchestratorResult<Self> {
        let connect = Connection::connect(&config.url, ConnectionProperties::default());
        let connection = tokio::time::timeout(
            Duration::from_secs(config.connection_timeout_seconds),
            connect,
        )
        .await
        .map_err(|_| OrchestratorError::MessageQueue(format!("连接RabbitMQ超时: {}", config.url)))?
        .map_err(|e| OrchestratorError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| OrchestratorError::MessageQueue(format!("创建通道失败: {e}")))?;

        info!("成功连接到RabbitMQ: {}", config.url);

        let queue = Self {
            connection,
            channel: Mutex::new(channel),
            config,
        };
        queue.initialize_queues().await?;
        Ok(queue)
    }

    /// 声明调度器固定使用的队列；任务队列和控制队列按需声明
    async fn initialize_queues(&self) -> OrchestratorResult<()> {
        let channel = self.channel.lock().await;
        Self::declare_queue(&channel, &self.config.status_queue, true).await?;
        Self::declare_queue(&channel, &self.config.heartbeat_queue, true).await?;
        info!("状态队列与心跳队列初始化完成");
        Ok(())
    }

    async fn declare_queue(channel: &Channel, queue_name: &str, durable: bool) -> OrchestratorResult<Queue> {
        let queue = channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                OrchestratorError::MessageQueue(format!("声明队列 {queue_name} 失败: {e}"))
            })?;

        debug!("队列 {} 声明成功", queue_name);
        Ok(queue)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    pub async fn close(&self) -> OrchestratorResult<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| OrchestratorError::MessageQueue(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }

    /// 404 属于通道级异常，代理会关闭当前通道
    async fn reopen_channel(&self, channel: &mut Channel) -> OrchestratorResult<()> {
        *channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| OrchestratorError::MessageQueue(format!("重建通道失败: {e}")))?;
        debug!("RabbitMQ通道已重建");
        Ok(())
    }

    fn is_not_found(error: &lapin::Error) -> bool {
        let message = error.to_string();
        message.contains("NOT_FOUND") || message.contains("404")
    }
}

#[async_trait]
impl MessageQueue for RabbitMQMessageQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> OrchestratorResult<()> {
        let payload = serde_json::to_vec(message)?;
        let channel = self.channel.lock().await;
        // 执行队列与控制队列可能尚未声明
        Self::declare_queue(&channel, queue, true).await?;

        let confirm = channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_message_id(message.id.clone().into()),
            )
            .await
            .map_err(|e| {
                OrchestratorError::MessageQueue(format!("发布消息到队列 {queue} 失败: {e}"))
            })?;

        confirm
            .await
            .map_err(|e| OrchestratorError::MessageQueue(format!("消息发布确认失败: {e}")))?;

        debug!("消息 {} 已发布到队列: {}", message.id, queue);
        Ok(())
    }

    async fn consume_messages(&self, queue: &str) -> OrchestratorResult<Vec<Message>> {
        self.consume_up_to(queue, MAX_BATCH).await
    }

    async fn consume_up_to(&self, queue: &str, max: usize) -> OrchestratorResult<Vec<Message>> {
        let mut channel = self.channel.lock().await;
        let mut messages = Vec::new();

        while messages.len() < max {
            let delivery = match channel.basic_get(queue, BasicGetOptions::default()).await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => break,
                Err(e) if Self::is_not_found(&e) => {
                    debug!("队列 {} 不存在，返回空结果", queue);
                    self.reopen_channel(&mut channel).await?;
                    break;
                }
                Err(e) => {
                    return Err(OrchestratorError::MessageQueue(format!(
                        "从队列 {queue} 获取消息失败: {e}"
                    )))
                }
            };

            channel
                .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
                .await
                .map_err(|e| OrchestratorError::MessageQueue(format!("确认消息失败: {e}")))?;

            // 无法解析的消息确认后丢弃，避免反复投递
            match serde_json::from_slice::<Message>(&delivery.data) {
                Ok(message) => messages.push(message),
                Err(e) => warn!("丢弃无法解析的消息 (队列 {}): {}", queue, e),
            }
        }

        Ok(messages)
    }

    async fn create_queue(&self, queue: &str, durable: bool) -> OrchestratorResult<()> {
        let channel = self.channel.lock().await;
        Self::declare_queue(&channel, queue, durable).await?;
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> OrchestratorResult<u32> {
        let mut channel = self.channel.lock().await;
        let queue_info = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await;

        match queue_info {
            Ok(info) => Ok(info.message_count()),
            Err(e) if Self::is_not_found(&e) => {
                self.reopen_channel(&mut channel).await?;
                Ok(0)
            }
            Err(e) => Err(OrchestratorError::MessageQueue(format!(
                "获取队列 {queue} 信息失败: {e}"
            ))),
        }
    }

    async fn purge_queue(&self, queue: &str) -> OrchestratorResult<()> {
        let channel = self.channel.lock().await;
        channel
            .queue_purge(queue, QueuePurgeOptions::default())
            .await
            .map_err(|e| OrchestratorError::MessageQueue(format!("清空队列 {queue} 失败: {e}")))?;

        debug!("队列 {} 已清空", queue);
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.is_connected()
    }
}
