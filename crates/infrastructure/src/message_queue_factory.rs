use std::sync::Arc;

use orchestrator_core::config::{MessageQueueConfig, MessageQueueType};
use orchestrator_core::OrchestratorResult;
use orchestrator_domain::MessageQueue;
use tracing::info;

use crate::{InMemoryMessageQueue, RabbitMQMessageQueue};

pub struct MessageQueueFactory;

impl MessageQueueFactory {
    /// 按配置创建代理；`disabled` 时返回 None，任务只由本地执行器运行
    pub async fn create(
        config: &MessageQueueConfig,
    ) -> OrchestratorResult<Option<Arc<dyn MessageQueue>>> {
        match config.r#type {
            MessageQueueType::Rabbitmq => {
                info!("初始化RabbitMQ消息队列");
                let rabbitmq = RabbitMQMessageQueue::new(config.clone()).await?;
                Ok(Some(Arc::new(rabbitmq)))
            }
            MessageQueueType::InMemory => {
                info!("初始化内存消息队列");
                Ok(Some(Arc::new(InMemoryMessageQueue::new())))
            }
            MessageQueueType::Disabled => {
                info!("分布式执行已禁用");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_broker_is_absent() {
        let config = MessageQueueConfig {
            r#type: MessageQueueType::Disabled,
            ..MessageQueueConfig::default()
        };
        assert!(MessageQueueFactory::create(&config).await.unwrap().is_none());

        let config = MessageQueueConfig::default();
        let mq = MessageQueueFactory::create(&config).await.unwrap().unwrap();
        assert!(mq.is_healthy().await);
    }
}
