pub mod api_observability;
pub mod app_config;
pub mod database;
pub mod dispatcher_worker;
pub mod message_queue;
pub mod resilience;

pub use api_observability::{ApiConfig, EventBusConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use dispatcher_worker::{LocalExecutorConfig, QueueConfig, SchedulerConfig, WorkerConfig};
pub use message_queue::{MessageQueueConfig, MessageQueueType};
pub use resilience::{RateLimitConfig, RecoveryConfig, RetryConfig, RetryPolicyConfig};
