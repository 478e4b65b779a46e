pub mod database;
pub mod event_bus;
pub mod in_memory_queue;
pub mod in_memory_store;
pub mod message_queue;
pub mod message_queue_factory;
pub mod observability;
pub mod rate_limiter;

pub use database::*;
pub use event_bus::{EventBus, EventSubscriber};
pub use in_memory_queue::{InMemoryMessageQueue, InMemoryQueueConfig};
pub use in_memory_store::{
    InMemoryControlActionRepository, InMemoryTaskRepository, InMemoryWorkerRepository,
};
pub use message_queue::RabbitMQMessageQueue;
pub use message_queue_factory::MessageQueueFactory;
pub use observability::*;
pub use rate_limiter::RateLimiter;
