use futures::Stream;
use orchestrator_domain::{EventFilter, TaskEvent};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// 进程内事件总线
///
/// 发布方在状态持久化之后调用 [`EventBus::publish`]，不等待订阅者。
/// 同一发布者按顺序发送，因此单个任务的事件顺序与写入顺序一致。
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 没有订阅者时事件直接丢弃
    pub fn publish(&self, event: TaskEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                debug!("没有事件订阅者, 丢弃事件: 任务 {}", event.task_id);
                0
            }
        }
    }

    pub fn subscribe(&self, filter: EventFilter) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
            filter,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

pub struct EventSubscriber {
    receiver: broadcast::Receiver<TaskEvent>,
    filter: EventFilter,
}

impl EventSubscriber {
    /// 等待下一个匹配的事件；总线关闭时返回 None
    ///
    /// 落后太多的订阅者会丢失部分事件，需要从 Job Store 重新读取状态。
    pub async fn recv(&mut self) -> Option<TaskEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("事件订阅者处理过慢，跳过 {} 条事件", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// 非阻塞读取，当前没有匹配事件时返回 None
    pub fn try_recv(&mut self) -> Option<TaskEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("事件订阅者处理过慢，跳过 {} 条事件", skipped);
                }
                Err(_) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = TaskEvent> + Send {
        futures::stream::unfold(self, |mut subscriber| async move {
            subscriber.recv().await.map(|event| (event, subscriber))
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use futures::StreamExt;
    use orchestrator_domain::TaskStatus;

    use super::*;

    fn changed(task_id: i64, new_status: TaskStatus) -> TaskEvent {
        TaskEvent::status_changed(task_id, None, new_status, None, Utc::now())
    }

    #[tokio::test]
    async fn subscribers_only_see_matching_tasks_in_order() {
        let bus = EventBus::new(16);
        let mut only_one = bus.subscribe(EventFilter::Task(1));
        let mut everything = bus.subscribe(EventFilter::All);

        bus.publish(changed(1, TaskStatus::Queued));
        bus.publish(changed(2, TaskStatus::Queued));
        bus.publish(changed(1, TaskStatus::Running));

        assert_eq!(only_one.recv().await.unwrap().new_status(), Some(TaskStatus::Queued));
        assert_eq!(only_one.recv().await.unwrap().new_status(), Some(TaskStatus::Running));
        assert!(only_one.try_recv().is_none());

        let ids: Vec<i64> = (0..3).map(|_| everything.try_recv().unwrap().task_id).collect();
        assert_eq!(ids, vec![1, 2, 1]);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_harmless() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(changed(1, TaskStatus::Queued)), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_ahead() {
        let bus = EventBus::new(2);
        let mut subscriber = bus.subscribe(EventFilter::All);
        for id in 1..=5 {
            bus.publish(changed(id, TaskStatus::Queued));
        }
        assert_eq!(subscriber.recv().await.unwrap().task_id, 4);
    }

    #[tokio::test]
    async fn subscriber_as_stream() {
        let bus = EventBus::new(8);
        let stream = bus.subscribe(EventFilter::Task(7)).into_stream();
        bus.publish(changed(7, TaskStatus::Cancelled));
        drop(bus);

        let events: Vec<TaskEvent> = stream.collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].new_status(), Some(TaskStatus::Cancelled));
    }
}
