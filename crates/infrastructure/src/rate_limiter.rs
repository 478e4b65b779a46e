use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::Clock as GovernorClock;
use governor::middleware::NoOpMiddleware;
use governor::nanos::Nanos;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::Quota;
use orchestrator_core::config::RateLimitConfig;
use orchestrator_core::{Clock, OrchestratorError, OrchestratorResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 空闲操作者状态的清理周期
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// 让 GCRA 使用编排核心的时钟，测试中随手动时钟推进
#[derive(Debug, Clone)]
struct LimiterClock(Arc<dyn Clock>);

impl GovernorClock for LimiterClock {
    type Instant = Nanos;

    fn now(&self) -> Nanos {
        let since_epoch = self.0.now().timestamp_nanos_opt().unwrap_or(0).max(0) as u64;
        Nanos::from(Duration::from_nanos(since_epoch))
    }
}

type KeyedLimiter = governor::RateLimiter<
    String,
    DefaultKeyedStateStore<String>,
    LimiterClock,
    NoOpMiddleware<Nanos>,
>;

/// 按操作者限流，配额为每分钟 `max_requests_per_minute` 次并允许同等突发
pub struct RateLimiter {
    enabled: bool,
    clock: LimiterClock,
    limiter: KeyedLimiter,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let per_minute =
            NonZeroU32::new(config.max_requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let clock = LimiterClock(clock);
        let limiter = governor::RateLimiter::new(
            Quota::per_minute(per_minute),
            DefaultKeyedStateStore::default(),
            clock.clone(),
        );
        Self {
            enabled: config.enabled,
            clock,
            limiter,
        }
    }

    /// 计入一次请求；超过限制时返回 [`OrchestratorError::RateLimited`]
    pub async fn check(&self, actor_id: &str) -> OrchestratorResult<()> {
        if !self.enabled {
            return Ok(());
        }

        let key = actor_id.to_string();
        match self.limiter.check_key(&key) {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(GovernorClock::now(&self.clock));
                let retry_after_secs = wait.as_secs_f64().ceil().max(1.0) as u64;
                warn!(
                    actor.id = actor_id,
                    retry_after_secs, "操作者超过频率限制"
                );
                Err(OrchestratorError::RateLimited {
                    actor_id: key,
                    retry_after_secs,
                })
            }
        }
    }

    /// 丢弃已经恢复满配额的操作者状态
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    pub fn tracked_actors(&self) -> usize {
        self.limiter.len()
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        if !self.enabled {
            return;
        }
        info!("限流状态清理已启动");
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.prune();
                    debug!(actors = self.tracked_actors(), "清理限流状态");
                }
            }
        }
        info!("限流状态清理已停止");
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use orchestrator_core::ManualClock;

    use super::*;

    fn limiter(limit: u32, clock: Arc<ManualClock>) -> RateLimiter {
        RateLimiter::new(
            &RateLimitConfig {
                enabled: true,
                max_requests_per_minute: limit,
            },
            clock,
        )
    }

    #[tokio::test]
    async fn limit_is_per_actor_and_replenishes_over_time() {
        let clock = Arc::new(ManualClock::default());
        let limiter = limiter(2, clock.clone());

        limiter.check("alice").await.unwrap();
        limiter.check("alice").await.unwrap();
        let err = limiter.check("alice").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::RateLimited { retry_after_secs: 30, .. }
        ));
        limiter.check("bob").await.unwrap();

        clock.advance(ChronoDuration::seconds(30));
        limiter.check("alice").await.unwrap();
        assert!(limiter.check("alice").await.is_err());
    }

    #[tokio::test]
    async fn disabled_limiter_allows_everything() {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::new(
            &RateLimitConfig {
                enabled: false,
                max_requests_per_minute: 0,
            },
            clock,
        );
        for _ in 0..10 {
            limiter.check("alice").await.unwrap();
        }
    }

    #[tokio::test]
    async fn prune_forgets_idle_actors() {
        let clock = Arc::new(ManualClock::default());
        let limiter = limiter(1, clock.clone());
        limiter.check("alice").await.unwrap();
        limiter.check("bob").await.unwrap();
        assert_eq!(limiter.tracked_actors(), 2);

        clock.advance(ChronoDuration::minutes(2));
        limiter.prune();
        assert_eq!(limiter.tracked_actors(), 0);
    }
}
