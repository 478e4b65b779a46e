use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};

/// 时间来源。所有读取“当前时间”的组件都通过它获取，测试中可替换为手动时钟
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动推进的时钟，克隆后共享同一时间
#[derive(Clone)]
pub struct ManualClock {
    current: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(RwLock::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock").field("now", &self.now()).finish()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.read().unwrap_or_else(|e| e.into_inner())
    }
}
