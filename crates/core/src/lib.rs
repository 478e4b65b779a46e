pub mod clock;
pub mod config;
pub mod errors;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::models::AppConfig;
pub use errors::*;
