pub mod entities;
pub mod events;
pub mod execution;
pub mod lifecycle;
pub mod messaging;
pub mod repositories;
pub mod value_objects;

pub use entities::*;
pub use events::*;
pub use execution::*;
pub use messaging::*;
pub use orchestrator_core::{OrchestratorError, OrchestratorResult};
pub use repositories::*;
pub use value_objects::*;
