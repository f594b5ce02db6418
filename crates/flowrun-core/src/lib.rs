pub mod config;
pub mod error;
pub mod event;
pub mod flow;
pub mod traits;
pub mod types;
pub mod wait;

pub use config::AppConfig;
pub use error::{FlowError, Result};
pub use event::EventBus;
pub use flow::{Edge, FlowDefinition, InputSpec, Node, VariableSpec};
pub use types::*;
pub use wait::{WaitRecord, WaitRecordKey};
