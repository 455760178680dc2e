pub mod engine;
pub mod service;

pub use engine::{DeliveryEngine, DeliveryEngineParts, DeliveryError, EngineState, TickReport};
pub use service::{
    Pipeline, PipelineConfig, PipelineError, ShutdownPolicy, ShutdownReport,
};
