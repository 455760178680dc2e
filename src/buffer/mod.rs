pub mod batch;
pub mod queue;
pub mod retry_queue;

pub use batch::{Batch, Batcher};
pub use queue::{BufferConfig, BufferStats, LogBuffer};
pub use retry_queue::RetryQueue;
