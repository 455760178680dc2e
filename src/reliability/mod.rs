pub mod retry;

pub use retry::{RetryBudget, RetryError, RetryPolicy, RetryStrategy};
