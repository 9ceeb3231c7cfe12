pub mod circuit;
pub mod idempotency;
pub mod live;
pub mod nonce;
pub mod retry;
pub mod router;
pub mod simulated;

pub use circuit::{CircuitBreaker, CircuitOpenError, CircuitState, ExecutionPermit};
pub use idempotency::{Admission, IdempotencyRegistry, IdempotencyStatus};
pub use live::LiveExecutor;
pub use nonce::NonceManager;
pub use retry::{classify_error_text, is_retryable, RetryPolicy};
pub use router::{ExecutionRouter, Executor};
pub use simulated::SimulatedExecutor;
