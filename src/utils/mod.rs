pub mod isolation;
pub use isolation::{extract_panic_message, run_isolated};
pub mod work_pool;
pub use work_pool::{WorkerPool, WorkerPoolError, WorkerPoolResult, WorkerPoolStats};
