mod in_memory_log_store;
mod redis_log_store;
mod traits;
mod types;

pub use in_memory_log_store::*;
pub use redis_log_store::*;
pub use traits::*;
pub use types::*;
