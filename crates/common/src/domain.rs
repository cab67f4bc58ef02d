mod envelope;
mod in_memory_message_repository;
mod repository;
mod result;

pub use envelope::*;
pub use in_memory_message_repository::*;
pub use repository::*;
pub use result::*;
