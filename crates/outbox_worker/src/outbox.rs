mod consume_logging;
mod consume_types;
mod consumer;
mod demo_producer;
mod persistence_service;
mod producer;
mod retry_policy;

pub use consume_logging::*;
pub use consume_types::*;
pub use consumer::*;
pub use demo_producer::*;
pub use persistence_service::*;
pub use producer::*;
pub use retry_policy::*;
