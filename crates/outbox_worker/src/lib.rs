pub mod domain;
pub mod outbox;
pub mod outbox_worker;

pub use domain::*;
pub use outbox::*;
pub use outbox_worker::*;
