pub mod broadcast;
pub mod domain;
pub mod log_store;
pub mod nats;
pub mod postgres;

pub use domain::*;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockEnvelopeProducer;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockLiveBroadcaster;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockMessageRepository;
#[cfg(any(test, feature = "testing"))]
pub use log_store::MockLogStore;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockNatsPublisher;
