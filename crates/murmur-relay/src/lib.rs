//! Fan-out relay for the murmur broadcast bus, plus the publisher and
//! subscriber ends that talk to it.

pub mod frame;
pub mod publisher;
pub mod relay;
pub mod shutdown;
pub mod subscriber;

pub use publisher::{Delivery, Publisher};
pub use relay::Relay;
pub use subscriber::Subscriber;
