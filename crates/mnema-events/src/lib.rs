//! mnema-events
//!
//! In-process publish/subscribe for graph mutation events.
//!
//! Delivery is synchronous: `publish` invokes every matching subscriber on
//! the publisher's thread before returning, so subscriber latency blocks the
//! writer. Keep handlers non-blocking, or hand the payload off to a worker.

pub mod bus;
pub mod event;

pub use bus::{EventBus, SubscriberId};
pub use event::{GraphEvent, Topic};
