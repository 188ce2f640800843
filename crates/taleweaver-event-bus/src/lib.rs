//! Taleweaver event bus.
//!
//! Fans out orchestration events to any number of subscribers per session.
//! Each subscriber reads from its own bounded queue; a subscriber that falls
//! behind loses its oldest unread events and is told so with a gap marker.
//! Publishing never blocks.

pub mod bus;
pub mod subscription;

pub use bus::{DEFAULT_CAPACITY, EventBus};
pub use subscription::EventSubscription;
