//! Shared test doubles and utilities for the Taleweaver engine.

mod clock;
mod generation;
mod publisher;
mod rng;
mod sink;

pub use clock::FixedClock;
pub use generation::{ScriptedGenerationService, ScriptedReply};
pub use publisher::RecordingPublisher;
pub use rng::MockRng;
pub use sink::{FailingNarrativeSink, RecordingNarrativeSink};
