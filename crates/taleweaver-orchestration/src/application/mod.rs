//! Application services that coordinate the domain with the session store,
//! the generation backend, and the event bus.

pub mod coordinator;
pub mod orchestrator;
pub mod pause;
pub(crate) mod persistence;
pub mod settings;
