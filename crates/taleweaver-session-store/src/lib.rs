//! Taleweaver session store.
//!
//! Holds the current state of every orchestration session in memory and
//! serializes all writes through optimistic compare-and-swap.

pub mod memory_session_store;

pub use memory_session_store::InMemorySessionStore;
