//! Turn orchestration for Taleweaver.
//!
//! Drives the five-phase narrative pipeline across cooperating agents,
//! raises decision points that suspend a session until a human answers,
//! and publishes every state transition on the event bus.

pub mod application;
pub mod domain;
