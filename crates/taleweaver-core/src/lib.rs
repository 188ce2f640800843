//! Taleweaver Core: shared domain abstractions.
//!
//! This crate defines the value types, events, errors, and collaborator
//! traits that every other crate in the engine depends on. It contains no
//! infrastructure code.

pub mod clock;
pub mod decision;
pub mod error;
pub mod event;
pub mod generation;
pub mod model;
pub mod rng;
pub mod sink;
pub mod store;
