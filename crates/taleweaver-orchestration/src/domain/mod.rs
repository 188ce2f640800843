//! Pure domain logic: session state machine, agent casting, reply
//! interpretation, and decision detection.

pub mod detector;
pub mod phase_result;
pub mod prompt;
pub mod reply;
pub mod roster;
pub mod session;
