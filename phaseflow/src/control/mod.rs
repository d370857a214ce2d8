//! Run control surface.
//!
//! Pause is cooperative: the coordinator checks the token only at unit
//! boundaries, so an in-flight executor call always finishes.

mod pause;

pub use pause::PauseToken;
