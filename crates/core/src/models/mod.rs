//! Data models for Fractal

mod contact;
mod election;
mod reminder;
mod room;

pub use contact::*;
pub use election::*;
pub use reminder::*;
pub use room::*;
