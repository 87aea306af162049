//! Group sizing and room allocation
//!
//! Both computations mirror the election contract exactly. They are pure
//! and never touch storage or the network.

mod allocate;
mod sizing;

pub use allocate::{room_of, RoomLayout};
pub use sizing::{compute_round_sizes, count_rounds, int_root, RoundShape, MAX_PARTICIPANTS};
