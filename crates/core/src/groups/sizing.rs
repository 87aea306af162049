//! Round count and per-round group sizes

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The contract counts participants in a u16
pub const MAX_PARTICIPANTS: u32 = u16::MAX as u32;

/// Shape of one election round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundShape {
    /// Zero-based round index
    pub round: u8,
    /// Target members per group
    pub group_size: u32,
    /// Groups formed in this round (equals the next round's participants)
    pub group_count: u32,
    /// Participants entering this round
    pub participants: u32,
    /// The chief delegate round
    pub is_final_round: bool,
}

impl RoundShape {
    /// Largest room actually formed when `participants` are spread over
    /// `group_count` rooms
    pub fn max_group_size(&self) -> u32 {
        self.participants.div_ceil(self.group_count)
    }
}

/// Number of rounds needed for `num_participants`
pub fn count_rounds(num_participants: u32) -> u8 {
    let mut rounds = 1u8;
    let mut probe: u64 = 12;
    while probe <= num_participants as u64 {
        probe *= 4;
        rounds += 1;
    }
    rounds
}

fn saturating_pow(base: u64, exp: u32) -> u64 {
    base.checked_pow(exp).unwrap_or(u64::MAX)
}

/// Largest `r` such that `r^k <= n`
pub fn int_root(n: u32, k: u8) -> u32 {
    if k <= 1 || n <= 1 {
        return n;
    }
    let k = k as u32;
    let n = n as u64;
    let mut root = (n as f64).powf(1.0 / k as f64).floor() as u64;
    // Float estimate may be one off near perfect powers
    while saturating_pow(root + 1, k) <= n {
        root += 1;
    }
    while root > 0 && saturating_pow(root, k) > n {
        root -= 1;
    }
    root as u32
}

fn group_sizes(num_participants: u32, rounds: u8) -> Vec<u32> {
    let n = num_participants as f64;
    let r = rounds as usize;
    let basic = int_root(num_participants, rounds);
    let mut sizes = vec![basic; r];

    if basic == 3 {
        for size in sizes.iter_mut().take(r - 1) {
            *size = 4;
        }
        sizes[r - 1] = 3;

        let ratio = n / 4f64.powi(rounds as i32 - 1) / 3.0;
        let fives = ((ratio.ln() / 1.25f64.ln()).floor().max(0.0) as usize).min(r - 1);
        for size in &mut sizes[r - 1 - fives..r - 1] {
            *size = 5;
        }
    } else if basic >= 6 {
        for size in sizes.iter_mut() {
            *size = 6;
        }
        sizes[0] = 5;
        let below_last = saturating_pow(6, rounds as u32 - 1);
        sizes[r - 1] = (num_participants as u64).div_ceil(below_last) as u32;
    } else {
        let b = basic as f64;
        let ratio = n / b.powi(rounds as i32);
        let large = (((ratio.ln() / ((b + 1.0) / b).ln()).floor()).max(0.0) as usize).min(r);
        for size in sizes.iter_mut().take(large) {
            *size = basic + 1;
        }
    }

    sizes
}

/// Compute the shape of every round for `num_participants`.
///
/// Zero participants yields no rounds. Counts above [`MAX_PARTICIPANTS`]
/// cannot come from the contract and are rejected.
pub fn compute_round_sizes(num_participants: u32) -> Result<Vec<RoundShape>> {
    if num_participants == 0 {
        return Ok(Vec::new());
    }
    if num_participants > MAX_PARTICIPANTS {
        return Err(Error::InvalidArgument(format!(
            "{} participants exceeds the contract limit of {}",
            num_participants, MAX_PARTICIPANTS
        )));
    }

    let rounds = count_rounds(num_participants);
    let sizes = group_sizes(num_participants, rounds);

    let mut shapes = Vec::with_capacity(sizes.len());
    let mut next_participants = 1u32;
    for (round, &group_size) in sizes.iter().enumerate().rev() {
        let group_count = next_participants;
        let participants = group_count * group_size;
        shapes.push(RoundShape {
            round: round as u8,
            group_size,
            group_count,
            participants,
            is_final_round: round + 1 == sizes.len(),
        });
        next_participants = participants;
    }
    shapes.reverse();

    // Round 0 takes everyone, whatever the product above says
    shapes[0].participants = num_participants;

    Ok(shapes)
}
