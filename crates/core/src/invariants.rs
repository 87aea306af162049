//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use crate::groups::RoundShape;
use crate::models::{Election, LiveRound, PhaseKind, Room, RoomMember, RoomOrigin};

/// Validate that a round table chains correctly
pub fn assert_round_shapes(num_participants: u32, shapes: &[RoundShape]) {
    if num_participants == 0 {
        debug_assert!(shapes.is_empty(), "Zero participants produced rounds");
        return;
    }

    debug_assert_eq!(
        shapes.first().map(|s| s.participants),
        Some(num_participants),
        "Round 0 does not take every participant"
    );

    for (i, shape) in shapes.iter().enumerate() {
        debug_assert_eq!(shape.round as usize, i, "Round {} out of order", i);
        debug_assert!(shape.group_count > 0, "Round {} has no groups", i);
        debug_assert_eq!(
            shape.is_final_round,
            i + 1 == shapes.len(),
            "Round {} final flag is wrong",
            i
        );
    }

    for pair in shapes.windows(2) {
        // Groups of round i each send one delegate to round i + 1
        debug_assert_eq!(
            pair[1].participants, pair[0].group_count,
            "Round {} output does not feed round {}",
            pair[0].round, pair[1].round
        );
    }
}

/// Validate a rank-to-room assignment
pub fn assert_partition(num_rooms: u32, num_participants: u32, assignment: &[u32]) {
    debug_assert_eq!(
        assignment.len() as u32,
        num_participants,
        "Assignment does not cover every participant"
    );

    let mut sizes = vec![0u32; num_rooms as usize];
    for &room in assignment {
        debug_assert!(room < num_rooms, "Room {} out of range {}", room, num_rooms);
        if let Some(size) = sizes.get_mut(room as usize) {
            *size += 1;
        }
    }

    let max = sizes.iter().copied().max().unwrap_or(0);
    let min = sizes.iter().copied().min().unwrap_or(0);
    debug_assert!(
        max - min <= 1,
        "Room sizes differ by more than one: min {} max {}",
        min,
        max
    );
}

/// Validate that an Election's state is internally consistent
pub fn assert_election_invariants(election: &Election) {
    debug_assert!(
        !election.contract.trim().is_empty(),
        "Election {} has empty contract",
        election.id
    );

    // A dummy anchor never advances
    debug_assert!(
        !(election.is_dummy && election.live_round.is_some()),
        "Dummy election {} has live round {:?}",
        election.id,
        election.live_round
    );

    if election.phase == PhaseKind::Final {
        debug_assert!(
            matches!(election.live_round, None | Some(LiveRound::Final)),
            "Final election {} still on {:?}",
            election.id,
            election.live_round
        );
    }
}

/// Validate that a room is either fully assigned or an unassigned pre-created room
pub fn assert_room_invariants(room: &Room) {
    debug_assert_eq!(
        room.round.is_some(),
        room.room_index.is_some(),
        "Room {} has round {:?} but index {:?}",
        room.id,
        room.round,
        room.room_index
    );

    debug_assert!(
        room.round.is_some() || room.created_by == RoomOrigin::Precreated,
        "Live room {} has no round",
        room.id
    );

    debug_assert!(
        !(room.invited_at.is_some() && room.chat_handle.is_none()),
        "Room {} marked invited without a chat",
        room.id
    );
}

/// Validate that a member belongs to the room it is recorded in
pub fn assert_member_invariants(member: &RoomMember, room: &Room) {
    debug_assert_eq!(member.room_id, room.id, "Member {} in wrong room", member.account);
    debug_assert_eq!(
        Some(member.round),
        room.round,
        "Member {} round differs from room {}",
        member.account,
        room.id
    );
    debug_assert!(
        !member.account.trim().is_empty(),
        "Empty account in room {}",
        room.id
    );
}
