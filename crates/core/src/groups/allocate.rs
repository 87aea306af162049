//! Rank index to room index mapping

use super::sizing::MAX_PARTICIPANTS;
use crate::error::{Error, Result};

/// How `num_participants` members are spread over `num_rooms` rooms.
///
/// The first `large_rooms` rooms hold `min_size + 1` members, the rest
/// hold `min_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomLayout {
    pub num_rooms: u32,
    pub num_participants: u32,
    pub min_size: u32,
    pub large_rooms: u32,
}

impl RoomLayout {
    pub fn new(num_rooms: u32, num_participants: u32) -> Result<Self> {
        if num_rooms == 0 {
            return Err(Error::InvalidArgument("room count must be positive".into()));
        }
        if num_participants == 0 {
            return Err(Error::InvalidArgument(
                "participant count must be positive".into(),
            ));
        }
        if num_participants > MAX_PARTICIPANTS {
            return Err(Error::InvalidArgument(format!(
                "{} participants exceeds the contract limit of {}",
                num_participants, MAX_PARTICIPANTS
            )));
        }

        let max_size = num_participants.div_ceil(num_rooms);
        let short_rooms = max_size * num_rooms - num_participants;

        Ok(Self {
            num_rooms,
            num_participants,
            min_size: max_size - 1,
            large_rooms: num_rooms - short_rooms,
        })
    }

    /// Members placed in the large rooms
    pub fn members_in_large_rooms(&self) -> u32 {
        (self.min_size + 1) * self.large_rooms
    }

    /// Number of members in room `room`
    pub fn room_size(&self, room: u32) -> u32 {
        if room < self.large_rooms {
            self.min_size + 1
        } else {
            self.min_size
        }
    }

    /// Room of the member at zero-based `rank_index`
    pub fn room_of(&self, rank_index: u32) -> Result<u32> {
        if rank_index >= self.num_participants {
            return Err(Error::InvalidArgument(format!(
                "rank index {} out of range for {} participants",
                rank_index, self.num_participants
            )));
        }

        let in_large = self.members_in_large_rooms();
        if rank_index < in_large {
            Ok(rank_index / (self.min_size + 1))
        } else {
            Ok((rank_index - in_large) / self.min_size + self.large_rooms)
        }
    }
}

/// Room index of the member at `rank_index`
pub fn room_of(rank_index: u32, num_rooms: u32, num_participants: u32) -> Result<u32> {
    RoomLayout::new(num_rooms, num_participants)?.room_of(rank_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invariants::assert_partition;

    #[test]
    fn test_first_member_of_86_in_20_rooms() {
        let layout = RoomLayout::new(20, 86).unwrap();
        assert_eq!(layout.min_size, 4);
        assert_eq!(layout.large_rooms, 6);
        assert_eq!(layout.members_in_large_rooms(), 30);
        assert_eq!(room_of(0, 20, 86).unwrap(), 0);
    }

    #[test]
    fn test_boundary_between_large_and_short_rooms() {
        // 6 rooms of 5 then 14 rooms of 4
        assert_eq!(room_of(29, 20, 86).unwrap(), 5);
        assert_eq!(room_of(30, 20, 86).unwrap(), 6);
        assert_eq!(room_of(33, 20, 86).unwrap(), 6);
        assert_eq!(room_of(34, 20, 86).unwrap(), 7);
        assert_eq!(room_of(85, 20, 86).unwrap(), 19);
    }

    #[test]
    fn test_even_split() {
        let layout = RoomLayout::new(4, 20).unwrap();
        assert_eq!(layout.large_rooms, 4);
        assert_eq!(layout.room_of(4).unwrap(), 0);
        assert_eq!(layout.room_of(5).unwrap(), 1);
        assert_eq!(layout.room_of(19).unwrap(), 3);
    }

    #[test]
    fn test_rejects_invalid_arguments() {
        assert!(matches!(
            room_of(0, 0, 10),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(room_of(0, 3, 0), Err(Error::InvalidArgument(_))));
        assert!(matches!(room_of(10, 3, 10), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_rejects_counts_beyond_contract_limit() {
        assert!(matches!(
            room_of(0, 3_000_000_000, 4_000_000_000),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            RoomLayout::new(2, MAX_PARTICIPANTS + 1),
            Err(Error::InvalidArgument(_))
        ));
        assert!(RoomLayout::new(2, MAX_PARTICIPANTS).is_ok());
    }

    #[test]
    fn test_partition_is_balanced_and_complete() {
        for participants in 1..=120u32 {
            for rooms in 1..=participants {
                let layout = RoomLayout::new(rooms, participants).unwrap();
                let assignment: Vec<u32> = (0..participants)
                    .map(|i| layout.room_of(i).unwrap())
                    .collect();
                assert_partition(rooms, participants, &assignment);
                for room in 0..rooms {
                    let members = assignment.iter().filter(|&&r| r == room).count() as u32;
                    assert_eq!(members, layout.room_size(room));
                }
            }
        }
    }

    #[test]
    fn test_assignment_is_monotonic_in_rank() {
        let layout = RoomLayout::new(16, 86).unwrap();
        let mut last = 0;
        for i in 0..86 {
            let room = layout.room_of(i).unwrap();
            assert!(room >= last);
            last = room;
        }
        assert_eq!(last, 15);
    }
}
