//! Election phase tracking
//!
//! Maps the phase reported by the chain onto the persisted election row and
//! detects live round changes. The previous round is read from storage, so
//! re-observing the same phase never signals a change twice.

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::chain::ChainPhase;
use crate::error::Result;
use crate::invariants::assert_election_invariants;
use crate::models::{Election, LiveRound, PhaseKind};
use crate::storage::Storage;

/// Result of observing one chain phase
#[derive(Debug, Clone)]
pub struct Observation {
    /// The election the phase belongs to; None while nothing is scheduled
    pub election: Option<Election>,
    pub phase: PhaseKind,
    /// True only on the first observation of a new live round
    pub round_changed: bool,
    /// Live round persisted before this observation
    pub previous_round: Option<LiveRound>,
    /// End time persisted for the previous round
    pub previous_round_end: Option<DateTime<Utc>>,
}

impl Observation {
    fn idle(phase: PhaseKind) -> Self {
        Self {
            election: None,
            phase,
            round_changed: false,
            previous_round: None,
            previous_round_end: None,
        }
    }
}

/// Phase state machine for one election contract
pub struct ElectionPhaseTracker<'a, S: Storage> {
    store: &'a S,
    contract: &'a str,
}

impl<'a, S: Storage> ElectionPhaseTracker<'a, S> {
    pub fn new(store: &'a S, contract: &'a str) -> Self {
        Self { store, contract }
    }

    /// Record a chain phase observation
    #[instrument(skip(self, phase), fields(contract = %self.contract, phase = %phase.kind()))]
    pub fn observe(&self, phase: &ChainPhase) -> Result<Observation> {
        let kind = phase.kind();

        let mut election = match self.resolve_election(phase)? {
            Some(election) => election,
            None => return Ok(Observation::idle(kind)),
        };

        if election.phase != kind {
            info!(
                election_id = election.id,
                from = %election.phase,
                to = %kind,
                "Election phase changed"
            );
            self.store.update_election_phase(election.id, kind)?;
            election.phase = kind;
        }

        let mut observation = Observation {
            election: None,
            phase: kind,
            round_changed: false,
            previous_round: election.live_round,
            previous_round_end: election.round_end_at,
        };

        if let Some(live) = phase.live_round() {
            let reported_end = match phase {
                ChainPhase::Active { round_end, .. } => *round_end,
                _ => None,
            };

            if election.live_round != Some(live) {
                if let Some(previous) = election.live_round {
                    if live < previous {
                        warn!(
                            election_id = election.id,
                            previous = %previous,
                            reported = %live,
                            "Chain reported an earlier round"
                        );
                    }
                }
                info!(
                    election_id = election.id,
                    previous = ?election.live_round,
                    live = %live,
                    "Live round changed"
                );
                let (cleanup_round, cleanup_round_end) =
                    match election.live_round.and_then(|r| r.number()) {
                        Some(closed) => {
                            if let Some(stale) = election.cleanup_round {
                                warn!(
                                    election_id = election.id,
                                    round = stale,
                                    "Cleanup of an earlier round never completed"
                                );
                            }
                            (Some(closed), election.round_end_at)
                        }
                        None => (election.cleanup_round, election.cleanup_round_end),
                    };
                self.store.advance_round(
                    election.id,
                    live,
                    reported_end,
                    cleanup_round,
                    cleanup_round_end,
                )?;
                election.live_round = Some(live);
                election.round_end_at = reported_end;
                election.cleanup_round = cleanup_round;
                election.cleanup_round_end = cleanup_round_end;
                observation.round_changed = true;
            } else if reported_end.is_some() && reported_end != election.round_end_at {
                // Tally payloads carry no end time; keep the stored one
                self.store
                    .update_live_round(election.id, Some(live), reported_end)?;
                election.round_end_at = reported_end;
            }
        }

        assert_election_invariants(&election);
        observation.election = Some(election);
        Ok(observation)
    }

    /// Find or create the election a phase refers to
    fn resolve_election(&self, phase: &ChainPhase) -> Result<Option<Election>> {
        if matches!(phase, ChainPhase::Pending) {
            return Ok(None);
        }

        let Some(start_at) = phase.election_start() else {
            let latest = self.store.latest_election(self.contract)?;
            if latest.is_none() {
                warn!(phase = %phase.kind(), "No election recorded for this phase");
            }
            return Ok(latest);
        };

        if let Some(existing) = self.store.find_election_by_start(self.contract, start_at)? {
            return Ok(Some(existing));
        }

        let mut election = Election::new(self.contract, start_at, phase.kind());
        election.id = self.store.create_election(&election)?;
        info!(election_id = election.id, start_at = %start_at, "Election created");

        if self.store.find_dummy_election(self.contract)?.is_none() {
            let dummy_id = self
                .store
                .create_election(&Election::dummy(self.contract, start_at))?;
            info!(dummy_id, "Dummy election created");
        }

        Ok(Some(election))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::RoundConfig;
    use crate::storage::{Database, ElectionRepository};
    use chrono::TimeZone;

    const CONTRACT: &str = "genesis.eden";

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 5, 13, 0, 0).unwrap()
    }

    fn active(round: u8, end_hour: u32) -> ChainPhase {
        ChainPhase::Active {
            round,
            config: Some(vec![RoundConfig {
                num_participants: 20,
                num_groups: 4,
            }]),
            round_end: Some(Utc.with_ymd_and_hms(2024, 10, 5, end_hour, 0, 0).unwrap()),
        }
    }

    fn registered(db: &Database) -> Election {
        let tracker = ElectionPhaseTracker::new(db, CONTRACT);
        tracker
            .observe(&ChainPhase::Registration {
                start_time: start(),
            })
            .unwrap()
            .election
            .unwrap()
    }

    #[test]
    fn test_pending_yields_no_election() {
        let db = Database::open_in_memory().unwrap();
        let tracker = ElectionPhaseTracker::new(&db, CONTRACT);

        let obs = tracker.observe(&ChainPhase::Pending).unwrap();
        assert!(obs.election.is_none());
        assert!(!obs.round_changed);
        assert!(db.latest_election(CONTRACT).unwrap().is_none());
    }

    #[test]
    fn test_registration_creates_election_and_dummy_once() {
        let db = Database::open_in_memory().unwrap();
        let first = registered(&db);
        let second = registered(&db);

        assert_eq!(first.id, second.id);
        assert_eq!(first.phase, PhaseKind::Registration);
        assert!(db.find_dummy_election(CONTRACT).unwrap().is_some());
    }

    #[test]
    fn test_seeding_finds_election_by_seed_end() {
        let db = Database::open_in_memory().unwrap();
        let election = registered(&db);
        let tracker = ElectionPhaseTracker::new(&db, CONTRACT);

        let obs = tracker
            .observe(&ChainPhase::Seeding {
                start_time: start() - chrono::Duration::days(1),
                end_time: start(),
            })
            .unwrap();

        let seen = obs.election.unwrap();
        assert_eq!(seen.id, election.id);
        assert_eq!(seen.phase, PhaseKind::Seeding);
    }

    #[test]
    fn test_round_change_fires_once() {
        let db = Database::open_in_memory().unwrap();
        registered(&db);
        let tracker = ElectionPhaseTracker::new(&db, CONTRACT);

        let obs = tracker.observe(&active(1, 14)).unwrap();
        assert!(obs.round_changed);
        assert_eq!(obs.previous_round, None);

        let obs = tracker.observe(&active(2, 15)).unwrap();
        assert!(obs.round_changed);
        assert_eq!(obs.previous_round, Some(LiveRound::Round(1)));
        assert_eq!(obs.election.as_ref().unwrap().cleanup_round, Some(1));
        assert_eq!(
            obs.previous_round_end,
            Some(Utc.with_ymd_and_hms(2024, 10, 5, 14, 0, 0).unwrap())
        );

        // The closed round stays pending until its cleanup completes
        let stored = db
            .find_election_by_id(obs.election.as_ref().unwrap().id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.cleanup_round, Some(1));
        assert_eq!(stored.cleanup_round_end, obs.previous_round_end);

        let obs = tracker.observe(&active(2, 15)).unwrap();
        assert!(!obs.round_changed);
        assert_eq!(obs.election.unwrap().cleanup_round, Some(1));
    }

    #[test]
    fn test_tally_keeps_round_end() {
        let db = Database::open_in_memory().unwrap();
        registered(&db);
        let tracker = ElectionPhaseTracker::new(&db, CONTRACT);
        tracker.observe(&active(0, 14)).unwrap();

        let tally = ChainPhase::Active {
            round: 0,
            config: None,
            round_end: None,
        };
        let obs = tracker.observe(&tally).unwrap();

        assert!(!obs.round_changed);
        assert_eq!(
            obs.election.unwrap().round_end_at,
            Some(Utc.with_ymd_and_hms(2024, 10, 5, 14, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_final_closes_last_round() {
        let db = Database::open_in_memory().unwrap();
        registered(&db);
        let tracker = ElectionPhaseTracker::new(&db, CONTRACT);
        tracker.observe(&active(2, 16)).unwrap();

        let obs = tracker.observe(&ChainPhase::Final).unwrap();
        assert!(obs.round_changed);

        let election = obs.election.unwrap();
        assert_eq!(election.cleanup_round, Some(2));
        assert_eq!(election.phase, PhaseKind::Final);
        assert_eq!(election.live_round, Some(LiveRound::Final));

        let obs = tracker.observe(&ChainPhase::Final).unwrap();
        assert!(!obs.round_changed);
    }

    #[test]
    fn test_active_without_election_is_idle() {
        let db = Database::open_in_memory().unwrap();
        let tracker = ElectionPhaseTracker::new(&db, CONTRACT);

        let obs = tracker.observe(&active(0, 14)).unwrap();
        assert!(obs.election.is_none());
    }
}
