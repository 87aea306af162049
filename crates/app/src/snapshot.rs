//! Chain source backed by a JSON snapshot file
//!
//! The file is re-read on every call, so an operator (or a script) can
//! advance the election by rewriting it between ticks.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use fractal_core::{
    parse_chain_time, ActionRecord, ChainSource, Error, ParticipantRecord, RawPhase, Result,
    TimeRange,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Snapshot {
    phase: RawPhase,
    #[serde(default)]
    participants: BTreeMap<String, ParticipantRecord>,
    #[serde(default)]
    actions: Vec<SnapshotAction>,
    #[serde(default)]
    heights: Vec<HeightMark>,
}

#[derive(Debug, Deserialize)]
struct SnapshotAction {
    /// Contract the action was sent to
    account: String,
    name: String,
    #[serde(flatten)]
    record: ActionRecord,
}

/// A known block: `height` was produced at `at`
#[derive(Debug, Deserialize)]
struct HeightMark {
    at: String,
    height: u64,
}

pub struct SnapshotChain {
    path: PathBuf,
}

impl SnapshotChain {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn load(&self) -> Result<Snapshot> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::Chain(format!("cannot read snapshot {}: {}", self.path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            Error::Chain(format!("invalid snapshot {}: {}", self.path.display(), e))
        })
    }
}

impl ChainSource for SnapshotChain {
    fn current_phase(&self, _height: Option<u64>) -> Result<RawPhase> {
        Ok(self.load()?.phase)
    }

    fn participants(&self, _height: Option<u64>) -> Result<BTreeMap<String, ParticipantRecord>> {
        Ok(self.load()?.participants)
    }

    fn block_height_at(&self, at: DateTime<Utc>) -> Result<u64> {
        let mut best: Option<(DateTime<Utc>, u64)> = None;
        for mark in self.load()?.heights {
            let produced = parse_chain_time(&mark.at)
                .ok_or_else(|| Error::Chain(format!("invalid block time '{}'", mark.at)))?;
            if produced <= at && best.map_or(true, |(t, _)| produced >= t) {
                best = Some((produced, mark.height));
            }
        }
        best.map(|(_, height)| height)
            .ok_or_else(|| Error::Chain(format!("no block known at or before {}", at)))
    }

    fn actions_matching(
        &self,
        account: &str,
        action: &str,
        range: TimeRange,
    ) -> Result<Vec<ActionRecord>> {
        Ok(self
            .load()?
            .actions
            .into_iter()
            .filter(|a| a.account == account && a.name == action)
            .map(|a| a.record)
            .filter(|r| range.contains(r.timestamp))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SNAPSHOT: &str = r#"{
        "phase": {"tag": "election_state_active_v0", "payload": {"round": 0, "config": [], "round_end": "2024-10-05T14:00:00"}},
        "participants": {
            "alice": {"round": 0, "index": 0},
            "bob": {"round": 0, "index": 1, "candidate": "alice"}
        },
        "actions": [
            {"account": "genesis.eden", "name": "electvote", "block_height": 120,
             "timestamp": "2024-10-05T13:30:00.000", "actor": "bob",
             "data": {"round": 0, "voter": "bob", "candidate": "alice"}},
            {"account": "genesis.eden", "name": "electopt", "block_height": 121,
             "timestamp": "2024-10-05T13:31:00.000", "actor": "alice"}
        ],
        "heights": [
            {"at": "2024-10-05T13:00:00", "height": 100},
            {"at": "2024-10-05T14:00:00", "height": 200}
        ]
    }"#;

    fn write_snapshot(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 5, h, m, 0).unwrap()
    }

    #[test]
    fn test_reads_phase_and_participants() {
        let file = write_snapshot(SNAPSHOT);
        let chain = SnapshotChain::new(file.path().to_path_buf());

        let phase = chain.current_phase(None).unwrap();
        assert_eq!(phase.tag, "election_state_active_v0");
        assert!(phase.parse().is_ok());

        let participants = chain.participants(None).unwrap();
        assert_eq!(participants.len(), 2);
        assert_eq!(participants["bob"].candidate.as_deref(), Some("alice"));
        assert_eq!(participants["alice"].index, Some(0));
    }

    #[test]
    fn test_actions_filtered_by_name_and_range() {
        let file = write_snapshot(SNAPSHOT);
        let chain = SnapshotChain::new(file.path().to_path_buf());

        let range = TimeRange {
            from: at(13, 0),
            to: at(14, 0),
        };
        let votes = chain
            .actions_matching("genesis.eden", "electvote", range)
            .unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].actor, "bob");
        assert_eq!(votes[0].block_height, 120);

        let early = TimeRange {
            from: at(12, 0),
            to: at(13, 0),
        };
        assert!(chain
            .actions_matching("genesis.eden", "electvote", early)
            .unwrap()
            .is_empty());
        assert!(chain
            .actions_matching("other.eden", "electvote", range)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_block_height_at() {
        let file = write_snapshot(SNAPSHOT);
        let chain = SnapshotChain::new(file.path().to_path_buf());

        assert_eq!(chain.block_height_at(at(13, 30)).unwrap(), 100);
        assert_eq!(chain.block_height_at(at(14, 0)).unwrap(), 200);
        assert!(matches!(
            chain.block_height_at(at(12, 0)),
            Err(Error::Chain(_))
        ));
    }

    #[test]
    fn test_snapshot_is_reread() {
        let file = write_snapshot(r#"{"phase": {"tag": "election_state_pending_date"}}"#);
        let chain = SnapshotChain::new(file.path().to_path_buf());
        assert_eq!(
            chain.current_phase(None).unwrap().tag,
            "election_state_pending_date"
        );

        std::fs::write(file.path(), r#"{"phase": {"tag": "election_state_final_v0"}}"#).unwrap();
        assert_eq!(chain.current_phase(None).unwrap().tag, "election_state_final_v0");
        assert!(chain.participants(None).unwrap().is_empty());
    }

    #[test]
    fn test_missing_or_invalid_file_is_chain_error() {
        let chain = SnapshotChain::new(PathBuf::from("/nonexistent/snapshot.json"));
        assert!(matches!(chain.current_phase(None), Err(Error::Chain(_))));

        let file = write_snapshot("not json");
        let chain = SnapshotChain::new(file.path().to_path_buf());
        assert!(matches!(chain.participants(None), Err(Error::Chain(_))));
    }
}
