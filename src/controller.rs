//! Controller session and merged-sector records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::delta::Snapshot;
use crate::feed::FeedController;

/// Facility a session is staffing, from the raw feed code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facility {
    Observer,
    FlightService,
    Delivery,
    Ground,
    Tower,
    Approach,
    Center,
}

impl Facility {
    pub fn from_raw(code: i32) -> Self {
        match code {
            1 => Facility::FlightService,
            2 => Facility::Delivery,
            3 => Facility::Ground,
            4 => Facility::Tower,
            5 => Facility::Approach,
            6 => Facility::Center,
            _ => Facility::Observer,
        }
    }
}

/// One raw controller or ATIS session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerRecord {
    pub callsign: String,
    pub cid: u32,
    pub name: String,
    pub frequency: String,
    pub facility: Facility,
    pub text_atis: Vec<String>,
    pub atis_code: Option<String>,
    pub is_atis: bool,
    /// Pilots served by this session, derived by the geo assigner
    pub connections: u32,
    pub logon_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl ControllerRecord {
    pub fn from_feed(session: &FeedController, is_atis: bool) -> Self {
        Self {
            callsign: session.callsign.clone(),
            cid: session.cid,
            name: session.name.clone(),
            frequency: session.frequency.clone(),
            facility: Facility::from_raw(session.facility),
            text_atis: session.text_atis.clone().unwrap_or_default(),
            atis_code: session.atis_code.clone(),
            is_atis,
            connections: 0,
            logon_time: session.logon_time,
            last_updated: session.last_updated,
        }
    }

    /// Top underscore-delimited callsign segment ("EDDF_ATIS" -> "EDDF")
    pub fn callsign_prefix(&self) -> &str {
        self.callsign.split('_').next().unwrap_or(&self.callsign)
    }
}

/// Logical sector flavor a merged group represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectorKind {
    Airport,
    Tracon,
    Fir,
}

impl SectorKind {
    pub fn id_for(&self, code: &str) -> String {
        match self {
            SectorKind::Airport => format!("airport_{}", code),
            SectorKind::Tracon => format!("tracon_{}", code),
            SectorKind::Fir => format!("fir_{}", code),
        }
    }
}

/// A logical controller grouping: one airport, TRACON or FIR with every
/// raw session that belongs to it this cycle. Membership is recomputed
/// from scratch each cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedController {
    /// Namespaced id: `airport_EDDF`, `tracon_NY`, `fir_EDGG`
    pub id: String,
    pub kind: SectorKind,
    pub sessions: Vec<ControllerRecord>,
}

impl MergedController {
    /// Total pilots served across member sessions
    pub fn connections(&self) -> u32 {
        self.sessions.iter().map(|s| s.connections).sum()
    }
}

/// Patch for a merged group; the session list is its only mutable payload
#[derive(Debug, Clone, Serialize)]
pub struct MergedControllerPatch {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Vec<ControllerRecord>>,
}

impl Snapshot for MergedController {
    type Patch = MergedControllerPatch;

    fn key(&self) -> &str {
        &self.id
    }

    fn diff(&self, previous: &Self) -> Option<MergedControllerPatch> {
        // Deep comparison: session lists include ATIS text arrays
        if self.sessions == previous.sessions {
            return None;
        }
        Some(MergedControllerPatch {
            id: self.id.clone(),
            sessions: Some(self.sessions.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session(callsign: &str, facility: i32) -> ControllerRecord {
        ControllerRecord::from_feed(
            &FeedController {
                cid: 1000002,
                callsign: callsign.to_string(),
                name: "Test Controller".to_string(),
                frequency: "119.900".to_string(),
                facility,
                rating: 5,
                server: "GERMANY".to_string(),
                text_atis: Some(vec!["Information Alpha".to_string()]),
                atis_code: None,
                logon_time: Utc.with_ymd_and_hms(2025, 6, 1, 11, 0, 0).unwrap(),
                last_updated: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            },
            false,
        )
    }

    #[test]
    fn test_facility_from_raw() {
        assert_eq!(Facility::from_raw(6), Facility::Center);
        assert_eq!(Facility::from_raw(5), Facility::Approach);
        assert_eq!(Facility::from_raw(0), Facility::Observer);
        assert_eq!(Facility::from_raw(99), Facility::Observer);
    }

    #[test]
    fn test_callsign_prefix() {
        assert_eq!(session("EDDF_S_TWR", 4).callsign_prefix(), "EDDF");
        assert_eq!(session("EDGG", 6).callsign_prefix(), "EDGG");
    }

    #[test]
    fn test_merged_diff_on_atis_text_change() {
        let base = MergedController {
            id: "airport_EDDF".to_string(),
            kind: SectorKind::Airport,
            sessions: vec![session("EDDF_TWR", 4)],
        };
        assert!(base.clone().diff(&base).is_none());

        let mut changed = base.clone();
        changed.sessions[0].text_atis = vec!["Information Bravo".to_string()];
        let patch = changed.diff(&base).unwrap();
        assert_eq!(patch.id, "airport_EDDF");
        assert!(patch.sessions.is_some());
    }

    #[test]
    fn test_merged_connections_sum() {
        let mut group = MergedController {
            id: "tracon_NY".to_string(),
            kind: SectorKind::Tracon,
            sessions: vec![session("NY_APP", 5), session("NY_W_APP", 5)],
        };
        group.sessions[0].connections = 3;
        group.sessions[1].connections = 2;
        assert_eq!(group.connections(), 5);
    }
}
