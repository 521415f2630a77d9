//! Nearest-controller assignment
//!
//! Computes how many pilots each controller session serves. Pilots and
//! sessions meet on a radio frequency; when several sessions share one,
//! each pilot on it is assigned to the session whose transceiver is
//! physically nearest. Iteration order is fixed (sessions sorted by
//! callsign, strict `<` comparison) so ties and repeated runs always pick
//! the same session.

use std::collections::HashMap;

use crate::controller::ControllerRecord;
use crate::feed::TransceiverMap;
use crate::geo::haversine_distance;
use crate::pilot::PilotRecord;

/// Parse a dial frequency like "121.700" into Hz for exact matching
fn frequency_hz(dial: &str) -> Option<u64> {
    let mhz: f64 = dial.trim().parse().ok()?;
    if mhz <= 0.0 {
        return None;
    }
    Some((mhz * 1_000_000.0).round() as u64)
}

/// Ground distance from a pilot to the nearest transceiver a session has
/// on the given frequency. `None` when the session has no matching
/// transceiver data; such a session cannot be nearest.
fn session_distance_m(
    pilot: &PilotRecord,
    session: &ControllerRecord,
    hz: u64,
    transceivers: &TransceiverMap,
) -> Option<f64> {
    let sites = transceivers.get(&session.callsign)?;
    sites
        .iter()
        .filter(|t| t.frequency_hz == hz)
        .map(|t| haversine_distance(pilot.latitude, pilot.longitude, t.latitude, t.longitude))
        .min_by(|a, b| a.total_cmp(b))
}

/// Compute served-pilot counts per session callsign.
///
/// The caller folds the counts back into its controller records; sessions
/// absent from the result served nobody this cycle.
pub fn connection_counts(
    sessions: &[ControllerRecord],
    pilots: &HashMap<String, PilotRecord>,
    transceivers: &TransceiverMap,
) -> HashMap<String, u32> {
    // Sessions grouped by frequency, sorted for deterministic tie-breaks
    let mut by_frequency: HashMap<u64, Vec<&ControllerRecord>> = HashMap::new();
    for session in sessions {
        if let Some(hz) = frequency_hz(&session.frequency) {
            by_frequency.entry(hz).or_default().push(session);
        }
    }
    for group in by_frequency.values_mut() {
        group.sort_by(|a, b| a.callsign.cmp(&b.callsign));
    }

    let mut counts: HashMap<String, u32> = HashMap::new();

    for pilot in pilots.values() {
        let hz = match frequency_hz(&pilot.frequency) {
            Some(hz) => hz,
            None => continue,
        };
        let candidates = match by_frequency.get(&hz) {
            Some(candidates) => candidates,
            None => continue,
        };

        let assigned = if candidates.len() == 1 {
            // A frequency with a single session serves every pilot on it
            Some(candidates[0].callsign.as_str())
        } else {
            let mut nearest: Option<(&str, f64)> = None;
            for session in candidates {
                let Some(distance) = session_distance_m(pilot, session, hz, transceivers) else {
                    continue;
                };
                match nearest {
                    Some((_, best)) if distance >= best => {}
                    _ => nearest = Some((session.callsign.as_str(), distance)),
                }
            }
            nearest.map(|(callsign, _)| callsign)
        };

        if let Some(callsign) = assigned {
            *counts.entry(callsign.to_string()).or_insert(0) += 1;
        }
    }

    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedController, FeedPilot, Transceiver};
    use chrono::{TimeZone, Utc};

    fn session(callsign: &str, frequency: &str) -> ControllerRecord {
        ControllerRecord::from_feed(
            &FeedController {
                cid: 1,
                callsign: callsign.to_string(),
                name: String::new(),
                frequency: frequency.to_string(),
                facility: 4,
                rating: 5,
                server: String::new(),
                text_atis: None,
                atis_code: None,
                logon_time: Utc.with_ymd_and_hms(2025, 6, 1, 11, 0, 0).unwrap(),
                last_updated: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            },
            false,
        )
    }

    fn pilot(cid: u32, frequency: &str, latitude: f64, longitude: f64) -> (String, PilotRecord) {
        let feed = FeedPilot {
            cid,
            callsign: format!("TST{}", cid),
            name: String::new(),
            server: String::new(),
            pilot_rating: 0,
            military_rating: 0,
            latitude,
            longitude,
            altitude: 5_000,
            altitude_agl: None,
            groundspeed: 120,
            transponder: "2000".to_string(),
            heading: 0,
            frequency: frequency.to_string(),
            qnh_i_hg: 29.92,
            flight_plan: None,
            logon_time: Utc.with_ymd_and_hms(2025, 6, 1, 11, 45, 0).unwrap(),
            last_updated: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        };
        let record = PilotRecord::from_feed(&feed);
        (record.id.clone(), record)
    }

    fn transceiver(hz: u64, latitude: f64, longitude: f64) -> Transceiver {
        Transceiver {
            frequency_hz: hz,
            latitude,
            longitude,
        }
    }

    #[test]
    fn test_single_session_serves_all_pilots_on_frequency() {
        let sessions = vec![session("EDDF_TWR", "119.900")];
        let pilots: HashMap<_, _> = vec![
            pilot(1, "119.900", 50.0, 8.5),
            pilot(2, "119.900", 50.1, 8.6),
            pilot(3, "121.700", 50.0, 8.5), // different frequency
        ]
        .into_iter()
        .collect();

        let counts = connection_counts(&sessions, &pilots, &TransceiverMap::new());
        assert_eq!(counts.get("EDDF_TWR"), Some(&2));
    }

    #[test]
    fn test_nearest_transceiver_wins() {
        // Two sessions on one frequency, transceivers ~5 nm and ~40 nm out
        let sessions = vec![session("EDDF_N_GND", "121.700"), session("EDDF_S_GND", "121.700")];
        let mut transceivers = TransceiverMap::new();
        // Pilot at 50.00N 8.50E; 1 degree latitude = 60 nm
        transceivers.insert(
            "EDDF_N_GND".to_string(),
            vec![transceiver(121_700_000, 50.083, 8.50)], // ~5 nm north
        );
        transceivers.insert(
            "EDDF_S_GND".to_string(),
            vec![transceiver(121_700_000, 49.333, 8.50)], // ~40 nm south
        );

        let pilots: HashMap<_, _> = vec![pilot(1, "121.700", 50.0, 8.5)].into_iter().collect();

        let counts = connection_counts(&sessions, &pilots, &transceivers);
        assert_eq!(counts.get("EDDF_N_GND"), Some(&1));
        assert_eq!(counts.get("EDDF_S_GND"), None);
    }

    #[test]
    fn test_session_without_transceivers_is_skipped() {
        let sessions = vec![session("EDDF_N_GND", "121.700"), session("EDDF_S_GND", "121.700")];
        let mut transceivers = TransceiverMap::new();
        // Only the southern session has transceiver data; it wins despite
        // being farther away
        transceivers.insert(
            "EDDF_S_GND".to_string(),
            vec![transceiver(121_700_000, 49.333, 8.50)],
        );

        let pilots: HashMap<_, _> = vec![pilot(1, "121.700", 50.0, 8.5)].into_iter().collect();

        let counts = connection_counts(&sessions, &pilots, &transceivers);
        assert_eq!(counts.get("EDDF_S_GND"), Some(&1));
        assert_eq!(counts.get("EDDF_N_GND"), None);
    }

    #[test]
    fn test_assignment_is_deterministic_under_exact_tie() {
        let sessions = vec![session("B_POS", "121.700"), session("A_POS", "121.700")];
        let mut transceivers = TransceiverMap::new();
        // Identical transceiver positions: an exact distance tie
        transceivers.insert(
            "A_POS".to_string(),
            vec![transceiver(121_700_000, 50.5, 8.5)],
        );
        transceivers.insert(
            "B_POS".to_string(),
            vec![transceiver(121_700_000, 50.5, 8.5)],
        );

        let pilots: HashMap<_, _> = vec![pilot(1, "121.700", 50.0, 8.5)].into_iter().collect();

        for _ in 0..8 {
            let counts = connection_counts(&sessions, &pilots, &transceivers);
            // First candidate in sorted order wins the tie, every time
            assert_eq!(counts.get("A_POS"), Some(&1));
            assert_eq!(counts.get("B_POS"), None);
        }
    }

    #[test]
    fn test_unparseable_frequencies_are_ignored() {
        let sessions = vec![session("EDDF_TWR", "not-a-freq")];
        let pilots: HashMap<_, _> = vec![pilot(1, "", 50.0, 8.5)].into_iter().collect();
        let counts = connection_counts(&sessions, &pilots, &TransceiverMap::new());
        assert!(counts.is_empty());
    }
}
