//! Generic snapshot diffing
//!
//! Turns two keyed snapshots of an entity collection into the minimal
//! added/updated/deleted changeset the push layer fans out. `updated`
//! entries are shallow patches carrying only the fields that actually
//! changed (plus the identity); an entry whose patch would be empty is not
//! an update at all and never appears. Downstream subscribers apply patches
//! blindly, so emitting unchanged fields is a correctness bug here, not a
//! bandwidth nit.

use serde::Serialize;
use std::collections::HashMap;

/// A snapshot entity that can diff itself against its previous incarnation
pub trait Snapshot {
    /// Patch carrying the identity plus only the changed fields
    type Patch: Serialize + std::fmt::Debug;

    /// Stable identity recognizing the same entity across cycles
    fn key(&self) -> &str;

    /// Shallow field-by-field diff against the previous cycle's value.
    /// Returns `None` when every field is value-equal.
    fn diff(&self, previous: &Self) -> Option<Self::Patch>;
}

/// One cycle's changeset for an entity family
///
/// `deleted` is skipped in serialized form when empty; for merged
/// controllers and airports a vanished group never has survivors to patch,
/// so the group simply disappearing is the deletion signal.
#[derive(Debug, Serialize)]
pub struct Delta<T: Snapshot> {
    pub added: Vec<T>,
    pub updated: Vec<T::Patch>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deleted: Vec<String>,
}

impl<T: Snapshot> Delta<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Diff a current snapshot against the previous cycle's cache.
///
/// Output vectors are sorted by key so repeated runs over identical input
/// produce identical payloads.
pub fn compute_delta<T>(previous: &HashMap<String, T>, current: &HashMap<String, T>) -> Delta<T>
where
    T: Snapshot + Clone,
{
    let mut added = Vec::new();
    let mut updated = Vec::new();

    let mut current_keys: Vec<&String> = current.keys().collect();
    current_keys.sort();

    for key in current_keys {
        let item = &current[key];
        match previous.get(key) {
            None => added.push(item.clone()),
            Some(prev) => {
                if let Some(patch) = item.diff(prev) {
                    updated.push(patch);
                }
            }
        }
    }

    let mut deleted: Vec<String> = previous
        .keys()
        .filter(|key| !current.contains_key(*key))
        .cloned()
        .collect();
    deleted.sort();

    Delta {
        added,
        updated,
        deleted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Station {
        id: String,
        frequency: String,
        online: u32,
    }

    #[derive(Debug, Serialize, PartialEq)]
    struct StationPatch {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        frequency: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        online: Option<u32>,
    }

    impl Snapshot for Station {
        type Patch = StationPatch;

        fn key(&self) -> &str {
            &self.id
        }

        fn diff(&self, previous: &Self) -> Option<StationPatch> {
            let mut patch = StationPatch {
                id: self.id.clone(),
                frequency: None,
                online: None,
            };
            let mut changed = false;
            if self.frequency != previous.frequency {
                patch.frequency = Some(self.frequency.clone());
                changed = true;
            }
            if self.online != previous.online {
                patch.online = Some(self.online);
                changed = true;
            }
            changed.then_some(patch)
        }
    }

    fn station(id: &str, frequency: &str, online: u32) -> Station {
        Station {
            id: id.to_string(),
            frequency: frequency.to_string(),
            online,
        }
    }

    fn as_map(stations: Vec<Station>) -> HashMap<String, Station> {
        stations.into_iter().map(|s| (s.id.clone(), s)).collect()
    }

    #[test]
    fn test_delta_partition_law() {
        let previous = as_map(vec![
            station("a", "118.500", 1),
            station("b", "121.700", 2),
            station("c", "124.850", 3),
        ]);
        let current = as_map(vec![
            station("b", "121.700", 2), // unchanged
            station("c", "124.850", 9), // updated
            station("d", "135.250", 1), // added
        ]);

        let delta = compute_delta(&previous, &current);

        let added: Vec<&str> = delta.added.iter().map(|s| s.id.as_str()).collect();
        let updated: Vec<&str> = delta.updated.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(added, vec!["d"]);
        assert_eq!(updated, vec!["c"]);
        assert_eq!(delta.deleted, vec!["a"]);

        // added ∪ updated ∪ unchanged == current keys, pairwise disjoint
        let mut covered: Vec<&str> = added.iter().chain(updated.iter()).copied().collect();
        covered.push("b");
        covered.sort();
        let mut current_keys: Vec<&str> = current.keys().map(|k| k.as_str()).collect();
        current_keys.sort();
        assert_eq!(covered, current_keys);
    }

    #[test]
    fn test_unchanged_entry_produces_no_patch() {
        let previous = as_map(vec![station("a", "118.500", 1)]);
        let current = as_map(vec![station("a", "118.500", 1)]);

        let delta = compute_delta(&previous, &current);
        assert!(delta.is_empty());
    }

    #[test]
    fn test_patch_carries_only_changed_fields() {
        let previous = as_map(vec![station("a", "118.500", 1)]);
        let current = as_map(vec![station("a", "118.500", 4)]);

        let delta = compute_delta(&previous, &current);
        assert_eq!(delta.updated.len(), 1);
        let patch = &delta.updated[0];
        assert_eq!(patch.online, Some(4));
        assert_eq!(patch.frequency, None);

        let json = serde_json::to_value(patch).unwrap();
        assert_eq!(json, serde_json::json!({"id": "a", "online": 4}));
    }

    #[test]
    fn test_empty_previous_means_all_added() {
        let previous = HashMap::new();
        let current = as_map(vec![station("a", "118.500", 1), station("b", "121.700", 0)]);

        let delta = compute_delta(&previous, &current);
        assert_eq!(delta.added.len(), 2);
        assert!(delta.updated.is_empty());
        assert!(delta.deleted.is_empty());
    }

    #[test]
    fn test_output_ordering_is_stable() {
        let previous = HashMap::new();
        let current = as_map(vec![
            station("z", "0", 0),
            station("a", "0", 0),
            station("m", "0", 0),
        ]);

        for _ in 0..4 {
            let delta = compute_delta(&previous, &current);
            let ids: Vec<&str> = delta.added.iter().map(|s| s.id.as_str()).collect();
            assert_eq!(ids, vec!["a", "m", "z"]);
        }
    }

    #[test]
    fn test_deleted_skipped_in_json_when_empty() {
        let previous = HashMap::new();
        let current = as_map(vec![station("a", "118.500", 1)]);
        let delta = compute_delta(&previous, &current);
        let json = serde_json::to_value(&delta).unwrap();
        assert!(json.get("deleted").is_none());
    }
}
