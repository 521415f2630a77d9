//! Fleet registry
//!
//! Normalizes aircraft registrations extracted from flight-plan remarks.
//! Pilots type registrations every way imaginable ("DAINA", "D-AINA",
//! "da-ina"); the registry maps them back to the canonical form. Lookup
//! tries the raw uppercased token first, then hyphenated variants with a
//! prefix of increasing length, and falls back to the raw uppercased token
//! when nothing matches.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// One registered airframe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetEntry {
    pub registration: String,
    #[serde(default)]
    pub aircraft_type: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    aircraft: Vec<FleetEntry>,
}

/// In-memory registration registry
#[derive(Debug, Default)]
pub struct FleetRegistry {
    entries: HashMap<String, FleetEntry>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON document `{"aircraft": [{"registration": ...}]}`
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fleet registry {:?}", path))?;
        let document: RegistryDocument =
            serde_json::from_str(&raw).context("Failed to parse fleet registry JSON")?;

        let mut entries = HashMap::with_capacity(document.aircraft.len());
        for entry in document.aircraft {
            entries.insert(entry.registration.to_uppercase(), entry);
        }
        info!("Loaded {} fleet registrations from {:?}", entries.len(), path);
        Ok(Self { entries })
    }

    pub fn from_entries(list: Vec<FleetEntry>) -> Self {
        let entries = list
            .into_iter()
            .map(|entry| (entry.registration.to_uppercase(), entry))
            .collect();
        Self { entries }
    }

    pub fn get(&self, registration: &str) -> Option<&FleetEntry> {
        self.entries.get(registration.to_uppercase().as_str())
    }

    /// Normalize a raw registration token to its registered form
    pub fn normalize(&self, raw: &str) -> String {
        let token = raw.trim().to_uppercase();
        if token.is_empty() {
            return token;
        }

        if let Some(entry) = self.entries.get(token.as_str()) {
            return entry.registration.clone();
        }

        // "DAINA" -> "D-AINA", "DA-INA", "DAI-NA", ...
        // ASCII only: the split indices below are byte offsets
        if !token.contains('-') && token.is_ascii() {
            for split in 1..token.len() {
                let candidate = format!("{}-{}", &token[..split], &token[split..]);
                if let Some(entry) = self.entries.get(candidate.as_str()) {
                    return entry.registration.clone();
                }
            }
        }

        token
    }
}

/// Extract the registration token from flight-plan remarks (`REG/D-AINA`)
pub fn registration_from_remarks(remarks: &str) -> Option<&str> {
    let start = remarks.find("REG/")? + 4;
    let rest = &remarks[start..];
    let token = rest
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or("");
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> FleetRegistry {
        FleetRegistry::from_entries(vec![
            FleetEntry {
                registration: "D-AINA".to_string(),
                aircraft_type: Some("A20N".to_string()),
                operator: None,
            },
            FleetEntry {
                registration: "N123AB".to_string(),
                aircraft_type: None,
                operator: None,
            },
        ])
    }

    #[test]
    fn test_normalize_exact_match() {
        assert_eq!(registry().normalize("d-aina"), "D-AINA");
        assert_eq!(registry().normalize("N123AB"), "N123AB");
    }

    #[test]
    fn test_normalize_hyphenated_variants() {
        // Raw token has no hyphen; the D-AINA split is the second variant tried
        assert_eq!(registry().normalize("DAINA"), "D-AINA");
    }

    #[test]
    fn test_normalize_falls_back_to_uppercased_token() {
        assert_eq!(registry().normalize("gxyzz"), "GXYZZ");
        assert_eq!(registry().normalize(""), "");
    }

    #[test]
    fn test_registration_from_remarks() {
        assert_eq!(
            registration_from_remarks("PBN/A1B1 REG/DAINA RMK/TCAS"),
            Some("DAINA")
        );
        assert_eq!(registration_from_remarks("REG/D-AINA"), Some("D-AINA"));
        assert_eq!(registration_from_remarks("RMK/NOTHING HERE"), None);
        assert_eq!(registration_from_remarks("REG/ trailing"), None);
    }

    #[test]
    fn test_registry_load_from_json() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"{"aircraft": [{"registration": "HB-SGU", "aircraft_type": "DISC"}]}"#,
        )
        .unwrap();
        let registry = FleetRegistry::load(file.path()).unwrap();
        assert_eq!(registry.normalize("hbsgu"), "HB-SGU");
        assert_eq!(
            registry.get("HB-SGU").unwrap().aircraft_type.as_deref(),
            Some("DISC")
        );
    }
}
