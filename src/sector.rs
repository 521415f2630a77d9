//! Sector merging
//!
//! Groups raw controller sessions into logical sectors. Center sessions
//! resolve through a FIR prefix table and approach sessions through a
//! TRACON prefix table, both built from versioned reference boundary data;
//! airport positions (delivery/ground/tower/ATIS) group directly by their
//! top callsign segment. Tables are rebuilt only when the upstream version
//! marker changes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::controller::{ControllerRecord, Facility, MergedController, SectorKind};

/// One boundary polygon's registration entry. The polygon geometry itself
/// stays with the map layer; the merger only needs id and prefixes.
#[derive(Debug, Clone, Deserialize)]
pub struct BoundaryFeature {
    pub id: String,
    /// Dash-delimited callsign prefixes registered for this boundary.
    /// Empty means the boundary's own id is its prefix.
    #[serde(default)]
    pub prefix: String,
}

/// A versioned collection of boundary registrations
#[derive(Debug, Clone, Deserialize)]
pub struct BoundaryDocument {
    pub version: String,
    #[serde(default)]
    pub boundaries: Vec<BoundaryFeature>,
}

/// Source of FIR and TRACON boundary documents
#[async_trait]
pub trait BoundarySource: Send + Sync {
    async fn fir_boundaries(&self) -> Result<BoundaryDocument>;
    async fn tracon_boundaries(&self) -> Result<BoundaryDocument>;
}

/// HTTP source fetching the two reference documents as JSON
pub struct HttpBoundarySource {
    client: reqwest::Client,
    fir_url: String,
    tracon_url: String,
}

impl HttpBoundarySource {
    pub fn new(client: reqwest::Client, fir_url: String, tracon_url: String) -> Self {
        Self {
            client,
            fir_url,
            tracon_url,
        }
    }

    async fn fetch(&self, url: &str) -> Result<BoundaryDocument> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch boundary data from {}", url))?
            .error_for_status()
            .context("Boundary endpoint returned an error status")?;
        response
            .json()
            .await
            .context("Failed to decode boundary JSON")
    }
}

#[async_trait]
impl BoundarySource for HttpBoundarySource {
    async fn fir_boundaries(&self) -> Result<BoundaryDocument> {
        self.fetch(&self.fir_url).await
    }

    async fn tracon_boundaries(&self) -> Result<BoundaryDocument> {
        self.fetch(&self.tracon_url).await
    }
}

/// Prefix lookup tables for FIR and TRACON resolution
#[derive(Debug, Default)]
pub struct PrefixTables {
    fir: HashMap<String, String>,
    tracon: HashMap<String, String>,
    fir_version: Option<String>,
    tracon_version: Option<String>,
}

fn build_table(boundaries: &[BoundaryFeature]) -> HashMap<String, String> {
    let mut table = HashMap::new();
    for boundary in boundaries {
        if boundary.prefix.is_empty() {
            table.insert(boundary.id.clone(), boundary.id.clone());
        } else {
            for prefix in boundary.prefix.split('-') {
                table.insert(prefix.to_string(), boundary.id.clone());
            }
        }
    }
    table
}

impl PrefixTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh both tables from the source, rebuilding only the ones whose
    /// version marker changed. Fetch failures keep the cached tables.
    pub async fn refresh(&mut self, source: &dyn BoundarySource) {
        match source.fir_boundaries().await {
            Ok(document) => {
                if self.fir_version.as_deref() != Some(document.version.as_str()) {
                    self.fir = build_table(&document.boundaries);
                    info!(
                        "Rebuilt FIR prefix table: version {}, {} entries",
                        document.version,
                        self.fir.len()
                    );
                    self.fir_version = Some(document.version);
                }
            }
            Err(e) => warn!("FIR boundary refresh failed, keeping cached table: {e:#}"),
        }

        match source.tracon_boundaries().await {
            Ok(document) => {
                if self.tracon_version.as_deref() != Some(document.version.as_str()) {
                    self.tracon = build_table(&document.boundaries);
                    info!(
                        "Rebuilt TRACON prefix table: version {}, {} entries",
                        document.version,
                        self.tracon.len()
                    );
                    self.tracon_version = Some(document.version);
                }
            }
            Err(e) => warn!("TRACON boundary refresh failed, keeping cached table: {e:#}"),
        }
    }

    /// Longest-first underscore-prefix lookup
    fn resolve(table: &HashMap<String, String>, callsign: &str) -> Option<String> {
        let segments: Vec<&str> = callsign.split('_').collect();
        for take in (1..=segments.len()).rev() {
            let candidate = segments[..take].join("_");
            if let Some(id) = table.get(candidate.as_str()) {
                return Some(id.clone());
            }
        }
        None
    }

    pub fn resolve_fir(&self, callsign: &str) -> Option<String> {
        Self::resolve(&self.fir, callsign)
    }

    pub fn resolve_tracon(&self, callsign: &str) -> Option<String> {
        Self::resolve(&self.tracon, callsign)
    }
}

/// Map raw sessions into merged sector groups.
///
/// Every session lands in exactly one group or is dropped: center/approach
/// sessions whose callsign resolves through no table, plus observers and
/// flight-service sessions (no sector of their own), fall out of the
/// cycle's merged output.
pub fn merge_sessions(
    sessions: Vec<ControllerRecord>,
    tables: &PrefixTables,
) -> HashMap<String, MergedController> {
    let mut groups: HashMap<String, MergedController> = HashMap::new();
    let mut dropped = 0u64;

    for session in sessions {
        let target = if session.is_atis {
            Some((SectorKind::Airport, session.callsign_prefix().to_string()))
        } else {
            match session.facility {
                Facility::Center => tables
                    .resolve_fir(&session.callsign)
                    .map(|id| (SectorKind::Fir, id)),
                Facility::Approach => tables
                    .resolve_tracon(&session.callsign)
                    .map(|id| (SectorKind::Tracon, id)),
                Facility::Delivery | Facility::Ground | Facility::Tower => {
                    Some((SectorKind::Airport, session.callsign_prefix().to_string()))
                }
                Facility::Observer | Facility::FlightService => None,
            }
        };

        match target {
            Some((kind, code)) => {
                let id = kind.id_for(&code);
                groups
                    .entry(id.clone())
                    .or_insert_with(|| MergedController {
                        id,
                        kind,
                        sessions: Vec::new(),
                    })
                    .sessions
                    .push(session);
            }
            None => {
                debug!("Dropping session {} (no sector match)", session.callsign);
                dropped += 1;
            }
        }
    }

    // Stable member order so group diffs do not flap with input order
    for group in groups.values_mut() {
        group.sessions.sort_by(|a, b| a.callsign.cmp(&b.callsign));
    }

    metrics::counter!("stratus.sectors.sessions_dropped").increment(dropped);
    metrics::gauge!("stratus.sectors.groups").set(groups.len() as f64);

    groups
}
