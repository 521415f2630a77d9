//! Airport coordinate catalog
//!
//! Batched ICAO → coordinates lookup used to lazily resolve flight-plan
//! geometry. The pipeline collects every unresolved code across the whole
//! snapshot and issues one batch per cycle. Individual misses are simply
//! absent from the result; they never fail the batch.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Static airport reference record
#[derive(Debug, Clone)]
pub struct AirportInfo {
    pub ident: String,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_ft: Option<i32>,
}

/// Batched key→record lookup by ICAO code
#[async_trait]
pub trait AirportCatalog: Send + Sync {
    async fn lookup_batch(&self, idents: &[String]) -> Result<HashMap<String, AirportInfo>>;
}

/// OurAirports CSV row; only the columns the catalog needs
#[derive(Debug, Deserialize)]
struct CsvAirportRow {
    ident: String,
    latitude_deg: Option<f64>,
    longitude_deg: Option<f64>,
    elevation_ft: Option<i32>,
}

/// Catalog backed by the OurAirports `airports.csv` dump, loaded once at
/// start-up and served from memory.
pub struct CsvAirportCatalog {
    airports: HashMap<String, AirportInfo>,
}

impl CsvAirportCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open airport catalog {:?}", path))?;

        let mut airports = HashMap::new();
        for row in reader.deserialize() {
            let row: CsvAirportRow = match row {
                Ok(row) => row,
                // OurAirports carries the odd malformed line; skip it
                Err(_) => continue,
            };
            let (latitude, longitude) = match (row.latitude_deg, row.longitude_deg) {
                (Some(lat), Some(lon)) => (lat, lon),
                _ => continue,
            };
            let ident = row.ident.trim().to_uppercase();
            if ident.is_empty() {
                continue;
            }
            airports.insert(
                ident.clone(),
                AirportInfo {
                    ident,
                    latitude,
                    longitude,
                    elevation_ft: row.elevation_ft,
                },
            );
        }

        info!("Loaded {} airports from {:?}", airports.len(), path);
        Ok(Self { airports })
    }

    /// Build directly from records; used by tests and embedding processes
    /// that source reference data elsewhere.
    pub fn from_entries(entries: Vec<AirportInfo>) -> Self {
        let airports = entries
            .into_iter()
            .map(|info| (info.ident.clone(), info))
            .collect();
        Self { airports }
    }

    pub fn len(&self) -> usize {
        self.airports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.airports.is_empty()
    }
}

#[async_trait]
impl AirportCatalog for CsvAirportCatalog {
    async fn lookup_batch(&self, idents: &[String]) -> Result<HashMap<String, AirportInfo>> {
        let mut found = HashMap::new();
        for ident in idents {
            if let Some(info) = self.airports.get(ident.as_str()) {
                found.insert(ident.clone(), info.clone());
            }
        }
        metrics::counter!("stratus.catalog.lookups").increment(idents.len() as u64);
        metrics::counter!("stratus.catalog.misses").increment((idents.len() - found.len()) as u64);
        Ok(found)
    }
}
