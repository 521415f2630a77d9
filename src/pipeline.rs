//! Cycle orchestration
//!
//! One `Pipeline` owns every previous-cycle cache and runs the
//! pull-fuse-diff pass: pilot fusion first, then controller assignment and
//! sector merging (both consume the fused pilots), then airport
//! aggregation, then one delta per entity family. Caches are read once at
//! cycle start and replaced once at cycle end, after the whole new
//! snapshot is assembled; a cycle that fails partway leaves them
//! untouched. Cycles never overlap: the caller drives them sequentially.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::airport::{aggregate_airports, AirportRecord};
use crate::catalog::AirportCatalog;
use crate::controller::{ControllerRecord, MergedController};
use crate::controller_assign::connection_counts;
use crate::dashboard::{compute_dashboard, DashboardStats};
use crate::delta::{compute_delta, Delta};
use crate::feed::{FeedSource, TransceiverMap};
use crate::fleet::FleetRegistry;
use crate::pilot::PilotRecord;
use crate::pilot_fusion::fuse_pilots;
use crate::sector::{merge_sessions, BoundarySource, PrefixTables};
use crate::weather::WeatherCache;

/// Everything one cycle produces: deltas for the push layer, full fused
/// collections for the persistence layer, dashboard statistics for the UI.
#[derive(Debug, Serialize)]
pub struct CycleOutput {
    pub feed_timestamp: DateTime<Utc>,
    pub pilots: Delta<PilotRecord>,
    pub controllers: Delta<MergedController>,
    pub airports: Delta<AirportRecord>,
    pub dashboard: DashboardStats,
    pub fused_pilots: HashMap<String, PilotRecord>,
    pub fused_controllers: HashMap<String, MergedController>,
    pub fused_airports: HashMap<String, AirportRecord>,
}

pub struct Pipeline {
    feed: Arc<dyn FeedSource>,
    boundaries: Arc<dyn BoundarySource>,
    catalog: Arc<dyn AirportCatalog>,
    fleet: FleetRegistry,
    weather: Arc<WeatherCache>,
    tables: PrefixTables,
    previous_pilots: HashMap<String, PilotRecord>,
    previous_controllers: HashMap<String, MergedController>,
    previous_airports: HashMap<String, AirportRecord>,
    last_feed_timestamp: Option<DateTime<Utc>>,
}

impl Pipeline {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        boundaries: Arc<dyn BoundarySource>,
        catalog: Arc<dyn AirportCatalog>,
        fleet: FleetRegistry,
        weather: Arc<WeatherCache>,
    ) -> Self {
        Self {
            feed,
            boundaries,
            catalog,
            fleet,
            weather,
            tables: PrefixTables::new(),
            previous_pilots: HashMap::new(),
            previous_controllers: HashMap::new(),
            previous_airports: HashMap::new(),
            last_feed_timestamp: None,
        }
    }

    /// Run one pull-fuse-diff cycle.
    ///
    /// Returns `Ok(None)` when the feed still serves the previous
    /// snapshot (nothing to fuse, caches untouched). Feed fetch failure
    /// is the only error path out; everything downstream degrades instead
    /// of failing.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<Option<CycleOutput>> {
        let cycle_start = std::time::Instant::now();

        let snapshot = self.feed.fetch_snapshot().await?;
        let feed_timestamp = snapshot.general.update_timestamp;
        if self.last_feed_timestamp == Some(feed_timestamp) {
            debug!("Feed snapshot unchanged ({}), skipping cycle", feed_timestamp);
            metrics::counter!("stratus.cycle.skipped_stale").increment(1);
            return Ok(None);
        }

        let transceivers = match self.feed.fetch_transceivers().await {
            Ok(transceivers) => transceivers,
            Err(e) => {
                // Shared frequencies fall back to single-session
                // assignment without positions
                warn!("Transceiver fetch failed, assigning without positions: {e:#}");
                TransceiverMap::new()
            }
        };

        self.tables.refresh(&*self.boundaries).await;

        let fused_pilots = fuse_pilots(
            &snapshot.pilots,
            &self.previous_pilots,
            &*self.catalog,
            &self.fleet,
            now,
        )
        .await?;

        let mut sessions: Vec<ControllerRecord> = snapshot
            .controllers
            .iter()
            .map(|session| ControllerRecord::from_feed(session, false))
            .chain(
                snapshot
                    .atis
                    .iter()
                    .map(|session| ControllerRecord::from_feed(session, true)),
            )
            .collect();

        let counts = connection_counts(&sessions, &fused_pilots, &transceivers);
        for session in &mut sessions {
            session.connections = counts.get(&session.callsign).copied().unwrap_or(0);
        }
        let fused_controllers = merge_sessions(sessions, &self.tables);

        // Read-after-swap: one consistent weather view for the whole pass
        let weather_snapshot = self.weather.snapshot().await;
        let fused_airports = aggregate_airports(&fused_pilots, &weather_snapshot);

        let pilots = compute_delta(&self.previous_pilots, &fused_pilots);
        let controllers = compute_delta(&self.previous_controllers, &fused_controllers);
        let airports = compute_delta(&self.previous_airports, &fused_airports);
        let dashboard = compute_dashboard(&fused_pilots, &fused_controllers, &fused_airports);

        // The new snapshot is fully assembled; only now swap the caches
        self.previous_pilots = fused_pilots.clone();
        self.previous_controllers = fused_controllers.clone();
        self.previous_airports = fused_airports.clone();
        self.last_feed_timestamp = Some(feed_timestamp);

        metrics::histogram!("stratus.cycle.duration_ms")
            .record(cycle_start.elapsed().as_micros() as f64 / 1000.0);
        metrics::counter!("stratus.cycle.completed").increment(1);
        info!(
            "Cycle {} fused {} pilots / {} sectors / {} airports (+{} ~{} -{} pilot changes)",
            feed_timestamp,
            fused_pilots.len(),
            fused_controllers.len(),
            fused_airports.len(),
            pilots.added.len(),
            pilots.updated.len(),
            pilots.deleted.len(),
        );

        Ok(Some(CycleOutput {
            feed_timestamp,
            pilots,
            controllers,
            airports,
            dashboard,
            fused_pilots,
            fused_controllers,
            fused_airports,
        }))
    }

    /// Number of pilots currently cached; exposed for status reporting
    pub fn cached_pilots(&self) -> usize {
        self.previous_pilots.len()
    }

    /// Tear the pipeline down. Caches are process state only, so this is
    /// just a visible end-of-life marker for the logs.
    pub fn shutdown(self) {
        info!(
            "Pipeline shut down ({} pilots, {} sectors, {} airports cached)",
            self.previous_pilots.len(),
            self.previous_controllers.len(),
            self.previous_airports.len()
        );
    }
}
