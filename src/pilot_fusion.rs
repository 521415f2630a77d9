//! Per-cycle pilot fusion
//!
//! Merges the new feed snapshot against the previous cycle's cached pilot
//! collection: every feed entry ends up represented exactly once, cached
//! records are refreshed in place, new identities get fresh records, and
//! identities missing from the feed fall out (the delta engine reports them
//! deleted). Coordinate resolution is batched: one catalog call per cycle
//! over the deduplicated set of unresolved airport codes.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::catalog::AirportCatalog;
use crate::feed::FeedPilot;
use crate::fleet::{registration_from_remarks, FleetRegistry};
use crate::phase::{enroute_minutes, TimesBlock};
use crate::pilot::{pilot_identity, PilotRecord};

/// Fuse one feed snapshot with the previous cycle's pilot cache.
///
/// Panics if two feed entries map to the same identity: that breaks the
/// identity contract every downstream consumer depends on and is a
/// programmer error, not input noise.
pub async fn fuse_pilots(
    feed_pilots: &[FeedPilot],
    previous: &HashMap<String, PilotRecord>,
    catalog: &dyn AirportCatalog,
    fleet: &FleetRegistry,
    now: DateTime<Utc>,
) -> Result<HashMap<String, PilotRecord>> {
    let mut fused: HashMap<String, PilotRecord> = HashMap::with_capacity(feed_pilots.len());
    let mut created = 0u64;
    let mut refreshed = 0u64;

    for feed_pilot in feed_pilots {
        let id = pilot_identity(feed_pilot.cid, &feed_pilot.callsign, feed_pilot.logon_time);

        let mut record = match previous.get(&id) {
            Some(cached) => {
                let mut record = cached.clone();
                record.merge_feed(feed_pilot);
                refreshed += 1;
                record
            }
            None => {
                created += 1;
                PilotRecord::from_feed(feed_pilot)
            }
        };

        // Normalize the remarks registration once per plan
        if let Some(plan) = record.flight_plan.as_mut() {
            if plan.registration.is_none() {
                if let Some(token) = registration_from_remarks(&plan.remarks) {
                    plan.registration = Some(fleet.normalize(token));
                }
            }
        }

        if fused.insert(id.clone(), record).is_some() {
            panic!("identity contract violation: duplicate pilot identity {id} in one snapshot");
        }
    }

    resolve_coordinates(&mut fused, catalog).await;

    // Re-evaluate the times block unconditionally: step cached machines,
    // create machines for records seen (or resolved) for the first time
    for record in fused.values_mut() {
        let sample = record.sample();
        let route = record.route_geo();
        let plan_times = record
            .flight_plan
            .as_ref()
            .map(|plan| (plan.deptime.clone(), plan.enroute_time.clone()));

        if let Some((deptime, enroute)) = plan_times {
            match record.times.as_mut() {
                Some(times) => {
                    times.step(now, &sample, &route, enroute_minutes(&enroute).unwrap_or(0));
                }
                None => {
                    record.times = Some(TimesBlock::new(now, &deptime, &enroute, &sample, &route));
                }
            }
        }
    }

    metrics::counter!("stratus.pilots.created").increment(created);
    metrics::counter!("stratus.pilots.refreshed").increment(refreshed);
    metrics::gauge!("stratus.pilots.fused").set(fused.len() as f64);
    debug!(
        "Fused {} pilots ({} new, {} refreshed, {} dropped)",
        fused.len(),
        created,
        refreshed,
        previous.len().saturating_sub(refreshed as usize)
    );

    Ok(fused)
}

/// Resolve missing flight-plan coordinates with one batched catalog call.
/// A failed batch (or individual misses) leaves coordinates unresolved;
/// the estimators degrade gracefully without them.
async fn resolve_coordinates(fused: &mut HashMap<String, PilotRecord>, catalog: &dyn AirportCatalog) {
    let mut unresolved: HashSet<String> = HashSet::new();
    for record in fused.values() {
        if let Some(plan) = &record.flight_plan {
            if plan.departure_coords.is_none() && !plan.departure.is_empty() {
                unresolved.insert(plan.departure.clone());
            }
            if plan.arrival_coords.is_none() && !plan.arrival.is_empty() {
                unresolved.insert(plan.arrival.clone());
            }
            if plan.alternate_coords.is_none() && !plan.alternate.is_empty() {
                unresolved.insert(plan.alternate.clone());
            }
        }
    }

    if unresolved.is_empty() {
        return;
    }

    let mut idents: Vec<String> = unresolved.into_iter().collect();
    idents.sort();

    let found = match catalog.lookup_batch(&idents).await {
        Ok(found) => found,
        Err(e) => {
            warn!("Airport catalog batch lookup failed, coordinates stay unresolved: {e:#}");
            return;
        }
    };

    for record in fused.values_mut() {
        if let Some(plan) = record.flight_plan.as_mut() {
            if plan.departure_coords.is_none() {
                if let Some(info) = found.get(&plan.departure) {
                    plan.departure_coords = Some((info.latitude, info.longitude));
                }
            }
            if plan.arrival_coords.is_none() {
                if let Some(info) = found.get(&plan.arrival) {
                    plan.arrival_coords = Some((info.latitude, info.longitude));
                }
            }
            if plan.alternate_coords.is_none() {
                if let Some(info) = found.get(&plan.alternate) {
                    plan.alternate_coords = Some((info.latitude, info.longitude));
                }
            }
        }
    }
}
