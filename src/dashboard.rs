//! Dashboard statistics
//!
//! Top-N summaries recomputed each cycle from the fused snapshot.
//! Read-only consumer: nothing here feeds back into the caches.

use serde::Serialize;
use std::collections::HashMap;

use crate::airport::AirportRecord;
use crate::controller::MergedController;
use crate::pilot::PilotRecord;

const TOP_N: usize = 5;

/// A ranked label/count pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankEntry {
    pub name: String,
    pub count: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardStats {
    pub busiest_airports: Vec<RankEntry>,
    pub quietest_airports: Vec<RankEntry>,
    pub busiest_routes: Vec<RankEntry>,
    pub top_aircraft: Vec<RankEntry>,
    pub busiest_controllers: Vec<RankEntry>,
}

/// Top N by descending count; name breaks ties so output is stable
fn top_n(counts: HashMap<String, u32>, n: usize) -> Vec<RankEntry> {
    let mut entries: Vec<RankEntry> = counts
        .into_iter()
        .map(|(name, count)| RankEntry { name, count })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    entries.truncate(n);
    entries
}

/// Bottom N by ascending count
fn bottom_n(counts: HashMap<String, u32>, n: usize) -> Vec<RankEntry> {
    let mut entries: Vec<RankEntry> = counts
        .into_iter()
        .map(|(name, count)| RankEntry { name, count })
        .collect();
    entries.sort_by(|a, b| a.count.cmp(&b.count).then_with(|| a.name.cmp(&b.name)));
    entries.truncate(n);
    entries
}

pub fn compute_dashboard(
    pilots: &HashMap<String, PilotRecord>,
    controllers: &HashMap<String, MergedController>,
    airports: &HashMap<String, AirportRecord>,
) -> DashboardStats {
    let airport_movements: HashMap<String, u32> = airports
        .values()
        .map(|a| (a.icao.clone(), a.departures.count + a.arrivals.count))
        .collect();

    let mut route_counts: HashMap<String, u32> = HashMap::new();
    let mut aircraft_counts: HashMap<String, u32> = HashMap::new();
    for pilot in pilots.values() {
        if let Some(plan) = &pilot.flight_plan {
            if let Some(route) = plan.route_key() {
                *route_counts.entry(route).or_insert(0) += 1;
            }
            *aircraft_counts.entry(plan.aircraft.clone()).or_insert(0) += 1;
        }
    }

    let controller_counts: HashMap<String, u32> = controllers
        .values()
        .map(|group| (group.id.clone(), group.connections()))
        .collect();

    DashboardStats {
        busiest_airports: top_n(airport_movements.clone(), TOP_N),
        quietest_airports: bottom_n(airport_movements, TOP_N),
        busiest_routes: top_n(route_counts, TOP_N),
        top_aircraft: top_n(aircraft_counts, TOP_N),
        busiest_controllers: top_n(controller_counts, TOP_N),
    }
}
