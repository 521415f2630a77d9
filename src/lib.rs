//! STRATUS - snapshot fusion for flight-simulation network data
//!
//! Pulls the network's periodic full-snapshot feed and fuses each snapshot
//! against the previous cycle's cached state: a flight-phase state machine
//! per pilot, nearest-transceiver controller assignment, hierarchical
//! sector merging and per-airport traffic aggregation, with a minimal
//! added/updated/deleted delta per entity family for push distribution.

pub mod airport;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod controller_assign;
pub mod dashboard;
pub mod delta;
pub mod feed;
pub mod fleet;
pub mod geo;
pub mod metrics_server;
pub mod phase;
pub mod pilot;
pub mod pilot_fusion;
pub mod pipeline;
pub mod sector;
pub mod weather;

pub use delta::{compute_delta, Delta, Snapshot};
pub use feed::{FeedSnapshot, FeedSource, HttpFeedSource};
pub use phase::FlightPhase;
pub use pilot::PilotRecord;
pub use pipeline::{CycleOutput, Pipeline};
