//! Prometheus metrics for the Opal node.
//!
//! The [`NodeMetrics`] struct owns a dedicated [`Registry`] that a
//! metrics endpoint can encode into the Prometheus text exposition
//! format.

use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, IntCounter, IntGauge,
    Opts, Registry,
};

/// Central collection of all node-level Prometheus metrics.
pub struct NodeMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Total blocks accepted and persisted.
    pub blocks_accepted: IntCounter,
    /// Total consensus rounds started.
    pub rounds_started: IntCounter,
    /// Total certificates received from agreement.
    pub certificates_received: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Current chain tip height.
    pub tip_height: IntGauge,
    /// Highest block height seen from the network.
    pub highest_seen: IntGauge,
    /// Current number of connected peers.
    pub peer_count: IntGauge,
}

impl NodeMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        let blocks_accepted = register_int_counter_with_registry!(
            Opts::new("opal_blocks_accepted_total", "Total blocks accepted"),
            registry
        )
        .expect("failed to register blocks_accepted counter");

        let rounds_started = register_int_counter_with_registry!(
            Opts::new("opal_rounds_started_total", "Total consensus rounds started"),
            registry
        )
        .expect("failed to register rounds_started counter");

        let certificates_received = register_int_counter_with_registry!(
            Opts::new(
                "opal_certificates_received_total",
                "Total certificates received from agreement"
            ),
            registry
        )
        .expect("failed to register certificates_received counter");

        let tip_height = register_int_gauge_with_registry!(
            Opts::new("opal_tip_height", "Current chain tip height"),
            registry
        )
        .expect("failed to register tip_height gauge");

        let highest_seen = register_int_gauge_with_registry!(
            Opts::new("opal_highest_seen", "Highest block height seen from peers"),
            registry
        )
        .expect("failed to register highest_seen gauge");

        let peer_count = register_int_gauge_with_registry!(
            Opts::new("opal_peer_count", "Current number of connected peers"),
            registry
        )
        .expect("failed to register peer_count gauge");

        Self {
            registry,
            blocks_accepted,
            rounds_started,
            certificates_received,
            tip_height,
            highest_seen,
            peer_count,
        }
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
