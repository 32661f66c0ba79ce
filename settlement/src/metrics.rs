// Prometheus metrics for the crowdfund engine
// Tracks: campaign lifecycle transitions, contribution flow, settlement failures

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge,
    Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Engine metrics on a private registry
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    // Lifecycle
    campaigns_initiated: IntCounter,
    campaigns_processed: IntCounter,
    campaigns_cancelled: IntCounter,
    open_campaigns: IntGauge,

    // Value flow
    contributions: IntCounter,

    // Settlement
    deployment_failures: IntCounter,
    refund_failures: IntCounter,
    settlement_duration_seconds: Histogram,
}

impl Metrics {
    /// Create metrics registered on a fresh registry
    pub fn new() -> crate::Result<Self> {
        let registry = Registry::new();

        let campaigns_initiated = register_int_counter_with_registry!(
            Opts::new("crowdfund_campaigns_initiated_total", "Campaigns opened"),
            registry
        )?;

        let campaigns_processed = register_int_counter_with_registry!(
            Opts::new(
                "crowdfund_campaigns_processed_total",
                "Campaigns converted into deployed groups"
            ),
            registry
        )?;

        let campaigns_cancelled = register_int_counter_with_registry!(
            Opts::new("crowdfund_campaigns_cancelled_total", "Campaigns cancelled and refunded"),
            registry
        )?;

        let open_campaigns = register_int_gauge_with_registry!(
            Opts::new("crowdfund_open_campaigns", "Campaigns currently open"),
            registry
        )?;

        let contributions = register_int_counter_with_registry!(
            Opts::new("crowdfund_contributions_total", "Accepted contributions"),
            registry
        )?;

        let deployment_failures = register_int_counter_with_registry!(
            Opts::new(
                "crowdfund_deployment_failures_total",
                "Group deployments that failed and were rolled back"
            ),
            registry
        )?;

        let refund_failures = register_int_counter_with_registry!(
            Opts::new(
                "crowdfund_refund_failures_total",
                "Refund transfers booked as unclaimed"
            ),
            registry
        )?;

        let settlement_duration_seconds = register_histogram_with_registry!(
            HistogramOpts::new(
                "crowdfund_settlement_duration_seconds",
                "Time spent in external deploy and refund calls"
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            registry
        )?;

        Ok(Self {
            registry: Arc::new(registry),
            campaigns_initiated,
            campaigns_processed,
            campaigns_cancelled,
            open_campaigns,
            contributions,
            deployment_failures,
            refund_failures,
            settlement_duration_seconds,
        })
    }

    pub(crate) fn record_initiated(&self) {
        self.campaigns_initiated.inc();
        self.open_campaigns.inc();
    }

    pub(crate) fn record_contribution(&self) {
        self.contributions.inc();
    }

    pub(crate) fn record_processed(&self, elapsed_secs: f64) {
        self.campaigns_processed.inc();
        self.open_campaigns.dec();
        self.settlement_duration_seconds.observe(elapsed_secs);
    }

    pub(crate) fn record_deployment_failure(&self, elapsed_secs: f64) {
        self.deployment_failures.inc();
        self.settlement_duration_seconds.observe(elapsed_secs);
    }

    pub(crate) fn record_cancelled(&self) {
        self.campaigns_cancelled.inc();
        self.open_campaigns.dec();
    }

    pub(crate) fn record_refunds(&self, failed: usize, elapsed_secs: f64) {
        self.refund_failures.inc_by(failed as u64);
        self.settlement_duration_seconds.observe(elapsed_secs);
    }

    /// Campaigns opened so far
    pub fn campaigns_initiated(&self) -> u64 {
        self.campaigns_initiated.get()
    }

    /// Campaigns processed so far
    pub fn campaigns_processed(&self) -> u64 {
        self.campaigns_processed.get()
    }

    /// Campaigns cancelled so far
    pub fn campaigns_cancelled(&self) -> u64 {
        self.campaigns_cancelled.get()
    }

    /// Campaigns currently open
    pub fn open_campaigns(&self) -> i64 {
        self.open_campaigns.get()
    }

    /// Accepted contributions so far
    pub fn contributions(&self) -> u64 {
        self.contributions.get()
    }

    /// Failed deployments so far
    pub fn deployment_failures(&self) -> u64 {
        self.deployment_failures.get()
    }

    /// Failed refund transfers so far
    pub fn refund_failures(&self) -> u64 {
        self.refund_failures.get()
    }

    /// Underlying registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render in the Prometheus text exposition format
    pub fn gather_text(&self) -> crate::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| crate::Error::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}
