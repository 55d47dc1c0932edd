//! Prometheus metrics for tiercache.
//!
//! This module provides:
//! - Cache metrics (hits by tier, misses)
//! - Invalidation metrics (published, received, dropped, publish failures)
//! - Local expiration metrics

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tiercache_core::{Operator, Tier};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // Cache metrics
    pub const CACHE_HITS_TOTAL: &str = "tiercache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "tiercache_misses_total";
    pub const CACHE_LOADS_TOTAL: &str = "tiercache_loads_total";

    // Invalidation metrics
    pub const INVALIDATIONS_PUBLISHED_TOTAL: &str = "tiercache_invalidations_published_total";
    pub const INVALIDATIONS_RECEIVED_TOTAL: &str = "tiercache_invalidations_received_total";
    pub const INVALIDATIONS_DROPPED_TOTAL: &str = "tiercache_invalidations_dropped_total";
    pub const PUBLISH_FAILURES_TOTAL: &str = "tiercache_publish_failures_total";

    // Expiration metrics
    pub const LOCAL_EXPIRATIONS_TOTAL: &str = "tiercache_local_expirations_total";
}

/// Reasons an inbound invalidation message is not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Empty,
    Malformed,
    SelfOriginated,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Malformed => "malformed",
            Self::SelfOriginated => "self",
        }
    }
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

// =============================================================================
// Cache Metrics
// =============================================================================

/// Record a cache hit on the given tier.
pub fn record_cache_hit(tier: Tier) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier.as_str()).increment(1);
}

/// Record a miss on both tiers.
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record a loader invocation and whether it produced a value.
pub fn record_cache_load(loaded: bool) {
    let outcome = if loaded { "value" } else { "none" };
    counter!(names::CACHE_LOADS_TOTAL, "outcome" => outcome).increment(1);
}

// =============================================================================
// Invalidation Metrics
// =============================================================================

pub fn record_invalidation_published(operator: Operator) {
    counter!(names::INVALIDATIONS_PUBLISHED_TOTAL, "operator" => operator.as_str()).increment(1);
}

pub fn record_invalidation_received(operator: Operator) {
    counter!(names::INVALIDATIONS_RECEIVED_TOTAL, "operator" => operator.as_str()).increment(1);
}

pub fn record_invalidation_dropped(reason: DropReason) {
    counter!(names::INVALIDATIONS_DROPPED_TOTAL, "reason" => reason.as_str()).increment(1);
}

pub fn record_publish_failure() {
    counter!(names::PUBLISH_FAILURES_TOTAL).increment(1);
}

// =============================================================================
// Expiration Metrics
// =============================================================================

pub fn record_local_expirations(count: usize) {
    counter!(names::LOCAL_EXPIRATIONS_TOTAL).increment(count as u64);
}
