//! Process-wide counters exposed on `/metrics`.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    pub events_total: AtomicU64,
    pub analyses_total: AtomicU64,
    pub cache_hits_total: AtomicU64,
    pub cache_misses_total: AtomicU64,
    pub service_failures_total: AtomicU64,
    pub deliveries_failed_total: AtomicU64,
    pub stale_discarded_total: AtomicU64,
}

impl Metrics {
    /// Prometheus text exposition of every counter.
    pub fn render(&self, buf: &mut String) {
        let counters: [(&str, &str, &AtomicU64); 7] = [
            (
                "safesurf_events_total",
                "Browser events received",
                &self.events_total,
            ),
            (
                "safesurf_analyses_total",
                "Pipeline invocations for analyzable URLs",
                &self.analyses_total,
            ),
            (
                "safesurf_cache_hits_total",
                "Verdicts served from the result cache",
                &self.cache_hits_total,
            ),
            (
                "safesurf_cache_misses_total",
                "Verdicts requested from the analysis service",
                &self.cache_misses_total,
            ),
            (
                "safesurf_service_failures_total",
                "Analysis requests that failed or timed out",
                &self.service_failures_total,
            ),
            (
                "safesurf_deliveries_failed_total",
                "Content messages that could not be delivered",
                &self.deliveries_failed_total,
            ),
            (
                "safesurf_stale_discarded_total",
                "Results dropped because a newer navigation superseded them",
                &self.stale_discarded_total,
            ),
        ];
        for (name, help, value) in counters {
            writeln!(buf, "# HELP {} {}", name, help).ok();
            writeln!(buf, "# TYPE {} counter", name).ok();
            writeln!(buf, "{} {}", name, value.load(Ordering::Relaxed)).ok();
        }
    }
}
