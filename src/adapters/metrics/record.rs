//! Recording helpers shared by the server layer and the client hooks.
//!
//! A failed lookup (label arity mismatch) is logged and dropped; it
//! must never reach the request path.

use prometheus::{HistogramVec, IntCounterVec, IntGaugeVec};
use tracing::warn;

pub(crate) fn inc(counter: &IntCounterVec, labels: &[&str]) {
    match counter.get_metric_with_label_values(labels) {
        Ok(series) => series.inc(),
        Err(e) => warn!(error = %e, ?labels, "Dropping counter increment"),
    }
}

pub(crate) fn inc_by(counter: &IntCounterVec, labels: &[&str], amount: u64) {
    match counter.get_metric_with_label_values(labels) {
        Ok(series) => series.inc_by(amount),
        Err(e) => warn!(error = %e, ?labels, "Dropping counter increment"),
    }
}

pub(crate) fn observe(histogram: &HistogramVec, labels: &[&str], seconds: f64) {
    match histogram.get_metric_with_label_values(labels) {
        Ok(series) => series.observe(seconds),
        Err(e) => warn!(error = %e, ?labels, "Dropping histogram observation"),
    }
}

pub(crate) fn gauge_add(gauge: &IntGaugeVec, labels: &[&str], delta: i64) {
    match gauge.get_metric_with_label_values(labels) {
        Ok(series) => series.add(delta),
        Err(e) => warn!(error = %e, ?labels, "Dropping gauge update"),
    }
}
