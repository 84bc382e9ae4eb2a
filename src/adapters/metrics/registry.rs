//! Metrics Registry Handle
//!
//! Shared-ownership handle over a prometheus [`Registry`]. The handle
//! is built once at startup and passed explicitly to every adapter;
//! the process-wide default registry is only used when asked for.

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::Registry;
use tracing::warn;

use crate::error::ExporterError;

/// Registry shared by the server layer, the client hooks and the
/// `/metrics` handler.
///
/// Cloning is cheap and every clone refers to the same series.
#[derive(Clone)]
pub struct MetricsRegistry {
    /// Underlying prometheus registry.
    inner: Registry,
}

impl MetricsRegistry {
    /// Create an isolated registry.
    pub fn new() -> Self {
        Self {
            inner: Registry::new(),
        }
    }

    /// Handle to prometheus' process-wide default registry.
    pub fn global() -> Self {
        Self {
            inner: prometheus::default_registry().clone(),
        }
    }

    /// Register a collector.
    ///
    /// Fails with `AlreadyReg` if a collector with the same
    /// descriptors is already present.
    pub fn register(&self, collector: Box<dyn Collector>) -> Result<(), ExporterError> {
        self.inner.register(collector)?;
        Ok(())
    }

    /// Register a set of collectors as one unit.
    ///
    /// If any collector is rejected, the ones registered before it are
    /// removed again, so the registry is left as it was and a retry
    /// with a fixed configuration can succeed.
    pub fn register_all(&self, collectors: Vec<Box<dyn Collector>>) -> Result<(), ExporterError> {
        let mut registered: Vec<Registered> = Vec::with_capacity(collectors.len());
        for collector in collectors {
            let descs = Registered(collector.desc().into_iter().cloned().collect());
            if let Err(e) = self.inner.register(collector) {
                for done in registered.into_iter().rev() {
                    if let Err(undo) = self.inner.unregister(Box::new(done)) {
                        warn!(error = %undo, "Failed to roll back collector registration");
                    }
                }
                return Err(e.into());
            }
            registered.push(descs);
        }
        Ok(())
    }

    /// Snapshot every registered family.
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.inner.gather()
    }

    /// Borrow the prometheus registry, e.g. to register
    /// application-specific collectors next to ours.
    pub const fn inner(&self) -> &Registry {
        &self.inner
    }
}

/// Descriptors of a registered collector. The registry identifies
/// collectors by descriptor, so this is enough to unregister one.
struct Registered(Vec<Desc>);

impl Collector for Registered {
    fn desc(&self) -> Vec<&Desc> {
        self.0.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        Vec::new()
    }
}

impl Default for MetricsRegistry {
    /// Defaults to the process-wide registry.
    fn default() -> Self {
        Self::global()
    }
}

impl From<Registry> for MetricsRegistry {
    fn from(inner: Registry) -> Self {
        Self { inner }
    }
}
