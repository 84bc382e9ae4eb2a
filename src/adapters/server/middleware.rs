//! Server Middleware - Inbound Request Metrics
//!
//! A tower [`Layer`] timing and counting every request that passes
//! through it. Works on any `Service<Request<B>, Response = Response<R>>`,
//! so it sits in an axum `Router::layer` chain as well as in front of a
//! plain tower service.
//!
//! Per request the layer records exactly one `requests_total`
//! increment and one `request_duration_seconds` observation, whatever
//! the outcome: a response, an error, a panic, or the future being
//! dropped. Responses and errors are handed back untouched; panics are
//! observed and then resumed with the original payload.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::http::{Request, Response};
use futures_util::future::{BoxFuture, FutureExt};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts};
use tower::{Layer, Service};
use tracing::{debug, instrument};

use super::path::{MatchedPathLabel, PathLabel};
use crate::adapters::metrics::record;
use crate::adapters::metrics::MetricsRegistry;
use crate::config::ServerMetricsConfig;
use crate::domain::labels::{
    method_label, short_type_name, StatusLabel, EXCEPTION_PANIC, STATUS_CANCELLED,
};
use crate::error::ExporterError;

/// Inbound request series, registered once per registry.
///
/// All families are named `{prefix}_*`:
/// - `requests_total{method, path, status}`
/// - `request_duration_seconds{method, path, status}`
/// - `requests_in_progress{method, path}`
/// - `exceptions_total{method, path, exception_type}`
#[derive(Clone)]
pub struct ServerMetrics {
    /// Completed requests.
    requests: IntCounterVec,
    /// Request latency in seconds.
    duration: HistogramVec,
    /// Requests currently being processed.
    in_progress: IntGaugeVec,
    /// Errors and panics raised by the wrapped service.
    exceptions: IntCounterVec,
    /// Status label granularity.
    status_label: StatusLabel,
    /// Label for requests that matched no route.
    unmatched_path: String,
}

impl ServerMetrics {
    /// Validate `config` and register all server families.
    ///
    /// Registering twice on one registry fails with `AlreadyReg`. On
    /// failure no family is left behind.
    #[instrument(skip(registry))]
    pub fn register(
        registry: &MetricsRegistry,
        config: &ServerMetricsConfig,
    ) -> Result<Self, ExporterError> {
        config.validate()?;
        let prefix = &config.prefix;

        let requests = IntCounterVec::new(
            Opts::new(
                format!("{prefix}_requests_total"),
                "Total requests by method, path template and status.",
            ),
            &["method", "path", "status"],
        )?;

        let duration = HistogramVec::new(
            HistogramOpts::new(
                format!("{prefix}_request_duration_seconds"),
                "Request processing time by method, path template and status (seconds).",
            )
            .buckets(config.buckets.clone()),
            &["method", "path", "status"],
        )?;

        let in_progress = IntGaugeVec::new(
            Opts::new(
                format!("{prefix}_requests_in_progress"),
                "Requests currently being processed by method and path template.",
            ),
            &["method", "path"],
        )?;

        let exceptions = IntCounterVec::new(
            Opts::new(
                format!("{prefix}_exceptions_total"),
                "Errors raised by the wrapped service by method, path template and type.",
            ),
            &["method", "path", "exception_type"],
        )?;

        registry.register_all(vec![
            Box::new(requests.clone()),
            Box::new(duration.clone()),
            Box::new(in_progress.clone()),
            Box::new(exceptions.clone()),
        ])?;

        debug!(prefix = %prefix, "Server metrics registered");

        Ok(Self {
            requests,
            duration,
            in_progress,
            exceptions,
            status_label: config.status_label,
            unmatched_path: config.unmatched_path.clone(),
        })
    }

    /// Layer labeling paths by axum's matched route template.
    pub fn layer(&self) -> PrometheusLayer {
        PrometheusLayer {
            metrics: self.clone(),
            path_label: Arc::new(MatchedPathLabel::new(self.unmatched_path.clone())),
        }
    }
}

/// [`Layer`] installing [`PrometheusService`].
#[derive(Clone)]
pub struct PrometheusLayer {
    metrics: ServerMetrics,
    path_label: Arc<dyn PathLabel>,
}

impl PrometheusLayer {
    /// Replace the path label strategy.
    #[must_use]
    pub fn with_path_label(mut self, path_label: impl PathLabel) -> Self {
        self.path_label = Arc::new(path_label);
        self
    }
}

impl<S> Layer<S> for PrometheusLayer {
    type Service = PrometheusService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PrometheusService {
            inner,
            metrics: self.metrics.clone(),
            path_label: Arc::clone(&self.path_label),
        }
    }
}

/// Service recording metrics around `S`.
#[derive(Clone)]
pub struct PrometheusService<S> {
    inner: S,
    metrics: ServerMetrics,
    path_label: Arc<dyn PathLabel>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for PrometheusService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // The clone is not ready; keep it and drive the instance that was.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let method = method_label(request.method());
        let path = self.path_label.path_label(request.uri(), request.extensions());
        let mut observation = Observation::begin(self.metrics.clone(), method, path);

        let future = inner.call(request);

        Box::pin(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(response)) => {
                    observation.complete(response.status().as_u16());
                    Ok(response)
                }
                Ok(Err(error)) => {
                    observation.fail(short_type_name::<S::Error>());
                    Err(error)
                }
                Err(panic) => {
                    observation.fail(EXCEPTION_PANIC);
                    std::panic::resume_unwind(panic)
                }
            }
        })
    }
}

/// Request-scoped timing state.
///
/// Lives inside the request's own future; if that future is dropped
/// before an outcome is recorded, `Drop` records it as cancelled.
struct Observation {
    metrics: ServerMetrics,
    method: &'static str,
    path: String,
    started_at: Instant,
    recorded: bool,
}

impl Observation {
    fn begin(metrics: ServerMetrics, method: &'static str, path: String) -> Self {
        record::gauge_add(&metrics.in_progress, &[method, path.as_str()], 1);
        Self {
            metrics,
            method,
            path,
            started_at: Instant::now(),
            recorded: false,
        }
    }

    fn complete(&mut self, status: u16) {
        let status = self.metrics.status_label.render(status);
        self.record(&status);
    }

    fn fail(&mut self, exception_type: &str) {
        record::inc(
            &self.metrics.exceptions,
            &[self.method, self.path.as_str(), exception_type],
        );
        let status = self.metrics.status_label.server_error();
        self.record(&status);
    }

    fn record(&mut self, status: &str) {
        if self.recorded {
            return;
        }
        self.recorded = true;

        let elapsed = self.started_at.elapsed().as_secs_f64();
        let labels = [self.method, self.path.as_str(), status];

        record::gauge_add(&self.metrics.in_progress, &labels[..2], -1);
        record::observe(&self.metrics.duration, &labels, elapsed);
        record::inc(&self.metrics.requests, &labels);

        debug!(
            method = self.method,
            path = %self.path,
            status,
            elapsed_s = elapsed,
            "Request observed"
        );
    }
}

impl Drop for Observation {
    fn drop(&mut self) {
        if !self.recorded {
            self.record(STATUS_CANCELLED);
        }
    }
}
