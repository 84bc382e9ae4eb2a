//! Prometheus Trace Hooks - Outbound Request Metrics
//!
//! [`TraceHooks`] implementation recording count, latency, in-flight
//! requests, failures, redirects and body bytes for every request a
//! [`TracedClient`](super::TracedClient) sends.
//!
//! Series are labeled by client name, method and destination host, so
//! concurrent requests to different hosts land in distinct series. The
//! start time lives in the request's [`TraceContext`], never in shared
//! state.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts};
use tracing::{debug, instrument};

use crate::adapters::metrics::record;
use crate::adapters::metrics::MetricsRegistry;
use crate::config::ClientMetricsConfig;
use crate::domain::labels::{
  host_label, method_label, StatusLabel, STATUS_CANCELLED, STATUS_ERROR,
};
use crate::error::ExporterError;
use crate::ports::trace_hooks::{
  RequestBodySent, RequestCancelled, RequestEnd, RequestException, RequestRedirect, RequestStart,
  TraceContext, TraceHooks,
};

/// Outbound request series, registered once per registry and shared by
/// every [`PrometheusTrace`] created from it.
///
/// All families are named `{prefix}_*`:
/// - `requests_total{client_name, method, host, status}`
/// - `request_duration_seconds{client_name, method, host, status}`
/// - `requests_in_progress{client_name, method, host}`
/// - `exceptions_total{client_name, method, host, exception_type}`
/// - `redirects_total{client_name, method, host, status}`
/// - `sent_bytes_total{client_name}`
/// - `received_bytes_total{client_name}`
#[derive(Clone)]
pub struct ClientMetrics {
  /// Completed requests, including each followed redirect hop.
  requests: IntCounterVec,
  /// Request latency in seconds, start to terminal hook.
  duration: HistogramVec,
  /// Requests currently in flight.
  in_progress: IntGaugeVec,
  /// Requests that failed without a final response.
  exceptions: IntCounterVec,
  /// Redirects followed.
  redirects: IntCounterVec,
  /// Buffered request body bytes sent, per hop.
  sent_bytes: IntCounterVec,
  /// Response body bytes announced by `Content-Length`.
  received_bytes: IntCounterVec,
  /// Status label granularity.
  status_label: StatusLabel,
}

impl ClientMetrics {
  /// Validate `config` and register all client families.
  #[instrument(skip(registry))]
  pub fn register(
    registry: &MetricsRegistry,
    config: &ClientMetricsConfig,
  ) -> Result<Self, ExporterError> {
    config.validate()?;
    let prefix = &config.prefix;

    let requests = IntCounterVec::new(
      Opts::new(
        format!("{prefix}_requests_total"),
        "Outbound requests by client, method, host and status.",
      ),
      &["client_name", "method", "host", "status"],
    )?;

    let duration = HistogramVec::new(
      HistogramOpts::new(
        format!("{prefix}_request_duration_seconds"),
        "Outbound request latency by client, method, host and status (seconds).",
      )
      .buckets(config.buckets.clone()),
      &["client_name", "method", "host", "status"],
    )?;

    let in_progress = IntGaugeVec::new(
      Opts::new(
        format!("{prefix}_requests_in_progress"),
        "Outbound requests in flight by client, method and host.",
      ),
      &["client_name", "method", "host"],
    )?;

    let exceptions = IntCounterVec::new(
      Opts::new(
        format!("{prefix}_exceptions_total"),
        "Outbound requests failed without a response, by kind.",
      ),
      &["client_name", "method", "host", "exception_type"],
    )?;

    let redirects = IntCounterVec::new(
      Opts::new(
        format!("{prefix}_redirects_total"),
        "Redirects followed by client, method, host and status.",
      ),
      &["client_name", "method", "host", "status"],
    )?;

    let sent_bytes = IntCounterVec::new(
      Opts::new(
        format!("{prefix}_sent_bytes_total"),
        "Request body bytes sent by client.",
      ),
      &["client_name"],
    )?;

    // Best effort: streamed responses without Content-Length are not counted.
    let received_bytes = IntCounterVec::new(
      Opts::new(
        format!("{prefix}_received_bytes_total"),
        "Response body bytes announced by Content-Length, by client.",
      ),
      &["client_name"],
    )?;

    registry.register_all(vec![
      Box::new(requests.clone()),
      Box::new(duration.clone()),
      Box::new(in_progress.clone()),
      Box::new(exceptions.clone()),
      Box::new(redirects.clone()),
      Box::new(sent_bytes.clone()),
      Box::new(received_bytes.clone()),
    ])?;

    debug!(prefix = %prefix, "Client metrics registered");

    Ok(Self {
      requests,
      duration,
      in_progress,
      exceptions,
      redirects,
      sent_bytes,
      received_bytes,
      status_label: config.status_label,
    })
  }

  /// Hook set recording under `client_name`.
  pub fn trace(&self, client_name: impl Into<String>) -> Result<PrometheusTrace, ExporterError> {
    let client_name = client_name.into();
    if client_name.is_empty() {
      return Err(ExporterError::InvalidConfig(
        "client_name must not be empty".to_string(),
      ));
    }
    Ok(PrometheusTrace {
      metrics: self.clone(),
      client_name,
    })
  }
}

/// Per-request state kept in the [`TraceContext`].
struct Inflight {
  started_at: Instant,
  method: &'static str,
  host: String,
}

/// Hook set recording into [`ClientMetrics`].
#[derive(Clone)]
pub struct PrometheusTrace {
  metrics: ClientMetrics,
  client_name: String,
}

impl PrometheusTrace {
  /// Name used for the `client_name` label.
  pub fn client_name(&self) -> &str {
    &self.client_name
  }

  fn gauge(&self, method: &str, host: &str, delta: i64) {
    record::gauge_add(
      &self.metrics.in_progress,
      &[self.client_name.as_str(), method, host],
      delta,
    );
  }

  /// Close the request: settle the gauge, observe and count once.
  fn finish(&self, ctx: &mut TraceContext, method: &'static str, host: String, status: &str) {
    // Without a start entry there is no gauge increment to undo.
    let (elapsed, method, host) = match ctx.take::<Inflight>() {
      Some(inflight) => {
        self.gauge(inflight.method, &inflight.host, -1);
        (inflight.started_at.elapsed(), inflight.method, inflight.host)
      }
      None => (Duration::ZERO, method, host),
    };

    let labels = [self.client_name.as_str(), method, host.as_str(), status];
    record::observe(&self.metrics.duration, &labels, elapsed.as_secs_f64());
    record::inc(&self.metrics.requests, &labels);

    debug!(
      request_id = ctx.request_id(),
      client_name = %self.client_name,
      method,
      host = %host,
      status,
      elapsed_s = elapsed.as_secs_f64(),
      "Outbound request observed"
    );
  }
}

#[async_trait]
impl TraceHooks for PrometheusTrace {
  async fn on_request_start(&self, ctx: &mut TraceContext, params: &RequestStart) {
    let method = method_label(&params.method);
    let host = host_label(&params.url);
    self.gauge(method, &host, 1);
    ctx.insert(Inflight {
      started_at: Instant::now(),
      method,
      host,
    });
  }

  async fn on_request_body_sent(&self, _ctx: &mut TraceContext, params: &RequestBodySent) {
    record::inc_by(
      &self.metrics.sent_bytes,
      &[self.client_name.as_str()],
      params.bytes,
    );
  }

  async fn on_request_redirect(&self, ctx: &mut TraceContext, params: &RequestRedirect) {
    let status = self.metrics.status_label.render(params.status.as_u16());
    let method = method_label(&params.method);
    let host = host_label(&params.url);
    let labels = [self.client_name.as_str(), method, host.as_str(), status.as_str()];
    record::inc(&self.metrics.requests, &labels);
    record::inc(&self.metrics.redirects, &labels);

    let next_host = host_label(&params.location);
    if let Some(inflight) = ctx.get_mut::<Inflight>() {
      self.gauge(inflight.method, &inflight.host, -1);
      self.gauge(inflight.method, &next_host, 1);
      inflight.host = next_host;
    }
  }

  async fn on_request_end(&self, ctx: &mut TraceContext, params: &RequestEnd) {
    if let Some(bytes) = params.content_length {
      record::inc_by(
        &self.metrics.received_bytes,
        &[self.client_name.as_str()],
        bytes,
      );
    }
    let status = self.metrics.status_label.render(params.status.as_u16());
    self.finish(ctx, method_label(&params.method), host_label(&params.url), &status);
  }

  async fn on_request_exception(&self, ctx: &mut TraceContext, params: &RequestException) {
    let (method, host) = ctx.get_mut::<Inflight>().map_or_else(
      || (method_label(&params.method), host_label(&params.url)),
      |inflight| (inflight.method, inflight.host.clone()),
    );
    record::inc(
      &self.metrics.exceptions,
      &[
        self.client_name.as_str(),
        method,
        host.as_str(),
        params.kind.as_str(),
      ],
    );
    debug!(kind = %params.kind, error = %params.message, "Outbound request failed");
    self.finish(ctx, method_label(&params.method), host_label(&params.url), STATUS_ERROR);
  }

  fn on_request_cancelled(&self, ctx: &mut TraceContext, params: &RequestCancelled) {
    self.finish(
      ctx,
      method_label(&params.method),
      host_label(&params.url),
      STATUS_CANCELLED,
    );
  }
}
