//! Traced HTTP Session - reqwest Client with Lifecycle Hooks
//!
//! Wraps a reqwest client and fires the installed [`TraceHooks`] around
//! every request sent through it. Redirects are followed here rather
//! than inside reqwest so each hop is visible to the hooks.
//!
//! Requests that fail before they are built (malformed URL, invalid
//! header) never reach the session and fire no hooks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::header::{
  HeaderMap, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION,
  PROXY_AUTHORIZATION, TRANSFER_ENCODING,
};
use reqwest::{Client, IntoUrl, Method, Request, RequestBuilder, Response, StatusCode, Url};
use tracing::{debug, instrument, warn};

use crate::config::ClientMetricsConfig;
use crate::error::TraceError;
use crate::ports::trace_hooks::{
  FailureKind, RequestBodySent, RequestCancelled, RequestEnd, RequestException, RequestId,
  RequestRedirect, RequestStart, TraceContext, TraceHooks,
};

/// Builder for [`TracedClient`].
pub struct TracedClientBuilder {
  /// Hook sets, fired in insertion order.
  hooks: Vec<Arc<dyn TraceHooks>>,
  /// Redirects followed before failing (0 = hand 3xx back to the caller).
  max_redirects: usize,
  /// Per-request timeout.
  timeout: Option<Duration>,
}

impl Default for TracedClientBuilder {
  fn default() -> Self {
    Self {
      hooks: Vec::new(),
      max_redirects: 10,
      timeout: None,
    }
  }
}

impl TracedClientBuilder {
  /// Take redirect limit and timeout from the client section.
  pub fn from_config(config: &ClientMetricsConfig) -> Self {
    let timeout = (config.timeout_ms > 0).then(|| Duration::from_millis(config.timeout_ms));
    Self {
      hooks: Vec::new(),
      max_redirects: config.max_redirects,
      timeout,
    }
  }

  /// Append a hook set.
  #[must_use]
  pub fn trace(mut self, hooks: impl TraceHooks) -> Self {
    self.hooks.push(Arc::new(hooks));
    self
  }

  /// Append a hook set shared with other sessions.
  #[must_use]
  pub fn trace_shared(mut self, hooks: Arc<dyn TraceHooks>) -> Self {
    self.hooks.push(hooks);
    self
  }

  /// Set the redirect limit.
  #[must_use]
  pub const fn max_redirects(mut self, max_redirects: usize) -> Self {
    self.max_redirects = max_redirects;
    self
  }

  /// Set the per-request timeout.
  #[must_use]
  pub const fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  /// Build the session.
  pub fn build(self) -> Result<TracedClient, TraceError> {
    let mut builder = Client::builder()
      .redirect(reqwest::redirect::Policy::none())
      .pool_max_idle_per_host(5);
    if let Some(timeout) = self.timeout {
      builder = builder.timeout(timeout);
    }
    let http = builder.build()?;

    Ok(TracedClient {
      http,
      hooks: self.hooks.into(),
      max_redirects: self.max_redirects,
      next_request_id: Arc::new(AtomicU64::new(1)),
    })
  }
}

/// HTTP session firing trace hooks around each request.
///
/// Cheap to clone; clones share the connection pool, the hook sets and
/// the request id sequence.
#[derive(Clone)]
pub struct TracedClient {
  /// Underlying HTTP client (automatic redirects disabled).
  http: Client,
  /// Installed hook sets.
  hooks: Arc<[Arc<dyn TraceHooks>]>,
  /// Redirect limit.
  max_redirects: usize,
  /// Source of per-request ids.
  next_request_id: Arc<AtomicU64>,
}

impl TracedClient {
  /// Start building a session.
  pub fn builder() -> TracedClientBuilder {
    TracedClientBuilder::default()
  }

  /// Plain request builder on the underlying client; pass the result
  /// to [`send`](Self::send).
  pub fn request(&self, method: Method, url: impl IntoUrl) -> RequestBuilder {
    self.http.request(method, url)
  }

  /// GET `url` through the hooks.
  pub async fn get(&self, url: impl IntoUrl) -> Result<Response, TraceError> {
    let request = self.http.get(url).build()?;
    self.execute(request).await
  }

  /// Build and send a request through the hooks.
  pub async fn send(&self, builder: RequestBuilder) -> Result<Response, TraceError> {
    let request = builder.build()?;
    self.execute(request).await
  }

  /// Send a request through the hooks, following redirects.
  ///
  /// The transport error, if any, is returned unchanged inside
  /// [`TraceError::Transport`].
  #[instrument(skip_all, fields(method = %request.method(), url = %request.url()))]
  pub async fn execute(&self, request: Request) -> Result<Response, TraceError> {
    let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
    let mut flight = Flight::new(
      &self.hooks,
      request_id,
      request.method().clone(),
      request.url().clone(),
    );
    flight.start().await;

    let mut request = request;
    let mut redirects = 0;

    loop {
      let headers = request.headers().clone();
      let replay = request.try_clone();
      let body_len = request
        .body()
        .and_then(reqwest::Body::as_bytes)
        .map(|bytes| bytes.len() as u64);
      if let Some(bytes) = body_len {
        flight.body_sent(bytes).await;
      }

      let response = match self.http.execute(request).await {
        Ok(response) => response,
        Err(e) => {
          flight.exception(FailureKind::of(&e), e.to_string()).await;
          return Err(TraceError::Transport(e));
        }
      };

      let status = response.status();
      if self.max_redirects == 0 {
        flight.end(status, response.content_length()).await;
        return Ok(response);
      }

      let location = match redirect_location(&response, &flight.url) {
        None => {
          flight.end(status, response.content_length()).await;
          return Ok(response);
        }
        Some(Err(message)) => {
          flight.exception(FailureKind::Redirect, message.clone()).await;
          return Err(TraceError::InvalidRedirect(message));
        }
        Some(Ok(location)) => location,
      };

      if redirects == self.max_redirects {
        let error = TraceError::TooManyRedirects {
          max: self.max_redirects,
        };
        flight.exception(FailureKind::Redirect, error.to_string()).await;
        return Err(error);
      }

      let Some(next) = next_request(status, &flight.method, &headers, replay, &flight.url, &location)
      else {
        warn!(%status, "Redirect needs a body that cannot be replayed, returning 3xx");
        flight.end(status, response.content_length()).await;
        return Ok(response);
      };

      debug!(request_id, %status, to = %location, "Following redirect");
      let next_method = next.method().clone();
      flight.redirect(status, location, next_method).await;
      redirects += 1;
      request = next;
    }
  }
}

/// Hook bookkeeping for one request.
///
/// Hook sets are finalized in order; `settled` counts those whose
/// terminal hook has started. If dropped early, the rest are told the
/// request was cancelled.
struct Flight<'a> {
  hooks: &'a [Arc<dyn TraceHooks>],
  contexts: Vec<TraceContext>,
  method: Method,
  url: Url,
  settled: usize,
}

impl<'a> Flight<'a> {
  fn new(hooks: &'a [Arc<dyn TraceHooks>], request_id: RequestId, method: Method, url: Url) -> Self {
    Self {
      hooks,
      contexts: hooks.iter().map(|_| TraceContext::new(request_id)).collect(),
      method,
      url,
      settled: 0,
    }
  }

  async fn start(&mut self) {
    let params = RequestStart {
      method: self.method.clone(),
      url: self.url.clone(),
    };
    for (hook, ctx) in self.hooks.iter().zip(&mut self.contexts) {
      hook.on_request_start(ctx, &params).await;
    }
  }

  async fn body_sent(&mut self, bytes: u64) {
    let params = RequestBodySent {
      method: self.method.clone(),
      url: self.url.clone(),
      bytes,
    };
    for (hook, ctx) in self.hooks.iter().zip(&mut self.contexts) {
      hook.on_request_body_sent(ctx, &params).await;
    }
  }

  async fn redirect(&mut self, status: StatusCode, location: Url, next_method: Method) {
    let params = RequestRedirect {
      method: self.method.clone(),
      url: self.url.clone(),
      status,
      location: location.clone(),
    };
    for (hook, ctx) in self.hooks.iter().zip(&mut self.contexts) {
      hook.on_request_redirect(ctx, &params).await;
    }
    self.method = next_method;
    self.url = location;
  }

  async fn end(&mut self, status: StatusCode, content_length: Option<u64>) {
    let params = RequestEnd {
      method: self.method.clone(),
      url: self.url.clone(),
      status,
      content_length,
    };
    let hooks = self.hooks;
    while self.settled < hooks.len() {
      let i = self.settled;
      self.settled += 1;
      hooks[i].on_request_end(&mut self.contexts[i], &params).await;
    }
  }

  async fn exception(&mut self, kind: FailureKind, message: String) {
    let params = RequestException {
      method: self.method.clone(),
      url: self.url.clone(),
      kind,
      message,
    };
    let hooks = self.hooks;
    while self.settled < hooks.len() {
      let i = self.settled;
      self.settled += 1;
      hooks[i].on_request_exception(&mut self.contexts[i], &params).await;
    }
  }
}

impl Drop for Flight<'_> {
  fn drop(&mut self) {
    if self.settled == self.hooks.len() {
      return;
    }
    let params = RequestCancelled {
      method: self.method.clone(),
      url: self.url.clone(),
    };
    let hooks = self.hooks;
    for (hook, ctx) in hooks.iter().zip(&mut self.contexts).skip(self.settled) {
      hook.on_request_cancelled(ctx, &params);
    }
  }
}

/// Resolved `Location` of a followable redirect.
///
/// `None` when the response is not a redirect we follow or carries no
/// `Location` header.
fn redirect_location(response: &Response, base: &Url) -> Option<Result<Url, String>> {
  let followable = matches!(
    response.status(),
    StatusCode::MOVED_PERMANENTLY
      | StatusCode::FOUND
      | StatusCode::SEE_OTHER
      | StatusCode::TEMPORARY_REDIRECT
      | StatusCode::PERMANENT_REDIRECT
  );
  if !followable {
    return None;
  }
  let value = response.headers().get(LOCATION)?;
  let location = match value.to_str() {
    Ok(location) => location,
    Err(e) => return Some(Err(format!("non-ascii Location header: {e}"))),
  };
  Some(base.join(location).map_err(|e| format!("{location:?}: {e}")))
}

/// Request for the next hop, following browser rules: 303 (and 301/302
/// after a POST) become a body-less GET, everything else replays the
/// original request. Credentials are dropped when the origin changes.
fn next_request(
  status: StatusCode,
  method: &Method,
  headers: &HeaderMap,
  replay: Option<Request>,
  from: &Url,
  to: &Url,
) -> Option<Request> {
  let rewrite_to_get = match status {
    StatusCode::SEE_OTHER => *method != Method::HEAD,
    StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => *method == Method::POST,
    _ => false,
  };

  let mut next = if rewrite_to_get {
    let mut next = Request::new(Method::GET, to.clone());
    *next.headers_mut() = headers.clone();
    for name in [CONTENT_TYPE, CONTENT_LENGTH, TRANSFER_ENCODING] {
      next.headers_mut().remove(name);
    }
    next
  } else {
    let mut next = replay?;
    *next.url_mut() = to.clone();
    next
  };

  if from.origin() != to.origin() {
    for name in [AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION] {
      next.headers_mut().remove(name);
    }
  }

  Some(next)
}
