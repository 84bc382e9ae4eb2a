//! Trace Hooks Port - Outbound Request Lifecycle Interface
//!
//! Defines the hook set a traced HTTP session invokes around every
//! outbound request. A session holds an ordered list of hook sets and
//! gives each one its own [`TraceContext`] per request, so per-request
//! state never lives in a field shared between concurrent requests.
//!
//! Lifecycle per request:
//! - `on_request_start` once, before the first send
//! - `on_request_body_sent` before every send that carries a buffered body
//! - `on_request_redirect` for every followed 3xx
//! - exactly one of `on_request_end`, `on_request_exception`,
//!   `on_request_cancelled`

use std::any::Any;
use std::fmt;

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};

/// Session-unique identifier of one outbound request.
pub type RequestId = u64;

/// Per-request, per-hook-set scratch space.
///
/// Created by the session when a request starts and dropped when its
/// terminal hook has run. Holds one typed value owned by the hook set.
pub struct TraceContext {
  request_id: RequestId,
  state: Option<Box<dyn Any + Send + Sync>>,
}

impl TraceContext {
  /// Create an empty context for a request.
  pub fn new(request_id: RequestId) -> Self {
    Self {
      request_id,
      state: None,
    }
  }

  /// Identifier assigned by the session.
  pub const fn request_id(&self) -> RequestId {
    self.request_id
  }

  /// Store the hook set's state, replacing anything stored before.
  pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
    self.state = Some(Box::new(value));
  }

  /// Borrow the stored state mutably if it has type `T`.
  pub fn get_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
    self.state.as_mut()?.downcast_mut::<T>()
  }

  /// Remove and return the stored state if it has type `T`.
  ///
  /// State of another type is left in place.
  pub fn take<T: Any + Send + Sync>(&mut self) -> Option<T> {
    let state = self.state.take()?;
    match state.downcast::<T>() {
      Ok(value) => Some(*value),
      Err(other) => {
        self.state = Some(other);
        None
      }
    }
  }

  /// Whether no state is stored.
  pub const fn is_empty(&self) -> bool {
    self.state.is_none()
  }
}

impl fmt::Debug for TraceContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TraceContext")
      .field("request_id", &self.request_id)
      .field("has_state", &self.state.is_some())
      .finish()
  }
}

/// Parameters of `on_request_start`.
#[derive(Debug, Clone)]
pub struct RequestStart {
  /// Request method.
  pub method: Method,
  /// Request URL.
  pub url: Url,
}

/// Parameters of `on_request_body_sent`.
#[derive(Debug, Clone)]
pub struct RequestBodySent {
  /// Method of the request being sent.
  pub method: Method,
  /// URL of the request being sent.
  pub url: Url,
  /// Body length in bytes.
  pub bytes: u64,
}

/// Parameters of `on_request_redirect`.
#[derive(Debug, Clone)]
pub struct RequestRedirect {
  /// Method of the request that was redirected.
  pub method: Method,
  /// URL of the request that was redirected.
  pub url: Url,
  /// The 3xx status received.
  pub status: StatusCode,
  /// Resolved redirect target.
  pub location: Url,
}

/// Parameters of `on_request_end`.
#[derive(Debug, Clone)]
pub struct RequestEnd {
  /// Method of the final request in the chain.
  pub method: Method,
  /// URL of the final request in the chain.
  pub url: Url,
  /// Final response status.
  pub status: StatusCode,
  /// Body length announced by the response, if known. Streamed bodies
  /// without a `Content-Length` report `None`.
  pub content_length: Option<u64>,
}

/// Coarse classification of a failed outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
  /// Connection could not be established.
  Connect,
  /// The request or connect timed out.
  Timeout,
  /// Redirect chain was invalid or too long.
  Redirect,
  /// Request body could not be sent.
  Body,
  /// Response could not be decoded.
  Decode,
  /// The request itself was malformed at send time.
  Request,
  /// Anything else.
  Other,
}

impl FailureKind {
  /// Label value for this kind.
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Connect => "connect",
      Self::Timeout => "timeout",
      Self::Redirect => "redirect",
      Self::Body => "body",
      Self::Decode => "decode",
      Self::Request => "request",
      Self::Other => "other",
    }
  }

  /// Classify a reqwest error.
  pub fn of(error: &reqwest::Error) -> Self {
    if error.is_timeout() {
      Self::Timeout
    } else if error.is_connect() {
      Self::Connect
    } else if error.is_redirect() {
      Self::Redirect
    } else if error.is_body() {
      Self::Body
    } else if error.is_decode() {
      Self::Decode
    } else if error.is_request() {
      Self::Request
    } else {
      Self::Other
    }
  }
}

impl fmt::Display for FailureKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Parameters of `on_request_exception`.
#[derive(Debug, Clone)]
pub struct RequestException {
  /// Method of the request that failed.
  pub method: Method,
  /// URL of the request that failed.
  pub url: Url,
  /// What went wrong.
  pub kind: FailureKind,
  /// Rendered error message.
  pub message: String,
}

/// Parameters of `on_request_cancelled`.
#[derive(Debug, Clone)]
pub struct RequestCancelled {
  /// Method of the request in flight.
  pub method: Method,
  /// URL of the request in flight.
  pub url: Url,
}

/// Hook set installed into a traced HTTP session.
///
/// Hooks are observers: they cannot alter the request, the response or
/// the error. Every method defaults to a no-op so implementors pick the
/// subset they need.
#[async_trait]
pub trait TraceHooks: Send + Sync + 'static {
  /// Called once before the first send of a request.
  async fn on_request_start(&self, _ctx: &mut TraceContext, _params: &RequestStart) {}

  /// Called before each send whose body is fully buffered, including
  /// a replayed body on 307/308. Streamed bodies are not reported.
  async fn on_request_body_sent(&self, _ctx: &mut TraceContext, _params: &RequestBodySent) {}

  /// Called for every redirect the session follows.
  async fn on_request_redirect(&self, _ctx: &mut TraceContext, _params: &RequestRedirect) {}

  /// Called when the final response headers arrive.
  async fn on_request_end(&self, _ctx: &mut TraceContext, _params: &RequestEnd) {}

  /// Called when the request fails without a final response.
  async fn on_request_exception(&self, _ctx: &mut TraceContext, _params: &RequestException) {}

  /// Called when the request future is dropped while in flight.
  ///
  /// Runs from a destructor, so it is synchronous and must not block.
  fn on_request_cancelled(&self, _ctx: &mut TraceContext, _params: &RequestCancelled) {}
}
