//! Label derivation.
//!
//! Pure functions turning request facts into label values. Everything
//! here keeps series cardinality bounded: status codes collapse to
//! classes by default, hosts keep only host and explicit port, and
//! error types reduce to their bare type name.

use reqwest::{Method, Url};
use serde::Deserialize;

/// Path label for requests that matched no route.
pub const NOT_MATCHED: &str = "__not_matched__";

/// Status label for a request whose future was dropped before completion.
pub const STATUS_CANCELLED: &str = "cancelled";

/// Status label for an outbound request that failed without a response.
pub const STATUS_ERROR: &str = "error";

/// Exception label for a panicking handler.
pub const EXCEPTION_PANIC: &str = "panic";

/// Host label used when a URL has no host component.
pub const UNKNOWN_HOST: &str = "unknown";

/// Method label for any extension method.
pub const METHOD_OTHER: &str = "_OTHER";

/// How response status codes become label values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLabel {
    /// `2xx`, `4xx`, `5xx`, ...
    #[default]
    Class,
    /// The exact code: `200`, `404`, ...
    Code,
}

impl StatusLabel {
    /// Render a status code under this granularity.
    pub fn render(self, status: u16) -> String {
        match self {
            Self::Class => format!("{}xx", status / 100),
            Self::Code => status.to_string(),
        }
    }

    /// Label for a server request that ended in an error or a panic.
    pub fn server_error(self) -> String {
        self.render(500)
    }
}

/// Method label: the nine standard methods pass through, extension
/// methods collapse to [`METHOD_OTHER`].
pub fn method_label(method: &Method) -> &'static str {
    match method.as_str() {
        "GET" => "GET",
        "HEAD" => "HEAD",
        "POST" => "POST",
        "PUT" => "PUT",
        "DELETE" => "DELETE",
        "CONNECT" => "CONNECT",
        "OPTIONS" => "OPTIONS",
        "TRACE" => "TRACE",
        "PATCH" => "PATCH",
        _ => METHOD_OTHER,
    }
}

/// Bare name of a type: no module path, no generic arguments.
///
/// `std::io::error::Error` becomes `Error`,
/// `alloc::boxed::Box<dyn core::error::Error>` becomes `Box`.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Destination label for an outbound URL.
///
/// The port is kept only when it differs from the scheme default, so
/// `https://api.example.com/v1` and `https://api.example.com:443/v2`
/// share one series.
pub fn host_label(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => UNKNOWN_HOST.to_string(),
    }
}
