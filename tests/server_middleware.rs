//! Integration Tests - Server Middleware and Metrics Route
//!
//! Drives instrumented axum routers with `tower::ServiceExt::oneshot`
//! and checks the exposition text the metrics route renders.

use std::convert::Infallible;
use std::io;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, Response, StatusCode, Uri};
use axum::routing::get;
use axum::Router;
use tower::{Layer, ServiceExt};

use prom_http_exporter::config::ServerMetricsConfig;
use prom_http_exporter::domain::StatusLabel;
use prom_http_exporter::{metrics_route, render, MetricsRegistry, ServerMetrics};

// ---- Helpers ----

fn registered(config: &ServerMetricsConfig) -> (MetricsRegistry, ServerMetrics) {
    let registry = MetricsRegistry::new();
    let metrics = ServerMetrics::register(&registry, config).unwrap();
    (registry, metrics)
}

fn app(registry: &MetricsRegistry, metrics: &ServerMetrics) -> Router {
    Router::new()
        .route("/hello", get(|| async { "Hello, world!" }))
        .route("/path/:value", get(|| async { "ok" }))
        .route(
            "/broken",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "nope") }),
        )
        .route(
            "/sleep10",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                "slept"
            }),
        )
        .route(
            "/sleep60",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(60)).await;
                "slept"
            }),
        )
        .route(
            "/sleep150",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(150)).await;
                "slept"
            }),
        )
        .route("/metrics", metrics_route(registry.clone()))
        .layer(metrics.layer())
}

async fn call(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.clone().oneshot(request).await.unwrap()
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Parse one sample line into `(name, labels, value)`.
fn parse_sample(line: &str) -> Option<(String, Vec<(String, String)>, f64)> {
    let (series, value) = line.rsplit_once(' ')?;
    let value: f64 = value.parse().ok()?;
    let Some((name, rest)) = series.split_once('{') else {
        return Some((series.to_string(), Vec::new(), value));
    };
    let body = rest.strip_suffix('}')?;
    let mut labels = Vec::new();
    for pair in body.split("\",").filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once("=\"")?;
        labels.push((key.to_string(), value.trim_end_matches('"').to_string()));
    }
    Some((name.to_string(), labels, value))
}

/// Value of the sample `name` whose label set equals `labels`.
fn sample(text: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(parse_sample)
        .find(|(sample_name, sample_labels, _)| {
            sample_name == name
                && sample_labels.len() == labels.len()
                && labels
                    .iter()
                    .all(|(k, v)| sample_labels.iter().any(|(sk, sv)| sk == k && sv == v))
        })
        .map(|(_, _, value)| value)
}

// ---- Tests ----

#[tokio::test]
async fn test_five_hellos_are_counted_in_exposition() {
    let (registry, metrics) = registered(&ServerMetricsConfig::default());
    let app = app(&registry, &metrics);

    for _ in 0..5 {
        let response = call(&app, "/hello").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Hello, world!");
    }

    let response = call(&app, "/metrics").await;
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; version=0.0.4"
    );
    let text = body_text(response).await;

    assert!(
        text.contains("http_requests_total{method=\"GET\",path=\"/hello\",status=\"2xx\"} 5"),
        "unexpected exposition:\n{text}"
    );
    assert_eq!(
        sample(
            &text,
            "http_request_duration_seconds_count",
            &[("method", "GET"), ("path", "/hello"), ("status", "2xx")]
        ),
        Some(5.0)
    );
    assert_eq!(
        sample(
            &text,
            "http_requests_in_progress",
            &[("method", "GET"), ("path", "/hello")]
        ),
        Some(0.0)
    );
}

#[tokio::test]
async fn test_route_template_and_unmatched_labels() {
    let (registry, metrics) = registered(&ServerMetricsConfig::default());
    let app = app(&registry, &metrics);

    call(&app, "/path/abc").await;
    call(&app, "/path/def").await;
    let missing = call(&app, "/does/not/exist").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let text = render(&registry).unwrap();
    assert_eq!(
        sample(
            &text,
            "http_requests_total",
            &[("method", "GET"), ("path", "/path/:value"), ("status", "2xx")]
        ),
        Some(2.0)
    );
    assert_eq!(
        sample(
            &text,
            "http_requests_total",
            &[("method", "GET"), ("path", "__not_matched__"), ("status", "4xx")]
        ),
        Some(1.0)
    );
    assert!(!text.contains("/path/abc"));
}

#[tokio::test]
async fn test_extension_methods_collapse_into_one_series() {
    let (registry, metrics) = registered(&ServerMetricsConfig::default());
    let app = app(&registry, &metrics);

    for i in 0..20 {
        let method = Method::from_bytes(format!("X{i}").as_bytes()).unwrap();
        let request = Request::builder()
            .method(method)
            .uri("/anything")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    let text = render(&registry).unwrap();
    let series: Vec<_> = text
        .lines()
        .filter(|line| line.starts_with("http_requests_total{"))
        .collect();
    assert_eq!(series.len(), 1, "{text}");
    assert_eq!(
        sample(
            &text,
            "http_requests_total",
            &[("method", "_OTHER"), ("path", "__not_matched__"), ("status", "4xx")]
        ),
        Some(20.0)
    );
    assert!(!text.contains("method=\"X0\""));
}

#[tokio::test]
async fn test_error_status_response_is_not_an_exception() {
    let (registry, metrics) = registered(&ServerMetricsConfig::default());
    let app = app(&registry, &metrics);

    let response = call(&app, "/broken").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let text = render(&registry).unwrap();
    assert_eq!(
        sample(
            &text,
            "http_requests_total",
            &[("method", "GET"), ("path", "/broken"), ("status", "5xx")]
        ),
        Some(1.0)
    );
    assert!(!text.contains("http_exceptions_total{"));
}

#[tokio::test]
async fn test_exact_status_codes_when_configured() {
    let config = ServerMetricsConfig {
        status_label: StatusLabel::Code,
        ..ServerMetricsConfig::default()
    };
    let (registry, metrics) = registered(&config);
    let app = app(&registry, &metrics);

    call(&app, "/hello").await;
    call(&app, "/missing").await;

    let text = render(&registry).unwrap();
    assert!(text.contains("http_requests_total{method=\"GET\",path=\"/hello\",status=\"200\"} 1"));
    assert!(text.contains(
        "http_requests_total{method=\"GET\",path=\"__not_matched__\",status=\"404\"} 1"
    ));
}

#[tokio::test]
async fn test_service_error_is_returned_unchanged_and_counted() {
    let (registry, metrics) = registered(&ServerMetricsConfig::default());
    let service = metrics.layer().layer(tower::service_fn(|_req: Request<()>| async {
        Err::<Response<()>, _>(io::Error::new(io::ErrorKind::ConnectionReset, "upstream gone"))
    }));

    let error = service.oneshot(Request::new(())).await.unwrap_err();
    assert_eq!(error.kind(), io::ErrorKind::ConnectionReset);
    assert_eq!(error.to_string(), "upstream gone");

    let text = render(&registry).unwrap();
    assert_eq!(
        sample(
            &text,
            "http_exceptions_total",
            &[
                ("method", "GET"),
                ("path", "__not_matched__"),
                ("exception_type", "Error")
            ]
        ),
        Some(1.0)
    );
    assert_eq!(
        sample(
            &text,
            "http_requests_total",
            &[("method", "GET"), ("path", "__not_matched__"), ("status", "5xx")]
        ),
        Some(1.0)
    );
    assert_eq!(
        sample(
            &text,
            "http_request_duration_seconds_count",
            &[("method", "GET"), ("path", "__not_matched__"), ("status", "5xx")]
        ),
        Some(1.0)
    );
}

#[tokio::test]
async fn test_panic_is_recorded_and_resumed() {
    let (registry, metrics) = registered(&ServerMetricsConfig::default());
    let service = metrics.layer().layer(tower::service_fn(|req: Request<()>| async move {
        if req.uri().path() == "/" {
            panic!("handler blew up");
        }
        Ok::<_, Infallible>(Response::new(()))
    }));

    let join = tokio::spawn(service.oneshot(Request::new(()))).await;
    let panic = join.unwrap_err();
    assert!(panic.is_panic());
    let payload = panic.into_panic();
    assert_eq!(
        payload.downcast_ref::<&str>().copied(),
        Some("handler blew up")
    );

    let text = render(&registry).unwrap();
    assert_eq!(
        sample(
            &text,
            "http_exceptions_total",
            &[
                ("method", "GET"),
                ("path", "__not_matched__"),
                ("exception_type", "panic")
            ]
        ),
        Some(1.0)
    );
    assert_eq!(
        sample(
            &text,
            "http_requests_in_progress",
            &[("method", "GET"), ("path", "__not_matched__")]
        ),
        Some(0.0)
    );
}

#[tokio::test]
async fn test_concurrent_requests_observe_their_own_latency() {
    let (registry, metrics) = registered(&ServerMetricsConfig::default());
    let app = app(&registry, &metrics);

    let (a, b, c) = tokio::join!(
        call(&app, "/sleep10"),
        call(&app, "/sleep60"),
        call(&app, "/sleep150"),
    );
    assert!(a.status().is_success() && b.status().is_success() && c.status().is_success());

    let text = render(&registry).unwrap();
    for (path, delay) in [("/sleep10", 0.010), ("/sleep60", 0.060), ("/sleep150", 0.150)] {
        let labels = [("method", "GET"), ("path", path), ("status", "2xx")];
        let count = sample(&text, "http_request_duration_seconds_count", &labels);
        let sum = sample(&text, "http_request_duration_seconds_sum", &labels).unwrap();
        assert_eq!(count, Some(1.0), "{path}");
        assert!(sum >= delay, "{path}: observed {sum}s for a {delay}s handler");
        assert!(sum < delay + 1.0, "{path}: observed {sum}s for a {delay}s handler");
    }
}

#[tokio::test]
async fn test_custom_path_label_strategy() {
    let (registry, metrics) = registered(&ServerMetricsConfig::default());
    let layer = metrics.layer().with_path_label(|uri: &Uri, _: &axum::http::Extensions| {
        uri.path().split('/').nth(1).unwrap_or_default().to_string()
    });
    let service = layer.layer(tower::service_fn(|_req: Request<()>| async {
        Ok::<_, Infallible>(Response::new(()))
    }));

    let request = Request::builder()
        .uri("/static/app.js")
        .body(())
        .unwrap();
    service.oneshot(request).await.unwrap();

    let text = render(&registry).unwrap();
    assert_eq!(
        sample(
            &text,
            "http_requests_total",
            &[("method", "GET"), ("path", "static"), ("status", "2xx")]
        ),
        Some(1.0)
    );
}

#[tokio::test]
async fn test_exposition_is_line_wise_valid() {
    let (registry, metrics) = registered(&ServerMetricsConfig::default());
    let app = app(&registry, &metrics);
    call(&app, "/hello").await;
    call(&app, "/path/x").await;

    let text = body_text(call(&app, "/metrics").await).await;
    assert!(text.ends_with('\n'));

    for line in text.lines() {
        if let Some(comment) = line.strip_prefix("# ") {
            assert!(
                comment.starts_with("HELP ") || comment.starts_with("TYPE "),
                "bad comment line: {line}"
            );
        } else {
            assert!(parse_sample(line).is_some(), "bad sample line: {line}");
        }
    }

    assert!(text.contains("# TYPE http_requests_total counter"));
    assert!(text.contains("# TYPE http_request_duration_seconds histogram"));
    assert!(text.contains("# TYPE http_requests_in_progress gauge"));
    assert!(text.contains("le=\"+Inf\""));
}

#[tokio::test]
async fn test_rendering_is_read_only() {
    let (registry, metrics) = registered(&ServerMetricsConfig::default());
    let app = app(&registry, &metrics);
    call(&app, "/hello").await;

    let first = render(&registry).unwrap();
    let second = render(&registry).unwrap();
    assert_eq!(first, second);
}
