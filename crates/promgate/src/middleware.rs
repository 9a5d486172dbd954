//! The per-request instrumentation hook.

use std::time::Instant;

use axum::{
    body::{Body, HttpBody},
    extract::{MatchedPath, Request, State},
    http::{Version, header},
    middleware::Next,
    response::Response,
};
use tracing::error;

use crate::{DurationUnit, Prometheus};

/// Response extension overriding the `url` label for the request that
/// produced the response. Insert it from a handler to pin the label to a
/// static value.
#[derive(Debug, Clone)]
pub struct UrlLabel(pub String);

/// One completed request, resolved to the values the collectors record.
/// Lives for the tail of the request only.
pub(crate) struct RequestObservation {
    pub code: String,
    pub method: String,
    pub handler: String,
    pub host: String,
    pub url: String,
    pub elapsed: f64,
    pub request_size: u64,
    pub response_size: u64,
}

/// Request hook recording count, duration and size metrics.
///
/// Attach with `axum::middleware::from_fn_with_state(prom.clone(), track)`,
/// or let [`Prometheus::instrument`] wire it up. Requests for the exposition
/// path itself are passed through unrecorded, so scrapes do not inflate their
/// own metrics.
pub async fn track(State(prom): State<Prometheus>, req: Request, next: Next) -> Response {
    if req.uri().path() == prom.metrics_path() {
        return next.run(req).await;
    }

    let start = Instant::now();
    let method = req.method().as_str().to_owned();
    let host = host_of(&req);
    let handler = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unknown".to_owned());
    let mut url = (prom.inner.url_label)(&req);

    let (req, request_size) = measured_request(req, prom.inner.disable_body_reading).await;

    let response = next.run(req).await;

    if let Some(UrlLabel(label)) = response.extensions().get::<UrlLabel>() {
        url = label.clone();
    }
    let elapsed = match prom.inner.duration_unit {
        DurationUnit::Seconds => start.elapsed().as_secs_f64(),
        DurationUnit::Microseconds => start.elapsed().as_secs_f64() * 1_000_000.0,
    };

    prom.record(&RequestObservation {
        code: response.status().as_u16().to_string(),
        method,
        handler,
        host,
        url,
        elapsed,
        request_size,
        response_size: response_size(&response),
    });

    response
}

fn host_of(req: &Request) -> String {
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        // HTTP/2 carries the host in the :authority pseudo-header, surfaced
        // through the URI.
        .or_else(|| req.uri().authority().map(|a| a.as_str().to_owned()))
        .unwrap_or_default()
}

/// Approximate request size: path, method, protocol, headers and host, plus
/// the body. When body reading is enabled the body is buffered and a fresh
/// readable body is reinstalled, so downstream handlers are unaffected; on a
/// read failure the declared `Content-Length` is used instead.
async fn measured_request(req: Request, disable_body_reading: bool) -> (Request, u64) {
    let mut size = req.uri().path().len() as u64;
    size += req.method().as_str().len() as u64;
    size += protocol(req.version()).len() as u64;
    for (name, value) in req.headers() {
        size += name.as_str().len() as u64;
        size += value.len() as u64;
    }
    if !req.headers().contains_key(header::HOST) {
        size += req.uri().authority().map(|a| a.as_str().len()).unwrap_or(0) as u64;
    }

    let declared = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    if disable_body_reading {
        return (req, size + declared.unwrap_or(0));
    }

    let (parts, body) = req.into_parts();
    match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => {
            size += bytes.len() as u64;
            (Request::from_parts(parts, Body::from(bytes)), size)
        },
        Err(err) => {
            error!(%err, "cannot read request body for size measurement");
            size += declared.unwrap_or(0);
            (Request::from_parts(parts, Body::empty()), size)
        },
    }
}

fn response_size(response: &Response) -> u64 {
    if let Some(exact) = response.body().size_hint().exact() {
        return exact;
    }
    // Streaming bodies: fall back to a declared length, else record zero.
    response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn protocol(version: Version) -> &'static str {
    if version == Version::HTTP_11 {
        "HTTP/1.1"
    } else if version == Version::HTTP_2 {
        "HTTP/2.0"
    } else if version == Version::HTTP_10 {
        "HTTP/1.0"
    } else if version == Version::HTTP_3 {
        "HTTP/3.0"
    } else if version == Version::HTTP_09 {
        "HTTP/0.9"
    } else {
        "HTTP"
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request as HttpRequest;

    use super::*;

    #[tokio::test]
    async fn size_includes_headers_and_body() {
        let req = HttpRequest::builder()
            .method("POST")
            .uri("/submit")
            .header("host", "example.com")
            .header("content-length", "4")
            .body(Body::from("abcd"))
            .unwrap();

        let (req, size) = measured_request(req, false).await;
        // path(7) + method(4) + proto(8) + host header(4+11) + content-length
        // header(14+1) + body(4)
        assert_eq!(size, 7 + 4 + 8 + 4 + 11 + 14 + 1 + 4);

        // Body is still readable downstream.
        let body = axum::body::to_bytes(req.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"abcd");
    }

    #[tokio::test]
    async fn disabled_body_reading_uses_declared_length() {
        let req = HttpRequest::builder()
            .method("POST")
            .uri("/submit")
            .header("content-length", "4")
            .body(Body::from("abcd"))
            .unwrap();

        let (req, size) = measured_request(req, true).await;
        assert_eq!(size, 7 + 4 + 8 + 14 + 1 + 4);
        // The body was not consumed.
        let body = axum::body::to_bytes(req.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"abcd");
    }

    #[test]
    fn fixed_response_bodies_report_their_exact_size() {
        let response = Response::new(Body::from("hello"));
        assert_eq!(response_size(&response), 5);
    }
}
