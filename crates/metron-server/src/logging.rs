use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::{header, HeaderMap, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use rand::Rng;
use std::fmt::Write;
use std::time::Instant;

pub const TRACE_HEADER: &str = "X-Trace-Id";

/// Request bodies larger than this are rejected before reaching a handler.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

const MAX_BODY_LOG_CHARS: usize = 200;

/// Per-request trace id, available to handlers as an extension.
#[derive(Clone)]
pub struct TraceId(pub String);

impl std::ops::Deref for TraceId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

fn generate_trace_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    bytes.iter().fold(String::with_capacity(16), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Cuts `bytes` to at most `max` bytes on a char boundary.
fn snippet(bytes: &[u8], max: usize) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if s.len() > max => {
            let mut end = max;
            while !s.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &s[..end])
        }
        Ok(s) => s.to_string(),
        Err(_) => "<non-utf8 body>".to_string(),
    }
}

fn format_elapsed(elapsed_us: u128) -> String {
    match elapsed_us {
        us if us < 1_000 => format!("{us}µs"),
        us if us < 1_000_000 => format!("{}ms", us / 1_000),
        us => format!("{:.1}s", us as f64 / 1_000_000.0),
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"))
}

async fn buffer(body: Body, limit: usize) -> Bytes {
    axum::body::to_bytes(body, limit).await.unwrap_or_default()
}

/// Tags each request with a trace id and logs it on the way in and out.
///
/// Ingest payloads are logged as a truncated snippet; the response level
/// follows the status class.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = generate_trace_id();
    req.extensions_mut().insert(TraceId(trace_id.clone()));

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let req = if *req.method() == Method::POST {
        let (parts, body) = req.into_parts();
        let bytes = buffer(body, MAX_BODY_BYTES).await;
        tracing::info!(
            trace_id = %trace_id,
            method = %method,
            path = %path,
            bytes = bytes.len(),
            body = %snippet(&bytes, MAX_BODY_LOG_CHARS),
            "--> request"
        );
        Request::from_parts(parts, Body::from(bytes))
    } else {
        tracing::info!(trace_id = %trace_id, method = %method, path = %path, "--> request");
        req
    };

    let start = Instant::now();
    let response = next.run(req).await;
    let elapsed = format_elapsed(start.elapsed().as_micros());
    let status = response.status();

    let (mut parts, body) = response.into_parts();
    let bytes = buffer(body, usize::MAX).await;
    let body = if is_json(&parts.headers) {
        snippet(&bytes, MAX_BODY_LOG_CHARS)
    } else {
        String::new()
    };

    let code = status.as_u16();
    if status.is_server_error() {
        tracing::error!(trace_id = %trace_id, status = code, elapsed = %elapsed, body = %body, "<-- response");
    } else if status.is_client_error() {
        tracing::warn!(trace_id = %trace_id, status = code, elapsed = %elapsed, body = %body, "<-- response");
    } else {
        tracing::info!(trace_id = %trace_id, status = code, elapsed = %elapsed, "<-- response");
    }

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        parts.headers.insert(TRACE_HEADER, value);
    }
    Response::from_parts(parts, Body::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_respects_char_boundaries() {
        assert_eq!(snippet(b"short", 10), "short");
        assert_eq!(snippet("ééé".as_bytes(), 3), "é...");
        assert_eq!(snippet(&[0xff, 0xfe], 10), "<non-utf8 body>");
    }

    #[test]
    fn elapsed_picks_unit() {
        assert_eq!(format_elapsed(999), "999µs");
        assert_eq!(format_elapsed(12_345), "12ms");
        assert_eq!(format_elapsed(2_500_000), "2.5s");
    }

    #[test]
    fn trace_ids_are_sixteen_hex_chars() {
        let id = generate_trace_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
