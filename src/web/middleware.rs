//! Request tracking middleware
//!
//! Records every request passing through the wrapped service as a page view,
//! except requests for the dashboard itself.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderMap, Request},
    response::Response,
};
use futures::future::BoxFuture;
use std::{net::SocketAddr, sync::Arc, task::{Context, Poll}};
use tower::{Layer, Service};

use crate::{Analytics, RequestInfo};

/// Get the real client IP address, checking proxy headers first
/// Priority: X-Real-IP > X-Forwarded-For (first IP) > ConnectInfo
pub(crate) fn get_real_ip(headers: &HeaderMap, fallback_ip: &str) -> String {
    // Try X-Real-IP first (set by Caddy/nginx)
    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip) = real_ip.to_str() {
            let ip = ip.trim();
            if !ip.is_empty() {
                return ip.to_string();
            }
        }
    }

    // Try X-Forwarded-For (may contain chain of IPs, first is original client)
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(ips) = forwarded.to_str() {
            if let Some(first_ip) = ips.split(',').next() {
                let ip = first_ip.trim();
                if !ip.is_empty() {
                    return ip.to_string();
                }
            }
        }
    }

    // Fallback to direct connection IP
    fallback_ip.to_string()
}

/// Extract the fields the recorder needs from a request
pub(crate) fn request_info<B>(request: &Request<B>) -> RequestInfo {
    let headers = request.headers();
    let fallback_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    RequestInfo {
        address: get_real_ip(headers, &fallback_ip),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        path: request.uri().path().to_string(),
        query: request.uri().query().unwrap_or_default().to_string(),
    }
}

/// Layer that feeds requests into an [`Analytics`] recorder
#[derive(Clone)]
pub struct RequestTrackingLayer {
    analytics: Arc<Analytics>,
}

impl RequestTrackingLayer {
    pub fn new(analytics: Arc<Analytics>) -> Self {
        Self { analytics }
    }
}

impl<S> Layer<S> for RequestTrackingLayer {
    type Service = RequestTrackingMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestTrackingMiddleware {
            inner,
            analytics: self.analytics.clone(),
        }
    }
}

/// Middleware service for request tracking
#[derive(Clone)]
pub struct RequestTrackingMiddleware<S> {
    inner: S,
    analytics: Arc<Analytics>,
}

impl<S> Service<Request<Body>> for RequestTrackingMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        // Recording is an in-memory append, done before handing off
        let dashboard = self.analytics.config().dashboard_path.trim_end_matches('/');
        let path = request.uri().path();
        let is_dashboard = path == dashboard
            || path
                .strip_prefix(dashboard)
                .is_some_and(|rest| rest.starts_with('/'));

        if !is_dashboard {
            let info = request_info(&request);
            if self.analytics.insert_request(&info) {
                tracing::debug!("Recorded {} from {}", info.path, info.address);
            }
        }

        // Swap in the clone that was polled ready
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(request).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_real_ip_prefers_proxy_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(get_real_ip(&headers, "10.0.0.1"), "10.0.0.1");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.2"));
        assert_eq!(get_real_ip(&headers, "10.0.0.1"), "203.0.113.7");

        headers.insert("x-real-ip", HeaderValue::from_static(" 198.51.100.4 "));
        assert_eq!(get_real_ip(&headers, "10.0.0.1"), "198.51.100.4");
    }

    #[test]
    fn test_request_info_fields() {
        let request = Request::builder()
            .uri("/blog/2024/post-1?utm=mail&x=1")
            .header("user-agent", "Mozilla/5.0")
            .header("x-real-ip", "192.0.2.1")
            .body(Body::empty())
            .unwrap();

        let info = request_info(&request);
        assert_eq!(info.address, "192.0.2.1");
        assert_eq!(info.user_agent, "Mozilla/5.0");
        assert_eq!(info.path, "/blog/2024/post-1");
        assert_eq!(info.query, "utm=mail&x=1");
    }

    #[test]
    fn test_request_info_without_connect_info() {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let info = request_info(&request);
        assert_eq!(info.address, "unknown");
        assert_eq!(info.user_agent, "");
        assert_eq!(info.query, "");
    }
}
