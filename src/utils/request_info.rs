//! HTTP 请求上下文提取（审计用）
//!
//! 客户端 IP 优先级：X-Forwarded-For 首个地址 → X-Real-IP → 对端地址，不可解析的值跳过。
//! Authorization / Cookie 头在写入审计前替换为脱敏标记。

use std::net::{IpAddr, SocketAddr};

use axum::http::{header, HeaderMap, Request};

use crate::{
    domain::{Metadata, StructuredValue},
    infrastructure::log_sanitizer::{sanitize_string, REDACTED},
};

const REDACTED_HEADERS: [&str; 2] = ["authorization", "cookie"];

/// 审计所需的请求摘要
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequestInfo {
    pub method: String,
    pub path: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    /// 已脱敏的请求快照：query / headers / content_length
    pub request_data: StructuredValue,
}

impl HttpRequestInfo {
    pub fn from_request<B>(request: &Request<B>, peer: Option<SocketAddr>) -> Self {
        let headers = request.headers();
        let uri = request.uri();

        let mut data = Metadata::new();
        if let Some(query) = uri.query().filter(|q| !q.is_empty()) {
            data.insert("query".into(), sanitize_string(query).into());
        }
        data.insert("headers".into(), StructuredValue::Map(sanitize_headers(headers)));
        let content_length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        data.insert("content_length".into(), content_length.into());

        Self {
            method: request.method().as_str().to_string(),
            path: uri.path().to_string(),
            client_ip: client_ip(headers, peer),
            user_agent: headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            request_data: StructuredValue::Map(data),
        }
    }

    /// `/api/v1/<resource>/...` 中的 resource，其他路径返回 "unknown"
    pub fn resource(&self) -> String {
        resource_from_path(&self.path)
    }
}

/// 只接受可解析的 IP（允许带端口），无效值跳过并继续按优先级查找
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(ip) = header_value("x-forwarded-for")
        .and_then(|xff| xff.split(',').map(str::trim).find(|s| !s.is_empty()))
        .and_then(parse_ip)
    {
        return Some(ip.to_string());
    }
    if let Some(ip) = header_value("x-real-ip").and_then(parse_ip) {
        return Some(ip.to_string());
    }
    peer.map(|addr| addr.ip().to_string())
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    raw.parse::<IpAddr>()
        .or_else(|_| raw.parse::<SocketAddr>().map(|addr| addr.ip()))
        .ok()
}

pub fn resource_from_path(path: &str) -> String {
    let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
    match parts.as_slice() {
        ["api", _, resource, ..] if !resource.is_empty() => resource.to_string(),
        _ => "unknown".to_string(),
    }
}

fn sanitize_headers(headers: &HeaderMap) -> Metadata {
    let mut out = Metadata::new();
    for name in headers.keys() {
        let key = name.as_str().to_string();
        let value = if REDACTED_HEADERS.contains(&name.as_str()) {
            REDACTED.to_string()
        } else {
            headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join(", ")
        };
        out.insert(key, value.into());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(headers: &[(&str, &str)]) -> Request<()> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/v1/bookings/42?token=abc&page=2");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_client_ip_precedence() {
        let peer: SocketAddr = "192.0.2.1:5555".parse().unwrap();

        let req = request(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1"), ("x-real-ip", "198.51.100.2")]);
        assert_eq!(HttpRequestInfo::from_request(&req, Some(peer)).client_ip.as_deref(), Some("203.0.113.7"));

        let req = request(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(HttpRequestInfo::from_request(&req, Some(peer)).client_ip.as_deref(), Some("198.51.100.2"));

        let req = request(&[]);
        assert_eq!(HttpRequestInfo::from_request(&req, Some(peer)).client_ip.as_deref(), Some("192.0.2.1"));
        assert_eq!(HttpRequestInfo::from_request(&req, None).client_ip, None);
    }

    #[test]
    fn test_client_ip_rejects_garbage() {
        let peer: SocketAddr = "192.0.2.1:5555".parse().unwrap();
        let long = "a".repeat(80);

        let req = request(&[("x-forwarded-for", long.as_str()), ("x-real-ip", "198.51.100.2")]);
        assert_eq!(HttpRequestInfo::from_request(&req, Some(peer)).client_ip.as_deref(), Some("198.51.100.2"));

        let req = request(&[("x-forwarded-for", "not-an-ip"), ("x-real-ip", long.as_str())]);
        assert_eq!(HttpRequestInfo::from_request(&req, Some(peer)).client_ip.as_deref(), Some("192.0.2.1"));
        assert_eq!(HttpRequestInfo::from_request(&req, None).client_ip, None);

        let req = request(&[("x-forwarded-for", "203.0.113.7:443, 10.0.0.1")]);
        assert_eq!(HttpRequestInfo::from_request(&req, None).client_ip.as_deref(), Some("203.0.113.7"));

        let req = request(&[("x-real-ip", "2001:db8::1")]);
        assert_eq!(HttpRequestInfo::from_request(&req, None).client_ip.as_deref(), Some("2001:db8::1"));
    }

    #[test]
    fn test_request_data_is_sanitized() {
        let req = request(&[
            ("authorization", "Bearer abc"),
            ("cookie", "sid=1"),
            ("user-agent", "curl/8.0"),
            ("content-length", "17"),
        ]);
        let info = HttpRequestInfo::from_request(&req, None);

        assert_eq!(info.method, "POST");
        assert_eq!(info.resource(), "bookings");
        assert_eq!(info.user_agent.as_deref(), Some("curl/8.0"));

        let data = &info.request_data;
        assert_eq!(data.get("query").and_then(|v| v.as_str()), Some("token=[REDACTED]&page=2"));
        let headers = data.get("headers").unwrap();
        assert_eq!(headers.get("authorization").and_then(|v| v.as_str()), Some(REDACTED));
        assert_eq!(headers.get("cookie").and_then(|v| v.as_str()), Some(REDACTED));
        assert_eq!(data.get("content_length"), Some(&StructuredValue::from(17u64)));
    }

    #[test]
    fn test_resource_from_path() {
        assert_eq!(resource_from_path("/api/v1/properties"), "properties");
        assert_eq!(resource_from_path("/api/v1"), "unknown");
        assert_eq!(resource_from_path("/healthz"), "unknown");
    }
}
