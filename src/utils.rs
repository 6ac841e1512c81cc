// src/utils.rs
use actix_web::{HttpRequest, HttpResponse, ResponseError};
use log::debug;
use std::fmt;
use std::net::IpAddr;

use crate::storage::memory::StoreError;

#[derive(Debug)]
pub enum RequestError {
    MissingPeerIP,
    RateLimitExceeded,
    Store(StoreError),
    ServerNotFound(String),
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPeerIP => write!(f, "Failed to extract client IP"),
            Self::RateLimitExceeded => write!(f, "Rate limit exceeded"),
            Self::Store(e) => write!(f, "{}", e),
            Self::ServerNotFound(host) => write!(f, "Server not found: {}", host),
        }
    }
}

impl From<StoreError> for RequestError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl ResponseError for RequestError {
    fn error_response(&self) -> HttpResponse {
        let body = serde_json::json!({ "error": self.to_string() });
        match self {
            Self::RateLimitExceeded => HttpResponse::TooManyRequests().json(body),
            Self::Store(StoreError::UnknownGame(_)) | Self::ServerNotFound(_) => {
                HttpResponse::NotFound().json(body)
            }
            Self::Store(StoreError::InvalidTransition { .. }) => HttpResponse::Conflict().json(body),
            _ => HttpResponse::BadRequest().json(body),
        }
    }
}

/// Client address used for rate limiting: first `X-Forwarded-For` entry, else the peer.
pub fn client_ip(req: &HttpRequest) -> Result<IpAddr, RequestError> {
    if let Some(forwarded_for) = req.headers().get("X-Forwarded-For") {
        if let Ok(ip_str) = forwarded_for.to_str() {
            if let Some(first_ip) = ip_str.split(',').next() {
                if let Ok(ip) = first_ip.trim().parse::<IpAddr>() {
                    debug!("Using X-Forwarded-For address: {}", ip);
                    return Ok(ip);
                }
            }
        }
    }

    req.peer_addr()
        .map(|addr| addr.ip())
        .ok_or(RequestError::MissingPeerIP)
}

/// Drops a trailing `:port` from `host:port`. Bracketed IPv6 loses its brackets.
pub fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        // bare IPv6 has more than one colon and no port
        Some((addr, port)) if !addr.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            addr
        }
        _ => host,
    }
}

/// Drops a `scheme://` prefix, if any.
pub fn strip_scheme(uri: &str) -> &str {
    match uri.split_once("://") {
        Some((_, rest)) => rest,
        None => uri,
    }
}

/// Removes `^X` color escapes (a caret and the character after it).
pub fn strip_color_codes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '^' {
            chars.next();
        } else {
            out.push(c);
        }
    }
    out
}

/// Reads a boolean-looking value. Returns `None` when the text is not recognisable;
/// callers pick their own default.
pub fn parse_flag(text: &str) -> Option<bool> {
    let text = text.trim();
    match text.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        other => other.parse::<i64>().ok().map(|n| n != 0),
    }
}

/// Reads a non-negative count, `None` for anything that is not a number.
pub fn parse_count(text: &str) -> Option<u32> {
    let text = text.trim();
    text.parse::<u32>()
        .ok()
        .or_else(|| text.parse::<i64>().ok().map(|n| n.clamp(0, u32::MAX as i64) as u32))
}
