//! Canonical forms for identity values.
//!
//! Two cells that name the same host, address, endpoint or URL must produce
//! the same key here, whatever their spelling in the store.

use std::net::{IpAddr, Ipv4Addr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    /// A DNS name or a bare address.
    Host,
    Ip,
    /// `host:port`, where the port part may be a list or range after edits.
    Endpoint,
    /// A probe target: bare host, `host:port`, or a full URL.
    Target,
    Url,
}

pub fn normalize_identity(kind: IdentityKind, raw: &str) -> String {
    match kind {
        IdentityKind::Host => normalize_host(raw),
        IdentityKind::Ip => normalize_ip(raw),
        IdentityKind::Endpoint => normalize_endpoint(raw),
        IdentityKind::Target => normalize_target(raw),
        IdentityKind::Url => normalize_url(raw),
    }
}

/// Parse an address, accepting bracketed IPv6 and zero-padded IPv4 octets.
pub fn parse_ip(raw: &str) -> Option<IpAddr> {
    let trimmed = raw.trim();
    let unbracketed = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);
    if let Ok(ip) = unbracketed.parse::<IpAddr>() {
        return Some(ip);
    }
    parse_padded_ipv4(unbracketed).map(IpAddr::V4)
}

fn parse_padded_ipv4(raw: &str) -> Option<Ipv4Addr> {
    let parts: Vec<&str> = raw.split('.').collect();
    if parts.len() != 4 {
        return None;
    }
    let mut octets = [0u8; 4];
    for (slot, part) in octets.iter_mut().zip(&parts) {
        if part.is_empty() || part.len() > 3 || !part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        *slot = part.parse().ok()?;
    }
    Some(Ipv4Addr::from(octets))
}

pub fn normalize_ip(raw: &str) -> String {
    match parse_ip(raw) {
        Some(ip) => ip.to_string(),
        None => raw.trim().to_lowercase(),
    }
}

pub fn normalize_host(raw: &str) -> String {
    if let Some(ip) = parse_ip(raw) {
        return ip.to_string();
    }
    raw.trim().trim_end_matches('.').to_lowercase()
}

/// Split `host:port` into its parts. Bare IPv6 without brackets has no port.
pub fn split_endpoint(raw: &str) -> Option<(&str, &str)> {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = tail.strip_prefix(':')?;
        return Some((host, port));
    }
    let (host, port) = trimmed.rsplit_once(':')?;
    if host.contains(':') || host.is_empty() || port.is_empty() {
        return None;
    }
    Some((host, port))
}

pub fn format_endpoint(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Canonical port text: numbers lose leading zeros, list/range separators are
/// kept so a hand-edited `080, 443` and `80,443` collide.
pub fn normalize_port(raw: &str) -> String {
    raw.split(',')
        .map(|piece| {
            piece
                .split('-')
                .map(|n| {
                    let n = n.trim();
                    n.parse::<u16>().map(|p| p.to_string()).unwrap_or_else(|_| n.to_lowercase())
                })
                .collect::<Vec<_>>()
                .join("-")
        })
        .collect::<Vec<_>>()
        .join(",")
}

pub fn normalize_endpoint(raw: &str) -> String {
    match split_endpoint(raw) {
        Some((host, port)) => format_endpoint(&normalize_host(host), &normalize_port(port)),
        None => normalize_host(raw),
    }
}

pub fn normalize_target(raw: &str) -> String {
    if raw.contains("://") {
        normalize_url(raw)
    } else {
        normalize_endpoint(raw)
    }
}

pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match url::Url::parse(trimmed) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => trimmed.to_lowercase(),
    }
}
