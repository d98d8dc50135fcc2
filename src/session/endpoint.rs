//! Broker endpoint parsing and resolution
//!
//! Accepts `host`, `host:port`, `[v6addr]:port` and `mqtt://host:port`
//! forms. The port defaults to 1883.

use crate::error::{SessionError, SessionResult};
use async_trait::async_trait;
use std::net::SocketAddr;
use url::Url;

pub const MQTT_DEFAULT_PORT: u16 = 1883;

/// Name resolution used by `connect`
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>>;
}

/// System resolver backed by `tokio::net::lookup_host`
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

#[async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host((host, port)).await?.collect())
    }
}

/// Split a broker string into host name and port (pure function)
pub fn parse_host(host: &str) -> SessionResult<(String, u16)> {
    let trimmed = host.trim();
    if trimmed.is_empty() {
        return Err(SessionError::invalid_host(host, "empty host"));
    }

    if trimmed.contains("://") {
        return parse_url(host, trimmed);
    }

    if let Some(rest) = trimmed.strip_prefix('[') {
        let (name, tail) = rest
            .split_once(']')
            .ok_or_else(|| SessionError::invalid_host(host, "unterminated IPv6 literal"))?;
        let port = match tail.strip_prefix(':') {
            Some(port) => parse_port(host, port)?,
            None if tail.is_empty() => MQTT_DEFAULT_PORT,
            None => return Err(SessionError::invalid_host(host, "unexpected text after ']'")),
        };
        return Ok((name.to_string(), port));
    }

    match trimmed.matches(':').count() {
        0 => Ok((trimmed.to_string(), MQTT_DEFAULT_PORT)),
        1 => {
            let (name, port) = trimmed
                .split_once(':')
                .ok_or_else(|| SessionError::invalid_host(host, "missing port"))?;
            if name.is_empty() {
                return Err(SessionError::invalid_host(host, "empty host name"));
            }
            Ok((name.to_string(), parse_port(host, port)?))
        }
        // Bare IPv6 literal
        _ => Ok((trimmed.to_string(), MQTT_DEFAULT_PORT)),
    }
}

fn parse_url(host: &str, trimmed: &str) -> SessionResult<(String, u16)> {
    let url = Url::parse(trimmed).map_err(|e| SessionError::invalid_host(host, e.to_string()))?;

    match url.scheme() {
        "mqtt" | "tcp" => {}
        other => {
            return Err(SessionError::invalid_host(
                host,
                format!("unsupported scheme '{other}'"),
            ))
        }
    }

    let name = url
        .host_str()
        .ok_or_else(|| SessionError::invalid_host(host, "missing host name"))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();

    Ok((name, url.port().unwrap_or(MQTT_DEFAULT_PORT)))
}

fn parse_port(host: &str, port: &str) -> SessionResult<u16> {
    match port.parse::<u16>() {
        Ok(0) => Err(SessionError::invalid_host(host, "port must be non-zero")),
        Ok(port) => Ok(port),
        Err(_) => Err(SessionError::invalid_host(
            host,
            format!("invalid port '{port}'"),
        )),
    }
}

/// Resolve a broker string to one address, preferring IPv4
pub async fn resolve_endpoint(resolver: &dyn Resolver, host: &str) -> SessionResult<SocketAddr> {
    let (name, port) = parse_host(host)?;

    let addrs = resolver
        .resolve(&name, port)
        .await
        .map_err(|source| SessionError::Resolve {
            host: host.to_string(),
            source,
        })?;

    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| SessionError::Resolve {
            host: host.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses returned"),
        })
}
