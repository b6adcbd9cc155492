//! Unit reachability probe
//!
//! Before a synchronization run an operator wants to know which controllers
//! answer at all. A unit counts as reachable only when every one of the
//! configured TCP connect attempts to its endpoint succeeds.

use crate::config::{HealthConfig, DEFAULT_OPCUA_PORT};
use crate::error::{RecipeSyncError, Result};
use crate::types::{UnitEndpoint, UnitId};
use serde::Serialize;
use tokio::net::TcpStream;

/// Reachability of one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitReachability {
    pub unit_id: UnitId,
    pub address: String,
    pub attempts: u32,
    pub successes: u32,
    /// Last failure, if any attempt failed
    pub error: Option<String>,
}

impl UnitReachability {
    pub fn is_reachable(&self) -> bool {
        self.attempts > 0 && self.successes == self.attempts
    }
}

impl std::fmt::Display for UnitReachability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unit {} at {}: {} ({}/{})",
            self.unit_id,
            self.address,
            if self.is_reachable() { "reachable" } else { "unreachable" },
            self.successes,
            self.attempts
        )?;
        if let Some(error) = &self.error {
            write!(f, " - {}", error)?;
        }
        Ok(())
    }
}

/// Split `opc.tcp://host[:port][/path]` into host and port
pub fn parse_endpoint(url: &str) -> Result<(String, u16)> {
    let rest = url
        .trim()
        .strip_prefix("opc.tcp://")
        .ok_or_else(|| RecipeSyncError::Address(format!("not an opc.tcp endpoint: '{}'", url)))?;
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(RecipeSyncError::Address(format!("missing host in '{}'", url)));
    }

    // [v6]:port
    if let Some(v6) = authority.strip_prefix('[') {
        let (host, tail) = v6
            .split_once(']')
            .ok_or_else(|| RecipeSyncError::Address(format!("unterminated IPv6 host in '{}'", url)))?;
        let port = match tail.strip_prefix(':') {
            Some(port) => parse_port(port, url)?,
            None => DEFAULT_OPCUA_PORT,
        };
        return Ok((host.to_string(), port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => Ok((host.to_string(), parse_port(port, url)?)),
        None => Ok((authority.to_string(), DEFAULT_OPCUA_PORT)),
    }
}

fn parse_port(port: &str, url: &str) -> Result<u16> {
    port.parse::<u16>()
        .map_err(|_| RecipeSyncError::Address(format!("invalid port in '{}'", url)))
}

/// Probe one endpoint
pub async fn probe(unit_id: UnitId, address: &str, config: &HealthConfig) -> UnitReachability {
    let mut result = UnitReachability {
        unit_id,
        address: address.to_string(),
        attempts: config.attempts,
        successes: 0,
        error: None,
    };

    let (host, port) = match parse_endpoint(address) {
        Ok(target) => target,
        Err(e) => {
            result.error = Some(e.to_string());
            return result;
        }
    };

    for attempt in 1..=config.attempts {
        match tokio::time::timeout(config.timeout(), TcpStream::connect((host.as_str(), port))).await {
            Ok(Ok(_)) => result.successes += 1,
            Ok(Err(e)) => {
                tracing::debug!("unit {} attempt {}: {}", unit_id, attempt, e);
                result.error = Some(e.to_string());
            }
            Err(_) => {
                tracing::debug!("unit {} attempt {} timed out", unit_id, attempt);
                result.error = Some(format!("timed out after {:?}", config.timeout()));
            }
        }
    }

    result
}

/// Probe every unit in order
pub async fn probe_units(units: &[UnitEndpoint], config: &HealthConfig) -> Vec<UnitReachability> {
    let mut results = Vec::with_capacity(units.len());
    for unit in units {
        let status = probe(unit.id, &unit.address, config).await;
        if status.is_reachable() {
            tracing::info!("{}", status);
        } else {
            tracing::warn!("{}", status);
        }
        results.push(status);
    }
    results
}
