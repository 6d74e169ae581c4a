// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Client identity derivation.

use sha2::{Digest, Sha256};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Sentinel address for clients whose origin could not be parsed.
///
/// A fingerprint carrying this address never passes admission, so a proxy
/// misconfiguration fails closed instead of collapsing every unattributable
/// request into one shared rate window.
pub const UNKNOWN_ADDR: &str = "unknown";

/// Identity a request is accounted against.
///
/// Built from the first hop of a forwarded-address chain plus an optional
/// short digest of the user agent, so two clients behind the same NAT with
/// different agents get separate windows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientFingerprint {
    address: String,
    agent_digest: Option<String>,
}

impl ClientFingerprint {
    /// Derive a fingerprint from a raw address string and user agent.
    ///
    /// The address may be a bare IP, an `ip:port` socket address, or a
    /// comma-separated forwarded chain; only the first hop counts. Anything
    /// unparsable becomes [`UNKNOWN_ADDR`].
    pub fn derive(raw_address: Option<&str>, user_agent: Option<&str>) -> Self {
        Self {
            address: canonical_address(raw_address),
            agent_digest: agent_digest(user_agent),
        }
    }

    pub fn is_known(&self) -> bool {
        self.address != UNKNOWN_ADDR
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Stable key for rate-window bookkeeping.
    pub fn key(&self) -> String {
        match &self.agent_digest {
            Some(digest) => format!("{}#{}", self.address, digest),
            None => self.address.clone(),
        }
    }
}

impl fmt::Display for ClientFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.agent_digest {
            Some(digest) => write!(f, "{}#{}", self.address, digest),
            None => f.write_str(&self.address),
        }
    }
}

fn canonical_address(raw: Option<&str>) -> String {
    let first_hop = raw
        .and_then(|raw| raw.split(',').next())
        .map(str::trim)
        .unwrap_or("");
    if first_hop.is_empty() {
        return UNKNOWN_ADDR.to_string();
    }

    // Parsing through IpAddr canonicalizes spellings, e.g. collapsing
    // long-form IPv6 down to "::1".
    if let Ok(ip) = first_hop.parse::<IpAddr>() {
        return ip.to_string();
    }
    if let Ok(sock) = first_hop.parse::<SocketAddr>() {
        return sock.ip().to_string();
    }

    UNKNOWN_ADDR.to_string()
}

fn agent_digest(user_agent: Option<&str>) -> Option<String> {
    let agent = user_agent.map(str::trim).filter(|agent| !agent.is_empty())?;
    let digest = Sha256::digest(agent.as_bytes());
    Some(hex::encode(&digest[..4]))
}
