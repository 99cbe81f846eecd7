use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Answers whether a DNS name resolves. Any failure counts as "no".
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolves(&self, name: &str) -> bool;
}

/// The system resolver, reached through `getaddrinfo` on tokio's blocking pool.
pub struct DnsResolver;

#[async_trait]
impl Resolve for DnsResolver {
    async fn resolves(&self, name: &str) -> bool {
        match tokio::net::lookup_host((name, 0)).await {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(_) => false,
        }
    }
}

/// DNSBL-style suffixes checked against every connecting peer.
pub struct SpamBlocklist {
    suffixes: Vec<String>,
    resolver: Arc<dyn Resolve>,
}

impl SpamBlocklist {
    pub fn new(suffixes: Vec<String>) -> Self {
        Self::with_resolver(suffixes, Arc::new(DnsResolver))
    }

    pub fn with_resolver(suffixes: Vec<String>, resolver: Arc<dyn Resolve>) -> Self {
        let suffixes = suffixes.iter().filter_map(|s| normalize_suffix(s)).collect();
        Self { suffixes, resolver }
    }

    /// Reads one suffix per line. Blank lines and `#` comments are skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read blocklist: {:?}", path))?;
        Ok(Self::new(parse_suffixes(&text)))
    }

    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    pub fn len(&self) -> usize {
        self.suffixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }

    /// True as soon as `reversed-ip + suffix` resolves for any suffix.
    pub async fn is_blocked(&self, ip: IpAddr) -> bool {
        let reversed = reverse_ip(ip);
        for suffix in &self.suffixes {
            let name = format!("{}{}", reversed, suffix);
            if self.resolver.resolves(&name).await {
                return true;
            }
        }
        false
    }
}

impl Default for SpamBlocklist {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

pub fn parse_suffixes(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn normalize_suffix(suffix: &str) -> Option<String> {
    let suffix = suffix.trim();
    if suffix.is_empty() || suffix == "." {
        return None;
    }
    if suffix.starts_with('.') {
        Some(suffix.to_string())
    } else {
        Some(format!(".{}", suffix))
    }
}

/// Reverses an address the way DNS blocklists index it: octets for IPv4
/// (`1.2.3.4` -> `4.3.2.1`), nibbles for IPv6.
pub fn reverse_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{}.{}.{}.{}", d, c, b, a)
        }
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => reverse_ip(IpAddr::V4(v4)),
            None => {
                let mut nibbles = Vec::with_capacity(32);
                for byte in v6.octets().iter().rev() {
                    nibbles.push(format!("{:x}", byte & 0x0f));
                    nibbles.push(format!("{:x}", byte >> 4));
                }
                nibbles.join(".")
            }
        },
    }
}
