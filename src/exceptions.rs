//! IP Exception List
//!
//! Excepted addresses are never reported, whatever their stored reputation.
//! The list is a set of CIDR networks loaded from newline-delimited files and
//! periodically reloaded in the background.

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use parking_lot::RwLock;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Answers whether an address is excluded from reputation reporting
pub trait ExceptionPredicate: Send + Sync {
    fn is_exception(&self, address: &str) -> bool;
}

/// Predicate with no exceptions
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExceptions;

impl ExceptionPredicate for NoExceptions {
    fn is_exception(&self, _address: &str) -> bool {
        false
    }
}

/// Parse one exception entry; a bare address is a host route
///
/// IPv4-mapped IPv6 entries are stored as their IPv4 network so they match
/// lookups, which collapse mapped addresses the same way.
pub fn parse_network(entry: &str) -> Option<IpNet> {
    let net = match entry.parse::<IpNet>() {
        Ok(net) => net,
        Err(_) => IpNet::from(entry.parse::<IpAddr>().ok()?),
    };
    Some(canonical(net).trunc())
}

fn canonical(net: IpNet) -> IpNet {
    if let IpNet::V6(v6) = net
        && v6.prefix_len() >= 96
        && let Some(v4) = v6.addr().to_ipv4_mapped()
        && let Ok(mapped) = Ipv4Net::new(v4, v6.prefix_len() - 96)
    {
        return IpNet::V4(mapped);
    }
    net
}

/// Parse exception entries, skipping comments, blanks and bad lines
pub fn parse_networks(content: &str) -> Vec<IpNet> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let net = parse_network(line);
            if net.is_none() {
                warn!(entry = %line, "Skipping invalid exception entry");
            }
            net
        })
        .collect()
}

/// Aggregated networks per family, sorted by network address
///
/// Aggregation leaves no overlapping networks, so the only candidate for an
/// address is the last network starting at or below it.
#[derive(Debug, Default)]
struct NetworkSet {
    v4: Vec<Ipv4Net>,
    v6: Vec<Ipv6Net>,
}

impl NetworkSet {
    fn new(networks: Vec<IpNet>) -> Self {
        let (mut v4, mut v6) = (Vec::new(), Vec::new());
        for net in networks {
            match net {
                IpNet::V4(net) => v4.push(net),
                IpNet::V6(net) => v6.push(net),
            }
        }
        let mut v4 = Ipv4Net::aggregate(&v4);
        v4.sort_unstable_by_key(|net| net.network());
        let mut v6 = Ipv6Net::aggregate(&v6);
        v6.sort_unstable_by_key(|net| net.network());
        Self { v4, v6 }
    }

    fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match ip.to_canonical() {
            IpAddr::V4(ip) => {
                let idx = self.v4.partition_point(|net| net.network() <= ip);
                idx > 0 && self.v4[idx - 1].contains(&ip)
            }
            IpAddr::V6(ip) => {
                let idx = self.v6.partition_point(|net| net.network() <= ip);
                idx > 0 && self.v6[idx - 1].contains(&ip)
            }
        }
    }
}

/// Shared, reloadable exception list
#[derive(Debug, Clone, Default)]
pub struct ExceptionList {
    networks: Arc<RwLock<NetworkSet>>,
}

impl ExceptionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_networks(networks: Vec<IpNet>) -> Self {
        Self {
            networks: Arc::new(RwLock::new(NetworkSet::new(networks))),
        }
    }

    /// Replace the current entries
    pub fn replace(&self, networks: Vec<IpNet>) {
        let set = NetworkSet::new(networks);
        *self.networks.write() = set;
    }

    /// Number of networks after aggregation
    pub fn len(&self) -> usize {
        self.networks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load every file and swap the result in; unreadable files are an error
    /// and leave the current entries untouched
    pub async fn load_files(&self, files: &[PathBuf]) -> anyhow::Result<usize> {
        let mut networks = Vec::new();
        for file in files {
            let content = tokio::fs::read_to_string(file).await.map_err(|e| {
                anyhow::anyhow!("Failed to read exception file {}: {}", file.display(), e)
            })?;
            let parsed = parse_networks(&content);
            debug!(file = %file.display(), entries = parsed.len(), "Loaded exception file");
            networks.extend(parsed);
        }
        let count = networks.len();
        self.replace(networks);
        Ok(count)
    }

    /// Reload the files every `interval` until the process exits
    pub fn spawn_refresh(
        &self,
        files: Vec<PathBuf>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let list = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick completes immediately; the initial load already ran
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match list.load_files(&files).await {
                    Ok(count) => info!(entries = count, "Refreshed exception list"),
                    Err(e) => warn!(error = %e, "Exception refresh failed, keeping previous list"),
                }
            }
        })
    }
}

impl ExceptionPredicate for ExceptionList {
    fn is_exception(&self, address: &str) -> bool {
        let Ok(ip) = address.parse::<IpAddr>() else {
            return false;
        };
        self.networks.read().contains(ip)
    }
}
