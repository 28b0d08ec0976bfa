//! Locating a wall connector on the local network.
//!
//! The connector exposes no identity, so a host counts as found once it has
//! the device port open and answers the vitals endpoint with a well-formed
//! payload. The first such host wins.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use futures::stream::{self, StreamExt, TryStreamExt};
use if_addrs::IfAddr;
use tokio::net::TcpStream;
use crate::config::DiscoveryConfig;
use crate::device::{DeviceClient, DeviceConnector};

/// Sweeps wider than this are narrowed to the /16 around the local address
const MIN_PREFIX: u8 = 16;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to enumerate network interfaces: {0}")]
    Interfaces(#[from] io::Error),
    #[error("network probe failed: {0}")]
    Probe(#[source] io::Error),
    #[error("unable to locate a local private IPv4 network")]
    NoLocalNetwork,
    #[error("unable to find a wall connector on the scanned network range {0}")]
    DeviceNotFound(String),
}

/// Anything that can produce a verified device client without prior knowledge
/// of its address.
pub trait Discover: Send + Sync {
    fn discover(&self) -> impl Future<Output = Result<DeviceClient, DiscoveryError>> + Send;
}

/// An IPv4 network block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    network: Ipv4Addr,
    prefix: u8,
}

impl Subnet {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Self {
        let prefix = prefix.min(32);
        Self {
            network: Ipv4Addr::from(u32::from(addr) & mask(prefix)),
            prefix,
        }
    }

    /// The block containing `ip` under `netmask`, narrowed to `MIN_PREFIX`
    pub fn from_interface(ip: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        let prefix = u32::from(netmask).leading_ones() as u8;
        Self::new(ip, prefix.max(MIN_PREFIX))
    }

    /// Host addresses in the block. Network and broadcast addresses are
    /// skipped except for /31 and /32, which have none.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let first = u32::from(self.network);
        let last = first | !mask(self.prefix);
        let (start, end) = if self.prefix >= 31 {
            (first, last)
        } else {
            (first + 1, last - 1)
        };
        (start..=end).map(Ipv4Addr::from)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

fn mask(prefix: u8) -> u32 {
    match prefix {
        0 => 0,
        p => u32::MAX << (32 - u32::from(p)),
    }
}

/// Pick the first private IPv4 address from `(address, netmask)` pairs
pub fn select_private_subnet(
    addrs: impl IntoIterator<Item = (Ipv4Addr, Ipv4Addr)>,
) -> Option<Subnet> {
    addrs
        .into_iter()
        .find(|(ip, _)| ip.is_private())
        .map(|(ip, netmask)| Subnet::from_interface(ip, netmask))
}

/// The subnet of the first interface with a private IPv4 address
pub fn local_subnet() -> Result<Subnet, DiscoveryError> {
    let interfaces = if_addrs::get_if_addrs()?;

    let addrs = interfaces.into_iter().filter_map(|iface| match iface.addr {
        IfAddr::V4(ref v4) if !iface.is_loopback() => Some((v4.ip, v4.netmask)),
        _ => None,
    });

    select_private_subnet(addrs).ok_or(DiscoveryError::NoLocalNetwork)
}

/// Transient result of probing one host
#[derive(Debug, Clone, Copy)]
struct Candidate {
    ip: IpAddr,
    open: bool,
}

/// Connect errors that describe the remote host rather than this machine
fn is_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
    )
}

/// A closed port is a normal outcome. Any other connect error (descriptor
/// or buffer exhaustion, for instance) is returned.
async fn probe(ip: IpAddr, port: u16, timeout: Duration) -> io::Result<Candidate> {
    let connect = TcpStream::connect(SocketAddr::new(ip, port));
    let open = match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) if is_closed(&e) => false,
        Ok(Err(e)) => return Err(e),
        Err(_) => false,
    };
    Ok(Candidate { ip, open })
}

/// Hosts with `port` open, in the order they were given. Stops at the first
/// probe that fails for a local reason.
pub async fn probe_hosts(
    hosts: impl IntoIterator<Item = IpAddr>,
    port: u16,
    timeout: Duration,
    concurrency: usize,
) -> io::Result<Vec<IpAddr>> {
    stream::iter(hosts)
        .map(|ip| probe(ip, port, timeout))
        .buffered(concurrency.max(1))
        .try_filter_map(|candidate| async move { Ok(candidate.open.then_some(candidate.ip)) })
        .try_collect()
        .await
}

/// First candidate that answers the vitals endpoint with a valid payload
pub async fn verify_candidates(
    connector: &DeviceConnector,
    candidates: &[IpAddr],
) -> Option<DeviceClient> {
    for &ip in candidates {
        let client = connector.connect(ip);
        match client.fetch_telemetry().await {
            Ok(_) => return Some(client),
            Err(e) => tracing::debug!("Rejected candidate {}: {}", ip, e),
        }
    }
    None
}

pub struct Discovery {
    connector: DeviceConnector,
    probe_timeout: Duration,
    concurrency: usize,
}

impl Discovery {
    pub fn new(connector: DeviceConnector, config: &DiscoveryConfig) -> Self {
        Self {
            connector,
            probe_timeout: config.probe_timeout(),
            concurrency: config.concurrency,
        }
    }

    /// Probe every host in `subnet` and return the first verified device
    pub async fn find_in(&self, subnet: Subnet) -> Result<DeviceClient, DiscoveryError> {
        tracing::info!(
            "Scanning {} for a wall connector on port {}",
            subnet,
            self.connector.port()
        );

        let open = probe_hosts(
            subnet.hosts().map(IpAddr::V4),
            self.connector.port(),
            self.probe_timeout,
            self.concurrency,
        )
        .await
        .map_err(DiscoveryError::Probe)?;

        tracing::debug!("{} host(s) with port {} open", open.len(), self.connector.port());

        verify_candidates(&self.connector, &open)
            .await
            .ok_or_else(|| DiscoveryError::DeviceNotFound(subnet.to_string()))
    }
}

impl Discover for Discovery {
    async fn discover(&self) -> Result<DeviceClient, DiscoveryError> {
        let subnet = local_subnet()?;
        self.find_in(subnet).await
    }
}
