//! Startup policy for obtaining a working device address.
//!
//! Sources are tried in order: the stored address, the operator override,
//! then active discovery. A stored or override address must answer the
//! vitals endpoint before it is accepted. Only the override and discovery
//! paths write the address back to the store.

use std::fmt;
use std::net::IpAddr;
use crate::device::{DeviceClient, DeviceConnector};
use crate::discovery::{Discover, DiscoveryError};
use crate::store::StoreError;
use crate::store_manager::StoreHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSource {
    Cache,
    Override,
    Discovery,
}

impl fmt::Display for AddressSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AddressSource::Cache => "stored address",
            AddressSource::Override => "operator override",
            AddressSource::Discovery => "network discovery",
        })
    }
}

#[derive(Debug)]
pub struct Acquired {
    pub client: DeviceClient,
    pub source: AddressSource,
}

#[derive(Debug, thiserror::Error)]
#[error("no wall connector could be bound: {0}")]
pub struct AcquireError(#[from] pub DiscoveryError);

/// Run the acquisition sequence once. `override_addr` is only consulted when
/// the stored address is missing or fails verification.
pub async fn acquire<D, F>(
    store: &StoreHandle,
    connector: &DeviceConnector,
    override_addr: F,
    discovery: &D,
) -> Result<Acquired, AcquireError>
where
    D: Discover,
    F: FnOnce() -> Option<String>,
{
    match store.get_address().await {
        Ok(stored) => match verify(connector, &stored).await {
            Some(client) => {
                return Ok(Acquired { client, source: AddressSource::Cache });
            }
            None => tracing::warn!("Stored wall connector address {} did not respond", stored),
        },
        Err(StoreError::NotFound) => tracing::debug!("No stored wall connector address"),
        Err(e) => tracing::warn!("Failed to read stored address: {}", e),
    }

    if let Some(addr) = override_addr() {
        match verify(connector, &addr).await {
            Some(client) => {
                persist(store, &client).await;
                return Ok(Acquired { client, source: AddressSource::Override });
            }
            None => tracing::warn!("Override address {} is not a reachable wall connector", addr),
        }
    }

    let client = discovery.discover().await?;
    persist(store, &client).await;
    Ok(Acquired { client, source: AddressSource::Discovery })
}

/// Parse `addr` and confirm it serves well-formed vitals
async fn verify(connector: &DeviceConnector, addr: &str) -> Option<DeviceClient> {
    let ip: IpAddr = match addr.trim().parse() {
        Ok(ip) => ip,
        Err(_) => {
            tracing::warn!("{:?} is not a valid IP address", addr);
            return None;
        }
    };

    let client = connector.connect(ip);
    match client.fetch_telemetry().await {
        Ok(_) => Some(client),
        Err(e) => {
            tracing::debug!("Verification of {} failed: {}", ip, e);
            None
        }
    }
}

/// A store failure here does not unbind the device; the next start will
/// simply rediscover it.
async fn persist(store: &StoreHandle, client: &DeviceClient) {
    if let Err(e) = store.save_address(client.ip().to_string()).await {
        tracing::error!("Failed to save wall connector address {}: {}", client.ip(), e);
    }
}
