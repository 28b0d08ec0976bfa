use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use crate::device::DeviceClient;
use crate::discovery::{Discover, DiscoveryError};
use crate::store_manager::StoreHandle;

pub type BoundDevice = Option<Arc<DeviceClient>>;

/// The process-wide bound device. Readers take a snapshot of the current
/// client; binding replaces the whole handle in one step. Rediscovery is
/// serialized so concurrent callers never run two sweeps or race on the
/// stored address.
#[derive(Clone)]
pub struct DeviceBinding {
    tx: Arc<watch::Sender<BoundDevice>>,
    rediscover: Arc<Mutex<()>>,
}

impl DeviceBinding {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            rediscover: Arc::new(Mutex::new(())),
        }
    }

    pub fn current(&self) -> BoundDevice {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BoundDevice> {
        self.tx.subscribe()
    }

    pub fn bind(&self, client: DeviceClient) -> Arc<DeviceClient> {
        let client = Arc::new(client);
        self.tx.send_replace(Some(Arc::clone(&client)));
        client
    }

    /// Return the bound device, or discover, persist and bind one
    pub async fn bind_or_discover<D: Discover>(
        &self,
        store: &StoreHandle,
        discovery: &D,
    ) -> Result<Arc<DeviceClient>, DiscoveryError> {
        let _guard = self.rediscover.lock().await;

        if let Some(client) = self.current() {
            return Ok(client);
        }

        let client = discovery.discover().await?;
        if let Err(e) = store.save_address(client.ip().to_string()).await {
            tracing::error!("Failed to save wall connector address {}: {}", client.ip(), e);
        }

        Ok(self.bind(client))
    }
}

impl Default for DeviceBinding {
    fn default() -> Self {
        Self::new()
    }
}
