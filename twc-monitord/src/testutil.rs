//! Fakes shared by the unit tests: an in-memory store, canned device
//! payloads, and in-process HTTP servers standing in for wall connectors.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use axum::{routing::get, Json, Router};
use serde_json::json;
use shared::protocol::{LIFETIME_PATH, VITALS_PATH, WIFI_STATUS_PATH};
use shared::types::Vitals;
use crate::device::{DeviceClient, DeviceConnector};
use crate::discovery::{Discover, DiscoveryError};
use crate::store::db::StoreDb;
use crate::store_manager::StoreHandle;

pub fn memory_store() -> StoreHandle {
    StoreHandle::spawn(StoreDb::open(":memory:").unwrap())
}

pub fn vitals_json() -> serde_json::Value {
    json!({
        "contactor_closed": true,
        "vehicle_connected": true,
        "session_s": 3600,
        "grid_v": 241.3,
        "grid_hz": 59.98,
        "vehicle_current_a": 31.9,
        "currentA_a": 31.9,
        "currentB_a": 31.8,
        "currentC_a": 0.0,
        "currentN_a": 0.0,
        "voltageA_v": 120.4,
        "voltageB_v": 120.9,
        "voltageC_v": 0.0,
        "relay_coil_v": 11.9,
        "pcba_temp_c": 41.2,
        "handle_temp_c": 30.1,
        "mcu_temp_c": 45.0,
        "uptime_s": 86400,
        "input_thermopile_uv": -176,
        "prox_v": 0.0,
        "pilot_high_v": 6.1,
        "pilot_low_v": -11.8,
        "session_energy_wh": 7420.5,
        "config_status": 5,
        "evse_state": 11,
        "current_alerts": ["none"]
    })
}

pub fn sample_vitals() -> Vitals {
    serde_json::from_value(vitals_json()).unwrap()
}

/// A device answering all three endpoints with well-formed payloads
pub fn healthy_device() -> Router {
    Router::new()
        .route(VITALS_PATH, get(|| async { Json(vitals_json()) }))
        .route(
            WIFI_STATUS_PATH,
            get(|| async {
                Json(json!({
                    "wifi_ssid": "garage",
                    "wifi_signal_strength": 64,
                    "wifi_rssi": -61,
                    "wifi_snr": 33,
                    "wifi_connected": true,
                    "wifi_infra_ip": "192.168.1.40",
                    "internet": true,
                    "wifi_mac": "98:ED:5C:00:00:01"
                }))
            }),
        )
        .route(
            LIFETIME_PATH,
            get(|| async {
                Json(json!({
                    "contactor_cycles": 412,
                    "contactor_cycles_loaded": 3,
                    "alerts_count": 17,
                    "thermal_foldbacks": 0,
                    "avg_startup_temp": 22.5,
                    "charge_starts": 412,
                    "energy_wh": 1234567,
                    "connector_cycles": 198,
                    "uptime_s": 4000000,
                    "charging_time_s": 900000
                }))
            }),
        )
}

/// Something listening on the device port that is not a wall connector
pub fn impostor_device() -> Router {
    Router::new().route(VITALS_PATH, get(|| async { Json(json!({ "status": "ok" })) }))
}

/// Serve `router` on `addr` in the background and return the bound address
pub async fn spawn_server(addr: SocketAddr, router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let local = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    local
}

pub fn connector(port: u16) -> DeviceConnector {
    DeviceConnector::new(port, Duration::from_secs(2)).unwrap()
}

/// Discovery stand-in that counts invocations
pub struct SpyDiscovery {
    connector: DeviceConnector,
    found: Option<IpAddr>,
    calls: AtomicUsize,
}

impl SpyDiscovery {
    pub fn finding(connector: DeviceConnector, ip: IpAddr) -> Arc<Self> {
        Arc::new(Self { connector, found: Some(ip), calls: AtomicUsize::new(0) })
    }

    pub fn finding_nothing(connector: DeviceConnector) -> Arc<Self> {
        Arc::new(Self { connector, found: None, calls: AtomicUsize::new(0) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Discover for SpyDiscovery {
    async fn discover(&self) -> Result<DeviceClient, DiscoveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.found {
            Some(ip) => Ok(self.connector.connect(ip)),
            None => Err(DiscoveryError::DeviceNotFound("spy network".to_string())),
        }
    }
}
