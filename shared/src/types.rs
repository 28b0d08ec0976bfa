use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Live electrical and thermal snapshot reported by the wall connector.
/// Field names follow the device's own JSON keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    pub contactor_closed: bool,
    pub vehicle_connected: bool,
    #[serde(rename = "session_s")]
    pub session_secs: i64,
    pub grid_v: f64,
    pub grid_hz: f64,
    pub vehicle_current_a: f64,
    #[serde(rename = "currentA_a")]
    pub current_a_a: f64,
    #[serde(rename = "currentB_a")]
    pub current_b_a: f64,
    #[serde(rename = "currentC_a")]
    pub current_c_a: f64,
    #[serde(rename = "currentN_a")]
    pub current_n_a: f64,
    #[serde(rename = "voltageA_v")]
    pub voltage_a_v: f64,
    #[serde(rename = "voltageB_v")]
    pub voltage_b_v: f64,
    #[serde(rename = "voltageC_v")]
    pub voltage_c_v: f64,
    pub relay_coil_v: f64,
    pub pcba_temp_c: f64,
    pub handle_temp_c: f64,
    pub mcu_temp_c: f64,
    #[serde(rename = "uptime_s")]
    pub uptime_secs: i64,
    pub input_thermopile_uv: i64,
    pub prox_v: f64,
    pub pilot_high_v: f64,
    pub pilot_low_v: f64,
    pub session_energy_wh: f64,
    pub config_status: i64,
    pub evse_state: i64,
    pub current_alerts: Vec<String>,
}

/// Link health of the connector's wifi interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiStatus {
    #[serde(rename = "wifi_ssid")]
    pub ssid: String,
    #[serde(rename = "wifi_signal_strength")]
    pub signal_strength: i64,
    #[serde(rename = "wifi_rssi")]
    pub rssi: i64,
    #[serde(rename = "wifi_snr")]
    pub snr: i64,
    #[serde(rename = "wifi_connected")]
    pub connected: bool,
    #[serde(rename = "wifi_infra_ip")]
    pub infra_ip: String,
    pub internet: bool,
    #[serde(rename = "wifi_mac")]
    pub mac: String,
}

/// Cumulative counters since the connector was commissioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifetimeStats {
    pub contactor_cycles: i64,
    pub contactor_cycles_loaded: i64,
    pub alerts_count: i64,
    pub thermal_foldbacks: i64,
    pub avg_startup_temp: f64,
    pub charge_starts: i64,
    pub energy_wh: i64,
    pub connector_cycles: i64,
    #[serde(rename = "uptime_s")]
    pub uptime_secs: i64,
    #[serde(rename = "charging_time_s")]
    pub charging_time_secs: i64,
}

/// One stored vitals sample as returned by the history query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalRecord {
    pub timestamp: DateTime<Utc>,
    pub vital: Vitals,
}
