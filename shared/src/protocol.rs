/// Device endpoints, relative to `http://<address>:<port>`
pub const VITALS_PATH: &str = "/api/1/vitals";
pub const WIFI_STATUS_PATH: &str = "/api/1/wifi_status";
pub const LIFETIME_PATH: &str = "/api/1/lifetime";

/// Port the connector serves its API on
pub const DEVICE_PORT: u16 = 80;

/// Environment variable holding an operator-supplied device address
pub const OVERRIDE_ENV: &str = "TWC_IP";

/// API path prefix
pub const API_PREFIX: &str = "/api/v1";
