use std::time::Duration;
use chrono::{DateTime, Utc};
use shared::types::VitalRecord;
use crate::store::StoreError;
use crate::store_manager::StoreHandle;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid duration {input:?}: {reason}")]
    InvalidDuration { input: String, reason: String },
    #[error("failed to query vitals: {0}")]
    Store(#[from] StoreError),
}

/// Parse a lookback such as `15m`, `2h 45m` or `300ms`
pub fn parse_lookback(input: &str) -> Result<Duration, QueryError> {
    humantime::parse_duration(input.trim()).map_err(|e| QueryError::InvalidDuration {
        input: input.to_string(),
        reason: e.to_string(),
    })
}

/// Start of the window ending now and spanning `lookback`
pub fn window_start(now: DateTime<Utc>, lookback: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lookback)
        .ok()
        .and_then(|lookback| now.checked_sub_signed(lookback))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// All samples captured within `lookback` of now, oldest first
pub async fn query_range(
    store: &StoreHandle,
    lookback: &str,
) -> Result<Vec<VitalRecord>, QueryError> {
    let lookback = parse_lookback(lookback)?;
    let since = window_start(Utc::now(), lookback);
    Ok(store.query_samples(since).await?)
}
