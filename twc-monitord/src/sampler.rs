use std::time::Duration;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use crate::binding::BoundDevice;
use crate::device::{DeviceClient, DeviceError};
use crate::store::StoreError;
use crate::store_manager::StoreHandle;

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("failed to fetch vitals: {0}")]
    Fetch(#[from] DeviceError),
    #[error("failed to record vitals: {0}")]
    Store(#[from] StoreError),
}

/// Fetch vitals once and append them to the store
pub async fn sample_once(
    device: &DeviceClient,
    store: &StoreHandle,
) -> Result<DateTime<Utc>, SampleError> {
    let vitals = device.fetch_telemetry().await?;
    let captured_at = store.record_sample(device.ip().to_string(), vitals).await?;
    Ok(captured_at)
}

/// Sampling loop. Idles until a device is bound, then samples whichever
/// device is currently bound once per `period`. Failures are logged and the
/// loop carries on; only cancellation stops it.
pub async fn run(
    mut device_rx: watch::Receiver<BoundDevice>,
    store: StoreHandle,
    period: Duration,
    cancel: CancellationToken,
) {
    tokio::select! {
        bound = device_rx.wait_for(Option::is_some) => {
            if bound.is_err() {
                tracing::warn!("Device binding closed before a device was bound");
                return;
            }
        }
        _ = cancel.cancelled() => {
            tracing::info!("Sampler shutting down");
            return;
        }
    }

    tracing::info!("Sampling vitals every {:?}", period);

    // interval() panics on a zero period
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let device = device_rx.borrow().clone();
                let Some(device) = device else { continue };

                match sample_once(&device, &store).await {
                    Ok(captured_at) => tracing::trace!("Recorded vitals at {}", captured_at),
                    Err(e) => tracing::warn!("Sampling {} failed: {}", device.ip(), e),
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Sampler shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
    use shared::protocol::VITALS_PATH;
    use crate::binding::DeviceBinding;
    use crate::testutil::{connector, memory_store, spawn_server, vitals_json};

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    /// A device whose first vitals request fails
    fn flaky_device(attempts: Arc<AtomicUsize>) -> Router {
        Router::new().route(
            VITALS_PATH,
            get(move || {
                let attempts = Arc::clone(&attempts);
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    } else {
                        Json(vitals_json()).into_response()
                    }
                }
            }),
        )
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn since_start() -> DateTime<Utc> {
        Utc::now() - chrono::Duration::minutes(1)
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_sampling() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let device = flaky_device(attempts.clone());
        let addr = spawn_server(SocketAddr::new(LOCALHOST, 0), device).await;

        let store = memory_store();
        let binding = DeviceBinding::new();
        binding.bind(connector(addr.port()).connect(LOCALHOST));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            binding.subscribe(),
            store.clone(),
            Duration::from_millis(20),
            cancel.clone(),
        ));

        wait_until(|| attempts.load(Ordering::SeqCst) >= 2).await;
        cancel.cancel();
        handle.await.unwrap();

        let total = attempts.load(Ordering::SeqCst);
        let samples = store.query_samples(since_start()).await.unwrap();
        assert!(total >= 2);
        assert_eq!(samples.len(), total - 1, "only the failed attempt is missing");
    }

    #[tokio::test]
    async fn test_idles_until_bound() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let device = flaky_device(attempts.clone());
        let addr = spawn_server(SocketAddr::new(LOCALHOST, 0), device).await;

        let store = memory_store();
        let binding = DeviceBinding::new();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            binding.subscribe(),
            store.clone(),
            Duration::from_millis(10),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 0);

        binding.bind(connector(addr.port()).connect(LOCALHOST));
        wait_until(|| attempts.load(Ordering::SeqCst) >= 3).await;

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_before_binding() {
        let binding = DeviceBinding::new();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            binding.subscribe(),
            memory_store(),
            Duration::from_millis(10),
            cancel.clone(),
        ));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
