use std::thread;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use shared::types::{VitalRecord, Vitals};
use crate::store::{db::StoreDb, StoreError};

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

/// Commands sent to the store thread
pub enum StoreCommand {
    GetAddress(Reply<String>),
    SaveAddress(String, Reply<()>),
    RecordSample {
        ip: String,
        vitals: Box<Vitals>,
        reply: Reply<DateTime<Utc>>,
    },
    QuerySamples(DateTime<Utc>, Reply<Vec<VitalRecord>>),
    Shutdown,
}

/// Handle to the store thread. The thread owns the only connection, so every
/// read and write is serialized through the command channel.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    /// Spawn a new store thread with the given database
    pub fn spawn(db: StoreDb) -> Self {
        let (tx, mut rx) = mpsc::channel::<StoreCommand>(256);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    StoreCommand::GetAddress(reply) => {
                        let _ = reply.send(db.get_address());
                    }
                    StoreCommand::SaveAddress(ip, reply) => {
                        let _ = reply.send(db.save_address(&ip));
                    }
                    StoreCommand::RecordSample { ip, vitals, reply } => {
                        // Stamped on the store thread so capture order matches insert order
                        let captured_at = Utc::now();
                        let result = db
                            .record_sample(&ip, &vitals, captured_at)
                            .map(|()| captured_at);
                        let _ = reply.send(result);
                    }
                    StoreCommand::QuerySamples(since, reply) => {
                        let _ = reply.send(db.query_samples(since));
                    }
                    StoreCommand::Shutdown => {
                        tracing::info!("Store thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> StoreCommand,
    ) -> Result<T, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| StoreError::Unavailable)?;
        rx.await.map_err(|_| StoreError::Unavailable)?
    }

    /// Current device address; `StoreError::NotFound` if none was ever saved
    pub async fn get_address(&self) -> Result<String, StoreError> {
        self.request(StoreCommand::GetAddress).await
    }

    pub async fn save_address(&self, ip: String) -> Result<(), StoreError> {
        self.request(|reply| StoreCommand::SaveAddress(ip, reply)).await
    }

    /// Append a sample stamped with the current time. Returns the capture time.
    pub async fn record_sample(
        &self,
        ip: String,
        vitals: Vitals,
    ) -> Result<DateTime<Utc>, StoreError> {
        self.request(|reply| StoreCommand::RecordSample {
            ip,
            vitals: Box::new(vitals),
            reply,
        })
        .await
    }

    pub async fn query_samples(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<VitalRecord>, StoreError> {
        self.request(|reply| StoreCommand::QuerySamples(since, reply)).await
    }

    /// Shutdown the store thread
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        self.tx
            .send(StoreCommand::Shutdown)
            .await
            .map_err(|_| StoreError::Unavailable)
    }
}
