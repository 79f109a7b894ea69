use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::LogRecord;
use crate::store::LogStore;

/// Why a record never reached the writer
#[derive(Debug, thiserror::Error)]
pub enum LogDropped {
    #[error("logger channel full")]
    ChannelFull,

    #[error("logger channel closed")]
    Closed,
}

/// Async request logger with channel-based writes
///
/// Request handling only ever does a non-blocking `try_send`; a single
/// background writer drains the channel into the store. Write failures are
/// logged and the record is dropped.
#[derive(Clone)]
pub struct RequestLogger {
    tx: mpsc::Sender<LogRecord>,
}

impl RequestLogger {
    /// Create the logger and spawn its writer
    ///
    /// The writer exits once every clone of the logger is dropped and the
    /// channel is drained; await the returned handle to flush on shutdown.
    pub fn new(store: Arc<dyn LogStore>, buffer_size: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<LogRecord>(buffer_size.max(1));

        let handle = tokio::spawn(async move {
            let result = std::panic::AssertUnwindSafe(async {
                while let Some(record) = rx.recv().await {
                    if let Err(e) = store.insert_log(&record).await {
                        tracing::error!(
                            endpoint = %record.endpoint,
                            status = record.status_code,
                            error = %e,
                            "Failed to write request log"
                        );
                    }
                }
            })
            .catch_unwind()
            .await;
            match result {
                Ok(()) => tracing::debug!("RequestLogger writer drained and stopped"),
                Err(e) => tracing::error!(panic = ?e, "RequestLogger writer panicked"),
            }
        });

        (Self { tx }, handle)
    }

    /// Queue a record without waiting
    pub fn try_log(&self, record: LogRecord) -> Result<(), LogDropped> {
        self.tx.try_send(record).map_err(|e| {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => LogDropped::ChannelFull,
                mpsc::error::TrySendError::Closed(_) => LogDropped::Closed,
            };
            crate::metrics::record_log_dropped(match reason {
                LogDropped::ChannelFull => "channel_full",
                LogDropped::Closed => "closed",
            });
            reason
        })
    }
}
