use flume::{bounded, Receiver, Sender};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::types::{ActivityLog, ActivityStatus};

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Queue capacity (max logs in memory before dropping)
    pub queue_capacity: usize,

    /// Logs emitted per batch
    pub batch_size: usize,

    /// Max wait time before flushing a partial batch (milliseconds)
    pub batch_timeout_ms: u64,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1_000,
            batch_size: 50,
            batch_timeout_ms: 500,
        }
    }
}

/// Session activity logger.
///
/// Entries become structured `tracing` events under the `activity` target.
/// A queued logger hands them to a background task so callers never wait
/// on the subscriber; an inline logger emits them on the calling thread.
#[derive(Clone)]
pub struct ActivityLogger {
    sender: Option<Sender<ActivityLog>>,
}

impl Default for ActivityLogger {
    fn default() -> Self {
        Self::inline()
    }
}

impl ActivityLogger {
    pub fn inline() -> Self {
        Self { sender: None }
    }

    /// Start the background worker. Must be called inside a tokio runtime.
    pub fn spawn(config: LoggerConfig) -> Self {
        Self::spawn_with_handle(config).0
    }

    /// Like [`spawn`](Self::spawn), also returning the worker task.
    ///
    /// The worker flushes what is queued and exits once every clone of the
    /// logger has been dropped, so awaiting the handle drains the queue.
    pub fn spawn_with_handle(config: LoggerConfig) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = bounded(config.queue_capacity.max(1));

        info!(
            "Initializing ActivityLogger: queue={}, batch={}, timeout={}ms",
            config.queue_capacity, config.batch_size, config.batch_timeout_ms
        );

        let worker = tokio::spawn(async move {
            Self::worker_loop(receiver, config).await;
        });

        (
            Self {
                sender: Some(sender),
            },
            worker,
        )
    }

    /// Log activity (non-blocking, fire-and-forget)
    pub fn log(&self, activity: ActivityLog) {
        match &self.sender {
            None => Self::emit(&activity),
            Some(sender) => {
                if let Err(e) = sender.try_send(activity) {
                    warn!("Failed to enqueue activity log (queue full?): {}", e);
                }
            }
        }
    }

    pub fn queue_len(&self) -> usize {
        self.sender.as_ref().map_or(0, |s| s.len())
    }

    async fn worker_loop(receiver: Receiver<ActivityLog>, config: LoggerConfig) {
        let batch_timeout = Duration::from_millis(config.batch_timeout_ms);
        let mut batch: Vec<ActivityLog> = Vec::with_capacity(config.batch_size);

        loop {
            let deadline = tokio::time::Instant::now() + batch_timeout;

            while batch.len() < config.batch_size.max(1) {
                match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
                    Ok(Ok(log)) => batch.push(log),
                    Ok(Err(_)) => {
                        Self::flush(&mut batch);
                        debug!("Activity logger shutting down (channel closed)");
                        return;
                    }
                    Err(_) => break,
                }
            }

            Self::flush(&mut batch);
        }
    }

    fn flush(batch: &mut Vec<ActivityLog>) {
        for log in batch.drain(..) {
            Self::emit(&log);
        }
    }

    fn emit(log: &ActivityLog) {
        let custom = log
            .custom_fields
            .as_ref()
            .and_then(|fields| serde_json::to_string(fields).ok());

        macro_rules! emit_at {
            ($level:ident) => {
                tracing::$level!(
                    target: "activity",
                    session_id = %log.session_id,
                    activity = log.activity_type.as_str(),
                    status = log.activity_status.as_str(),
                    prompt = log.message_content.as_deref(),
                    response = log.response_content.as_deref(),
                    collection = log.collection_name.as_deref(),
                    history_len = log.history_len.map(|n| n as u64),
                    chunk_count = log.chunk_count.map(|n| n as u64),
                    processing_time_ms = log.processing_time_ms,
                    llm_call_duration_ms = log.llm_call_duration_ms,
                    retrieval_duration_ms = log.retrieval_duration_ms,
                    error_type = log.error_type.as_deref(),
                    error = log.error_message.as_deref(),
                    custom = custom.as_deref(),
                    "{}",
                    log.activity_type.as_str()
                )
            };
        }

        match log.activity_status {
            ActivityStatus::Error => emit_at!(error),
            ActivityStatus::Warning => emit_at!(warn),
            ActivityStatus::Success | ActivityStatus::Info => emit_at!(info),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::types::ActivityType;
    use uuid::Uuid;

    #[test]
    fn test_inline_logger_does_not_queue() {
        let logger = ActivityLogger::inline();
        logger.log(ActivityLog::builder(Uuid::new_v4(), ActivityType::SessionCreated).build());
        assert_eq!(logger.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_queued_logger_drains() {
        let logger = ActivityLogger::spawn(LoggerConfig {
            queue_capacity: 8,
            batch_size: 2,
            batch_timeout_ms: 10,
        });

        for _ in 0..4 {
            logger.log(ActivityLog::builder(Uuid::new_v4(), ActivityType::MessageSent).build());
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(logger.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_worker_exits_when_logger_dropped() {
        let (logger, worker) = ActivityLogger::spawn_with_handle(LoggerConfig {
            queue_capacity: 8,
            batch_size: 50,
            batch_timeout_ms: 60_000,
        });
        let clone = logger.clone();
        logger.log(ActivityLog::builder(Uuid::new_v4(), ActivityType::SessionDestroyed).build());
        drop(logger);
        clone.log(ActivityLog::builder(Uuid::new_v4(), ActivityType::SessionDestroyed).build());
        drop(clone);

        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("worker should stop once the channel closes")
            .unwrap();
    }
}
