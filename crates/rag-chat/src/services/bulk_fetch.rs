use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::document::load_web_page;
use crate::models::document::Document;
use crate::utils::error::{ChatError, ChatResult};

pub const DEFAULT_WORKERS: usize = 5;

/// Run `task` for every item with at most `workers` in flight.
///
/// Results arrive on the returned channel in completion order; the channel
/// closes once every task has finished.
pub fn spawn_bounded<I, T, F, Fut>(items: Vec<I>, workers: usize, task: F) -> flume::Receiver<(I, T)>
where
    I: Clone + Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let task = Arc::new(task);
    let (sender, receiver) = flume::unbounded();

    for item in items {
        let semaphore = semaphore.clone();
        let task = task.clone();
        let sender = sender.clone();
        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            let output = task(item.clone()).await;
            // receiver gone means nobody is aggregating any more
            let _ = sender.send((item, output));
        });
    }

    receiver
}

#[derive(Debug, Default)]
pub struct BulkFetchReport {
    pub documents: Vec<Document>,
    pub succeeded: usize,
    pub failed: usize,
    /// `(url, error)` for every failed fetch.
    pub failures: Vec<(String, String)>,
}

/// Fetches many web pages through a fixed-size worker pool.
#[derive(Clone)]
pub struct BulkFetcher {
    client: Client,
    workers: usize,
}

impl BulkFetcher {
    pub fn new(client: Client, workers: usize) -> ChatResult<Self> {
        if workers == 0 {
            return Err(ChatError::Validation("ingest.workers must be > 0".to_string()));
        }
        Ok(Self { client, workers })
    }

    pub async fn fetch_all(&self, urls: Vec<String>) -> BulkFetchReport {
        let total = urls.len();
        info!("Fetching {} pages with {} workers", total, self.workers);

        let client = self.client.clone();
        let completed = spawn_bounded(urls, self.workers, move |url: String| {
            let client = client.clone();
            async move { load_web_page(&client, &url).await }
        });

        let mut report = BulkFetchReport::default();
        while let Ok((url, result)) = completed.recv_async().await {
            match result {
                Ok(document) => {
                    debug!("Fetched {}", url);
                    report.succeeded += 1;
                    report.documents.push(document);
                }
                Err(e) => {
                    warn!("Failed to fetch {}: {:#}", url, e);
                    report.failed += 1;
                    report.failures.push((url, format!("{:#}", e)));
                }
            }
        }

        info!(
            "Bulk fetch finished: {} succeeded, {} failed of {}",
            report.succeeded, report.failed, total
        );
        report
    }
}
