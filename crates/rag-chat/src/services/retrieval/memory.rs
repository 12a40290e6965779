use anyhow::Result;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::params::{SearchMode, SearchParams};
use crate::models::document::RetrievalChunk;
use crate::services::conversation::providers::{EmbeddingProvider, RetrievalHandle, VectorIndex};
use crate::utils::error::ChatError;
use crate::utils::similarity::{cosine_similarity, max_similarity};

type Collections = DashMap<String, Arc<InMemoryCollection>>;

/// Process-local vector index. Collections live until deleted.
#[derive(Clone, Default)]
pub struct InMemoryIndex {
    collections: Arc<Collections>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<InMemoryCollection>> {
        self.collections.get(name).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

#[async_trait::async_trait]
impl VectorIndex for InMemoryIndex {
    async fn index(
        &self,
        chunks: Vec<RetrievalChunk>,
        embedder: Arc<dyn EmbeddingProvider>,
        collection_name: Option<String>,
    ) -> Result<Arc<dyn RetrievalHandle>> {
        let name = collection_name.unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            anyhow::bail!(
                "Embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }

        let collection = self
            .collections
            .entry(name.clone())
            .or_insert_with(|| {
                Arc::new(InMemoryCollection {
                    name: name.clone(),
                    embedder: embedder.clone(),
                    entries: RwLock::new(Vec::new()),
                    deleted: AtomicBool::new(false),
                    registry: Arc::downgrade(&self.collections),
                })
            })
            .value()
            .clone();

        let added = chunks.len();
        collection
            .entries
            .write()
            .extend(chunks.into_iter().zip(vectors));

        info!(
            "Indexed {} chunks into collection '{}' ({} total)",
            added,
            name,
            collection.len()
        );
        let handle: Arc<dyn RetrievalHandle> = collection;
        Ok(handle)
    }
}

/// One searchable collection of embedded chunks.
pub struct InMemoryCollection {
    name: String,
    embedder: Arc<dyn EmbeddingProvider>,
    entries: RwLock<Vec<(RetrievalChunk, Vec<f32>)>>,
    deleted: AtomicBool,
    registry: Weak<Collections>,
}

impl InMemoryCollection {
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Score every entry against `query`, best first.
    fn scored(&self, query: &[f32]) -> Result<Vec<(f32, RetrievalChunk, Vec<f32>)>> {
        let entries = self.entries.read();
        let mut scored = Vec::with_capacity(entries.len());
        for (chunk, vector) in entries.iter() {
            let score = cosine_similarity(query, vector)?;
            scored.push((score, chunk.clone(), vector.clone()));
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored)
    }
}

#[async_trait::async_trait]
impl RetrievalHandle for InMemoryCollection {
    fn collection_name(&self) -> String {
        self.name.clone()
    }

    async fn retrieve(&self, query: &str, params: &SearchParams) -> Result<Vec<RetrievalChunk>> {
        if self.is_deleted() {
            return Err(ChatError::ResourceState(format!(
                "collection '{}' has been deleted",
                self.name
            ))
            .into());
        }
        params.validate()?;

        let query_vector = self.embedder.embed(query).await?;
        let scored = self.scored(&query_vector)?;

        let picked: Vec<(f32, RetrievalChunk)> = match params.mode {
            SearchMode::Similarity => scored
                .into_iter()
                .take(params.k)
                .map(|(s, c, _)| (s, c))
                .collect(),
            SearchMode::SimilarityScoreThreshold => {
                let threshold = params.score_threshold.unwrap_or(0.0);
                scored
                    .into_iter()
                    .filter(|(s, _, _)| *s >= threshold)
                    .take(params.k)
                    .map(|(s, c, _)| (s, c))
                    .collect()
            }
            SearchMode::Mmr => {
                let candidates: Vec<_> = scored.into_iter().take(params.fetch_k).collect();
                mmr_select(&candidates, params.k, params.lambda_mult)?
                    .into_iter()
                    .map(|i| (candidates[i].0, candidates[i].1.clone()))
                    .collect()
            }
        };

        debug!(
            "Collection '{}' returned {} chunks for mode={}",
            self.name,
            picked.len(),
            params.mode
        );

        Ok(picked
            .into_iter()
            .map(|(score, mut chunk)| {
                chunk.score = Some(score);
                chunk
            })
            .collect())
    }

    async fn delete(&self) -> Result<()> {
        if self.deleted.swap(true, Ordering::AcqRel) {
            warn!("Collection '{}' already deleted", self.name);
            return Ok(());
        }
        self.entries.write().clear();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.name);
        }
        info!("Deleted collection '{}'", self.name);
        Ok(())
    }
}

/// Greedy maximal marginal relevance over `candidates` (already sorted by
/// query similarity). Returns indices into `candidates`.
fn mmr_select(
    candidates: &[(f32, RetrievalChunk, Vec<f32>)],
    k: usize,
    lambda_mult: f32,
) -> Result<Vec<usize>> {
    let mut selected: Vec<usize> = Vec::with_capacity(k.min(candidates.len()));
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < k && !remaining.is_empty() {
        let mut best: Option<(usize, f32)> = None;

        for (pos, &idx) in remaining.iter().enumerate() {
            let relevance = candidates[idx].0;
            let redundancy = max_similarity(
                &candidates[idx].2,
                selected.iter().map(|&chosen| candidates[chosen].2.as_slice()),
            )?
            .unwrap_or(0.0);

            let score = lambda_mult * relevance - (1.0 - lambda_mult) * redundancy;
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((pos, score));
            }
        }

        match best {
            Some((pos, _)) => selected.push(remaining.remove(pos)),
            None => break,
        }
    }

    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::conversation::providers::MockEmbeddingProvider;

    /// Embeds text by counting a few marker words.
    struct KeywordEmbedder;

    #[async_trait::async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let lower = text.to_lowercase();
            Ok(["rust", "python", "cooking"]
                .iter()
                .map(|w| lower.matches(w).count() as f32 + 0.01)
                .collect())
        }
    }

    fn chunks(texts: &[&str]) -> Vec<RetrievalChunk> {
        texts.iter().map(|t| RetrievalChunk::new(*t)).collect()
    }

    #[tokio::test]
    async fn test_similarity_ranks_best_first() {
        let index = InMemoryIndex::new();
        let handle = index
            .index(
                chunks(&["python tips", "rust borrow checker", "cooking pasta"]),
                Arc::new(KeywordEmbedder),
                Some("docs".to_string()),
            )
            .await
            .unwrap();

        let found = handle
            .retrieve("how does rust work", &SearchParams::similarity(1))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content, "rust borrow checker");
        assert!(found[0].score.unwrap() > 0.9);
    }

    #[tokio::test]
    async fn test_threshold_filters_low_scores() {
        let index = InMemoryIndex::new();
        let handle = index
            .index(
                chunks(&["rust rust", "cooking"]),
                Arc::new(KeywordEmbedder),
                None,
            )
            .await
            .unwrap();

        let found = handle
            .retrieve("rust", &SearchParams::with_threshold(5, 0.9))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content, "rust rust");
    }

    #[tokio::test]
    async fn test_mmr_prefers_diverse_results() {
        let index = InMemoryIndex::new();
        let handle = index
            .index(
                chunks(&["rust rust python", "rust rust python", "python"]),
                Arc::new(KeywordEmbedder),
                None,
            )
            .await
            .unwrap();

        let params = SearchParams {
            lambda_mult: 0.2,
            ..SearchParams::mmr(2, 3)
        };
        let found = handle.retrieve("rust", &params).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].content, "rust rust python");
        assert_eq!(found[1].content, "python");

        // pure relevance keeps the duplicate instead
        let params = SearchParams {
            lambda_mult: 1.0,
            ..SearchParams::mmr(2, 3)
        };
        let found = handle.retrieve("rust", &params).await.unwrap();
        assert!(found.iter().all(|c| c.content == "rust rust python"));
    }

    #[tokio::test]
    async fn test_invalid_params_fail_before_embedding() {
        let mut embedder = MockEmbeddingProvider::new();
        embedder
            .expect_embed_batch()
            .returning(|texts| Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect()));
        embedder.expect_embed().times(0);

        let index = InMemoryIndex::new();
        let handle = index
            .index(chunks(&["a"]), Arc::new(embedder), None)
            .await
            .unwrap();

        let err = handle
            .retrieve("q", &SearchParams::similarity(0))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChatError>(),
            Some(ChatError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_collection() {
        let index = InMemoryIndex::new();
        let handle = index
            .index(chunks(&["rust"]), Arc::new(KeywordEmbedder), Some("tmp".to_string()))
            .await
            .unwrap();
        assert_eq!(index.len(), 1);

        handle.delete().await.unwrap();
        assert!(index.is_empty());

        let err = handle
            .retrieve("rust", &SearchParams::similarity(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChatError>(),
            Some(ChatError::ResourceState(_))
        ));

        // second delete is a no-op
        handle.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_same_name_appends() {
        let index = InMemoryIndex::new();
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(KeywordEmbedder);
        index
            .index(chunks(&["rust"]), embedder.clone(), Some("shared".to_string()))
            .await
            .unwrap();
        index
            .index(chunks(&["python"]), embedder, Some("shared".to_string()))
            .await
            .unwrap();
        assert_eq!(index.get("shared").unwrap().len(), 2);
    }
}
