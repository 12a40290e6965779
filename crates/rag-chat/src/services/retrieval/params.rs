use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::error::{ChatError, ChatResult};

/// How chunks are picked for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Top `k` by similarity.
    Similarity,
    /// Top `k` among chunks scoring at least `score_threshold`.
    SimilarityScoreThreshold,
    /// Maximal marginal relevance over the top `fetch_k` candidates.
    Mmr,
}

impl SearchMode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Similarity => "similarity",
            Self::SimilarityScoreThreshold => "similarity_score_threshold",
            Self::Mmr => "mmr",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "similarity" => Ok(Self::Similarity),
            "similarity_score_threshold" | "similarity_with_threshold" | "threshold" => {
                Ok(Self::SimilarityScoreThreshold)
            }
            "mmr" | "diversity" => Ok(Self::Mmr),
            other => Err(ChatError::Validation(format!(
                "unknown search type '{}' (expected similarity, similarity_score_threshold or mmr)",
                other
            ))),
        }
    }
}

/// Retrieval parameters, checked by [`SearchParams::validate`] before any I/O.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    pub mode: SearchMode,
    pub k: usize,
    pub fetch_k: usize,
    pub score_threshold: Option<f32>,
    /// Relevance/diversity balance for MMR: 1.0 is pure relevance.
    pub lambda_mult: f32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            mode: SearchMode::Mmr,
            k: 8,
            fetch_k: 20,
            score_threshold: None,
            lambda_mult: 0.5,
        }
    }
}

impl SearchParams {
    pub fn similarity(k: usize) -> Self {
        Self {
            mode: SearchMode::Similarity,
            k,
            ..Self::default()
        }
    }

    pub fn with_threshold(k: usize, score_threshold: f32) -> Self {
        Self {
            mode: SearchMode::SimilarityScoreThreshold,
            k,
            score_threshold: Some(score_threshold),
            ..Self::default()
        }
    }

    pub fn mmr(k: usize, fetch_k: usize) -> Self {
        Self {
            mode: SearchMode::Mmr,
            k,
            fetch_k,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ChatResult<()> {
        if self.k == 0 {
            return Err(ChatError::Validation("search k must be greater than 0".to_string()));
        }

        match self.mode {
            SearchMode::Similarity => {}
            SearchMode::SimilarityScoreThreshold => match self.score_threshold {
                Some(t) if (0.0..=1.0).contains(&t) => {}
                Some(t) => {
                    return Err(ChatError::Validation(format!(
                        "score_threshold must be within [0, 1], got {}",
                        t
                    )))
                }
                None => {
                    return Err(ChatError::Validation(
                        "similarity_score_threshold search requires score_threshold".to_string(),
                    ))
                }
            },
            SearchMode::Mmr => {
                if self.fetch_k == 0 {
                    return Err(ChatError::Validation(
                        "search fetch_k must be greater than 0".to_string(),
                    ));
                }
                if self.fetch_k < self.k {
                    return Err(ChatError::Validation(format!(
                        "search fetch_k ({}) must be at least k ({})",
                        self.fetch_k, self.k
                    )));
                }
                if !(0.0..=1.0).contains(&self.lambda_mult) {
                    return Err(ChatError::Validation(format!(
                        "mmr lambda must be within [0, 1], got {}",
                        self.lambda_mult
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_str() {
        assert_eq!("mmr".parse::<SearchMode>().unwrap(), SearchMode::Mmr);
        assert_eq!("Similarity".parse::<SearchMode>().unwrap(), SearchMode::Similarity);
        assert_eq!(
            "similarity_with_threshold".parse::<SearchMode>().unwrap(),
            SearchMode::SimilarityScoreThreshold
        );
        assert!(matches!(
            "fuzzy".parse::<SearchMode>(),
            Err(ChatError::Validation(_))
        ));
    }

    #[test]
    fn test_default_is_mmr_k8() {
        let params = SearchParams::default();
        assert_eq!(params.mode, SearchMode::Mmr);
        assert_eq!(params.k, 8);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_zero_k_rejected() {
        assert!(SearchParams::similarity(0).validate().is_err());
    }

    #[test]
    fn test_mmr_fetch_k_rules() {
        assert!(SearchParams::mmr(4, 0).validate().is_err());
        assert!(SearchParams::mmr(4, 3).validate().is_err());
        assert!(SearchParams::mmr(4, 4).validate().is_ok());
    }

    #[test]
    fn test_threshold_rules() {
        assert!(SearchParams::with_threshold(3, 0.5).validate().is_ok());
        assert!(SearchParams::with_threshold(3, 1.5).validate().is_err());
        assert!(SearchParams::with_threshold(3, -0.1).validate().is_err());

        let missing = SearchParams {
            score_threshold: None,
            ..SearchParams::with_threshold(3, 0.5)
        };
        assert!(missing.validate().is_err());
    }
}
