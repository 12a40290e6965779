use anyhow::{bail, Result};

/// Cosine similarity of two embeddings, clamped to `[-1, 1]`.
///
/// A zero vector scores 0 against anything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        bail!("Vector dimensions must match: {} != {}", a.len(), b.len());
    }
    if a.is_empty() {
        bail!("Vectors cannot be empty");
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// Highest similarity between `vector` and any of `others`; `None` when
/// `others` is empty.
pub fn max_similarity<'a>(
    vector: &[f32],
    others: impl IntoIterator<Item = &'a [f32]>,
) -> Result<Option<f32>> {
    let mut best: Option<f32> = None;
    for other in others {
        let sim = cosine_similarity(vector, other)?;
        best = Some(best.map_or(sim, |b| b.max(sim)));
    }
    Ok(best)
}
