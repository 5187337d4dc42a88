//! Embedding vector <-> blob codec and cosine similarity.
//!
//! Grounded on the teacher's `processing::f32_vec_to_bytes` helper
//! (`processing.rs`), generalized with the decode counterpart spec.md §6
//! requires ("concatenated little-endian IEEE-754 float32 words").

/// Encode a vector as little-endian f32 words (spec.md §3 I6, §6).
pub fn encode(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode a little-endian f32-word blob back into a vector.
///
/// Trailing bytes that don't form a complete f32 word are ignored — the
/// Store never writes such blobs, but a defensive decode avoids a panic if
/// one is ever encountered.
pub fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two vectors. Returns 0.0 if either vector has
/// zero magnitude (undefined direction) or the vectors differ in length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Incremental mean centroid update (spec.md §4.5):
/// `C' = (C * N + V) / (N + 1)`, or `V` if there was no prior centroid.
pub fn incremental_mean(prior: Option<&[f32]>, prior_count: u64, v: &[f32]) -> Vec<f32> {
    match prior {
        None => v.to_vec(),
        Some(c) if prior_count == 0 => v.to_vec(),
        Some(c) => {
            let n = prior_count as f32;
            c.iter()
                .zip(v.iter())
                .map(|(cx, vx)| (cx * n + vx) / (n + 1.0))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_bytes() {
        let v = vec![1.0_f32, -2.5, 0.0, 3.3333];
        let bytes = encode(&v);
        assert_eq!(bytes.len(), v.len() * 4);
        let back = decode(&bytes);
        assert_eq!(back, v);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![1.0_f32, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0_f32, 0.0];
        let b = vec![0.0_f32, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn scenario_3_group_formation_and_centroid_update() {
        // spec.md §8 scenario 3
        let v1 = vec![1.0_f32, 0.0, 0.0];
        let v2 = vec![0.95_f32, 0.05, 0.0];

        let centroid = incremental_mean(None, 0, &v1);
        assert_eq!(centroid, v1);

        let sim = cosine_similarity(&v2, &centroid);
        assert!(sim >= 0.75, "expected similarity >= 0.75, got {}", sim);
        assert!((sim - 0.997).abs() < 0.01);

        // v2 is the second member: prior_count is 1 (the just-added V1 row).
        let updated = incremental_mean(Some(&centroid), 1, &v2);
        assert!((updated[0] - 0.975).abs() < 1e-4);
        assert!((updated[1] - 0.025).abs() < 1e-4);
        assert!((updated[2] - 0.0).abs() < 1e-4);
    }

    #[test]
    fn incremental_mean_matches_batch_mean_over_several_updates() {
        let vectors: Vec<Vec<f32>> = vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![2.0, 2.0],
            vec![-1.0, 1.0],
        ];

        let mut centroid: Option<Vec<f32>> = None;
        for (i, v) in vectors.iter().enumerate() {
            let updated = incremental_mean(centroid.as_deref(), i as u64, v);
            centroid = Some(updated);
        }

        let centroid = centroid.unwrap();
        let expected_x: f32 = vectors.iter().map(|v| v[0]).sum::<f32>() / vectors.len() as f32;
        let expected_y: f32 = vectors.iter().map(|v| v[1]).sum::<f32>() / vectors.len() as f32;

        assert!((centroid[0] - expected_x).abs() < 1e-5);
        assert!((centroid[1] - expected_y).abs() < 1e-5);
    }
}
