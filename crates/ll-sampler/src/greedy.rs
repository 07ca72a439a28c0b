use crate::sampler::{Sampler, TokenId};

/// Greedy sampler: selects the single token with the highest logit.
#[derive(Debug, Clone, Copy)]
pub struct GreedySampler;

impl GreedySampler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GreedySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for GreedySampler {
    fn name(&self) -> &str {
        "greedy"
    }

    fn select(&self, logits: &[f32]) -> Option<TokenId> {
        argmax(logits)
    }
}

/// Index of the largest logit.
///
/// Scans left to right and only replaces the current best on a strictly
/// greater value, so ties resolve to the lowest index and NaN entries after
/// the first position never win.
pub fn argmax(logits: &[f32]) -> Option<TokenId> {
    let (first, rest) = logits.split_first()?;

    let mut best_id = 0usize;
    let mut best_logit = *first;
    for (offset, &logit) in rest.iter().enumerate() {
        if logit > best_logit {
            best_logit = logit;
            best_id = offset + 1;
        }
    }

    Some(best_id as TokenId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_picks_highest() {
        assert_eq!(argmax(&[0.1, 2.5, -1.0, 0.7]), Some(1));
        assert_eq!(argmax(&[-3.0, -2.0, -1.0]), Some(2));
    }

    #[test]
    fn test_argmax_empty() {
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_argmax_ties_prefer_lowest_index() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 3.0]), Some(1));
        assert_eq!(argmax(&[5.0, 5.0]), Some(0));
    }

    #[test]
    fn test_argmax_ignores_nan() {
        assert_eq!(argmax(&[0.5, f32::NAN, 0.25]), Some(0));
        assert_eq!(argmax(&[0.5, f32::NAN, 0.75]), Some(2));
    }

    #[test]
    fn test_argmax_negative_infinity_vocab() {
        // A fully masked vocabulary still yields a deterministic choice.
        let logits = vec![f32::NEG_INFINITY; 8];
        assert_eq!(argmax(&logits), Some(0));
    }

    #[test]
    fn test_greedy_sampler_is_deterministic() {
        let sampler = GreedySampler::new();
        let logits = [0.2, 0.9, 0.4, 0.9, -0.3];
        let first = sampler.select(&logits);
        for _ in 0..10 {
            assert_eq!(sampler.select(&logits), first);
        }
        assert_eq!(first, Some(1));
        assert_eq!(sampler.name(), "greedy");
    }
}
