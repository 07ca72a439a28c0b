/// Vocabulary index of a token.
pub type TokenId = u32;

/// Trait for strategies that pick the next token from a logit vector.
///
/// The logit at index `i` scores vocabulary entry `i`, so the returned
/// token id is always a valid index into `logits`.
pub trait Sampler: Send + Sync {
    /// Returns the name of this sampler.
    fn name(&self) -> &str;

    /// Select the next token, or `None` when `logits` is empty.
    fn select(&self, logits: &[f32]) -> Option<TokenId>;
}
