/// Parameters applied when a model is loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadParams {
    /// Maximum context length in tokens.
    pub n_ctx: u32,
    /// Threads used for evaluation.
    pub n_threads: u32,
    /// Extra token slots reserved beyond the prompt's byte length when
    /// tokenizing.
    pub tokenize_slack: usize,
    /// Prepend the beginning-of-sequence token to prompts.
    pub add_bos: bool,
}

impl Default for LoadParams {
    fn default() -> Self {
        Self {
            n_ctx: 2048,
            n_threads: 4,
            tokenize_slack: 128,
            add_bos: true,
        }
    }
}

impl LoadParams {
    /// Token capacity reserved for a prompt of `prompt_bytes` bytes.
    pub fn tokenize_capacity(&self, prompt_bytes: usize) -> usize {
        prompt_bytes.saturating_add(self.tokenize_slack)
    }

    /// Context length to open with. Zero means the length the model was
    /// trained with. The whole prompt goes through one batch, so the batch
    /// size must equal this value.
    pub fn context_len(&self, trained: u32) -> u32 {
        match self.n_ctx {
            0 => trained.max(1),
            n => n,
        }
    }
}
