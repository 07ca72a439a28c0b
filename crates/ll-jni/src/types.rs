use ll_engine::LoadParams;

/// Parameters applied when a model is loaded.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LlbLoadParams {
    /// Maximum context length in tokens.
    pub n_ctx: u32,
    /// Threads used for evaluation.
    pub n_threads: u32,
    /// Token slots reserved beyond the prompt's byte length when tokenizing.
    pub tokenize_slack: u32,
    /// Prepend the beginning-of-sequence token to prompts.
    pub add_bos: bool,
}

impl Default for LlbLoadParams {
    fn default() -> Self {
        let params = LoadParams::default();
        Self {
            n_ctx: params.n_ctx,
            n_threads: params.n_threads,
            tokenize_slack: params.tokenize_slack as u32,
            add_bos: params.add_bos,
        }
    }
}

impl From<LlbLoadParams> for LoadParams {
    fn from(p: LlbLoadParams) -> Self {
        Self {
            n_ctx: p.n_ctx,
            n_threads: p.n_threads,
            tokenize_slack: p.tokenize_slack as usize,
            add_bos: p.add_bos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_engine() {
        assert_eq!(LoadParams::from(LlbLoadParams::default()), LoadParams::default());
    }
}
