use std::path::{Path, PathBuf};
use std::sync::Arc;

use ll_sampler::GreedySampler;

use crate::backend::{Backend, BackendLease, BackendRuntime, Session};
use crate::config::LoadParams;
use crate::error::{BridgeError, Result};
use crate::generate::{detokenize, generate};
use crate::gguf;

/// A loaded model and its context, plus a lease on the backend.
///
/// Dropping the handle releases the context, then the model, then the lease,
/// which frees the backend if this was the last handle.
pub struct ModelHandle<B: Backend> {
    session: B::Session,
    _lease: BackendLease<B>,
    params: LoadParams,
    path: PathBuf,
    sampler: GreedySampler,
}

impl<B: Backend> ModelHandle<B> {
    /// Load the model at `path`.
    ///
    /// The file's GGUF header is checked before the backend is touched, so a
    /// missing or malformed file never initialises anything.
    pub fn load(runtime: &Arc<BackendRuntime<B>>, path: &Path, params: &LoadParams) -> Result<Self> {
        if path.as_os_str().is_empty() {
            return Err(BridgeError::EmptyPath);
        }

        let header = gguf::probe(path)?;
        log::debug!(
            "{}: GGUF v{} with {} tensors, {} metadata entries",
            path.display(),
            header.version,
            header.n_tensors,
            header.n_kv
        );

        let lease = runtime.acquire()?;
        let session = lease.backend().open(path, params)?;
        log::info!(
            "loaded {} on {} (n_ctx={}, n_vocab={})",
            path.display(),
            lease.backend().name(),
            session.n_ctx(),
            session.n_vocab()
        );

        Ok(Self {
            session,
            _lease: lease,
            params: params.clone(),
            path: path.to_path_buf(),
            sampler: GreedySampler::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn params(&self) -> &LoadParams {
        &self.params
    }

    /// Complete `prompt` with up to `max_tokens` greedily chosen tokens.
    ///
    /// Each call starts from an empty KV cache.
    pub fn infer(&mut self, prompt: &str, max_tokens: usize) -> Result<String> {
        if prompt.is_empty() {
            return Err(BridgeError::EmptyPrompt);
        }

        self.session.reset();

        let capacity = self.params.tokenize_capacity(prompt.len());
        let tokens = self
            .session
            .tokenize(prompt, self.params.add_bos, capacity)?;
        if tokens.is_empty() {
            return Err(BridgeError::Tokenize(
                "prompt produced no tokens".to_string(),
            ));
        }

        let generation = generate(&mut self.session, &self.sampler, &tokens, max_tokens)?;
        log::debug!(
            "generated {} tokens from {} prompt tokens ({:?})",
            generation.tokens.len(),
            tokens.len(),
            generation.stop
        );

        detokenize(&self.session, &generation.tokens)
    }
}
