use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ll_sampler::TokenId;

use crate::config::LoadParams;
use crate::error::Result;

/// An inference library that can open model files.
///
/// `init` and `free` bracket the library's process-wide state. They are only
/// ever called through [`BackendRuntime`], which counts users so that the
/// state is set up once and torn down after the last session is gone.
pub trait Backend: Send + Sync + 'static {
    /// A loaded model together with its evaluation context.
    type Session: Session;

    /// Returns the name of this backend (e.g., "llama.cpp", "stub").
    fn name(&self) -> &str;

    /// Whether this backend actually runs models.
    fn is_real(&self) -> bool;

    /// Set up process-wide library state.
    fn init(&self) -> Result<()>;

    /// Release process-wide library state.
    fn free(&self);

    /// Load the model at `path` and create a context for it.
    ///
    /// If the context cannot be created the model is released before the
    /// error is returned.
    fn open(&self, path: &Path, params: &LoadParams) -> Result<Self::Session>;
}

/// A model paired with its evaluation context.
///
/// Dropping a session releases the context first and the model second.
pub trait Session: Send {
    /// Context length in tokens.
    fn n_ctx(&self) -> usize;

    /// Vocabulary size (number of output logits).
    fn n_vocab(&self) -> usize;

    /// End-of-sequence token id.
    fn eos(&self) -> TokenId;

    /// Convert text into token ids. Fails if more than `capacity` tokens
    /// would be produced.
    fn tokenize(&self, text: &str, add_bos: bool, capacity: usize) -> Result<Vec<TokenId>>;

    /// Clear the KV cache so the next decode may start at position 0.
    fn reset(&mut self);

    /// Evaluate `tokens` at positions `start_pos..start_pos + tokens.len()`
    /// and return the logits computed for the last one.
    fn decode(&mut self, tokens: &[TokenId], start_pos: usize) -> Result<&[f32]>;

    /// Raw bytes of a single token's text.
    fn token_to_piece(&self, token: TokenId) -> Result<Vec<u8>>;
}

/// Reference-counted owner of a backend's process-wide state.
pub struct BackendRuntime<B: Backend> {
    backend: B,
    users: Mutex<usize>,
}

impl<B: Backend> BackendRuntime<B> {
    pub fn new(backend: B) -> Arc<Self> {
        Arc::new(Self {
            backend,
            users: Mutex::new(0),
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of outstanding leases.
    pub fn users(&self) -> usize {
        *self.lock_users()
    }

    /// Claim the backend, initialising it if nobody else holds a lease.
    pub fn acquire(self: &Arc<Self>) -> Result<BackendLease<B>> {
        let mut users = self.lock_users();
        if *users == 0 {
            self.backend.init()?;
            log::debug!("{} backend initialised", self.backend.name());
        }
        *users += 1;
        Ok(BackendLease {
            runtime: Arc::clone(self),
        })
    }

    fn lock_users(&self) -> MutexGuard<'_, usize> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A counted claim on the backend. The last lease dropped frees it.
pub struct BackendLease<B: Backend> {
    runtime: Arc<BackendRuntime<B>>,
}

impl<B: Backend> BackendLease<B> {
    pub fn backend(&self) -> &B {
        &self.runtime.backend
    }
}

impl<B: Backend> Drop for BackendLease<B> {
    fn drop(&mut self) {
        let mut users = self.runtime.lock_users();
        *users = users.saturating_sub(1);
        if *users == 0 {
            self.runtime.backend.free();
            log::debug!("{} backend freed", self.runtime.backend.name());
        }
    }
}
