//! llama.cpp backend via the `llama-cpp-2` crate.

use std::mem::ManuallyDrop;
use std::num::NonZeroU32;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel};
use llama_cpp_2::token::LlamaToken;
use llama_cpp_2::TokenToStringError;

use ll_sampler::TokenId;

use crate::backend::{Backend, Session};
use crate::config::LoadParams;
use crate::error::{BridgeError, Result};
use crate::generate::{read_piece, PieceRead};

/// Starting buffer size for a token's text; grown on demand.
const PIECE_BUFFER: usize = 32;

#[derive(Default)]
pub struct LlamaCppBackend {
    state: Mutex<Option<LlamaBackend>>,
}

impl LlamaCppBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, Option<LlamaBackend>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Backend for LlamaCppBackend {
    type Session = LlamaSession;

    fn name(&self) -> &str {
        "llama.cpp"
    }

    fn is_real(&self) -> bool {
        true
    }

    fn init(&self) -> Result<()> {
        let mut state = self.state();
        if state.is_none() {
            let mut backend =
                LlamaBackend::init().map_err(|e| BridgeError::BackendInit(e.to_string()))?;
            backend.void_logs();
            *state = Some(backend);
        }
        Ok(())
    }

    fn free(&self) {
        // Dropping the backend calls llama_backend_free.
        self.state().take();
    }

    fn open(&self, path: &Path, params: &LoadParams) -> Result<LlamaSession> {
        let state = self.state();
        let backend = state
            .as_ref()
            .ok_or_else(|| BridgeError::BackendInit("backend not initialised".to_string()))?;

        let model = LlamaModel::load_from_file(backend, path, &LlamaModelParams::default())
            .map_err(|e| BridgeError::ModelLoad(e.to_string()))?;

        let n_ctx = params.context_len(model.n_ctx_train());
        let n_threads = i32::try_from(params.n_threads).unwrap_or(i32::MAX);
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(n_ctx))
            .with_n_batch(n_ctx)
            .with_n_threads(n_threads)
            .with_n_threads_batch(n_threads);

        let model = NonNull::from(Box::leak(Box::new(model)));
        // SAFETY: the allocation is only freed by `LlamaSession::drop` after
        // the context, or below when no context was created.
        let model_ref: &'static LlamaModel = unsafe { model.as_ref() };
        match model_ref.new_context(backend, ctx_params) {
            Ok(ctx) => Ok(LlamaSession {
                ctx: ManuallyDrop::new(ctx),
                model,
            }),
            Err(e) => {
                // SAFETY: nothing borrows the model any more.
                drop(unsafe { Box::from_raw(model.as_ptr()) });
                Err(BridgeError::ContextCreate(e.to_string()))
            }
        }
    }
}

/// A llama.cpp model and the context created from it.
///
/// The model is held as a raw allocation because the context borrows it for
/// the session's whole life.
pub struct LlamaSession {
    ctx: ManuallyDrop<LlamaContext<'static>>,
    model: NonNull<LlamaModel>,
}

impl LlamaSession {
    fn model(&self) -> &LlamaModel {
        // SAFETY: the model outlives `self` and is never mutated.
        unsafe { self.model.as_ref() }
    }
}

impl Drop for LlamaSession {
    fn drop(&mut self) {
        // SAFETY: the context is dropped exactly once, here, before the
        // model it borrows; the model came from `Box::leak` in `open`.
        unsafe {
            ManuallyDrop::drop(&mut self.ctx);
            drop(Box::from_raw(self.model.as_ptr()));
        }
    }
}

// SAFETY: llama.cpp contexts may move between threads as long as calls are
// not concurrent. Every session is reached through `&mut` or behind the
// bridge's per-handle mutex.
unsafe impl Send for LlamaSession {}

fn to_llama(token: TokenId) -> LlamaToken {
    LlamaToken(token as i32)
}

impl Session for LlamaSession {
    fn n_ctx(&self) -> usize {
        self.ctx.n_ctx() as usize
    }

    fn n_vocab(&self) -> usize {
        self.model().n_vocab().max(0) as usize
    }

    fn eos(&self) -> TokenId {
        self.model().token_eos().0 as TokenId
    }

    fn tokenize(&self, text: &str, add_bos: bool, capacity: usize) -> Result<Vec<TokenId>> {
        let add_bos = if add_bos { AddBos::Always } else { AddBos::Never };
        let tokens = self
            .model()
            .str_to_token(text, add_bos)
            .map_err(|e| BridgeError::Tokenize(e.to_string()))?;
        if tokens.len() > capacity {
            return Err(BridgeError::Tokenize(format!(
                "{} tokens exceed capacity {}",
                tokens.len(),
                capacity
            )));
        }
        Ok(tokens.into_iter().map(|t| t.0 as TokenId).collect())
    }

    fn reset(&mut self) {
        self.ctx.clear_kv_cache();
    }

    fn decode(&mut self, tokens: &[TokenId], start_pos: usize) -> Result<&[f32]> {
        let last = tokens
            .len()
            .checked_sub(1)
            .ok_or_else(|| BridgeError::Decode("empty batch".to_string()))?;

        let n_batch = self.ctx.n_batch() as usize;
        if tokens.len() > n_batch {
            return Err(BridgeError::Decode(format!(
                "batch of {} exceeds n_batch {}",
                tokens.len(),
                n_batch
            )));
        }

        let mut batch = LlamaBatch::new(tokens.len(), 1);
        for (i, &token) in tokens.iter().enumerate() {
            let pos = i32::try_from(start_pos + i)
                .map_err(|_| BridgeError::Decode(format!("position {} out of range", start_pos + i)))?;
            batch
                .add(to_llama(token), pos, &[0], i == last)
                .map_err(|e| BridgeError::Decode(e.to_string()))?;
        }
        self.ctx
            .decode(&mut batch)
            .map_err(|e| BridgeError::Decode(e.to_string()))?;

        Ok(self.ctx.get_logits_ith(last as i32))
    }

    fn token_to_piece(&self, token: TokenId) -> Result<Vec<u8>> {
        let model = self.model();
        read_piece(token, PIECE_BUFFER, |size| {
            match model.token_to_piece_bytes(to_llama(token), size, true, None) {
                Ok(bytes) => Ok(PieceRead::Done(bytes)),
                // The library reports the size it needs as a negative count.
                Err(TokenToStringError::InsufficientBufferSpace(needed)) => {
                    Ok(PieceRead::TooSmall(needed.unsigned_abs() as usize))
                }
                Err(e) => Err(BridgeError::Detokenize {
                    token,
                    reason: e.to_string(),
                }),
            }
        })
    }
}
