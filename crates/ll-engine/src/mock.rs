//! Scripted in-memory backend.
//!
//! `MockBackend` stands in for llama.cpp in tests: its vocabulary is a
//! short list of byte pieces, its tokenizer maps whitespace-separated words
//! onto that list, and each decode step returns one-hot logits for the next
//! token in a fixed reply script. Every lifecycle step is appended to a
//! shared [`EventLog`] so tests can assert on ordering.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ll_sampler::TokenId;

use crate::backend::{Backend, Session};
use crate::config::LoadParams;
use crate::error::{BridgeError, Result};

pub const UNK: TokenId = 0;
pub const BOS: TokenId = 1;
pub const EOS: TokenId = 2;

/// Context length the mock model reports as its training length.
pub const TRAINED_CTX: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    BackendInit,
    BackendFree,
    ModelLoad,
    ContextCreate,
    Reset,
    Decode { n_tokens: usize, start_pos: usize, last: TokenId },
    ContextDrop,
    ModelDrop,
}

/// Shared, append-only record of backend activity.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<MockEvent>>>);

impl EventLog {
    fn push(&self, event: MockEvent) {
        self.lock().push(event);
    }

    pub fn snapshot(&self) -> Vec<MockEvent> {
        self.lock().clone()
    }

    pub fn count(&self, event: MockEvent) -> usize {
        self.lock().iter().filter(|e| **e == event).count()
    }

    /// `(n_tokens, start_pos, last)` for every successful decode.
    pub fn decodes(&self) -> Vec<(usize, usize, TokenId)> {
        self.lock()
            .iter()
            .filter_map(|e| match *e {
                MockEvent::Decode {
                    n_tokens,
                    start_pos,
                    last,
                } => Some((n_tokens, start_pos, last)),
                _ => None,
            })
            .collect()
    }

    /// Lifecycle events only, without decodes and resets.
    pub fn lifecycle(&self) -> Vec<MockEvent> {
        self.lock()
            .iter()
            .filter(|e| !matches!(e, MockEvent::Decode { .. } | MockEvent::Reset))
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<MockEvent>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What the mock model knows and how it answers.
#[derive(Debug, Clone)]
pub struct MockScript {
    /// Token text bytes, indexed by token id.
    pub pieces: Vec<Vec<u8>>,
    /// Token chosen at each generation step after the prompt. Once the
    /// script runs out the model emits EOS.
    pub replies: Vec<TokenId>,
    /// Decode call (counted from the last reset, 0 = prompt) that fails.
    pub fail_decode_at: Option<usize>,
    /// Token whose detokenization fails.
    pub fail_piece: Option<TokenId>,
}

impl Default for MockScript {
    fn default() -> Self {
        let pieces: [&[u8]; 9] = [
            b"<unk>",
            b"<s>",
            b"</s>",
            b"hello",
            b" world",
            b"!",
            " سلام".as_bytes(),
            &[0xC3],
            &[0xA9],
        ];
        Self {
            pieces: pieces.iter().map(|p| p.to_vec()).collect(),
            replies: vec![4, 5],
            fail_decode_at: None,
            fail_piece: None,
        }
    }
}

impl MockScript {
    pub fn replies(mut self, replies: Vec<TokenId>) -> Self {
        self.replies = replies;
        self
    }

    pub fn fail_decode_at(mut self, call: usize) -> Self {
        self.fail_decode_at = Some(call);
        self
    }

    pub fn fail_piece(mut self, token: TokenId) -> Self {
        self.fail_piece = Some(token);
        self
    }
}

#[derive(Debug, Default)]
pub struct MockBackend {
    script: MockScript,
    events: EventLog,
    fail_init: bool,
    fail_open: bool,
    fail_context: bool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, script: MockScript) -> Self {
        self.script = script;
        self
    }

    pub fn fail_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn fail_context(mut self) -> Self {
        self.fail_context = true;
        self
    }

    pub fn events(&self) -> EventLog {
        self.events.clone()
    }
}

impl Backend for MockBackend {
    type Session = MockSession;

    fn name(&self) -> &str {
        "mock"
    }

    fn is_real(&self) -> bool {
        true
    }

    fn init(&self) -> Result<()> {
        if self.fail_init {
            return Err(BridgeError::BackendInit("scripted failure".to_string()));
        }
        self.events.push(MockEvent::BackendInit);
        Ok(())
    }

    fn free(&self) {
        self.events.push(MockEvent::BackendFree);
    }

    fn open(&self, path: &Path, params: &LoadParams) -> Result<MockSession> {
        if self.fail_open {
            return Err(BridgeError::ModelLoad(format!(
                "scripted failure for {}",
                path.display()
            )));
        }
        self.events.push(MockEvent::ModelLoad);
        let model = MockModel {
            script: self.script.clone(),
            events: self.events.clone(),
        };

        if self.fail_context {
            return Err(BridgeError::ContextCreate("scripted failure".to_string()));
        }
        self.events.push(MockEvent::ContextCreate);
        let n_ctx = params.context_len(TRAINED_CTX) as usize;
        let ctx = MockContext {
            n_ctx,
            n_batch: n_ctx,
            calls: 0,
            logits: Vec::new(),
            events: self.events.clone(),
        };

        Ok(MockSession { ctx, model })
    }
}

struct MockModel {
    script: MockScript,
    events: EventLog,
}

impl Drop for MockModel {
    fn drop(&mut self) {
        self.events.push(MockEvent::ModelDrop);
    }
}

struct MockContext {
    n_ctx: usize,
    n_batch: usize,
    calls: usize,
    logits: Vec<f32>,
    events: EventLog,
}

impl Drop for MockContext {
    fn drop(&mut self) {
        self.events.push(MockEvent::ContextDrop);
    }
}

pub struct MockSession {
    // Declared first so it is dropped before the model.
    ctx: MockContext,
    model: MockModel,
}

impl MockSession {
    fn one_hot(&self, token: TokenId) -> Vec<f32> {
        let mut logits = vec![0.0; self.n_vocab()];
        if let Some(slot) = logits.get_mut(token as usize) {
            *slot = 1.0;
        }
        logits
    }
}

impl Session for MockSession {
    fn n_ctx(&self) -> usize {
        self.ctx.n_ctx
    }

    fn n_vocab(&self) -> usize {
        self.model.script.pieces.len()
    }

    fn eos(&self) -> TokenId {
        EOS
    }

    fn tokenize(&self, text: &str, add_bos: bool, capacity: usize) -> Result<Vec<TokenId>> {
        let mut tokens = Vec::new();
        if add_bos {
            tokens.push(BOS);
        }
        for word in text.split_whitespace() {
            let id = self
                .model
                .script
                .pieces
                .iter()
                .position(|p| p.trim_ascii() == word.as_bytes())
                .map_or(UNK, |i| i as TokenId);
            tokens.push(id);
        }
        // A prompt of only whitespace yields nothing but the BOS marker.
        if tokens.len() <= usize::from(add_bos) {
            return Ok(Vec::new());
        }
        if tokens.len() > capacity {
            return Err(BridgeError::Tokenize(format!(
                "{} tokens exceed capacity {}",
                tokens.len(),
                capacity
            )));
        }
        Ok(tokens)
    }

    fn reset(&mut self) {
        self.ctx.calls = 0;
        self.ctx.events.push(MockEvent::Reset);
    }

    fn decode(&mut self, tokens: &[TokenId], start_pos: usize) -> Result<&[f32]> {
        let call = self.ctx.calls;
        self.ctx.calls += 1;

        let last = *tokens
            .last()
            .ok_or_else(|| BridgeError::Decode("empty batch".to_string()))?;
        if tokens.len() > self.ctx.n_batch {
            return Err(BridgeError::Decode(format!(
                "batch of {} exceeds n_batch {}",
                tokens.len(),
                self.ctx.n_batch
            )));
        }
        if start_pos + tokens.len() > self.ctx.n_ctx {
            return Err(BridgeError::Decode("context full".to_string()));
        }
        if self.model.script.fail_decode_at == Some(call) {
            return Err(BridgeError::Decode(format!("scripted failure at call {call}")));
        }

        // Call 0 primes the prompt; generation step k is call k + 1 and the
        // logits it returns choose replies[k].
        let step = call.saturating_sub(1);
        let reply = self.model.script.replies.get(step).copied().unwrap_or(EOS);
        self.ctx.logits = self.one_hot(reply);
        self.ctx.events.push(MockEvent::Decode {
            n_tokens: tokens.len(),
            start_pos,
            last,
        });
        Ok(&self.ctx.logits)
    }

    fn token_to_piece(&self, token: TokenId) -> Result<Vec<u8>> {
        if self.model.script.fail_piece == Some(token) {
            return Err(BridgeError::Detokenize {
                token,
                reason: "scripted failure".to_string(),
            });
        }
        self.model
            .script
            .pieces
            .get(token as usize)
            .cloned()
            .ok_or_else(|| BridgeError::Detokenize {
                token,
                reason: "out of vocabulary".to_string(),
            })
    }
}

/// A temporary file carrying a minimal GGUF v3 header.
#[cfg(test)]
pub(crate) fn model_file() -> tempfile::NamedTempFile {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&crate::gguf::GGUF_MAGIC).unwrap();
    file.write_all(&3u32.to_le_bytes()).unwrap();
    file.write_all(&[0u8; 16]).unwrap();
    file
}
