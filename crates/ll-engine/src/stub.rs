use std::path::Path;

use ll_sampler::TokenId;

use crate::backend::{Backend, Session};
use crate::config::LoadParams;
use crate::error::{BridgeError, Result};

/// Backend used when llama.cpp is not linked. Every load fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubBackend;

/// Session type of [`StubBackend`]; it has no values.
pub enum NoSession {}

impl Backend for StubBackend {
    type Session = NoSession;

    fn name(&self) -> &str {
        "stub"
    }

    fn is_real(&self) -> bool {
        false
    }

    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn free(&self) {}

    fn open(&self, _path: &Path, _params: &LoadParams) -> Result<NoSession> {
        Err(BridgeError::BackendUnavailable)
    }
}

impl Session for NoSession {
    fn n_ctx(&self) -> usize {
        match *self {}
    }

    fn n_vocab(&self) -> usize {
        match *self {}
    }

    fn eos(&self) -> TokenId {
        match *self {}
    }

    fn tokenize(&self, _text: &str, _add_bos: bool, _capacity: usize) -> Result<Vec<TokenId>> {
        match *self {}
    }

    fn reset(&mut self) {
        match *self {}
    }

    fn decode(&mut self, _tokens: &[TokenId], _start_pos: usize) -> Result<&[f32]> {
        match *self {}
    }

    fn token_to_piece(&self, _token: TokenId) -> Result<Vec<u8>> {
        match *self {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_refuses_models() {
        let backend = StubBackend;
        assert!(!backend.is_real());
        assert!(backend.init().is_ok());
        let err = backend
            .open(Path::new("model.gguf"), &LoadParams::default())
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::BackendUnavailable));
    }
}
