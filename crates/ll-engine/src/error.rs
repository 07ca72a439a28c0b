use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("model path is empty")]
    EmptyPath,
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("invalid GGUF magic: expected 'GGUF', got {0:?}")]
    InvalidMagic([u8; 4]),
    #[error("unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),
    #[error("inference backend is not available in this build")]
    BackendUnavailable,
    #[error("backend initialisation failed: {0}")]
    BackendInit(String),
    #[error("failed to load model: {0}")]
    ModelLoad(String),
    #[error("failed to create context: {0}")]
    ContextCreate(String),
    #[error("tokenization failed: {0}")]
    Tokenize(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("detokenization of token {token} failed: {reason}")]
    Detokenize { token: u32, reason: String },
    #[error("{tokens} prompt tokens exceed the context length of {n_ctx}")]
    ContextOverflow { tokens: usize, n_ctx: usize },
}

pub type Result<T> = std::result::Result<T, BridgeError>;
