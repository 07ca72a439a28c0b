//! `ll-engine` - model lifetime and greedy decoding for local-llama.
//!
//! This crate provides:
//! - The `Backend` / `Session` traits wrapping an inference library
//! - A reference-counted `BackendRuntime` for process-wide library state
//! - `ModelHandle`, which owns a model, its context and a backend lease
//! - The greedy decode loop and detokenizer
//! - `Bridge`, a registry of handles keyed by opaque identifiers
//! - The llama.cpp backend (feature `llama`) and the fallback `StubBackend`

pub mod backend;
pub mod bridge;
pub mod config;
pub mod error;
pub mod generate;
pub mod gguf;
pub mod handle;
#[cfg(feature = "llama")]
pub mod llama;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod stub;

pub use backend::{Backend, BackendLease, BackendRuntime, Session};
pub use bridge::{Bridge, HandleId, NULL_HANDLE};
pub use config::LoadParams;
pub use error::{BridgeError, Result};
pub use generate::{detokenize, generate, read_piece, Generation, PieceRead, StopReason};
pub use handle::ModelHandle;
pub use stub::StubBackend;

/// The backend this build links.
#[cfg(feature = "llama")]
pub type DefaultBackend = llama::LlamaCppBackend;
/// The backend this build links.
#[cfg(not(feature = "llama"))]
pub type DefaultBackend = stub::StubBackend;
