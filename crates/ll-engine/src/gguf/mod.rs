pub mod header;

pub use header::{probe, GgufHeader, GGUF_MAGIC, SUPPORTED_VERSIONS};
