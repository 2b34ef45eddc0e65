//! Binary embeddings codec and pluggable embedding-provider capability.

pub mod codec;
pub mod provider;

pub use codec::{EmbeddingFile, HEADER_LEN, MAGIC};
pub use provider::{EmbeddingProvider, NoneProvider};
