//! Concrete collaborators for the scheduler pipeline: an HTML extractor, an
//! OpenAI-compatible QA generator and a filesystem artifact store.

pub mod error;
pub mod extractor;
pub mod generator;
pub mod storage;

pub use error::SourceError;
pub use extractor::HttpExtractor;
pub use generator::LlmQaGenerator;
pub use storage::FsArtifactStore;
