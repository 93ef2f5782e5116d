pub mod embedding;
pub mod generator;
pub mod reranker;
pub mod vision;

pub use embedding::EmbeddingProvider;
pub use generator::Generator;
pub use reranker::Reranker;
pub use vision::VisionLlm;
