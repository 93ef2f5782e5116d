pub mod chunker;
pub mod normalizer;

pub use chunker::{chunk_sentence_aware, chunk_structure_aware, Block, Chunk, ContentType};
pub use normalizer::normalize;
