pub mod processor;
pub mod rules;
pub mod traits;
pub mod types;

pub use processor::{DocumentProcessor, PipelineOutcome, ProcessorDeps};
pub use types::{AiDecision, DocumentType, ScoreOutcome};
