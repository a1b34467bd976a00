//! Message Pipeline (C5): per-turn orchestration across fan-out analysis,
//! knowledge retrieval, response generation, and tone/intent adaptation.

pub mod analysis;
pub mod error;
pub mod generation;
pub mod retrieval;
pub mod turn;

pub use analysis::{AnalysisBundle, EmotionAnalysis, EntityAnalysis, IntentAnalysis, LanguageAnalysis, SentimentAnalysis};
pub use error::{PipelineError, Result};
pub use generation::GeneratedResponse;
pub use retrieval::RetrievalSnippet;
pub use turn::{MessagePipeline, PipelineSettings, TurnResult};
