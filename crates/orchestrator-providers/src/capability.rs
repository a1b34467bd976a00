use serde::{Deserialize, Serialize};

/// A named behaviour a model may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TextGeneration,
    Embedding,
    IntentClassification,
    SentimentAnalysis,
    EmotionDetection,
    LanguageDetection,
    NamedEntityRecognition,
    Retrieval,
    ChatCompletion,
}
