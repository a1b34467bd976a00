//! Emotion-to-tone adaptation tables (§4.6, "Emotion-to-tone adaptation").
//!
//! Treated as a closed English-language set per [`crate`] docs; a
//! deployment that needs other languages swaps in its own
//! [`EmotionStrategyTable`] rather than touching the rewriting logic.

use orchestrator_core::conversation::EmotionLabel;
use serde::{Deserialize, Serialize};

/// Tone a rewritten response is steered toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneTag {
    Empathetic,
    Supportive,
    ClearGuidance,
    Neutral,
    Friendly,
    Enthusiastic,
    Apologetic,
}

/// Per-emotion adaptation strategy: thresholds, tone, and the phrase banks
/// the rewriting rules draw from.
#[derive(Debug, Clone)]
pub struct EmotionStrategy {
    pub emotion: EmotionLabel,
    pub intensity_threshold: f32,
    pub tone: ToneTag,
    pub escalation_threshold: f32,
    /// Ordered high/medium/low empathy openers (index 0 = strongest).
    pub empathy_openers: Vec<&'static str>,
    /// Ordered high/medium/low de-escalation closers.
    pub de_escalation_closers: Vec<&'static str>,
    pub disallowed_phrases: Vec<&'static str>,
    pub required_actions: Vec<&'static str>,
    pub requires_human_review: bool,
}

/// Result of running the rewriting rules over one generated response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToneAdaptation {
    pub original_text: String,
    pub adapted_text: String,
    pub tone_used: ToneTag,
    pub emotion_detected: EmotionLabel,
    pub intensity: f32,
    pub confidence: f32,
    pub modifications: Vec<String>,
    pub escalation_recommended: bool,
    pub escalation_reason: Option<String>,
}

/// Swappable table of [`EmotionStrategy`] entries, one per emotion in the
/// closed label set. Built once at startup and shared read-only.
pub struct EmotionStrategyTable {
    strategies: Vec<EmotionStrategy>,
}

impl EmotionStrategyTable {
    pub fn get(&self, emotion: EmotionLabel) -> &EmotionStrategy {
        self.strategies
            .iter()
            .find(|s| s.emotion == emotion)
            .unwrap_or_else(|| {
                self.strategies
                    .iter()
                    .find(|s| s.emotion == EmotionLabel::Neutral)
                    .expect("neutral strategy always present")
            })
    }

    /// The default English strategy table, ported from the source's
    /// per-emotion `EMOTION_STRATEGIES` dict.
    pub fn english_default() -> Self {
        use EmotionLabel::*;
        Self {
            strategies: vec![
                EmotionStrategy {
                    emotion: Angry,
                    intensity_threshold: 0.6,
                    tone: ToneTag::Empathetic,
                    escalation_threshold: 0.8,
                    empathy_openers: vec![
                        "I understand your frustration",
                        "I can see why you're upset",
                        "I apologize for the inconvenience",
                    ],
                    de_escalation_closers: vec![
                        "I completely understand your concern and I want to make sure we get this resolved.",
                        "Let me take care of this right away.",
                        "Your satisfaction is our priority.",
                    ],
                    disallowed_phrases: vec![
                        "calm down",
                        "that's not our fault",
                        "you should have",
                        "that's policy",
                        "there's nothing I can do",
                    ],
                    required_actions: vec![
                        "immediate_escalation",
                        "senior_agent_review",
                        "priority_handling",
                    ],
                    requires_human_review: true,
                },
                EmotionStrategy {
                    emotion: Frustrated,
                    intensity_threshold: 0.5,
                    tone: ToneTag::Supportive,
                    escalation_threshold: 0.7,
                    empathy_openers: vec![
                        "I understand this is frustrating",
                        "Let me help clarify this for you",
                        "I can see why this is confusing",
                    ],
                    de_escalation_closers: vec![
                        "I understand how frustrating this must be, and I'll make sure we get this sorted out.",
                        "Let me walk you through this step by step.",
                        "I'm here to help make this easier.",
                    ],
                    disallowed_phrases: vec![
                        "it's simple",
                        "just follow the instructions",
                        "you don't understand",
                        "that's obvious",
                    ],
                    required_actions: vec![
                        "detailed_explanation",
                        "step_by_step_guidance",
                        "follow_up_confirmation",
                    ],
                    requires_human_review: false,
                },
                EmotionStrategy {
                    emotion: Confused,
                    intensity_threshold: 0.5,
                    tone: ToneTag::ClearGuidance,
                    escalation_threshold: 0.6,
                    empathy_openers: vec![
                        "Let me clarify that for you",
                        "I can help explain this better",
                        "Let me break this down",
                    ],
                    de_escalation_closers: vec![
                        "Let me explain this in simpler terms and walk you through it step by step.",
                        "Here's what this means.",
                        "Let me provide a clear example.",
                    ],
                    disallowed_phrases: vec![
                        "it's obvious",
                        "as i said before",
                        "you should know this",
                        "it's straightforward",
                    ],
                    required_actions: vec![
                        "simplified_explanation",
                        "examples_provided",
                        "confirmation_questions",
                    ],
                    requires_human_review: false,
                },
                EmotionStrategy {
                    emotion: Satisfied,
                    intensity_threshold: 0.6,
                    tone: ToneTag::Friendly,
                    escalation_threshold: 0.9,
                    empathy_openers: vec![
                        "I'm glad I could help",
                        "That's wonderful to hear",
                        "Thank you for your patience",
                    ],
                    de_escalation_closers: vec![
                        "I'm so glad we could resolve this for you.",
                        "It's great that everything is working now.",
                        "We appreciate your feedback.",
                    ],
                    disallowed_phrases: vec!["whatever", "fine", "good enough", "at least it works"],
                    required_actions: vec![
                        "positive_reinforcement",
                        "feedback_collection",
                        "future_assistance_offer",
                    ],
                    requires_human_review: false,
                },
                EmotionStrategy {
                    emotion: Happy,
                    intensity_threshold: 0.7,
                    tone: ToneTag::Enthusiastic,
                    escalation_threshold: 0.95,
                    empathy_openers: vec![
                        "That's fantastic!",
                        "I'm thrilled to hear that",
                        "That's wonderful news!",
                    ],
                    de_escalation_closers: vec![
                        "That's absolutely wonderful! Your satisfaction makes our day.",
                        "I'm delighted that we could exceed your expectations.",
                        "We're thrilled to have you as a satisfied customer.",
                    ],
                    disallowed_phrases: vec!["okay", "sure", "whatever you say", "if you say so"],
                    required_actions: vec![
                        "celebratory_tone",
                        "positive_feedback_request",
                        "loyalty_program_mention",
                    ],
                    requires_human_review: false,
                },
                EmotionStrategy {
                    emotion: Excited,
                    intensity_threshold: 0.7,
                    tone: ToneTag::Enthusiastic,
                    escalation_threshold: 0.95,
                    empathy_openers: vec!["That's exciting!", "How wonderful!", "That's amazing!"],
                    de_escalation_closers: vec![
                        "That's incredibly exciting! Let's make this even more amazing.",
                        "I'm so excited to help you with this!",
                        "This is fantastic news!",
                    ],
                    disallowed_phrases: vec![
                        "calm down",
                        "settle down",
                        "don't get too excited",
                        "it's not that big of a deal",
                    ],
                    required_actions: vec!["match_enthusiasm", "amplify_positive", "future_optimism"],
                    requires_human_review: false,
                },
                EmotionStrategy {
                    emotion: Neutral,
                    intensity_threshold: 0.0,
                    tone: ToneTag::Neutral,
                    escalation_threshold: 0.9,
                    empathy_openers: vec![
                        "I understand",
                        "I see",
                        "Thank you for the information",
                    ],
                    de_escalation_closers: vec![
                        "I understand your request and I'll help you resolve this.",
                        "Let me assist you with that.",
                        "Let's work through this together.",
                    ],
                    disallowed_phrases: vec![],
                    required_actions: vec![
                        "professional_assistance",
                        "clear_communication",
                        "efficient_resolution",
                    ],
                    requires_human_review: false,
                },
            ],
        }
    }
}

impl Default for EmotionStrategyTable {
    fn default() -> Self {
        Self::english_default()
    }
}

/// Fixed alternative table for disallowed-phrase substitution (§4.6 rule 3).
pub fn alternative_for(phrase: &str) -> &'static str {
    match phrase.to_lowercase().as_str() {
        "calm down" => "let's work through this together",
        "that's not our fault" => "let's see how we can resolve this",
        "you should have" => "going forward, we can",
        "that's policy" => "here's what we can do",
        "there's nothing i can do" => "let me see what options we have",
        "it's simple" => "let me walk you through this",
        "just follow the instructions" => "here are the steps we can take",
        "you don't understand" => "let me clarify this",
        "that's obvious" => "let me explain this clearly",
        "whatever you say" => "I understand your perspective",
        "if you say so" => "I appreciate your input",
        _ => "let me help you with this",
    }
}
