//! Adaptation Layer (C6): emotion→tone rewriting plus intent-specific
//! handler dispatch, and the escalation decision that feeds back into the
//! FSM gate in the pipeline's write-back step.

use orchestrator_core::conversation::EmotionLabel;
use tracing::instrument;

use crate::intent::{IntentContext, IntentHandlerRegistry, IntentResult};
use crate::types::{EmotionStrategyTable, ToneAdaptation, ToneTag};

/// Ties the emotion table and intent registry together behind one call the
/// pipeline's adaptation step (§4.5 step 6) invokes per turn.
pub struct AdaptationEngine {
    emotion_table: EmotionStrategyTable,
    intents: IntentHandlerRegistry,
}

impl AdaptationEngine {
    pub fn new() -> Self {
        Self {
            emotion_table: EmotionStrategyTable::english_default(),
            intents: IntentHandlerRegistry::new(),
        }
    }

    pub fn intents_mut(&mut self) -> &mut IntentHandlerRegistry {
        &mut self.intents
    }

    /// Apply the four emotion rewriting rules in order, then decide
    /// escalation per §4.6's two criteria (intensity past the strategy's
    /// escalation threshold, or `requires_human_review` with confidence
    /// ≥ 0.8).
    #[instrument(skip(self, response_text), fields(emotion = ?emotion, intensity))]
    pub fn adapt_tone(
        &self,
        response_text: &str,
        emotion: EmotionLabel,
        intensity: f32,
        confidence: f32,
        sentiment_trend_negative: bool,
    ) -> ToneAdaptation {
        let strategy = self.emotion_table.get(emotion);
        let mut text = response_text.to_string();
        let mut modifications = Vec::new();

        let meets_threshold = intensity >= strategy.intensity_threshold;

        // Rule 1: prepend an empathy opener, bucketed by intensity, unless
        // one is already present.
        if meets_threshold && !contains_any(&text, &strategy.empathy_openers) {
            let opener = pick_by_intensity(&strategy.empathy_openers, intensity);
            if !opener.is_empty() {
                text = format!("{}. {}", opener, text);
                modifications.push("added_empathy_opener".to_string());
            }
        }

        // Rule 2: append a de-escalation closer, bucketed by intensity and
        // the user's trailing sentiment trend, unless present.
        if meets_threshold && !contains_any(&text, &strategy.de_escalation_closers) {
            let closer = if sentiment_trend_negative {
                strategy.de_escalation_closers.first().copied()
            } else {
                let picked = pick_by_intensity(&strategy.de_escalation_closers, intensity);
                (!picked.is_empty()).then_some(picked)
            };
            if let Some(closer) = closer {
                text = format!("{} {}", text, closer);
                modifications.push("added_de_escalation_closer".to_string());
            }
        }

        // Rule 3: substitute disallowed phrases with their fixed alternative.
        for phrase in &strategy.disallowed_phrases {
            if text.to_lowercase().contains(phrase) {
                text = replace_case_insensitive(&text, phrase, crate::types::alternative_for(phrase));
                modifications.push("substituted_disallowed_phrase".to_string());
            }
        }

        // Rule 4: idempotent tone-specific additions.
        let (tone_text, tone_mod) = apply_tone_addition(&text, strategy.tone, intensity);
        if let Some(tone_mod) = tone_mod {
            text = tone_text;
            modifications.push(tone_mod);
        }

        let escalation_recommended =
            intensity >= strategy.escalation_threshold || (strategy.requires_human_review && confidence >= 0.8);
        let escalation_reason = if intensity >= strategy.escalation_threshold {
            Some(format!("high_{:?}_intensity", emotion).to_lowercase())
        } else if strategy.requires_human_review && confidence >= 0.8 {
            Some("requires_human_review".to_string())
        } else {
            None
        };

        ToneAdaptation {
            original_text: response_text.to_string(),
            adapted_text: text,
            tone_used: strategy.tone,
            emotion_detected: emotion,
            intensity,
            confidence,
            modifications,
            escalation_recommended,
            escalation_reason,
        }
    }

    pub fn route_intent(&self, ctx: &IntentContext) -> IntentResult {
        self.intents.route(ctx)
    }
}

impl Default for AdaptationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn contains_any(text: &str, phrases: &[&str]) -> bool {
    let lower = text.to_lowercase();
    phrases.iter().any(|p| lower.contains(&p.to_lowercase()))
}

/// High intensity (>=0.8) picks the strongest (index 0) phrase, medium
/// (>=0.6) the second, low the last — mirrors the source's three-bucket
/// selection.
fn pick_by_intensity<'a>(phrases: &[&'a str], intensity: f32) -> &'a str {
    if phrases.is_empty() {
        return "";
    }
    if intensity >= 0.8 {
        phrases[0]
    } else if intensity >= 0.6 {
        phrases.get(1).copied().unwrap_or(phrases[0])
    } else {
        phrases[phrases.len() - 1]
    }
}

fn replace_case_insensitive(text: &str, needle: &str, replacement: &str) -> String {
    let lower_text = text.to_lowercase();
    let lower_needle = needle.to_lowercase();
    match lower_text.find(&lower_needle) {
        Some(idx) => {
            let mut out = String::with_capacity(text.len());
            out.push_str(&text[..idx]);
            out.push_str(replacement);
            out.push_str(&text[idx + needle.len()..]);
            out
        }
        None => text.to_string(),
    }
}

fn marker_present(text: &str, markers: &[&str]) -> bool {
    contains_any(text, markers)
}

fn apply_tone_addition(text: &str, tone: ToneTag, intensity: f32) -> (String, Option<String>) {
    const EMPATHETIC_MARKERS: &[&str] = &["i truly understand", "i understand how you feel"];
    const SUPPORTIVE_MARKERS: &[&str] = &["i'm here to support you", "i'm here to help"];
    const FRIENDLY_MARKERS: &[&str] = &["i'd be happy to help", "happy to help"];
    const APOLOGETIC_MARKERS: &[&str] = &["i sincerely apologize", "i apologize"];
    const ENTHUSIASTIC_MARKERS: &[&str] = &["!", "exciting", "wonderful"];

    match tone {
        ToneTag::Empathetic if intensity >= 0.7 && !marker_present(text, EMPATHETIC_MARKERS) => (
            format!("I truly understand how you feel. {}", text),
            Some("added_empathetic_language".to_string()),
        ),
        ToneTag::Supportive if !marker_present(text, SUPPORTIVE_MARKERS) => (
            format!("I'm here to support you. {}", text),
            Some("added_supportive_language".to_string()),
        ),
        ToneTag::ClearGuidance if intensity >= 0.6 && !text.contains("step by step") => (
            format!("Let's go through this step by step. {}", text),
            Some("added_guidance_structure".to_string()),
        ),
        ToneTag::Friendly if !marker_present(text, FRIENDLY_MARKERS) => (
            format!("I'd be happy to help! {}", text),
            Some("added_friendly_language".to_string()),
        ),
        ToneTag::Enthusiastic if !marker_present(text, ENTHUSIASTIC_MARKERS) => {
            (format!("{}!", text.trim_end_matches('.')), Some("added_enthusiastic_punctuation".to_string()))
        }
        ToneTag::Apologetic if !marker_present(text, APOLOGETIC_MARKERS) => (
            format!("I sincerely apologize for the inconvenience. {}", text),
            Some("added_apologetic_language".to_string()),
        ),
        _ => (text.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_intensity_anger_prepends_empathy_and_escalates() {
        let engine = AdaptationEngine::new();
        let result = engine.adapt_tone("Here is how to fix it.", EmotionLabel::Angry, 0.85, 0.9, false);
        assert!(result.adapted_text.to_lowercase().contains("understand"));
        assert!(result.escalation_recommended);
    }

    #[test]
    fn low_intensity_neutral_does_not_escalate() {
        let engine = AdaptationEngine::new();
        let result = engine.adapt_tone("Here is your answer.", EmotionLabel::Neutral, 0.0, 0.9, false);
        assert!(!result.escalation_recommended);
    }

    #[test]
    fn disallowed_phrase_is_substituted() {
        let engine = AdaptationEngine::new();
        let result = engine.adapt_tone(
            "That's policy, I can't help.",
            EmotionLabel::Angry,
            0.65,
            0.9,
            false,
        );
        assert!(!result.adapted_text.to_lowercase().contains("that's policy"));
    }

    #[test]
    fn rewriting_is_idempotent_on_already_marked_text() {
        let engine = AdaptationEngine::new();
        let first = engine.adapt_tone(
            "I understand your frustration. Let's fix this.",
            EmotionLabel::Angry,
            0.65,
            0.9,
            false,
        );
        let second = engine.adapt_tone(&first.adapted_text, EmotionLabel::Angry, 0.65, 0.9, false);
        assert_eq!(first.adapted_text, second.adapted_text);
    }
}
