//! Voice identities, emotional presets, and tone selection for spoken replies.

use crate::phase::Phase;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The simulated colleague.
    Thomas,
    Coach,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Defensive,
    Casual,
    Apologetic,
    Frustrated,
    Encouraging,
    Analytical,
    Supportive,
    Neutral,
    Informative,
}

/// Synthesis parameters for one speaker/emotion pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
}

impl VoiceSettings {
    const fn new(stability: f32, similarity_boost: f32, style: f32) -> Self {
        Self {
            stability,
            similarity_boost,
            style,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoicePreset {
    pub speaker: Speaker,
    pub emotion: Emotion,
    pub voice_id: &'static str,
    pub settings: VoiceSettings,
}

impl Speaker {
    pub fn voice_id(self) -> &'static str {
        match self {
            Speaker::Thomas => "pNInz6obpgDQGcFmaJgB",
            Speaker::Coach => "21m00Tcm4TlvDq8ikWAM",
            Speaker::System => "EXAVITQu4vr4xnSDxMaL",
        }
    }

    pub fn default_emotion(self) -> Emotion {
        match self {
            Speaker::Thomas => Emotion::Casual,
            Speaker::Coach => Emotion::Supportive,
            Speaker::System => Emotion::Neutral,
        }
    }

    fn settings(self, emotion: Emotion) -> Option<VoiceSettings> {
        use Emotion::*;
        let settings = match (self, emotion) {
            (Speaker::Thomas, Defensive) => VoiceSettings::new(0.3, 0.8, 0.2),
            (Speaker::Thomas, Casual) => VoiceSettings::new(0.7, 0.5, 0.0),
            (Speaker::Thomas, Apologetic) => VoiceSettings::new(0.5, 0.7, 0.1),
            (Speaker::Thomas, Frustrated) => VoiceSettings::new(0.2, 0.9, 0.3),
            (Speaker::Coach, Encouraging) => VoiceSettings::new(0.8, 0.6, 0.0),
            (Speaker::Coach, Analytical) => VoiceSettings::new(0.9, 0.4, 0.0),
            (Speaker::Coach, Supportive) => VoiceSettings::new(0.7, 0.7, 0.1),
            (Speaker::System, Neutral) => VoiceSettings::new(0.9, 0.5, 0.0),
            (Speaker::System, Informative) => VoiceSettings::new(0.8, 0.6, 0.0),
            _ => return None,
        };
        Some(settings)
    }

    /// The preset for `emotion`, falling back to the speaker's default tone
    /// when the speaker has no such emotion.
    pub fn preset(self, emotion: Emotion) -> VoicePreset {
        let (emotion, settings) = match self.settings(emotion) {
            Some(settings) => (emotion, settings),
            None => {
                let fallback = self.default_emotion();
                let settings = self
                    .settings(fallback)
                    .unwrap_or(VoiceSettings::new(0.7, 0.5, 0.0));
                (fallback, settings)
            }
        };
        VoicePreset {
            speaker: self,
            emotion,
            voice_id: self.voice_id(),
            settings,
        }
    }
}

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

/// Picks a tone for `text` from a few keywords.
pub fn detect_emotion(text: &str, speaker: Speaker, phase: Phase) -> Emotion {
    let lowered = text.to_lowercase();

    match (speaker, phase) {
        (Speaker::Thomas, Phase::Roleplay) => {
            if contains_any(&lowered, &["désolé", "excuse", "pardon"]) {
                return Emotion::Apologetic;
            }
            if contains_any(&lowered, &["pas grave", "rattrape", "important"]) {
                return Emotion::Casual;
            }
            if contains_any(&lowered, &["problème", "comprends pas", "pourquoi"]) {
                return Emotion::Defensive;
            }
            if contains_any(&lowered, &["énervé", "agacé", "stop"]) {
                return Emotion::Frustrated;
            }
            Emotion::Neutral
        }
        (Speaker::Coach, _) => {
            if contains_any(&lowered, &["bien", "excellent", "bravo"]) {
                Emotion::Encouraging
            } else if contains_any(&lowered, &["analyse", "score", "évaluation"]) {
                Emotion::Analytical
            } else {
                Emotion::Supportive
            }
        }
        _ => Emotion::Neutral,
    }
}
