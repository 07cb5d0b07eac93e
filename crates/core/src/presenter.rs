//! The outward presentation surface: notices, coach feedback and confirmations.

use crate::voice::VoiceSupport;
use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub title: String,
    pub message: String,
    pub icon: String,
}

impl Notice {
    pub fn new(title: impl Into<String>, message: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            icon: icon.into(),
        }
    }

    pub fn time_warning() -> Self {
        Self::new(
            "Temps écoulé",
            "Normalement l'exercice devrait être terminé.\n\nCliquez sur \"Arrêter l'exercice\" quand vous voulez pour passer à l'étape de debrief !",
            "⏰",
        )
    }

    pub fn voice_unavailable(support: VoiceSupport) -> Self {
        let status = |available: bool| if available { "✅" } else { "❌" };
        Self::new(
            "Erreur vocale",
            format!(
                "Fonctionnalités vocales non disponibles\n\nSTT: {}\nTTS: {}",
                status(support.stt),
                status(support.tts)
            ),
            "⚠️",
        )
    }

    pub fn voice_error(detail: impl std::fmt::Display) -> Self {
        Self::new(
            "Erreur vocale",
            format!("Le mode vocal a été interrompu : {}", detail),
            "⚠️",
        )
    }
}

/// Collaborator-owned presentation. Only `confirm` reports back.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Presenter: Send + Sync {
    fn show_notice(&self, notice: Notice);

    fn show_coach_feedback(&self, feedback: &str);

    /// Asks a yes/no question; `true` means the user confirmed.
    async fn confirm(&self, title: &str, message: &str) -> bool;
}
