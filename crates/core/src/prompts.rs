//! Phase system instructions and the scripted lines of the exercise.

use crate::phase::Phase;
use crate::scores::{DescScores, Dimension};
use anyhow::{Context, Result};
use std::collections::HashMap;

/// Greeting that opens a fresh session, before the exercise has started.
pub const BRIEF_WELCOME: &str = "Bonjour ! Je suis votre assistant d'entraînement à la communication. \
Avant de commencer le jeu de rôle avec Thomas, avez-vous des questions sur la méthode DESC ou sur le scénario ?";

/// Thomas's first line once the roleplay starts.
pub const THOMAS_OPENING: &str = "Salut ! Désolé, j'arrive un peu en retard, le RER était encore en panne... \
Tu voulais me voir ?";

/// Posted a few seconds after the debrief summary.
pub const DEBRIEF_FOLLOW_UP: &str = "Prenez un moment pour réfléchir à l'échange : quelle étape de la méthode DESC \
vous a semblé la plus difficile, et que feriez-vous différemment avec Thomas la prochaine fois ?";

/// Replaces Thomas's line when the user did not write in the expected language.
pub const LANGUAGE_NOTICE: &str =
    "Merci de poursuivre l'exercice en français pour que Thomas et le coach puissent vous répondre.";

/// Shown when the model service could not be reached.
pub const UNAVAILABLE_MESSAGE: &str = "Désolé, une erreur s'est produite. Veuillez réessayer.";

/// Prefix of the message shown when the model never produced a usable reply.
pub const INVALID_REPLY_MESSAGE: &str =
    "Désolé, la réponse de Thomas n'a pas pu être interprétée. Veuillez reformuler votre message.";

/// The exact structure the roleplay model must answer with.
pub const REPLY_SCHEMA: &str = r#"{
  "thomas_response": "Réponse de Thomas (2-3 phrases max)",
  "coach_feedback": "Conseil bref du coach sur l'usage de DESC (1-2 phrases)",
  "desc_evaluation": {
    "decrire": 0,
    "exprimer": 0,
    "specifier": 0,
    "conclure": 0
  },
  "off_topic_warning": null,
  "language": "fr"
}"#;

/// System instruction for each phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhasePrompts {
    pub brief: String,
    pub roleplay: String,
    pub debrief: String,
}

impl PhasePrompts {
    pub fn for_phase(&self, phase: Phase) -> &str {
        match phase {
            Phase::Brief => &self.brief,
            Phase::Roleplay => &self.roleplay,
            Phase::Debrief => &self.debrief,
        }
    }

    /// Builds the prompt set from templates keyed by phase name
    /// (`brief`, `roleplay`, `debrief`). Every phase must be present.
    pub fn from_templates(templates: &HashMap<String, String>) -> Result<Self> {
        let get = |phase: Phase| {
            templates
                .get(&phase.to_string())
                .cloned()
                .with_context(|| format!("Missing prompt template: '{}'", phase))
        };
        Ok(Self {
            brief: get(Phase::Brief)?,
            roleplay: get(Phase::Roleplay)?,
            debrief: get(Phase::Debrief)?,
        })
    }
}

/// Follow-up instruction sent to the model after it broke the reply format.
pub fn corrective_instruction(original_user_message: &str) -> String {
    format!(
        "Ta réponse précédente était invalide : elle ne respectait pas le format JSON exigé.\n\
         Réponds UNIQUEMENT avec un objet JSON de cette forme exacte, sans aucun texte avant ou après :\n\
         {}\n\n\
         Les quatre valeurs de desc_evaluation doivent être des nombres, off_topic_warning doit être présent \
         (null s'il n'y a rien à signaler), thomas_response et coach_feedback ne doivent pas être vides.\n\n\
         Message original de l'utilisateur : \"{}\"",
        REPLY_SCHEMA, original_user_message
    )
}

/// Closing summary appended when the roleplay ends.
pub fn debrief_summary(scores: &DescScores, elapsed_seconds: u64, exchanges: u32) -> String {
    let mut summary = format!(
        "Exercice terminé ! Durée : {} min {:02} s, {} échange(s) avec Thomas.\n\nVotre évaluation DESC :\n",
        elapsed_seconds / 60,
        elapsed_seconds % 60,
        exchanges
    );
    for dimension in Dimension::ALL {
        summary.push_str(&format!("• {} : {:.1}/5\n", dimension, scores.get(dimension)));
    }
    let average = scores.average();
    let verdict = if average >= 4.0 {
        "Excellent travail, la structure DESC est bien maîtrisée."
    } else if average >= 2.5 {
        "Bonne base, certaines étapes méritent encore d'être renforcées."
    } else {
        "La méthode DESC est encore peu présente, reprenez chaque étape pas à pas."
    };
    summary.push_str(&format!(
        "\nMoyenne : {:.1}/5. {} Point à travailler en priorité : {}.",
        average,
        verdict,
        scores.weakest()
    ));
    summary
}
