//! DESC Score Tracker
//!
//! Keeps a running score for each of the four DESC dimensions. Scores only
//! move up, by a fixed step, when the user's text contains one of the
//! dimension's keywords. This is a lexical heuristic: negated or sarcastic
//! uses of a keyword still count.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const SCORE_MIN: f64 = 1.0;
pub const SCORE_MAX: f64 = 5.0;
pub const SCORE_STEP: f64 = 0.5;

/// One of the four steps of the DESC method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    /// Describe the facts.
    Decrire,
    /// Express the feelings.
    Exprimer,
    /// Specify the request.
    Specifier,
    /// Conclude on the consequences.
    Conclure,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Decrire,
        Dimension::Exprimer,
        Dimension::Specifier,
        Dimension::Conclure,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Dimension::Decrire => "Décrire",
            Dimension::Exprimer => "Exprimer",
            Dimension::Specifier => "Spécifier",
            Dimension::Conclure => "Conclure",
        }
    }

    /// Lower-case keywords that signal the dimension in a user utterance.
    fn keywords(self) -> &'static [&'static str] {
        match self {
            Dimension::Decrire => &[
                "retard",
                "arrivé",
                "arrives",
                "heure",
                "minutes",
                "réunion",
                "fois",
                "semaine",
                "depuis",
                "hier",
                "constaté",
                "remarqué",
                "observé",
            ],
            Dimension::Exprimer => &[
                "frustré",
                "frustrée",
                "ressens",
                "je me sens",
                "inquiet",
                "inquiète",
                "déçu",
                "déçue",
                "gêné",
                "gênée",
                "agacé",
                "agacée",
                "énervé",
                "stressé",
                "mal à l'aise",
                "sentiment",
                "préoccupé",
            ],
            Dimension::Specifier => &[
                "veux",
                "voudrais",
                "aimerais",
                "souhaite",
                "demande",
                "faudrait",
                "peux-tu",
                "pourrais-tu",
                "propose",
                "dorénavant",
                "à l'avenir",
                "prévenir",
                "préviennes",
            ],
            Dimension::Conclure => &[
                "sinon",
                "ainsi",
                "permettra",
                "permettrait",
                "conséquence",
                "bénéfice",
                "comme ça",
                "pour que",
                "perdra",
                "perdre",
                "gagnera",
                "gagner",
                "résultat",
            ],
        }
    }

    fn matches(self, lowered: &str) -> bool {
        self.keywords().iter().any(|keyword| lowered.contains(keyword))
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The four DESC scores of a session, each kept within `[SCORE_MIN, SCORE_MAX]`.
///
/// Fields are private so that the only ways to change a score are
/// [`DescScores::analyze`] (which never lowers it) and [`DescScores::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DescScores {
    decrire: f64,
    exprimer: f64,
    specifier: f64,
    conclure: f64,
}

impl Default for DescScores {
    fn default() -> Self {
        Self {
            decrire: SCORE_MIN,
            exprimer: SCORE_MIN,
            specifier: SCORE_MIN,
            conclure: SCORE_MIN,
        }
    }
}

impl DescScores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Decrire => self.decrire,
            Dimension::Exprimer => self.exprimer,
            Dimension::Specifier => self.specifier,
            Dimension::Conclure => self.conclure,
        }
    }

    fn slot(&mut self, dimension: Dimension) -> &mut f64 {
        match dimension {
            Dimension::Decrire => &mut self.decrire,
            Dimension::Exprimer => &mut self.exprimer,
            Dimension::Specifier => &mut self.specifier,
            Dimension::Conclure => &mut self.conclure,
        }
    }

    /// Scores a user utterance and returns the dimensions that matched.
    ///
    /// Every matching dimension gains `SCORE_STEP`, saturating at `SCORE_MAX`.
    pub fn analyze(&mut self, text: &str) -> Vec<Dimension> {
        let lowered = text.to_lowercase();
        let matched: Vec<Dimension> = Dimension::ALL
            .into_iter()
            .filter(|d| d.matches(&lowered))
            .collect();

        for dimension in &matched {
            let slot = self.slot(*dimension);
            *slot = (*slot + SCORE_STEP).clamp(SCORE_MIN, SCORE_MAX);
        }
        matched
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn average(&self) -> f64 {
        Dimension::ALL.iter().map(|d| self.get(*d)).sum::<f64>() / Dimension::ALL.len() as f64
    }

    /// The dimension with the lowest score, first in DESC order on ties.
    pub fn weakest(&self) -> Dimension {
        Dimension::ALL
            .into_iter()
            .fold(Dimension::Decrire, |weakest, d| {
                if self.get(d) < self.get(weakest) {
                    d
                } else {
                    weakest
                }
            })
    }
}
