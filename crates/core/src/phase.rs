//! Exercise phases and the state machine that moves between them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Elapsed roleplay time after which the user is reminded to wrap up.
pub const TIME_WARNING_SECONDS: u64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Brief,
    Roleplay,
    Debrief,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Brief => write!(f, "brief"),
            Phase::Roleplay => write!(f, "roleplay"),
            Phase::Debrief => write!(f, "debrief"),
        }
    }
}

impl FromStr for Phase {
    type Err = PhaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "brief" => Ok(Phase::Brief),
            "roleplay" => Ok(Phase::Roleplay),
            "debrief" => Ok(Phase::Debrief),
            _ => Err(PhaseError::UnknownPhase(s.to_string())),
        }
    }
}

/// Sampling parameters used for every model call made in a phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseProfile {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Phase {
    /// Model parameters for this phase. Voice mode uses tighter token budgets
    /// to keep spoken replies short.
    pub fn profile(self, voice: bool) -> PhaseProfile {
        match (self, voice) {
            (Phase::Brief, false) => PhaseProfile { max_tokens: 150, temperature: 0.3 },
            (Phase::Brief, true) => PhaseProfile { max_tokens: 100, temperature: 0.3 },
            (Phase::Roleplay, false) => PhaseProfile { max_tokens: 400, temperature: 0.8 },
            (Phase::Roleplay, true) => PhaseProfile { max_tokens: 250, temperature: 0.8 },
            (Phase::Debrief, false) => PhaseProfile { max_tokens: 300, temperature: 0.5 },
            (Phase::Debrief, true) => PhaseProfile { max_tokens: 200, temperature: 0.5 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhaseError {
    #[error("cannot {operation} during the {phase} phase")]
    IllegalTransition {
        operation: &'static str,
        phase: Phase,
    },
    #[error("unknown phase identifier: {0}")]
    UnknownPhase(String),
}

/// What happened on a one-second tick of the roleplay clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Not in roleplay; nothing counted.
    Idle,
    Counted,
    /// Counted, and the warning threshold was reached for the first time.
    TimeWarning,
}

/// Lifecycle state of one exercise.
///
/// Every field is private: the transition methods are the only way to change
/// the phase, and they refuse transitions that are not legal from the current
/// phase without touching any field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExerciseState {
    phase: Phase,
    started: bool,
    can_start: bool,
    elapsed_seconds: u64,
    message_count: u32,
    #[serde(skip)]
    time_warning_shown: bool,
}

impl Default for ExerciseState {
    fn default() -> Self {
        Self {
            phase: Phase::Brief,
            started: false,
            can_start: true,
            elapsed_seconds: 0,
            message_count: 0,
            time_warning_shown: false,
        }
    }
}

impl ExerciseState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn can_start(&self) -> bool {
        self.can_start
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn message_count(&self) -> u32 {
        self.message_count
    }

    /// brief -> roleplay. Restarts the clock and the per-phase message count.
    pub fn start(&mut self) -> Result<(), PhaseError> {
        self.require(Phase::Brief, "start the exercise")?;
        self.phase = Phase::Roleplay;
        self.started = true;
        self.can_start = false;
        self.elapsed_seconds = 0;
        self.message_count = 0;
        self.time_warning_shown = false;
        Ok(())
    }

    /// roleplay -> debrief. The elapsed time is kept for the summary.
    pub fn end(&mut self) -> Result<(), PhaseError> {
        self.require(Phase::Roleplay, "end the exercise")?;
        self.phase = Phase::Debrief;
        self.message_count = 0;
        Ok(())
    }

    /// Any phase -> brief, with every counter zeroed.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Advances the roleplay clock by one second.
    pub fn tick(&mut self, warning_after_seconds: u64) -> Tick {
        if self.phase != Phase::Roleplay {
            return Tick::Idle;
        }
        self.elapsed_seconds += 1;
        if self.elapsed_seconds >= warning_after_seconds && !self.time_warning_shown {
            self.time_warning_shown = true;
            return Tick::TimeWarning;
        }
        Tick::Counted
    }

    pub fn record_message(&mut self) {
        self.message_count += 1;
    }

    fn require(&self, expected: Phase, operation: &'static str) -> Result<(), PhaseError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(PhaseError::IllegalTransition {
                operation,
                phase: self.phase,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = ExerciseState::new();
        assert_eq!(state.phase(), Phase::Brief);
        assert!(!state.started());
        assert!(state.can_start());
        assert_eq!(state.elapsed_seconds(), 0);
    }

    #[test]
    fn test_full_lifecycle() {
        let mut state = ExerciseState::new();
        state.start().unwrap();
        assert_eq!(state.phase(), Phase::Roleplay);
        assert!(state.started());
        assert!(!state.can_start());

        state.tick(TIME_WARNING_SECONDS);
        state.end().unwrap();
        assert_eq!(state.phase(), Phase::Debrief);
        assert_eq!(state.elapsed_seconds(), 1);

        state.reset();
        assert_eq!(state, ExerciseState::default());
    }

    #[test]
    fn test_start_outside_brief_is_rejected_without_side_effects() {
        let mut state = ExerciseState::new();
        state.start().unwrap();
        state.tick(TIME_WARNING_SECONDS);
        state.record_message();
        let before = state.clone();

        let err = state.start().unwrap_err();
        assert_eq!(
            err,
            PhaseError::IllegalTransition {
                operation: "start the exercise",
                phase: Phase::Roleplay
            }
        );
        assert_eq!(state, before);
    }

    #[test]
    fn test_end_outside_roleplay_is_rejected() {
        let mut state = ExerciseState::new();
        assert!(state.end().is_err());
        assert_eq!(state.phase(), Phase::Brief);

        state.start().unwrap();
        state.end().unwrap();
        assert!(state.end().is_err());
        assert!(state.start().is_err());
        assert_eq!(state.phase(), Phase::Debrief);
    }

    #[test]
    fn test_tick_only_counts_during_roleplay() {
        let mut state = ExerciseState::new();
        assert_eq!(state.tick(TIME_WARNING_SECONDS), Tick::Idle);
        assert_eq!(state.elapsed_seconds(), 0);

        state.start().unwrap();
        assert_eq!(state.tick(TIME_WARNING_SECONDS), Tick::Counted);
        state.end().unwrap();
        assert_eq!(state.tick(TIME_WARNING_SECONDS), Tick::Idle);
        assert_eq!(state.elapsed_seconds(), 1);
    }

    #[test]
    fn test_time_warning_fires_once() {
        let mut state = ExerciseState::new();
        state.start().unwrap();
        let ticks: Vec<Tick> = (0..5).map(|_| state.tick(3)).collect();
        assert_eq!(
            ticks,
            vec![
                Tick::Counted,
                Tick::Counted,
                Tick::TimeWarning,
                Tick::Counted,
                Tick::Counted
            ]
        );
    }

    #[test]
    fn test_phase_from_str() {
        assert_eq!("roleplay".parse::<Phase>().unwrap(), Phase::Roleplay);
        assert_eq!(" Debrief ".parse::<Phase>().unwrap(), Phase::Debrief);
        assert_eq!(
            "warmup".parse::<Phase>().unwrap_err(),
            PhaseError::UnknownPhase("warmup".to_string())
        );
    }

    #[test]
    fn test_profiles_tighten_in_voice_mode() {
        for phase in [Phase::Brief, Phase::Roleplay, Phase::Debrief] {
            let text = phase.profile(false);
            let voice = phase.profile(true);
            assert!(voice.max_tokens < text.max_tokens);
            assert_eq!(voice.temperature, text.temperature);
        }
        assert!(Phase::Brief.profile(false).temperature < Phase::Debrief.profile(false).temperature);
        assert!(Phase::Debrief.profile(false).temperature < Phase::Roleplay.profile(false).temperature);
    }
}
