//! Per-slide multiple-choice quiz state machine.
//!
//! ```text
//! idle --start--> active --lock--> locked --reveal--> revealed
//!                   \______________reveal______________/
//! any  --reset--> idle
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizPhase {
    #[default]
    Idle,
    Active,
    Locked,
    Revealed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizResponse {
    pub response_id: String,
    pub student_id: String,
    pub option_id: String,
    /// Filled in on reveal.
    pub correct: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuizError {
    #[error("cannot {action} a quiz that is {phase:?}")]
    InvalidTransition {
        action: &'static str,
        phase: QuizPhase,
    },

    #[error("responses are only accepted while the quiz is active (currently {0:?})")]
    NotAccepting(QuizPhase),

    #[error("unknown option: {0}")]
    UnknownOption(String),
}

/// Aggregate for one option, derived from the response set.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionTally {
    pub option_id: String,
    pub count: usize,
    pub percentage: f64,
}

/// Quiz state for one slide.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuizInteraction {
    pub phase: QuizPhase,
    pub options: Vec<String>,
    pub correct_option: Option<String>,
    /// At most one entry per student, in first-submission order.
    pub responses: Vec<QuizResponse>,
}

impl QuizInteraction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, options: Vec<String>) -> Result<(), QuizError> {
        if self.phase != QuizPhase::Idle {
            return Err(QuizError::InvalidTransition {
                action: "start",
                phase: self.phase,
            });
        }
        self.phase = QuizPhase::Active;
        self.options = options;
        self.correct_option = None;
        self.responses.clear();
        Ok(())
    }

    pub fn lock(&mut self) -> Result<(), QuizError> {
        if self.phase != QuizPhase::Active {
            return Err(QuizError::InvalidTransition {
                action: "lock",
                phase: self.phase,
            });
        }
        self.phase = QuizPhase::Locked;
        Ok(())
    }

    /// Reveal the answer. Revealing straight from `active` implies a lock.
    pub fn reveal(&mut self, correct_option: String) -> Result<(), QuizError> {
        if !matches!(self.phase, QuizPhase::Active | QuizPhase::Locked) {
            return Err(QuizError::InvalidTransition {
                action: "reveal",
                phase: self.phase,
            });
        }
        for response in &mut self.responses {
            response.correct = Some(response.option_id == correct_option);
        }
        self.correct_option = Some(correct_option);
        self.phase = QuizPhase::Revealed;
        Ok(())
    }

    /// Back to `idle` from any phase.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record a student's answer, replacing any earlier one from the same student.
    pub fn submit(
        &mut self,
        response_id: String,
        student_id: String,
        option_id: String,
    ) -> Result<(), QuizError> {
        if self.phase != QuizPhase::Active {
            return Err(QuizError::NotAccepting(self.phase));
        }
        if !self.options.is_empty() && !self.options.contains(&option_id) {
            return Err(QuizError::UnknownOption(option_id));
        }

        let response = QuizResponse {
            response_id,
            student_id,
            option_id,
            correct: None,
        };
        match self
            .responses
            .iter_mut()
            .find(|r| r.student_id == response.student_id)
        {
            Some(existing) => *existing = response,
            None => self.responses.push(response),
        }
        Ok(())
    }

    pub fn response_for(&self, student_id: &str) -> Option<&QuizResponse> {
        self.responses.iter().find(|r| r.student_id == student_id)
    }

    pub fn option_tallies(&self) -> Vec<OptionTally> {
        let total = self.responses.len();
        self.options
            .iter()
            .map(|option| {
                let count = self
                    .responses
                    .iter()
                    .filter(|r| &r.option_id == option)
                    .count();
                OptionTally {
                    option_id: option.clone(),
                    count,
                    percentage: percentage(count, total),
                }
            })
            .collect()
    }

    pub fn correct_count(&self) -> usize {
        match &self.correct_option {
            Some(correct) => self
                .responses
                .iter()
                .filter(|r| &r.option_id == correct)
                .count(),
            None => 0,
        }
    }

    pub fn correct_percentage(&self) -> f64 {
        percentage(self.correct_count(), self.responses.len())
    }
}

pub(crate) fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_quiz() -> QuizInteraction {
        let mut quiz = QuizInteraction::new();
        quiz.start(vec!["a".into(), "b".into(), "c".into()]).unwrap();
        quiz
    }

    fn submit(quiz: &mut QuizInteraction, student: &str, option: &str) -> Result<(), QuizError> {
        quiz.submit(format!("r-{student}-{option}"), student.into(), option.into())
    }

    #[test]
    fn submit_while_idle_or_locked_is_rejected() {
        let mut quiz = QuizInteraction::new();
        assert_eq!(
            submit(&mut quiz, "s1", "a"),
            Err(QuizError::NotAccepting(QuizPhase::Idle))
        );
        assert!(quiz.responses.is_empty());

        let mut quiz = active_quiz();
        submit(&mut quiz, "s1", "a").unwrap();
        quiz.lock().unwrap();
        assert!(submit(&mut quiz, "s2", "b").is_err());
        assert_eq!(quiz.responses.len(), 1);
    }

    #[test]
    fn second_submission_replaces_first() {
        let mut quiz = active_quiz();
        submit(&mut quiz, "s1", "a").unwrap();
        submit(&mut quiz, "s1", "c").unwrap();
        assert_eq!(quiz.responses.len(), 1);
        assert_eq!(quiz.response_for("s1").unwrap().option_id, "c");
    }

    #[test]
    fn reveal_marks_correctness_and_tallies() {
        let mut quiz = active_quiz();
        submit(&mut quiz, "s1", "a").unwrap();
        submit(&mut quiz, "s2", "b").unwrap();
        submit(&mut quiz, "s3", "a").unwrap();
        submit(&mut quiz, "s4", "a").unwrap();
        quiz.lock().unwrap();
        quiz.reveal("a".into()).unwrap();

        assert_eq!(quiz.phase, QuizPhase::Revealed);
        assert_eq!(quiz.response_for("s1").unwrap().correct, Some(true));
        assert_eq!(quiz.response_for("s2").unwrap().correct, Some(false));
        assert_eq!(quiz.correct_count(), 3);
        assert_eq!(quiz.correct_percentage(), 75.0);

        let tallies = quiz.option_tallies();
        assert_eq!(tallies[0].count, 3);
        assert_eq!(tallies[1].percentage, 25.0);
        assert_eq!(tallies[2].count, 0);
    }

    #[test]
    fn reveal_from_active_implies_lock() {
        let mut quiz = active_quiz();
        quiz.reveal("b".into()).unwrap();
        assert_eq!(quiz.phase, QuizPhase::Revealed);
        assert!(submit(&mut quiz, "s1", "b").is_err());
    }

    #[test]
    fn revealed_is_terminal_until_reset() {
        let mut quiz = active_quiz();
        quiz.reveal("a".into()).unwrap();
        assert!(quiz.start(vec!["x".into()]).is_err());
        assert!(quiz.lock().is_err());
        assert!(quiz.reveal("a".into()).is_err());
    }

    #[test]
    fn reset_then_start_accepts_new_submissions() {
        let mut quiz = active_quiz();
        submit(&mut quiz, "s1", "a").unwrap();
        quiz.lock().unwrap();
        quiz.reveal("a".into()).unwrap();
        quiz.reset();
        assert_eq!(quiz.phase, QuizPhase::Idle);
        assert!(quiz.responses.is_empty());

        quiz.start(vec!["a".into(), "b".into()]).unwrap();
        submit(&mut quiz, "s1", "b").unwrap();
        assert_eq!(quiz.responses.len(), 1);
        assert_eq!(quiz.response_for("s1").unwrap().correct, None);
    }

    #[test]
    fn unknown_option_is_rejected() {
        let mut quiz = active_quiz();
        assert_eq!(
            submit(&mut quiz, "s1", "z"),
            Err(QuizError::UnknownOption("z".into()))
        );
    }

    #[test]
    fn empty_quiz_has_zero_percentages() {
        let quiz = active_quiz();
        assert_eq!(quiz.correct_percentage(), 0.0);
        assert!(quiz.option_tallies().iter().all(|t| t.percentage == 0.0));
    }
}
