//! Per-slide poll state machine.
//!
//! Open/closed voting plus a results-visible flag that is independent of
//! the phase.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::quiz::{percentage, OptionTally};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollPhase {
    #[default]
    Closed,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollVote {
    pub vote_id: String,
    pub student_id: String,
    pub option_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("cannot {action} a poll that is {phase:?}")]
    InvalidTransition {
        action: &'static str,
        phase: PollPhase,
    },

    #[error("votes are only accepted while the poll is active")]
    NotAccepting,

    #[error("unknown option: {0}")]
    UnknownOption(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollInteraction {
    pub phase: PollPhase,
    pub results_visible: bool,
    pub options: Vec<String>,
    pub votes: Vec<PollVote>,
}

impl PollInteraction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open voting. Starting again after a close begins a fresh vote set.
    pub fn start(&mut self, options: Vec<String>) -> Result<(), PollError> {
        if self.phase == PollPhase::Active {
            return Err(PollError::InvalidTransition {
                action: "start",
                phase: self.phase,
            });
        }
        self.phase = PollPhase::Active;
        self.options = options;
        self.votes.clear();
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), PollError> {
        if self.phase != PollPhase::Active {
            return Err(PollError::InvalidTransition {
                action: "close",
                phase: self.phase,
            });
        }
        self.phase = PollPhase::Closed;
        Ok(())
    }

    /// Allowed in any phase; never touches votes.
    pub fn set_results_visible(&mut self, visible: bool) {
        self.results_visible = visible;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn vote(
        &mut self,
        vote_id: String,
        student_id: String,
        option_id: String,
    ) -> Result<(), PollError> {
        if self.phase != PollPhase::Active {
            return Err(PollError::NotAccepting);
        }
        if !self.options.is_empty() && !self.options.contains(&option_id) {
            return Err(PollError::UnknownOption(option_id));
        }

        let vote = PollVote {
            vote_id,
            student_id,
            option_id,
        };
        match self.votes.iter_mut().find(|v| v.student_id == vote.student_id) {
            Some(existing) => *existing = vote,
            None => self.votes.push(vote),
        }
        Ok(())
    }

    pub fn tallies(&self) -> Vec<OptionTally> {
        let total = self.votes.len();
        self.options
            .iter()
            .map(|option| {
                let count = self.votes.iter().filter(|v| &v.option_id == option).count();
                OptionTally {
                    option_id: option.clone(),
                    count,
                    percentage: percentage(count, total),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_poll() -> PollInteraction {
        let mut poll = PollInteraction::new();
        poll.start(vec!["yes".into(), "no".into()]).unwrap();
        poll
    }

    fn vote(poll: &mut PollInteraction, student: &str, option: &str) -> Result<(), PollError> {
        poll.vote(format!("v-{student}"), student.into(), option.into())
    }

    #[test]
    fn toggling_results_keeps_votes() {
        let mut poll = open_poll();
        vote(&mut poll, "s1", "yes").unwrap();
        let before = poll.votes.clone();
        poll.set_results_visible(true);
        poll.set_results_visible(false);
        assert_eq!(poll.votes, before);
    }

    #[test]
    fn closing_keeps_results_visible() {
        let mut poll = open_poll();
        poll.set_results_visible(true);
        poll.close().unwrap();
        assert!(poll.results_visible);
        assert_eq!(poll.phase, PollPhase::Closed);
    }

    #[test]
    fn latest_vote_wins_and_freezes_on_close() {
        let mut poll = open_poll();
        vote(&mut poll, "s1", "yes").unwrap();
        vote(&mut poll, "s1", "no").unwrap();
        assert_eq!(poll.votes.len(), 1);
        assert_eq!(poll.votes[0].option_id, "no");

        poll.close().unwrap();
        assert_eq!(vote(&mut poll, "s1", "yes"), Err(PollError::NotAccepting));
        assert_eq!(poll.votes[0].option_id, "no");
    }

    #[test]
    fn reset_hides_results_and_clears_votes() {
        let mut poll = open_poll();
        vote(&mut poll, "s1", "yes").unwrap();
        poll.set_results_visible(true);
        poll.reset();
        assert_eq!(poll, PollInteraction::default());
    }

    #[test]
    fn tallies_count_votes() {
        let mut poll = open_poll();
        vote(&mut poll, "s1", "yes").unwrap();
        vote(&mut poll, "s2", "yes").unwrap();
        vote(&mut poll, "s3", "no").unwrap();
        let tallies = poll.tallies();
        assert_eq!(tallies[0].count, 2);
        assert!((tallies[1].percentage - 33.333).abs() < 0.01);
    }

    #[test]
    fn double_start_is_rejected() {
        let mut poll = open_poll();
        assert!(poll.start(vec![]).is_err());
    }
}
