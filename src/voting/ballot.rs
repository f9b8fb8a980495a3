use log::debug;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::{AppendOutcome, VotingStore};
use crate::error::Result;
use crate::identity::IdentityToken;
use crate::models::{PerformerId, VoteLogEntry, VoteRank};

/// Why a ballot was refused. These go back to the voter as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
pub enum Rejection {
    #[error("Voting is not open right now")]
    NoActiveVoting,

    #[error("A ballot needs between 1 and 3 picks, got {0}")]
    MalformedBallot(usize),

    #[error("Performer {0} is not in the group being voted on")]
    InvalidPerformer(PerformerId),

    #[error("Performer {0} was picked more than once")]
    DuplicateSelection(PerformerId),

    #[error("You have already voted for this group")]
    AlreadyVoted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BallotOutcome {
    Accepted { group: String, token: String },
    Rejected(Rejection),
}

pub struct BallotCollector {
    store: Arc<dyn VotingStore>,
    clock: Arc<dyn Clock>,
}

impl BallotCollector {
    pub fn new(store: Arc<dyn VotingStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Records `picks` (1st, then optional 2nd and 3rd) for the active group.
    ///
    /// Ballots that arrive after the group's timer ran out but before an
    /// operator or the expiry task closes it are still accepted: the timer
    /// drives the countdown shown to the audience, not a cutoff.
    ///
    /// `token` is the widget session token; a fresh one is minted when absent.
    pub async fn submit(
        &self,
        show_slug: &str,
        voter: &IdentityToken,
        picks: &[PerformerId],
        token: Option<&str>,
    ) -> Result<BallotOutcome> {
        let config = self.store.load_voting_config(show_slug).await?;

        let Some(group) = config.active_group.clone() else {
            return Ok(reject(show_slug, Rejection::NoActiveVoting));
        };

        if picks.is_empty() || picks.len() > VoteRank::ALL.len() {
            return Ok(reject(show_slug, Rejection::MalformedBallot(picks.len())));
        }

        let members = config.group_performers(&group).unwrap_or_default();
        if let Some(outsider) = picks.iter().find(|id| !members.contains(*id)) {
            return Ok(reject(show_slug, Rejection::InvalidPerformer(*outsider)));
        }

        let mut seen = HashSet::new();
        if let Some(repeat) = picks.iter().find(|id| !seen.insert(**id)) {
            return Ok(reject(show_slug, Rejection::DuplicateSelection(*repeat)));
        }

        let now = self.clock.now();
        if config.is_expired(now) {
            debug!("Accepting late ballot for {} / {} (timer ran out, group still open)", show_slug, group);
        }

        let token = token
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let rows: Vec<VoteLogEntry> = VoteRank::ALL
            .iter()
            .zip(picks)
            .map(|(rank, performer_id)| VoteLogEntry {
                show_slug: show_slug.to_string(),
                group_name: group.clone(),
                performer_id: *performer_id,
                performer_name: config
                    .performer_name(*performer_id)
                    .unwrap_or("Unknown performer")
                    .to_string(),
                vote_rank: *rank,
                ip_hash: voter.as_str().to_string(),
                token: token.clone(),
                voted_at: now,
            })
            .collect();

        match self.store.append_vote_log_rows(&rows).await? {
            AppendOutcome::Appended => {
                debug!("Recorded {}-pick ballot for {} / {}", rows.len(), show_slug, group);
                Ok(BallotOutcome::Accepted { group, token })
            }
            AppendOutcome::ConstraintViolation => Ok(reject(show_slug, Rejection::AlreadyVoted)),
        }
    }
}

fn reject(show_slug: &str, reason: Rejection) -> BallotOutcome {
    debug!("Ballot for {} rejected: {}", show_slug, reason);
    BallotOutcome::Rejected(reason)
}
