use serde::Serialize;
use std::sync::Arc;

use super::scoring::{self, Scoreboard};
use crate::db::VotingStore;
use crate::error::{Result, VotingError};
use crate::models::VoteResult;

/// Results as a given caller is allowed to see them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Published<T> {
    Visible(T),
    Withheld,
}

impl<T> Published<T> {
    pub fn visible(self) -> Option<T> {
        match self {
            Self::Visible(results) => Some(results),
            Self::Withheld => None,
        }
    }
}

/// Applies the reveal gate. Operators (privileged callers) always see live
/// scores so they can preview before publishing.
pub struct ResultsPublisher {
    store: Arc<dyn VotingStore>,
}

impl ResultsPublisher {
    pub fn new(store: Arc<dyn VotingStore>) -> Self {
        Self { store }
    }

    /// Ranking for one group, or across all groups when `group` is `None`.
    pub async fn get_results(
        &self,
        show_slug: &str,
        group: Option<&str>,
        privileged: bool,
    ) -> Result<Published<Vec<VoteResult>>> {
        let config = self.store.load_voting_config(show_slug).await?;
        if !config.reveal_results && !privileged {
            return Ok(Published::Withheld);
        }

        let results = match group {
            Some(group) => {
                let log = self.store.query_vote_log(show_slug, Some(group)).await?;
                if !scoring::has_group(&config, group, &log) {
                    return Err(VotingError::InvalidInput(format!(
                        "show '{}' has no group named '{}'",
                        show_slug, group
                    )));
                }
                scoring::score_group(&config, group, &log)
            }
            None => {
                let log = self.store.query_vote_log(show_slug, None).await?;
                scoring::overall(&scoring::score_show(&config, &log))
            }
        };
        Ok(Published::Visible(results))
    }

    /// Per-group rankings for the whole show.
    pub async fn scoreboard(
        &self,
        show_slug: &str,
        privileged: bool,
    ) -> Result<Published<Scoreboard>> {
        let config = self.store.load_voting_config(show_slug).await?;
        if !config.reveal_results && !privileged {
            return Ok(Published::Withheld);
        }
        let log = self.store.query_vote_log(show_slug, None).await?;
        Ok(Published::Visible(scoring::score_show(&config, &log)))
    }
}
