use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::db::VotingStore;
use crate::error::Result;
use crate::models::{compare_group_names, PerformerId, VoteLogEntry, VoteRank, VoteResult, VotingConfig};

/// Per-group rankings in running order ("Group 2" before "Group 10").
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Scoreboard(Vec<(String, Vec<VoteResult>)>);

impl Scoreboard {
    pub fn group(&self, name: &str) -> Option<&[VoteResult]> {
        self.0
            .iter()
            .find(|(group, _)| group == name)
            .map(|(_, results)| results.as_slice())
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.0.iter().map(|(group, _)| group.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[VoteResult])> {
        self.0.iter().map(|(group, results)| (group.as_str(), results.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Ranks performers from the vote log using the show's current weights.
/// Nothing is cached; every call reads the log and config afresh.
pub struct ScoringEngine {
    store: Arc<dyn VotingStore>,
}

impl ScoringEngine {
    pub fn new(store: Arc<dyn VotingStore>) -> Self {
        Self { store }
    }

    pub async fn score_group(&self, show_slug: &str, group: &str) -> Result<Vec<VoteResult>> {
        let config = self.store.load_voting_config(show_slug).await?;
        let log = self.store.query_vote_log(show_slug, Some(group)).await?;
        Ok(score_group(&config, group, &log))
    }

    pub async fn score_show(&self, show_slug: &str) -> Result<Scoreboard> {
        let config = self.store.load_voting_config(show_slug).await?;
        let log = self.store.query_vote_log(show_slug, None).await?;
        Ok(score_show(&config, &log))
    }
}

#[derive(Default)]
struct Tally {
    name: Option<String>,
    counts: [u32; 3],
}

/// Every current member of `group` appears, with zeros if nobody picked
/// them. Performers with votes in the log but no longer in the group are
/// kept so no vote disappears from the totals.
pub fn score_group(config: &VotingConfig, group: &str, log: &[VoteLogEntry]) -> Vec<VoteResult> {
    let mut tallies: BTreeMap<PerformerId, Tally> = BTreeMap::new();

    for id in config.group_performers(group).unwrap_or_default() {
        tallies.entry(*id).or_default();
    }

    for row in log.iter().filter(|row| row.group_name == group) {
        let tally = tallies.entry(row.performer_id).or_default();
        tally.counts[row.vote_rank as usize - 1] += 1;
        if tally.name.is_none() {
            tally.name = Some(row.performer_name.clone());
        }
    }

    let mut results: Vec<VoteResult> = tallies
        .into_iter()
        .map(|(performer_id, tally)| {
            let [first, second, third] = tally.counts;
            let weighted_score: f64 = VoteRank::ALL
                .iter()
                .zip(tally.counts)
                .map(|(rank, count)| f64::from(count) * config.weights.for_rank(*rank))
                .sum();
            VoteResult {
                performer_id,
                performer_name: config
                    .performer_name(performer_id)
                    .map(str::to_string)
                    .or(tally.name)
                    .unwrap_or_else(|| "Unknown performer".to_string()),
                group_name: group.to_string(),
                first_votes: first,
                second_votes: second,
                third_votes: third,
                total_votes: first + second + third,
                weighted_score,
            }
        })
        .collect();

    rank(&mut results);
    results
}

/// Scores every configured group, plus any group that only exists in the log.
pub fn score_show(config: &VotingConfig, log: &[VoteLogEntry]) -> Scoreboard {
    let mut groups: Vec<&str> = config
        .groups
        .keys()
        .map(String::as_str)
        .chain(log.iter().map(|row| row.group_name.as_str()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    groups.sort_by(|a, b| compare_group_names(a, b));

    Scoreboard(
        groups
            .into_iter()
            .map(|group| (group.to_string(), score_group(config, group, log)))
            .collect(),
    )
}

/// True if `group` is configured for the show or has rows in `log`.
pub fn has_group(config: &VotingConfig, group: &str, log: &[VoteLogEntry]) -> bool {
    config.groups.contains_key(group) || log.iter().any(|row| row.group_name == group)
}

/// All groups merged into one ranking.
pub fn overall(board: &Scoreboard) -> Vec<VoteResult> {
    let mut results: Vec<VoteResult> = board.iter().flat_map(|(_, results)| results.iter().cloned()).collect();
    rank(&mut results);
    results
}

/// Highest weighted score first, then most votes, then lowest performer id.
pub fn rank(results: &mut [VoteResult]) {
    results.sort_by(compare);
}

fn compare(a: &VoteResult, b: &VoteResult) -> Ordering {
    b.weighted_score
        .total_cmp(&a.weighted_score)
        .then_with(|| b.total_votes.cmp(&a.total_votes))
        .then_with(|| a.performer_id.cmp(&b.performer_id))
        .then_with(|| compare_group_names(&a.group_name, &b.group_name))
}
