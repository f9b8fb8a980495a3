use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use crate::error::{Result, VotingError};

pub type PerformerId = i64;

const MAX_SLUG_LEN: usize = 200;

/// Longest voting window a group may be given: one day.
pub const MAX_TIMER_DURATION: i64 = 24 * 60 * 60;

lazy_static! {
    static ref SHOW_SLUG: Regex = Regex::new(r"^[a-z0-9][a-z0-9-]*$").unwrap();
}

pub fn validate_show_slug(slug: &str) -> Result<()> {
    if slug.len() > MAX_SLUG_LEN || !SHOW_SLUG.is_match(slug) {
        return Err(VotingError::InvalidInput(format!("'{}' is not a valid show slug", slug)));
    }
    Ok(())
}

pub fn validate_timer_duration(seconds: i64) -> Result<()> {
    if !(0..=MAX_TIMER_DURATION).contains(&seconds) {
        return Err(VotingError::InvalidInput(format!(
            "timer_duration must be between 0 and {} seconds, got {}",
            MAX_TIMER_DURATION, seconds
        )));
    }
    Ok(())
}

/// Orders group names by their number, so "Group 2" comes before
/// "Group 10". Names without a number sort after, by text.
pub fn compare_group_names(a: &str, b: &str) -> Ordering {
    fn index(name: &str) -> Option<u64> {
        name.strip_prefix("Group ")?.parse().ok()
    }
    match (index(a), index(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Performer {
    pub id: PerformerId,
    pub name: String,
}

/// Points awarded for a 1st, 2nd and 3rd place pick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Weights {
    pub first: f64,
    pub second: f64,
    pub third: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            first: 3.0,
            second: 2.0,
            third: 1.0,
        }
    }
}

impl Weights {
    pub fn validate(&self) -> Result<()> {
        for (label, value) in [("first", self.first), ("second", self.second), ("third", self.third)] {
            if !value.is_finite() || value < 0.0 {
                return Err(VotingError::InvalidInput(format!(
                    "weight for {} place must be a non-negative number, got {}",
                    label, value
                )));
            }
        }
        Ok(())
    }

    pub fn for_rank(&self, rank: VoteRank) -> f64 {
        match rank {
            VoteRank::First => self.first,
            VoteRank::Second => self.second,
            VoteRank::Third => self.third,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VoteRank {
    First = 1,
    Second = 2,
    Third = 3,
}

impl VoteRank {
    pub const ALL: [VoteRank; 3] = [VoteRank::First, VoteRank::Second, VoteRank::Third];

    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::First),
            2 => Some(Self::Second),
            3 => Some(Self::Third),
            _ => None,
        }
    }
}

/// Where a show is in its sequence of voting rounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundState {
    NotStarted,
    GroupActive(String),
    GroupClosed(String),
    AllGroupsClosed,
    Revealed,
}

/// Per-show voting state. `version` is the optimistic-concurrency token
/// checked by every save.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VotingConfig {
    pub show_slug: String,
    #[serde(default)]
    pub version: i64,
    pub groups: BTreeMap<String, Vec<PerformerId>>,
    pub pool: Vec<PerformerId>,
    #[serde(default)]
    pub performer_names: BTreeMap<PerformerId, String>,
    pub active_group: Option<String>,
    pub timer_start: Option<DateTime<Utc>>,
    /// Seconds the active group's window stays open.
    pub timer_duration: i64,
    pub num_groups: u32,
    pub top_per_group: u32,
    pub weights: Weights,
    pub hide_bios: bool,
    pub reveal_results: bool,
    /// Groups closed so far, oldest first.
    #[serde(default)]
    pub closed_groups: Vec<String>,
}

/// Everything needed to put a show up for audience voting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingSetup {
    pub show_slug: String,
    pub roster: Vec<Performer>,
    pub num_groups: u32,
    pub top_per_group: u32,
    pub timer_duration: i64,
    pub weights: Weights,
    pub hide_bios: bool,
}

impl VotingConfig {
    /// Builds a fresh config, splitting the roster into `num_groups`
    /// contiguous groups named "Group 1".."Group N" whose sizes differ by at most one.
    pub fn from_setup(setup: VotingSetup) -> Result<Self> {
        validate_show_slug(&setup.show_slug)?;
        setup.weights.validate()?;
        if setup.num_groups == 0 {
            return Err(VotingError::InvalidInput("num_groups must be at least 1".to_string()));
        }
        validate_timer_duration(setup.timer_duration)?;

        let mut seen = HashSet::new();
        for performer in &setup.roster {
            if !seen.insert(performer.id) {
                return Err(VotingError::InvalidInput(format!(
                    "performer {} appears more than once in the roster",
                    performer.id
                )));
            }
        }

        let pool: Vec<PerformerId> = setup.roster.iter().map(|p| p.id).collect();
        let groups = partition(&pool, setup.num_groups as usize);
        let performer_names = setup.roster.into_iter().map(|p| (p.id, p.name)).collect();

        Ok(Self {
            show_slug: setup.show_slug,
            version: 0,
            groups,
            pool,
            performer_names,
            active_group: None,
            timer_start: None,
            timer_duration: setup.timer_duration,
            num_groups: setup.num_groups,
            top_per_group: setup.top_per_group,
            weights: setup.weights,
            hide_bios: setup.hide_bios,
            reveal_results: false,
            closed_groups: Vec::new(),
        })
    }

    pub fn round_state(&self) -> RoundState {
        if let Some(group) = &self.active_group {
            return RoundState::GroupActive(group.clone());
        }
        if self.reveal_results {
            return RoundState::Revealed;
        }
        match self.closed_groups.last() {
            None => RoundState::NotStarted,
            Some(last) => {
                let all_closed = self.groups.keys().all(|g| self.closed_groups.contains(g));
                if all_closed {
                    RoundState::AllGroupsClosed
                } else {
                    RoundState::GroupClosed(last.clone())
                }
            }
        }
    }

    pub fn group_performers(&self, group: &str) -> Option<&[PerformerId]> {
        self.groups.get(group).map(Vec::as_slice)
    }

    pub fn performer_name(&self, id: PerformerId) -> Option<&str> {
        self.performer_names.get(&id).map(String::as_str)
    }

    pub fn timer_ends_at(&self) -> Option<DateTime<Utc>> {
        let start = self.timer_start?;
        Duration::try_seconds(self.timer_duration).and_then(|window| start.checked_add_signed(window))
    }

    /// True once the active group's advisory window has run out.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.timer_ends_at().is_some_and(|ends| now >= ends)
    }

    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.timer_ends_at().map(|ends| (ends - now).num_seconds().max(0))
    }

    pub fn check_invariants(&self) -> Result<()> {
        if self.active_group.is_some() != self.timer_start.is_some() {
            return Err(VotingError::InvalidState(format!(
                "show '{}' has active group and timer start out of sync",
                self.show_slug
            )));
        }
        if let Some(group) = &self.active_group {
            if !self.groups.contains_key(group) {
                return Err(VotingError::InvalidState(format!(
                    "active group '{}' is not a group of show '{}'",
                    group, self.show_slug
                )));
            }
        }
        validate_timer_duration(self.timer_duration)?;
        self.weights.validate()
    }
}

fn partition(pool: &[PerformerId], num_groups: usize) -> BTreeMap<String, Vec<PerformerId>> {
    let base = pool.len() / num_groups;
    let extra = pool.len() % num_groups;
    let mut groups = BTreeMap::new();
    let mut offset = 0;
    for index in 0..num_groups {
        let size = base + usize::from(index < extra);
        groups.insert(format!("Group {}", index + 1), pool[offset..offset + size].to_vec());
        offset += size;
    }
    groups
}

/// One accepted ballot slot. Never mutated once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoteLogEntry {
    pub show_slug: String,
    pub group_name: String,
    pub performer_id: PerformerId,
    pub performer_name: String,
    pub vote_rank: VoteRank,
    pub ip_hash: String,
    pub token: String,
    pub voted_at: DateTime<Utc>,
}

/// Aggregated picks for one performer. Always derived from the vote log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoteResult {
    pub performer_id: PerformerId,
    pub performer_name: String,
    pub group_name: String,
    pub first_votes: u32,
    pub second_votes: u32,
    pub third_votes: u32,
    pub total_votes: u32,
    pub weighted_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn roster(n: i64) -> Vec<Performer> {
        (1..=n)
            .map(|id| Performer {
                id,
                name: format!("Act {}", id),
            })
            .collect()
    }

    fn setup(n: i64, num_groups: u32) -> VotingSetup {
        VotingSetup {
            show_slug: "friday-showcase".to_string(),
            roster: roster(n),
            num_groups,
            top_per_group: 2,
            timer_duration: 120,
            weights: Weights::default(),
            hide_bios: false,
        }
    }

    #[test]
    fn roster_is_split_into_contiguous_balanced_groups() {
        let config = VotingConfig::from_setup(setup(7, 3)).unwrap();
        assert_eq!(config.group_performers("Group 1"), Some(&[1, 2, 3][..]));
        assert_eq!(config.group_performers("Group 2"), Some(&[4, 5][..]));
        assert_eq!(config.group_performers("Group 3"), Some(&[6, 7][..]));
        assert_eq!(config.pool, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(config.performer_name(4), Some("Act 4"));
        assert_eq!(config.round_state(), RoundState::NotStarted);
    }

    #[test]
    fn more_groups_than_performers_leaves_empty_groups() {
        let config = VotingConfig::from_setup(setup(1, 3)).unwrap();
        assert_eq!(config.groups.len(), 3);
        assert_eq!(config.group_performers("Group 3"), Some(&[][..]));
    }

    #[test]
    fn setup_rejects_duplicates_and_bad_layout() {
        let mut dup = setup(3, 1);
        dup.roster.push(Performer {
            id: 2,
            name: "Again".to_string(),
        });
        assert!(matches!(VotingConfig::from_setup(dup), Err(VotingError::InvalidInput(_))));
        assert!(matches!(VotingConfig::from_setup(setup(3, 0)), Err(VotingError::InvalidInput(_))));

        let mut bad_weights = setup(3, 1);
        bad_weights.weights.second = -1.0;
        assert!(VotingConfig::from_setup(bad_weights).is_err());

        let mut bad_slug = setup(3, 1);
        bad_slug.show_slug = "Friday Showcase".to_string();
        assert!(VotingConfig::from_setup(bad_slug).is_err());
    }

    #[test]
    fn weights_reject_nan_and_negative() {
        assert!(Weights::default().validate().is_ok());
        assert!(Weights { first: 0.0, second: 0.0, third: 0.0 }.validate().is_ok());
        assert!(Weights { first: f64::NAN, second: 1.0, third: 1.0 }.validate().is_err());
        assert!(Weights { first: 1.0, second: 1.0, third: -0.5 }.validate().is_err());
    }

    #[test]
    fn expiry_and_remaining_time_follow_timer() {
        let mut config = VotingConfig::from_setup(setup(4, 2)).unwrap();
        let start = Utc.with_ymd_and_hms(2026, 7, 4, 20, 0, 0).unwrap();
        assert!(!config.is_expired(start));
        assert_eq!(config.seconds_remaining(start), None);

        config.active_group = Some("Group 1".to_string());
        config.timer_start = Some(start);
        assert_eq!(config.seconds_remaining(start + Duration::seconds(30)), Some(90));
        assert!(!config.is_expired(start + Duration::seconds(119)));
        assert!(config.is_expired(start + Duration::seconds(120)));
        assert_eq!(config.seconds_remaining(start + Duration::seconds(500)), Some(0));
    }

    #[test]
    fn round_state_is_derived_from_closed_groups() {
        let mut config = VotingConfig::from_setup(setup(4, 2)).unwrap();
        config.closed_groups.push("Group 1".to_string());
        assert_eq!(config.round_state(), RoundState::GroupClosed("Group 1".to_string()));
        config.closed_groups.push("Group 2".to_string());
        assert_eq!(config.round_state(), RoundState::AllGroupsClosed);
        config.reveal_results = true;
        assert_eq!(config.round_state(), RoundState::Revealed);
    }

    #[test]
    fn invariants_catch_half_set_timer() {
        let mut config = VotingConfig::from_setup(setup(4, 2)).unwrap();
        config.active_group = Some("Group 1".to_string());
        assert!(config.check_invariants().is_err());
        config.timer_start = Some(Utc::now());
        assert!(config.check_invariants().is_ok());
        config.active_group = Some("Group 9".to_string());
        assert!(config.check_invariants().is_err());
    }

    #[test]
    fn timer_duration_is_bounded() {
        let mut huge = setup(2, 1);
        huge.timer_duration = 10_000_000_000_000;
        assert!(matches!(VotingConfig::from_setup(huge), Err(VotingError::InvalidInput(_))));

        let mut negative = setup(2, 1);
        negative.timer_duration = -1;
        assert!(VotingConfig::from_setup(negative).is_err());

        let mut longest = setup(2, 1);
        longest.timer_duration = MAX_TIMER_DURATION;
        assert!(VotingConfig::from_setup(longest).is_ok());
    }

    #[test]
    fn oversized_stored_timer_never_overflows() {
        let mut config = VotingConfig::from_setup(setup(2, 1)).unwrap();
        config.active_group = Some("Group 1".to_string());
        config.timer_start = Some(Utc.with_ymd_and_hms(2026, 7, 4, 20, 0, 0).unwrap());
        config.timer_duration = i64::MAX;
        assert_eq!(config.timer_ends_at(), None);
        assert!(!config.is_expired(Utc::now()));
        assert!(config.check_invariants().is_err());
    }

    #[test]
    fn groups_run_in_numeric_order() {
        let config = VotingConfig::from_setup(setup(12, 12)).unwrap();
        let mut names: Vec<&str> = config.groups.keys().map(String::as_str).collect();
        names.sort_by(|a, b| compare_group_names(a, b));
        assert_eq!(names[1], "Group 2");
        assert_eq!(names[9], "Group 10");
        assert_eq!(names[11], "Group 12");
        assert_eq!(compare_group_names("Group 9", "Encore"), Ordering::Less);
    }

    #[test]
    fn slugs_are_lowercase_dashed() {
        assert!(validate_show_slug("jazz-night-2026").is_ok());
        assert!(validate_show_slug("").is_err());
        assert!(validate_show_slug("-leading").is_err());
        assert!(validate_show_slug("has space").is_err());
        assert!(validate_show_slug(&"a".repeat(201)).is_err());
    }
}
