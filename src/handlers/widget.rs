use log::debug;
use serde::Serialize;

use crate::engine::VotingEngine;
use crate::error::Result;
use crate::identity::RequestContext;
use crate::models::{validate_show_slug, Performer, PerformerId, VoteResult};
use crate::voting::{BallotOutcome, Published};

/// What the public countdown widget renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ActiveVoting {
    Open {
        group: String,
        performers: Vec<Performer>,
        seconds_remaining: i64,
        expired: bool,
        hide_bios: bool,
    },
    Closed {
        results_revealed: bool,
    },
}

pub async fn active_voting(engine: &VotingEngine, show_slug: &str) -> Result<ActiveVoting> {
    validate_show_slug(show_slug)?;
    let config = engine.store.load_voting_config(show_slug).await?;
    let now = engine.clock.now();

    let Some(group) = config.active_group.clone() else {
        return Ok(ActiveVoting::Closed {
            results_revealed: config.reveal_results,
        });
    };

    let performers = config
        .group_performers(&group)
        .unwrap_or_default()
        .iter()
        .map(|id| Performer {
            id: *id,
            name: config.performer_name(*id).unwrap_or("Unknown performer").to_string(),
        })
        .collect();

    Ok(ActiveVoting::Open {
        seconds_remaining: config.seconds_remaining(now).unwrap_or(0),
        expired: config.is_expired(now),
        hide_bios: config.hide_bios,
        group,
        performers,
    })
}

/// Session token for a widget that has just loaded. Send it back with the ballot.
pub fn open_session(engine: &VotingEngine) -> String {
    engine.identity.issue_session_token()
}

/// Identifies the voter from the request, then hands the ballot to the collector.
pub async fn submit_ballot(
    engine: &VotingEngine,
    show_slug: &str,
    request: &RequestContext,
    picks: &[PerformerId],
) -> Result<BallotOutcome> {
    validate_show_slug(show_slug)?;
    let voter = engine.identity.identify(show_slug, request);
    if request.session_token.is_none() {
        debug!("Ballot for {} arrived without a session token", show_slug);
    }
    engine
        .ballots
        .submit(show_slug, &voter, picks, request.session_token.as_deref())
        .await
}

/// `privileged` comes from the host's authentication of the caller.
pub async fn results(
    engine: &VotingEngine,
    show_slug: &str,
    group: Option<&str>,
    privileged: bool,
) -> Result<Published<Vec<VoteResult>>> {
    validate_show_slug(show_slug)?;
    engine.results.get_results(show_slug, group, privileged).await
}
