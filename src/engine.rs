use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::db::VotingStore;
use crate::identity::IdentityStrategy;
use crate::voting::{BallotCollector, ResultsPublisher, RoundController, ScoringEngine};

/// Wires the voting components to one store, identity strategy and clock.
/// Shared behind an `Arc` by request handlers and the expiry task.
pub struct VotingEngine {
    pub store: Arc<dyn VotingStore>,
    pub identity: Arc<dyn IdentityStrategy>,
    pub clock: Arc<dyn Clock>,
    pub rounds: RoundController,
    pub ballots: BallotCollector,
    pub scoring: ScoringEngine,
    pub results: ResultsPublisher,
}

impl VotingEngine {
    pub fn new(store: Arc<dyn VotingStore>, identity: Arc<dyn IdentityStrategy>) -> Self {
        Self::with_clock(store, identity, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn VotingStore>,
        identity: Arc<dyn IdentityStrategy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rounds: RoundController::new(store.clone(), clock.clone()),
            ballots: BallotCollector::new(store.clone(), clock.clone()),
            scoring: ScoringEngine::new(store.clone()),
            results: ResultsPublisher::new(store.clone()),
            store,
            identity,
            clock,
        }
    }
}
