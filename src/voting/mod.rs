mod ballot;
mod results;
mod round;
pub mod scoring;

pub use ballot::{BallotCollector, BallotOutcome, Rejection};
pub use results::{Published, ResultsPublisher};
pub use round::RoundController;
pub use scoring::{Scoreboard, ScoringEngine};
