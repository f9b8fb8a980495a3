pub mod widget;

pub use widget::{active_voting, open_session, results, submit_ballot, ActiveVoting};
