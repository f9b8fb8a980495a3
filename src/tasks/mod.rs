pub mod group_closer;

pub use group_closer::{close_expired_groups_task, sweep_expired_groups};
