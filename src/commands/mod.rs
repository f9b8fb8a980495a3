pub mod operator;

pub use operator::{
    close_active_group, live_scores, reveal_results, schedule_show, start_group, update_timer_duration,
    update_weights,
};
