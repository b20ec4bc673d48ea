pub mod models;
pub mod next_run;

pub use models::{
    ClaimedSchedule, CreateDaily, CreateInterval, CreateOnce, FireOutcome, Schedule,
    ScheduleFilter, ScheduleType, UpdateScheduleParams,
};
pub use next_run::next_run_at;
