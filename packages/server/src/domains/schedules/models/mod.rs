pub mod schedule;

pub use schedule::{
    ClaimedSchedule, CreateDaily, CreateInterval, CreateOnce, FireOutcome, Schedule,
    ScheduleFilter, ScheduleType, UpdateScheduleParams,
};
