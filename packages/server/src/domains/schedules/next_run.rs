use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use super::models::{Schedule, ScheduleType};

/// Computes the next UTC fire time for `schedule` given the current instant.
///
/// Inactive schedules never fire. `once` fires at its stored `run_at`
/// verbatim, even if that instant is already in the past — the worker is
/// what turns lateness into an immediate fire, not this function. `interval`
/// advances from the last scheduled instant (or `now` if there wasn't one)
/// in fixed steps, collapsing any missed steps into a single future fire
/// rather than replaying one per missed tick. `daily` resolves configured
/// local times against the schedule's IANA timezone and returns the next one
/// strictly after the current local time, rolling over to the earliest time
/// tomorrow if none remain today.
pub fn next_run_at(schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !schedule.active {
        return None;
    }

    match schedule.schedule_type {
        ScheduleType::Once => schedule.run_at,
        ScheduleType::Interval => next_interval(schedule, now),
        ScheduleType::Daily => next_daily(schedule, now),
    }
}

fn next_interval(schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let every_minutes = schedule.every_minutes?;
    if every_minutes <= 0 {
        return None;
    }
    let step = Duration::minutes(every_minutes as i64);
    let base = schedule.next_run_at.unwrap_or(now);

    let mut next = base + step;
    while next <= now {
        next += step;
    }
    Some(next)
}

fn next_daily(schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let times = parse_local_times(&schedule.local_times());
    if times.is_empty() {
        return None;
    }

    let tz: Tz = schedule
        .timezone
        .as_deref()
        .unwrap_or("UTC")
        .parse()
        .unwrap_or(Tz::UTC);
    let local_now = now.with_timezone(&tz);

    for t in &times {
        let candidate = local_now.date_naive().and_time(*t);
        if let Some(candidate) = tz.from_local_datetime(&candidate).single() {
            if candidate > local_now {
                return Some(candidate.with_timezone(&Utc));
            }
        }
    }

    let tomorrow = local_now.date_naive() + Duration::days(1);
    let candidate = tomorrow.and_time(times[0]);
    tz.from_local_datetime(&candidate)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_local_times(raw: &[String]) -> Vec<NaiveTime> {
    let mut times: Vec<NaiveTime> = raw
        .iter()
        .filter_map(|s| NaiveTime::parse_from_str(s, "%H:%M").ok())
        .collect();
    times.sort();
    times
}
