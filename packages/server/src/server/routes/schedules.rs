use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::AppError;
use crate::domains::schedules::{
    next_run_at, CreateDaily, CreateInterval, CreateOnce, Schedule, ScheduleFilter, ScheduleType,
    UpdateScheduleParams,
};
use crate::server::app::AppState;

const MAX_EVERY_MINUTES: i32 = 60 * 24 * 365;

fn validate_token(token: &str) -> Result<(), AppError> {
    if token.is_empty() || token.len() > 256 {
        return Err(AppError::Validation(
            "token must be 1-256 characters".into(),
        ));
    }
    Ok(())
}

fn validate_hhmm(value: &str) -> Result<(), AppError> {
    let (hh, mm) = value
        .split_once(':')
        .ok_or_else(|| AppError::Validation("time_hhmm must be HH:MM".into()))?;
    if hh.len() != 2 || mm.len() != 2 {
        return Err(AppError::Validation("time_hhmm must be HH:MM".into()));
    }
    let hh: u32 = hh
        .parse()
        .map_err(|_| AppError::Validation("time_hhmm must be HH:MM".into()))?;
    let mm: u32 = mm
        .parse()
        .map_err(|_| AppError::Validation("time_hhmm must be HH:MM".into()))?;
    if hh > 23 || mm > 59 {
        return Err(AppError::Validation("time_hhmm must be a valid time".into()));
    }
    Ok(())
}

fn validate_timezone(tz: &str) -> Result<(), AppError> {
    tz.parse::<chrono_tz::Tz>()
        .map(|_| ())
        .map_err(|_| AppError::Validation(format!("unknown timezone '{tz}'")))
}

fn validate_every_minutes(minutes: i32) -> Result<(), AppError> {
    if !(1..=MAX_EVERY_MINUTES).contains(&minutes) {
        return Err(AppError::Validation(format!(
            "every_minutes must be between 1 and {MAX_EVERY_MINUTES}"
        )));
    }
    Ok(())
}

/// `run_at` is accepted as a string so a missing UTC offset is a validation
/// error rather than a generic JSON-parse rejection.
fn validate_run_at(raw: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            AppError::Validation(
                "run_at must include a timezone offset, e.g. 2025-12-17T10:30:00+03:00 or ...Z"
                    .into(),
            )
        })
}

/// Recompute and persist `next_run_at` for a freshly created/updated row,
/// then return the up-to-date representation.
async fn recompute_and_persist(id: Uuid, pool: &sqlx::PgPool) -> Result<Schedule, AppError> {
    let schedule = Schedule::get_by_id(id, pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("schedule {id} not found")))?;
    let next = next_run_at(&schedule, Utc::now());
    Schedule::set_next_run_at(id, next, pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("schedule {id} not found")))
}

#[derive(Debug, Deserialize)]
pub struct CreateDailyRequest {
    pub token: String,
    pub user_id: i64,
    pub scenario_id: i64,
    pub time_hhmm: Option<String>,
    pub times_hhmm: Option<Vec<String>>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn validate_daily(req: &CreateDailyRequest) -> Result<(), AppError> {
    validate_token(&req.token)?;
    validate_timezone(&req.timezone)?;

    let has_times = req.times_hhmm.as_ref().is_some_and(|t| !t.is_empty());
    if !has_times && req.time_hhmm.is_none() {
        return Err(AppError::Validation(
            "one of time_hhmm or times_hhmm is required".into(),
        ));
    }
    if let Some(t) = &req.time_hhmm {
        validate_hhmm(t)?;
    }
    if let Some(times) = &req.times_hhmm {
        for t in times {
            validate_hhmm(t)?;
        }
    }
    Ok(())
}

/// Upserts the singleton daily schedule for `(token, user_id)`: the most
/// recent existing row is updated in place and any duplicates are deleted.
pub async fn create_daily_handler(
    Extension(state): Extension<AppState>,
    Json(req): Json<CreateDailyRequest>,
) -> Result<Json<Schedule>, AppError> {
    validate_daily(&req)?;

    let existing = Schedule::find_by_key(
        &req.token,
        req.user_id,
        ScheduleType::Daily,
        &state.pool,
    )
    .await?;

    let id = if let Some((newest, duplicates)) = existing.split_first() {
        Schedule::replace_daily_trigger(
            newest.id,
            req.scenario_id,
            req.time_hhmm.clone(),
            req.times_hhmm.clone(),
            req.timezone.clone(),
            &state.pool,
        )
        .await?;
        for dup in duplicates {
            Schedule::delete(dup.id, &state.pool).await?;
        }
        newest.id
    } else {
        let created = Schedule::create_daily(
            CreateDaily {
                token: req.token,
                user_id: req.user_id,
                scenario_id: req.scenario_id,
                time_hhmm: req.time_hhmm,
                times_hhmm: req.times_hhmm,
                timezone: req.timezone,
            },
            &state.pool,
        )
        .await?;
        created.id
    };

    Ok(Json(recompute_and_persist(id, &state.pool).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateIntervalRequest {
    pub token: String,
    pub user_id: i64,
    pub scenario_id: i64,
    pub every_minutes: i32,
}

pub async fn create_interval_handler(
    Extension(state): Extension<AppState>,
    Json(req): Json<CreateIntervalRequest>,
) -> Result<Json<Schedule>, AppError> {
    validate_token(&req.token)?;
    validate_every_minutes(req.every_minutes)?;

    let created = Schedule::create_interval(
        CreateInterval {
            token: req.token,
            user_id: req.user_id,
            scenario_id: req.scenario_id,
            every_minutes: req.every_minutes,
        },
        &state.pool,
    )
    .await?;

    Ok(Json(recompute_and_persist(created.id, &state.pool).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateOnceRequest {
    pub token: String,
    pub user_id: i64,
    pub scenario_id: i64,
    pub run_at: String,
}

pub async fn create_once_handler(
    Extension(state): Extension<AppState>,
    Json(req): Json<CreateOnceRequest>,
) -> Result<Json<Schedule>, AppError> {
    validate_token(&req.token)?;
    let run_at = validate_run_at(&req.run_at)?;

    let created = Schedule::create_once(
        CreateOnce {
            token: req.token,
            user_id: req.user_id,
            scenario_id: req.scenario_id,
            run_at,
        },
        &state.pool,
    )
    .await?;

    Ok(Json(recompute_and_persist(created.id, &state.pool).await?))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub token: Option<String>,
    pub user_id: Option<i64>,
    pub active: Option<bool>,
}

pub async fn list_handler(
    Extension(state): Extension<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Schedule>>, AppError> {
    let filter = ScheduleFilter {
        token: query.token,
        user_id: query.user_id,
        active: query.active,
    };
    Ok(Json(Schedule::list(&filter, &state.pool).await?))
}

/// Partial update payload shared by the by-id and by-key PATCH endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateRequest {
    pub scenario_id: Option<i64>,
    pub time_hhmm: Option<String>,
    pub times_hhmm: Option<Vec<String>>,
    pub timezone: Option<String>,
    pub every_minutes: Option<i32>,
    pub run_at: Option<String>,
    pub active: Option<bool>,
}

impl UpdateRequest {
    fn into_params(self) -> Result<UpdateScheduleParams, AppError> {
        if let Some(t) = &self.time_hhmm {
            validate_hhmm(t)?;
        }
        if let Some(times) = &self.times_hhmm {
            for t in times {
                validate_hhmm(t)?;
            }
        }
        if let Some(tz) = &self.timezone {
            validate_timezone(tz)?;
        }
        if let Some(minutes) = self.every_minutes {
            validate_every_minutes(minutes)?;
        }
        let run_at = self.run_at.as_deref().map(validate_run_at).transpose()?;

        Ok(UpdateScheduleParams {
            scenario_id: self.scenario_id,
            time_hhmm: self.time_hhmm,
            times_hhmm: self.times_hhmm,
            timezone: self.timezone,
            every_minutes: self.every_minutes,
            run_at,
            active: self.active,
        })
    }
}

pub async fn update_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<Schedule>, AppError> {
    let params = req.into_params()?;
    Schedule::update(id, &params, &state.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("schedule {id} not found")))?;
    Ok(Json(recompute_and_persist(id, &state.pool).await?))
}

#[derive(Debug, Deserialize)]
pub struct ScheduleKeyRequest {
    pub token: String,
    pub user_id: i64,
    #[serde(rename = "type")]
    pub schedule_type: ScheduleType,
}

#[derive(Debug, Deserialize)]
pub struct UpdateByKeyRequest {
    #[serde(flatten)]
    pub key: ScheduleKeyRequest,
    #[serde(flatten)]
    pub update: UpdateRequest,
}

pub async fn update_by_key_handler(
    Extension(state): Extension<AppState>,
    Json(req): Json<UpdateByKeyRequest>,
) -> Result<Json<Schedule>, AppError> {
    let existing = Schedule::find_by_key(
        &req.key.token,
        req.key.user_id,
        req.key.schedule_type,
        &state.pool,
    )
    .await?;
    let newest = existing
        .first()
        .ok_or_else(|| AppError::NotFound("no schedule matches that key".into()))?;

    let params = req.update.into_params()?;
    Schedule::update(newest.id, &params, &state.pool).await?;
    Ok(Json(recompute_and_persist(newest.id, &state.pool).await?))
}

pub async fn delete_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let deleted = Schedule::delete(id, &state.pool).await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("schedule {id} not found")))
    }
}

#[derive(Serialize)]
pub struct DeleteCount {
    pub deleted: u64,
}

pub async fn delete_by_key_handler(
    Extension(state): Extension<AppState>,
    Json(req): Json<ScheduleKeyRequest>,
) -> Result<Json<DeleteCount>, AppError> {
    let deleted =
        Schedule::delete_by_key(&req.token, req.user_id, req.schedule_type, &state.pool).await?;
    Ok(Json(DeleteCount { deleted }))
}

#[derive(Debug, Deserialize)]
pub struct DeleteAllForKeyRequest {
    pub token: String,
    pub user_id: i64,
}

pub async fn delete_all_for_key_handler(
    Extension(state): Extension<AppState>,
    Json(req): Json<DeleteAllForKeyRequest>,
) -> Result<Json<DeleteCount>, AppError> {
    let deleted = Schedule::delete_all_for_key(&req.token, req.user_id, &state.pool).await?;
    Ok(Json(DeleteCount { deleted }))
}
