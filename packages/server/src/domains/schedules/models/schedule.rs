use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

/// Discriminates which trigger fields on a [`Schedule`] are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "schedule_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Daily,
    Interval,
    Once,
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleType::Daily => write!(f, "daily"),
            ScheduleType::Interval => write!(f, "interval"),
            ScheduleType::Once => write!(f, "once"),
        }
    }
}

/// A persistent trigger specification, the sole entity in this service.
///
/// `times_hhmm` is stored as JSONB; `time_hhmm` is kept alongside it as the
/// legacy single-time representation (spec §9: storage detail, API keeps
/// both fields for backward compatibility).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Schedule {
    pub id: Uuid,
    pub token: String,
    pub user_id: i64,
    pub scenario_id: i64,
    #[sqlx(rename = "type")]
    pub schedule_type: ScheduleType,

    pub time_hhmm: Option<String>,
    pub times_hhmm: Option<Json<Vec<String>>>,
    pub timezone: Option<String>,

    pub every_minutes: Option<i32>,

    pub run_at: Option<DateTime<Utc>>,

    pub active: bool,

    pub next_run_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,

    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status_code: Option<i32>,
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// Local times configured for a daily schedule: `times_hhmm` if
    /// non-empty, else the legacy single `time_hhmm`, else empty.
    pub fn local_times(&self) -> Vec<String> {
        match &self.times_hhmm {
            Some(Json(times)) if !times.is_empty() => times.clone(),
            _ => self.time_hhmm.iter().cloned().collect(),
        }
    }
}

/// Parameters for creating a daily schedule.
pub struct CreateDaily {
    pub token: String,
    pub user_id: i64,
    pub scenario_id: i64,
    pub time_hhmm: Option<String>,
    pub times_hhmm: Option<Vec<String>>,
    pub timezone: String,
}

/// Parameters for creating an interval schedule.
pub struct CreateInterval {
    pub token: String,
    pub user_id: i64,
    pub scenario_id: i64,
    pub every_minutes: i32,
}

/// Parameters for creating a once schedule.
pub struct CreateOnce {
    pub token: String,
    pub user_id: i64,
    pub scenario_id: i64,
    pub run_at: DateTime<Utc>,
}

/// Partial update applied to an existing schedule (PATCH semantics: only
/// `Some` fields are written). `times_hhmm` wins over `time_hhmm` when both
/// are present in the same update — the order spec §9's Open Question
/// recommends.
#[derive(Debug, Clone, Default)]
pub struct UpdateScheduleParams {
    pub scenario_id: Option<i64>,
    pub time_hhmm: Option<String>,
    pub times_hhmm: Option<Vec<String>>,
    pub timezone: Option<String>,
    pub every_minutes: Option<i32>,
    pub run_at: Option<DateTime<Utc>>,
    pub active: Option<bool>,
}

/// Optional filters for `list`.
#[derive(Debug, Clone, Default)]
pub struct ScheduleFilter {
    pub token: Option<String>,
    pub user_id: Option<i64>,
    pub active: Option<bool>,
}

/// A row claimed by the worker: just enough to dispatch, nothing more.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClaimedSchedule {
    pub id: Uuid,
    pub token: String,
    pub user_id: i64,
    pub scenario_id: i64,
    #[sqlx(rename = "type")]
    pub schedule_type: ScheduleType,
}

/// What the worker writes back after firing a schedule (spec §4.E.3).
pub struct FireOutcome {
    pub last_run_at: DateTime<Utc>,
    pub last_status_code: Option<i32>,
    pub last_error: Option<String>,
    pub active: bool,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl Schedule {
    pub async fn create_daily(params: CreateDaily, pool: &PgPool) -> sqlx::Result<Self> {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO schedules (
                id, token, user_id, scenario_id, type,
                time_hhmm, times_hhmm, timezone, active
            )
            VALUES ($1, $2, $3, $4, 'daily', $5, $6, $7, true)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(params.token)
        .bind(params.user_id)
        .bind(params.scenario_id)
        .bind(params.time_hhmm)
        .bind(params.times_hhmm.map(Json))
        .bind(params.timezone)
        .fetch_one(pool)
        .await
    }

    pub async fn create_interval(params: CreateInterval, pool: &PgPool) -> sqlx::Result<Self> {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO schedules (id, token, user_id, scenario_id, type, every_minutes, active)
            VALUES ($1, $2, $3, $4, 'interval', $5, true)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(params.token)
        .bind(params.user_id)
        .bind(params.scenario_id)
        .bind(params.every_minutes)
        .fetch_one(pool)
        .await
    }

    pub async fn create_once(params: CreateOnce, pool: &PgPool) -> sqlx::Result<Self> {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO schedules (id, token, user_id, scenario_id, type, run_at, active)
            VALUES ($1, $2, $3, $4, 'once', $5, true)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(params.token)
        .bind(params.user_id)
        .bind(params.scenario_id)
        .bind(params.run_at)
        .fetch_one(pool)
        .await
    }

    pub async fn get_by_id(id: Uuid, pool: &PgPool) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM schedules WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Schedules matching `(token, user_id, type)`, newest first.
    pub async fn find_by_key(
        token: &str,
        user_id: i64,
        schedule_type: ScheduleType,
        pool: &PgPool,
    ) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM schedules
            WHERE token = $1 AND user_id = $2 AND type = $3
            ORDER BY created_at DESC
            "#,
        )
        .bind(token)
        .bind(user_id)
        .bind(schedule_type)
        .fetch_all(pool)
        .await
    }

    pub async fn list(filter: &ScheduleFilter, pool: &PgPool) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM schedules
            WHERE ($1::text IS NULL OR token = $1)
              AND ($2::bigint IS NULL OR user_id = $2)
              AND ($3::boolean IS NULL OR active = $3)
            ORDER BY created_at DESC
            "#,
        )
        .bind(&filter.token)
        .bind(filter.user_id)
        .bind(filter.active)
        .fetch_all(pool)
        .await
    }

    /// Apply a partial update and clear `locked_until` (un-freezes a
    /// mis-leased row per spec §4.F). Callers recompute `next_run_at`
    /// against the returned row and write it via `set_next_run_at`.
    pub async fn update(
        id: Uuid,
        params: &UpdateScheduleParams,
        pool: &PgPool,
    ) -> sqlx::Result<Option<Self>> {
        let time_hhmm = if params.times_hhmm.is_some() {
            None
        } else {
            params.time_hhmm.clone()
        };

        sqlx::query_as::<_, Self>(
            r#"
            UPDATE schedules SET
                scenario_id = COALESCE($2, scenario_id),
                time_hhmm = COALESCE($3, time_hhmm),
                times_hhmm = COALESCE($4, times_hhmm),
                timezone = COALESCE($5, timezone),
                every_minutes = COALESCE($6, every_minutes),
                run_at = COALESCE($7, run_at),
                active = COALESCE($8, active),
                locked_until = NULL,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(params.scenario_id)
        .bind(time_hhmm)
        .bind(params.times_hhmm.clone().map(Json))
        .bind(&params.timezone)
        .bind(params.every_minutes)
        .bind(params.run_at)
        .bind(params.active)
        .fetch_optional(pool)
        .await
    }

    /// Replace the daily trigger shape wholesale: `time_hhmm`/`times_hhmm`
    /// are set to exactly what's passed (clearing whichever is absent)
    /// rather than `COALESCE`-preserving whatever the row had before. Used
    /// by the `(token, user_id)` singleton upsert, where a fresh POST is a
    /// full re-registration, not a partial PATCH.
    pub async fn replace_daily_trigger(
        id: Uuid,
        scenario_id: i64,
        time_hhmm: Option<String>,
        times_hhmm: Option<Vec<String>>,
        timezone: String,
        pool: &PgPool,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE schedules SET
                scenario_id = $2,
                time_hhmm = $3,
                times_hhmm = $4,
                timezone = $5,
                active = true,
                locked_until = NULL,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(scenario_id)
        .bind(time_hhmm)
        .bind(times_hhmm.map(Json))
        .bind(timezone)
        .fetch_optional(pool)
        .await
    }

    /// Set `next_run_at` directly (used after create/update's recompute).
    pub async fn set_next_run_at(
        id: Uuid,
        next_run_at: Option<DateTime<Utc>>,
        pool: &PgPool,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE schedules SET next_run_at = $2, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(next_run_at)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(id: Uuid, pool: &PgPool) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete schedules matching `(token, user_id, type)`. Returns the count
    /// deleted.
    pub async fn delete_by_key(
        token: &str,
        user_id: i64,
        schedule_type: ScheduleType,
        pool: &PgPool,
    ) -> sqlx::Result<u64> {
        let result =
            sqlx::query("DELETE FROM schedules WHERE token = $1 AND user_id = $2 AND type = $3")
                .bind(token)
                .bind(user_id)
                .bind(schedule_type)
                .execute(pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Delete all schedules for `(token, user_id)` regardless of type.
    /// Returns the count deleted.
    pub async fn delete_all_for_key(token: &str, user_id: i64, pool: &PgPool) -> sqlx::Result<u64> {
        let result = sqlx::query("DELETE FROM schedules WHERE token = $1 AND user_id = $2")
            .bind(token)
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Read-only: up to `batch_size` claimable ids, oldest `next_run_at`
    /// first. Not a claim — see `claim`.
    pub async fn peek_due(
        batch_size: i64,
        now: DateTime<Utc>,
        pool: &PgPool,
    ) -> sqlx::Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM schedules
            WHERE active
              AND next_run_at IS NOT NULL
              AND next_run_at <= $1
              AND (locked_until IS NULL OR locked_until <= $1)
            ORDER BY next_run_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(batch_size)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Atomically claim the subset of `ids` still claimable at `now`,
    /// setting `locked_until := lease_until`. Race-safe across concurrent
    /// worker processes: the `UPDATE ... WHERE <predicate> RETURNING` is a
    /// single statement, so two claimers racing on the same row never both
    /// see it as unclaimed.
    pub async fn claim(
        ids: &[Uuid],
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
        pool: &PgPool,
    ) -> sqlx::Result<Vec<ClaimedSchedule>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, ClaimedSchedule>(
            r#"
            UPDATE schedules SET locked_until = $2
            WHERE id = ANY($1)
              AND active
              AND next_run_at IS NOT NULL
              AND next_run_at <= $3
              AND (locked_until IS NULL OR locked_until <= $3)
            RETURNING id, token, user_id, scenario_id, type
            "#,
        )
        .bind(ids)
        .bind(lease_until)
        .bind(now)
        .fetch_all(pool)
        .await
    }

    /// Post-fire writeback (spec §4.E.3): release the lease, record the
    /// outcome, and apply the already-computed `active`/`next_run_at`.
    pub async fn record_fire(
        id: Uuid,
        outcome: &FireOutcome,
        pool: &PgPool,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE schedules SET
                last_run_at = $2,
                last_status_code = $3,
                last_error = $4,
                locked_until = NULL,
                active = $5,
                next_run_at = $6,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(outcome.last_run_at)
        .bind(outcome.last_status_code)
        .bind(&outcome.last_error)
        .bind(outcome.active)
        .bind(outcome.next_run_at)
        .fetch_optional(pool)
        .await
    }
}
