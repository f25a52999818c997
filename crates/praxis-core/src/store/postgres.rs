//! Postgres store. Row locks come from `SELECT … FOR UPDATE`, uniqueness
//! conflicts from the schema's unique keys, and optimistic concurrency from
//! the `version` column checked on every UPDATE.

use crate::error::{CoreError, Result};
use crate::model::{
    Approval, CommitteeMember, CommitteeVote, Enrollment, EvaluationTracker, Training, VoteTally,
};
use crate::store::{ApprovalStore, EvaluationStore, NewApproval, Persistence, TrackerStats};
use crate::types::{ApprovalStatus, EvaluationKind, TrackerStatus, VoteDecision};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn approval_from_row(row: &PgRow) -> Result<Approval> {
    Ok(Approval {
        approval_id: row.try_get("approval_id")?,
        enrollment_id: row.try_get("enrollment_id")?,
        advisor_id: row.try_get("advisor_id")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        remarks: row.try_get("remarks")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        version: row.try_get("version")?,
    })
}

fn vote_from_row(row: &PgRow) -> Result<CommitteeVote> {
    Ok(CommitteeVote {
        vote_id: row.try_get("vote_id")?,
        approval_id: row.try_get("approval_id")?,
        voter_instructor_id: row.try_get("voter_instructor_id")?,
        decision: row.try_get::<String, _>("decision")?.parse()?,
        remarks: row.try_get("remarks")?,
        cast_at: row.try_get("cast_at")?,
    })
}

fn tracker_from_row(row: &PgRow) -> Result<EvaluationTracker> {
    Ok(EvaluationTracker {
        tracker_id: row.try_get("tracker_id")?,
        training_id: row.try_get("training_id")?,
        kind: row.try_get::<String, _>("kind")?.parse()?,
        status: row.try_get::<String, _>("status")?.parse()?,
        evaluator_id: row.try_get("evaluator_id")?,
        due_date: row.try_get("due_date")?,
        completed_at: row.try_get("completed_at")?,
        remarks: row.try_get("remarks")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        version: row.try_get("version")?,
    })
}

const TRACKER_COLUMNS: &str = "tracker_id, training_id, kind, status, evaluator_id, due_date, \
     completed_at, remarks, created_at, updated_at, version";

const APPROVAL_COLUMNS: &str =
    "approval_id, enrollment_id, advisor_id, status, remarks, created_at, updated_at, version";

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[async_trait]
impl Persistence for PgStore {
    type Tx = sqlx::Transaction<'static, sqlx::Postgres>;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<()> {
        tx.commit().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ApprovalStore
// ---------------------------------------------------------------------------

#[async_trait]
impl ApprovalStore for PgStore {
    async fn enrollment(
        &self,
        tx: &mut Self::Tx,
        enrollment_id: i64,
    ) -> Result<Option<Enrollment>> {
        let row = sqlx::query(
            "SELECT enrollment_id, student_id, course_section_id \
             FROM enrollments WHERE enrollment_id = $1",
        )
        .bind(enrollment_id)
        .fetch_optional(&mut **tx)
        .await?;
        row.map(|row| {
            Ok(Enrollment {
                enrollment_id: row.try_get("enrollment_id")?,
                student_id: row.try_get("student_id")?,
                course_section_id: row.try_get("course_section_id")?,
            })
        })
        .transpose()
    }

    async fn insert_approval(&self, tx: &mut Self::Tx, new: NewApproval) -> Result<Approval> {
        let result = sqlx::query(&format!(
            "INSERT INTO approvals \
             (enrollment_id, advisor_id, status, remarks, created_at, updated_at, version) \
             VALUES ($1, $2, $3, NULL, $4, $4, 1) \
             RETURNING {APPROVAL_COLUMNS}"
        ))
        .bind(new.enrollment_id)
        .bind(new.advisor_id)
        .bind(ApprovalStatus::Registered.as_str())
        .bind(new.now)
        .fetch_one(&mut **tx)
        .await;

        match result {
            Ok(row) => approval_from_row(&row),
            Err(err) if is_unique_violation(&err) => Err(CoreError::Conflict(format!(
                "approval already exists for enrollment {}",
                new.enrollment_id
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn approval_for_update(
        &self,
        tx: &mut Self::Tx,
        enrollment_id: i64,
    ) -> Result<Option<Approval>> {
        let row = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approvals WHERE enrollment_id = $1 FOR UPDATE"
        ))
        .bind(enrollment_id)
        .fetch_optional(&mut **tx)
        .await?;
        row.map(|row| approval_from_row(&row)).transpose()
    }

    async fn update_approval(&self, tx: &mut Self::Tx, approval: &mut Approval) -> Result<()> {
        let result = sqlx::query(
            "UPDATE approvals \
             SET advisor_id = $1, status = $2, remarks = $3, updated_at = $4, \
                 version = version + 1 \
             WHERE approval_id = $5 AND version = $6",
        )
        .bind(approval.advisor_id)
        .bind(approval.status.as_str())
        .bind(&approval.remarks)
        .bind(approval.updated_at)
        .bind(approval.approval_id)
        .bind(approval.version)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::StaleWrite {
                entity: "approval",
                id: approval.approval_id,
            });
        }
        approval.version += 1;
        Ok(())
    }

    async fn list_approvals(
        &self,
        tx: &mut Self::Tx,
        status: Option<ApprovalStatus>,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<Approval>, i64)> {
        let offset = (page.max(1) as i64 - 1) * limit as i64;

        let (total, rows) = match status {
            Some(status) => {
                let total: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM approvals WHERE status = $1")
                        .bind(status.as_str())
                        .fetch_one(&mut **tx)
                        .await?;
                let rows = sqlx::query(&format!(
                    "SELECT {APPROVAL_COLUMNS} FROM approvals WHERE status = $1 \
                     ORDER BY approval_id LIMIT $2 OFFSET $3"
                ))
                .bind(status.as_str())
                .bind(limit as i64)
                .bind(offset)
                .fetch_all(&mut **tx)
                .await?;
                (total, rows)
            }
            None => {
                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM approvals")
                    .fetch_one(&mut **tx)
                    .await?;
                let rows = sqlx::query(&format!(
                    "SELECT {APPROVAL_COLUMNS} FROM approvals \
                     ORDER BY approval_id LIMIT $1 OFFSET $2"
                ))
                .bind(limit as i64)
                .bind(offset)
                .fetch_all(&mut **tx)
                .await?;
                (total, rows)
            }
        };

        let approvals = rows
            .iter()
            .map(approval_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok((approvals, total))
    }

    async fn append_vote(
        &self,
        tx: &mut Self::Tx,
        approval_id: i64,
        voter_instructor_id: i64,
        decision: VoteDecision,
        remarks: Option<String>,
        cast_at: DateTime<Utc>,
    ) -> Result<CommitteeVote> {
        let result = sqlx::query(
            "INSERT INTO committee_votes \
             (approval_id, voter_instructor_id, decision, remarks, cast_at) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING vote_id, approval_id, voter_instructor_id, decision, remarks, cast_at",
        )
        .bind(approval_id)
        .bind(voter_instructor_id)
        .bind(decision.as_str())
        .bind(&remarks)
        .bind(cast_at)
        .fetch_one(&mut **tx)
        .await;

        match result {
            Ok(row) => vote_from_row(&row),
            Err(err) if is_unique_violation(&err) => Err(CoreError::DuplicateVote {
                approval_id,
                voter_id: voter_instructor_id,
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn votes(&self, tx: &mut Self::Tx, approval_id: i64) -> Result<Vec<CommitteeVote>> {
        let rows = sqlx::query(
            "SELECT vote_id, approval_id, voter_instructor_id, decision, remarks, cast_at \
             FROM committee_votes WHERE approval_id = $1 ORDER BY vote_id",
        )
        .bind(approval_id)
        .fetch_all(&mut **tx)
        .await?;
        rows.iter().map(vote_from_row).collect()
    }

    async fn count_votes(&self, tx: &mut Self::Tx, approval_id: i64) -> Result<VoteTally> {
        let row = sqlx::query(
            "SELECT \
               COUNT(*) FILTER (WHERE decision = 'approve') AS approvals, \
               COUNT(*) FILTER (WHERE decision = 'reject') AS rejections \
             FROM committee_votes WHERE approval_id = $1",
        )
        .bind(approval_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(VoteTally {
            approvals: row.try_get("approvals")?,
            rejections: row.try_get("rejections")?,
        })
    }

    async fn committee_members(
        &self,
        tx: &mut Self::Tx,
        course_section_id: i64,
    ) -> Result<Vec<CommitteeMember>> {
        let rows = sqlx::query(
            "SELECT course_section_id, instructor_id, role \
             FROM committee_members WHERE course_section_id = $1 ORDER BY instructor_id",
        )
        .bind(course_section_id)
        .fetch_all(&mut **tx)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(CommitteeMember {
                    course_section_id: row.try_get("course_section_id")?,
                    instructor_id: row.try_get("instructor_id")?,
                    role: row.try_get::<String, _>("role")?.parse()?,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// EvaluationStore
// ---------------------------------------------------------------------------

#[async_trait]
impl EvaluationStore for PgStore {
    async fn training(&self, tx: &mut Self::Tx, training_id: i64) -> Result<Option<Training>> {
        let row = sqlx::query(
            "SELECT training_id, enrollment_id, company_id, start_date, end_date \
             FROM trainings WHERE training_id = $1",
        )
        .bind(training_id)
        .fetch_optional(&mut **tx)
        .await?;
        row.map(|row| {
            Ok(Training {
                training_id: row.try_get("training_id")?,
                enrollment_id: row.try_get("enrollment_id")?,
                company_id: row.try_get("company_id")?,
                start_date: row.try_get("start_date")?,
                end_date: row.try_get("end_date")?,
            })
        })
        .transpose()
    }

    async fn ensure_trackers(
        &self,
        tx: &mut Self::Tx,
        training_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<EvaluationTracker>> {
        for kind in EvaluationKind::all() {
            sqlx::query(
                "INSERT INTO evaluation_trackers \
                 (training_id, kind, status, remarks, created_at, updated_at, version) \
                 VALUES ($1, $2, $3, NULL, $4, $4, 1) \
                 ON CONFLICT (training_id, kind) DO NOTHING",
            )
            .bind(training_id)
            .bind(kind.as_str())
            .bind(TrackerStatus::Pending.as_str())
            .bind(now)
            .execute(&mut **tx)
            .await?;
        }
        self.trackers_for_training(tx, training_id).await
    }

    async fn tracker_for_update(
        &self,
        tx: &mut Self::Tx,
        tracker_id: i64,
    ) -> Result<Option<EvaluationTracker>> {
        let row = sqlx::query(&format!(
            "SELECT {TRACKER_COLUMNS} FROM evaluation_trackers \
             WHERE tracker_id = $1 FOR UPDATE"
        ))
        .bind(tracker_id)
        .fetch_optional(&mut **tx)
        .await?;
        row.map(|row| tracker_from_row(&row)).transpose()
    }

    async fn tracker_by_key_for_update(
        &self,
        tx: &mut Self::Tx,
        training_id: i64,
        kind: EvaluationKind,
    ) -> Result<Option<EvaluationTracker>> {
        let row = sqlx::query(&format!(
            "SELECT {TRACKER_COLUMNS} FROM evaluation_trackers \
             WHERE training_id = $1 AND kind = $2 FOR UPDATE"
        ))
        .bind(training_id)
        .bind(kind.as_str())
        .fetch_optional(&mut **tx)
        .await?;
        row.map(|row| tracker_from_row(&row)).transpose()
    }

    async fn trackers_for_training(
        &self,
        tx: &mut Self::Tx,
        training_id: i64,
    ) -> Result<Vec<EvaluationTracker>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRACKER_COLUMNS} FROM evaluation_trackers \
             WHERE training_id = $1 ORDER BY tracker_id"
        ))
        .bind(training_id)
        .fetch_all(&mut **tx)
        .await?;
        rows.iter().map(tracker_from_row).collect()
    }

    async fn update_tracker(
        &self,
        tx: &mut Self::Tx,
        tracker: &mut EvaluationTracker,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE evaluation_trackers \
             SET status = $1, evaluator_id = $2, due_date = $3, completed_at = $4, \
                 remarks = $5, updated_at = $6, version = version + 1 \
             WHERE tracker_id = $7 AND version = $8",
        )
        .bind(tracker.status.as_str())
        .bind(tracker.evaluator_id)
        .bind(tracker.due_date)
        .bind(tracker.completed_at)
        .bind(&tracker.remarks)
        .bind(tracker.updated_at)
        .bind(tracker.tracker_id)
        .bind(tracker.version)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::StaleWrite {
                entity: "tracker",
                id: tracker.tracker_id,
            });
        }
        tracker.version += 1;
        Ok(())
    }

    async fn list_trackers(
        &self,
        tx: &mut Self::Tx,
        kind: Option<EvaluationKind>,
        status: Option<TrackerStatus>,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<EvaluationTracker>, i64)> {
        // Dynamic filter: kind and status are optional and independently
        // combinable, so the WHERE clause is assembled then bound in order.
        let mut clauses = Vec::new();
        if kind.is_some() {
            clauses.push(format!("kind = ${}", clauses.len() + 1));
        }
        if status.is_some() {
            clauses.push(format!("status = ${}", clauses.len() + 1));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM evaluation_trackers{where_sql}");
        let mut count_query = sqlx::query_scalar(&count_sql);
        if let Some(kind) = kind {
            count_query = count_query.bind(kind.as_str());
        }
        if let Some(status) = status {
            count_query = count_query.bind(status.as_str());
        }
        let total: i64 = count_query.fetch_one(&mut **tx).await?;

        let offset = (page.max(1) as i64 - 1) * limit as i64;
        let list_sql = format!(
            "SELECT {TRACKER_COLUMNS} FROM evaluation_trackers{where_sql} \
             ORDER BY tracker_id LIMIT ${} OFFSET ${}",
            clauses.len() + 1,
            clauses.len() + 2
        );
        let mut list_query = sqlx::query(&list_sql);
        if let Some(kind) = kind {
            list_query = list_query.bind(kind.as_str());
        }
        if let Some(status) = status {
            list_query = list_query.bind(status.as_str());
        }
        let rows = list_query
            .bind(limit as i64)
            .bind(offset)
            .fetch_all(&mut **tx)
            .await?;

        let trackers = rows
            .iter()
            .map(tracker_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok((trackers, total))
    }

    async fn overdue_for_update(
        &self,
        tx: &mut Self::Tx,
        now: DateTime<Utc>,
    ) -> Result<Vec<EvaluationTracker>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRACKER_COLUMNS} FROM evaluation_trackers \
             WHERE status IN ('pending', 'in_progress') \
               AND due_date IS NOT NULL AND due_date < $1 \
             ORDER BY tracker_id FOR UPDATE"
        ))
        .bind(now)
        .fetch_all(&mut **tx)
        .await?;
        rows.iter().map(tracker_from_row).collect()
    }

    async fn trackers_by_evaluator(
        &self,
        tx: &mut Self::Tx,
        evaluator_id: i64,
        status: Option<TrackerStatus>,
    ) -> Result<Vec<EvaluationTracker>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {TRACKER_COLUMNS} FROM evaluation_trackers \
                     WHERE evaluator_id = $1 AND status = $2 ORDER BY tracker_id"
                ))
                .bind(evaluator_id)
                .bind(status.as_str())
                .fetch_all(&mut **tx)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {TRACKER_COLUMNS} FROM evaluation_trackers \
                     WHERE evaluator_id = $1 ORDER BY tracker_id"
                ))
                .bind(evaluator_id)
                .fetch_all(&mut **tx)
                .await?
            }
        };
        rows.iter().map(tracker_from_row).collect()
    }

    async fn tracker_stats(&self, tx: &mut Self::Tx) -> Result<TrackerStats> {
        let mut stats = TrackerStats::default();

        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM evaluation_trackers GROUP BY status",
        )
        .fetch_all(&mut **tx)
        .await?;
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            if status == TrackerStatus::Overdue.as_str() {
                stats.overdue_count = n;
            }
            stats.by_status.insert(status, n);
        }

        let rows =
            sqlx::query("SELECT kind, COUNT(*) AS n FROM evaluation_trackers GROUP BY kind")
                .fetch_all(&mut **tx)
                .await?;
        for row in rows {
            stats
                .by_type
                .insert(row.try_get("kind")?, row.try_get("n")?);
        }

        Ok(stats)
    }

    async fn student_evaluation(
        &self,
        tx: &mut Self::Tx,
        training_id: i64,
    ) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT submitted_at FROM student_company_evaluations WHERE training_id = $1",
        )
        .bind(training_id)
        .fetch_optional(&mut **tx)
        .await?;
        row.map(|row| Ok(row.try_get("submitted_at")?)).transpose()
    }
}
