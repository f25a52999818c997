//! Evaluation tracker engine.
//!
//! Three evaluation obligations fan out per training. The status lattice is
//! pending → in_progress → completed, with overdue entered by the sweep from
//! the two live states; overdue is not terminal and may still complete. Once
//! completed a tracker is immutable except for remarks. Completion of the
//! student-evaluates-company kind is witnessed by the result table, which the
//! read paths reconcile against.

use crate::clock::SharedClock;
use crate::error::{CoreError, Result};
use crate::model::{EvaluationTracker, Page};
use crate::store::{EvaluationStore, TrackerStats};
use crate::types::{EvaluationKind, OverallProgress, TrackerStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub training_id: i64,
    pub overall_progress: OverallProgress,
    pub trackers: Vec<EvaluationTracker>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentEvaluationStatus {
    pub has_evaluated: bool,
    pub evaluation_date: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct EvaluationEngine<S> {
    store: Arc<S>,
    clock: SharedClock,
}

impl<S> Clone for EvaluationEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: EvaluationStore> EvaluationEngine<S> {
    pub fn new(store: Arc<S>, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// Fan out the three trackers for a training in one transaction.
    /// Idempotent: re-invocation leaves existing rows untouched.
    pub async fn ensure_trackers(&self, training_id: i64) -> Result<Vec<EvaluationTracker>> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        if self.store.training(&mut tx, training_id).await?.is_none() {
            return Err(CoreError::NotFound(format!("training {training_id}")));
        }
        let trackers = self.store.ensure_trackers(&mut tx, training_id, now).await?;
        self.store.commit(tx).await?;
        tracing::info!(training_id, "trackers ensured");
        Ok(trackers)
    }

    pub async fn update_status(
        &self,
        tracker_id: i64,
        new_status: TrackerStatus,
        remarks: Option<String>,
    ) -> Result<EvaluationTracker> {
        match self
            .update_status_once(tracker_id, new_status, remarks.clone())
            .await
        {
            Err(err) if err.is_transient() => {
                tracing::warn!(tracker_id, %err, "retrying tracker status update");
                self.update_status_once(tracker_id, new_status, remarks).await
            }
            other => other,
        }
    }

    async fn update_status_once(
        &self,
        tracker_id: i64,
        new_status: TrackerStatus,
        remarks: Option<String>,
    ) -> Result<EvaluationTracker> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut tracker = self
            .store
            .tracker_for_update(&mut tx, tracker_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("tracker {tracker_id}")))?;

        if tracker.status == TrackerStatus::Completed {
            if new_status != TrackerStatus::Completed {
                return Err(CoreError::InvalidState(
                    "completed trackers are immutable".to_string(),
                ));
            }
            // Remarks stay editable on a completed tracker.
            if let Some(remarks) = remarks {
                tracker.remarks = Some(remarks);
                tracker.updated_at = now;
                self.store.update_tracker(&mut tx, &mut tracker).await?;
            }
            self.store.commit(tx).await?;
            return Ok(tracker);
        }

        if new_status == TrackerStatus::Completed {
            if tracker.kind.has_witness()
                && self
                    .store
                    .student_evaluation(&mut tx, tracker.training_id)
                    .await?
                    .is_none()
            {
                return Err(CoreError::InvalidState(
                    "no submitted evaluation to complete against".to_string(),
                ));
            }
            tracker.completed_at = Some(now);
        }

        tracker.status = new_status;
        if let Some(remarks) = remarks {
            tracker.remarks = Some(remarks);
        }
        tracker.updated_at = now;
        self.store.update_tracker(&mut tx, &mut tracker).await?;
        self.store.commit(tx).await?;
        tracing::info!(tracker_id, status = %tracker.status, "tracker status updated");
        Ok(tracker)
    }

    pub async fn assign_evaluator(
        &self,
        tracker_id: i64,
        evaluator_id: i64,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<EvaluationTracker> {
        match self
            .assign_evaluator_once(tracker_id, evaluator_id, due_date)
            .await
        {
            Err(err) if err.is_transient() => {
                tracing::warn!(tracker_id, %err, "retrying evaluator assignment");
                self.assign_evaluator_once(tracker_id, evaluator_id, due_date)
                    .await
            }
            other => other,
        }
    }

    async fn assign_evaluator_once(
        &self,
        tracker_id: i64,
        evaluator_id: i64,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<EvaluationTracker> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut tracker = self
            .store
            .tracker_for_update(&mut tx, tracker_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("tracker {tracker_id}")))?;

        if tracker.status == TrackerStatus::Completed {
            return Err(CoreError::InvalidState(
                "completed trackers are immutable".to_string(),
            ));
        }

        tracker.evaluator_id = Some(evaluator_id);
        tracker.due_date = due_date;
        tracker.updated_at = now;
        self.store.update_tracker(&mut tx, &mut tracker).await?;
        self.store.commit(tx).await?;
        tracing::info!(tracker_id, evaluator_id, "evaluator assigned");
        Ok(tracker)
    }

    /// Completion signal, addressed by `(training, kind)` the way the form
    /// handlers know the obligation. Idempotent: a repeat call leaves
    /// `completed_at` at the first call's instant.
    pub async fn mark_completed(
        &self,
        training_id: i64,
        kind: EvaluationKind,
    ) -> Result<EvaluationTracker> {
        match self.mark_completed_once(training_id, kind).await {
            Err(err) if err.is_transient() => {
                tracing::warn!(training_id, %err, "retrying completion");
                self.mark_completed_once(training_id, kind).await
            }
            other => other,
        }
    }

    async fn mark_completed_once(
        &self,
        training_id: i64,
        kind: EvaluationKind,
    ) -> Result<EvaluationTracker> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut tracker = self
            .store
            .tracker_by_key_for_update(&mut tx, training_id, kind)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!("tracker for training {training_id} kind {kind}"))
            })?;

        if tracker.status == TrackerStatus::Completed {
            self.store.commit(tx).await?;
            return Ok(tracker);
        }

        tracker.status = TrackerStatus::Completed;
        tracker.completed_at = Some(now);
        tracker.updated_at = now;
        self.store.update_tracker(&mut tx, &mut tracker).await?;
        self.store.commit(tx).await?;
        tracing::info!(training_id, kind = %kind, "tracker completed");
        Ok(tracker)
    }

    /// Bulk transition of past-due live trackers into overdue. One
    /// transaction, one `now` sample; returns the number transitioned.
    pub async fn sweep_overdue(&self) -> Result<u64> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut rows = self.store.overdue_for_update(&mut tx, now).await?;
        for tracker in rows.iter_mut() {
            tracker.status = TrackerStatus::Overdue;
            tracker.updated_at = now;
            self.store.update_tracker(&mut tx, tracker).await?;
        }
        let count = rows.len() as u64;
        self.store.commit(tx).await?;
        tracing::info!(count, "overdue sweep finished");
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    /// The three trackers plus derived overall progress. Statuses are
    /// reconciled from the completion witness: a submitted evaluation counts
    /// as completed even when the tracker has not caught up yet.
    pub async fn summary(&self, training_id: i64) -> Result<Summary> {
        let mut tx = self.store.begin().await?;
        if self.store.training(&mut tx, training_id).await?.is_none() {
            return Err(CoreError::NotFound(format!("training {training_id}")));
        }
        let mut trackers = self.store.trackers_for_training(&mut tx, training_id).await?;
        if trackers.is_empty() {
            return Err(CoreError::NotFound(format!(
                "no trackers for training {training_id}"
            )));
        }
        let witness = self.store.student_evaluation(&mut tx, training_id).await?;
        self.store.commit(tx).await?;

        if let Some(submitted_at) = witness {
            for tracker in trackers
                .iter_mut()
                .filter(|t| t.kind.has_witness() && t.status != TrackerStatus::Completed)
            {
                tracker.status = TrackerStatus::Completed;
                tracker.completed_at = Some(submitted_at);
            }
        }

        let statuses: Vec<TrackerStatus> = trackers.iter().map(|t| t.status).collect();
        Ok(Summary {
            training_id,
            overall_progress: OverallProgress::derive(&statuses),
            trackers,
        })
    }

    /// Durable completion check for the student evaluation, answered from the
    /// witness table so out-of-band inserts remain observable.
    pub async fn student_status(&self, training_id: i64) -> Result<StudentEvaluationStatus> {
        let mut tx = self.store.begin().await?;
        if self.store.training(&mut tx, training_id).await?.is_none() {
            return Err(CoreError::NotFound(format!("training {training_id}")));
        }
        let witness = self.store.student_evaluation(&mut tx, training_id).await?;
        self.store.commit(tx).await?;
        Ok(StudentEvaluationStatus {
            has_evaluated: witness.is_some(),
            evaluation_date: witness,
        })
    }

    pub async fn list(
        &self,
        kind: Option<EvaluationKind>,
        status: Option<TrackerStatus>,
        page: u32,
        limit: u32,
    ) -> Result<Page<EvaluationTracker>> {
        let mut tx = self.store.begin().await?;
        let (items, total) = self
            .store
            .list_trackers(&mut tx, kind, status, page, limit)
            .await?;
        self.store.commit(tx).await?;
        Ok(Page::new(items, page, limit, total))
    }

    /// The sweep-eligible set as of now: live trackers already past due.
    pub async fn list_overdue(&self) -> Result<Vec<EvaluationTracker>> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let rows = self.store.overdue_for_update(&mut tx, now).await?;
        self.store.commit(tx).await?;
        Ok(rows)
    }

    pub async fn assignments(
        &self,
        evaluator_id: i64,
        status: Option<TrackerStatus>,
    ) -> Result<Vec<EvaluationTracker>> {
        let mut tx = self.store.begin().await?;
        let rows = self
            .store
            .trackers_by_evaluator(&mut tx, evaluator_id, status)
            .await?;
        self.store.commit(tx).await?;
        Ok(rows)
    }

    pub async fn stats(&self) -> Result<TrackerStats> {
        let mut tx = self.store.begin().await?;
        let stats = self.store.tracker_stats(&mut tx).await?;
        self.store.commit(tx).await?;
        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::Training;
    use crate::store::MemStore;
    use chrono::{NaiveDate, TimeZone};

    const TRAINING: i64 = 42;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    async fn store_with_training() -> Arc<MemStore> {
        let store = Arc::new(MemStore::new());
        store
            .seed_training(Training {
                training_id: TRAINING,
                enrollment_id: 7,
                company_id: 500,
                start_date: NaiveDate::from_ymd_opt(2024, 11, 1).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2025, 2, 28).unwrap(),
            })
            .await;
        store
    }

    fn engine_at(store: Arc<MemStore>, now: DateTime<Utc>) -> EvaluationEngine<MemStore> {
        EvaluationEngine::new(store, Arc::new(FixedClock(now)))
    }

    async fn engine() -> EvaluationEngine<MemStore> {
        engine_at(store_with_training().await, at(2025, 1, 2))
    }

    #[tokio::test]
    async fn fan_out_creates_exactly_three_kinds() {
        let engine = engine().await;
        let trackers = engine.ensure_trackers(TRAINING).await.unwrap();
        assert_eq!(trackers.len(), 3);
        let mut kinds: Vec<EvaluationKind> = trackers.iter().map(|t| t.kind).collect();
        kinds.sort_by_key(|k| k.as_str());
        let mut expected = EvaluationKind::all().to_vec();
        expected.sort_by_key(|k| k.as_str());
        assert_eq!(kinds, expected);
        assert!(trackers.iter().all(|t| t.status == TrackerStatus::Pending));
    }

    #[tokio::test]
    async fn fan_out_is_idempotent() {
        let engine = engine().await;
        let first = engine.ensure_trackers(TRAINING).await.unwrap();
        let again = engine.ensure_trackers(TRAINING).await.unwrap();
        assert_eq!(
            first.iter().map(|t| t.tracker_id).collect::<Vec<_>>(),
            again.iter().map(|t| t.tracker_id).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn fan_out_requires_training() {
        let engine = engine().await;
        let err = engine.ensure_trackers(999).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn completion_scenario_with_witness() {
        let store = store_with_training().await;
        let engine = engine_at(Arc::clone(&store), at(2025, 1, 5));
        let trackers = engine.ensure_trackers(TRAINING).await.unwrap();
        let student = trackers
            .iter()
            .find(|t| t.kind == EvaluationKind::StudentEvalCompany)
            .unwrap();

        engine
            .assign_evaluator(student.tracker_id, 99, Some(at(2025, 1, 10)))
            .await
            .unwrap();

        // Witness row lands out of band, then the completion command arrives.
        store.seed_student_evaluation(TRAINING, at(2025, 1, 6)).await;
        let completed = engine
            .mark_completed(TRAINING, EvaluationKind::StudentEvalCompany)
            .await
            .unwrap();
        assert_eq!(completed.status, TrackerStatus::Completed);

        let summary = engine.summary(TRAINING).await.unwrap();
        assert_eq!(summary.overall_progress, OverallProgress::InProgress);
    }

    #[tokio::test]
    async fn mark_completed_is_idempotent() {
        let store = store_with_training().await;
        let engine = engine_at(Arc::clone(&store), at(2025, 1, 5));
        engine.ensure_trackers(TRAINING).await.unwrap();
        let first = engine
            .mark_completed(TRAINING, EvaluationKind::VisitorEvalStudent)
            .await
            .unwrap();

        // A later repeat keeps the original completion instant.
        let later = engine_at(store, at(2025, 2, 1));
        let again = later
            .mark_completed(TRAINING, EvaluationKind::VisitorEvalStudent)
            .await
            .unwrap();
        assert_eq!(again.completed_at, first.completed_at);
        assert_eq!(again.version, first.version);
    }

    #[tokio::test]
    async fn completed_trackers_are_immutable_except_remarks() {
        let engine = engine().await;
        engine.ensure_trackers(TRAINING).await.unwrap();
        let done = engine
            .mark_completed(TRAINING, EvaluationKind::VisitorEvalCompany)
            .await
            .unwrap();

        let err = engine
            .update_status(done.tracker_id, TrackerStatus::Pending, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidState(_)));

        let err = engine
            .assign_evaluator(done.tracker_id, 5, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidState(_)));

        let updated = engine
            .update_status(
                done.tracker_id,
                TrackerStatus::Completed,
                Some("late paperwork".into()),
            )
            .await
            .unwrap();
        assert_eq!(updated.status, TrackerStatus::Completed);
        assert_eq!(updated.completed_at, done.completed_at);
        assert_eq!(updated.remarks.as_deref(), Some("late paperwork"));
    }

    #[tokio::test]
    async fn update_to_completed_requires_witness_for_student_kind() {
        let store = store_with_training().await;
        let engine = engine_at(Arc::clone(&store), at(2025, 1, 5));
        let trackers = engine.ensure_trackers(TRAINING).await.unwrap();
        let student = trackers
            .iter()
            .find(|t| t.kind == EvaluationKind::StudentEvalCompany)
            .unwrap();

        let err = engine
            .update_status(student.tracker_id, TrackerStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidState(_)));

        store.seed_student_evaluation(TRAINING, at(2025, 1, 4)).await;
        let done = engine
            .update_status(student.tracker_id, TrackerStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(done.status, TrackerStatus::Completed);
    }

    #[tokio::test]
    async fn sweep_transitions_exactly_the_eligible_rows() {
        let store = store_with_training().await;
        let setup = engine_at(Arc::clone(&store), at(2025, 1, 2));
        let trackers = setup.ensure_trackers(TRAINING).await.unwrap();

        // due 2025-01-01 pending, due 2025-01-15 in_progress, due 2025-02-01
        // completed.
        setup
            .assign_evaluator(trackers[0].tracker_id, 90, Some(at(2025, 1, 1)))
            .await
            .unwrap();
        setup
            .assign_evaluator(trackers[1].tracker_id, 91, Some(at(2025, 1, 15)))
            .await
            .unwrap();
        setup
            .update_status(trackers[1].tracker_id, TrackerStatus::InProgress, None)
            .await
            .unwrap();
        setup
            .assign_evaluator(trackers[2].tracker_id, 92, Some(at(2025, 2, 1)))
            .await
            .unwrap();
        setup
            .mark_completed(TRAINING, trackers[2].kind)
            .await
            .unwrap();

        let sweeper = engine_at(Arc::clone(&store), at(2025, 1, 20));
        let count = sweeper.sweep_overdue().await.unwrap();
        assert_eq!(count, 2);

        let summary = sweeper.summary(TRAINING).await.unwrap();
        let by_id = |id: i64| summary.trackers.iter().find(|t| t.tracker_id == id).unwrap();
        assert_eq!(by_id(trackers[0].tracker_id).status, TrackerStatus::Overdue);
        assert_eq!(by_id(trackers[1].tracker_id).status, TrackerStatus::Overdue);
        assert_eq!(
            by_id(trackers[2].tracker_id).status,
            TrackerStatus::Completed
        );

        // Re-running finds nothing left.
        assert_eq!(sweeper.sweep_overdue().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn overdue_is_not_terminal() {
        let store = store_with_training().await;
        let setup = engine_at(Arc::clone(&store), at(2025, 1, 2));
        let trackers = setup.ensure_trackers(TRAINING).await.unwrap();
        setup
            .assign_evaluator(trackers[1].tracker_id, 91, Some(at(2025, 1, 3)))
            .await
            .unwrap();

        let late = engine_at(store, at(2025, 1, 20));
        late.sweep_overdue().await.unwrap();
        let done = late
            .mark_completed(TRAINING, trackers[1].kind)
            .await
            .unwrap();
        assert_eq!(done.status, TrackerStatus::Completed);
    }

    #[tokio::test]
    async fn sweep_boundary_is_strictly_before_now() {
        let store = store_with_training().await;
        let setup = engine_at(Arc::clone(&store), at(2025, 1, 2));
        let trackers = setup.ensure_trackers(TRAINING).await.unwrap();
        setup
            .assign_evaluator(trackers[0].tracker_id, 90, Some(at(2025, 1, 20)))
            .await
            .unwrap();

        let sweeper = engine_at(store, at(2025, 1, 20));
        assert_eq!(sweeper.sweep_overdue().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn summary_reconciles_from_witness() {
        let store = store_with_training().await;
        let engine = engine_at(Arc::clone(&store), at(2025, 1, 5));
        engine.ensure_trackers(TRAINING).await.unwrap();

        // Out-of-band witness, no completion command yet.
        store.seed_student_evaluation(TRAINING, at(2025, 1, 4)).await;

        let summary = engine.summary(TRAINING).await.unwrap();
        let student = summary
            .trackers
            .iter()
            .find(|t| t.kind == EvaluationKind::StudentEvalCompany)
            .unwrap();
        assert_eq!(student.status, TrackerStatus::Completed);
        assert_eq!(student.completed_at, Some(at(2025, 1, 4)));
        assert_eq!(summary.overall_progress, OverallProgress::InProgress);

        let status = engine.student_status(TRAINING).await.unwrap();
        assert!(status.has_evaluated);
        assert_eq!(status.evaluation_date, Some(at(2025, 1, 4)));
    }

    #[tokio::test]
    async fn summary_progress_extremes() {
        let engine = engine().await;
        engine.ensure_trackers(TRAINING).await.unwrap();
        assert_eq!(
            engine.summary(TRAINING).await.unwrap().overall_progress,
            OverallProgress::NotStarted
        );
        for kind in EvaluationKind::all() {
            engine.mark_completed(TRAINING, *kind).await.unwrap();
        }
        assert_eq!(
            engine.summary(TRAINING).await.unwrap().overall_progress,
            OverallProgress::Complete
        );
    }

    #[tokio::test]
    async fn summary_without_fanout_is_not_found() {
        let engine = engine().await;
        let err = engine.summary(TRAINING).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn stats_and_assignments() {
        let engine = engine().await;
        let trackers = engine.ensure_trackers(TRAINING).await.unwrap();
        engine
            .assign_evaluator(trackers[0].tracker_id, 99, None)
            .await
            .unwrap();
        engine
            .assign_evaluator(trackers[1].tracker_id, 99, None)
            .await
            .unwrap();
        engine
            .mark_completed(TRAINING, trackers[0].kind)
            .await
            .unwrap();

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.by_status.get("completed"), Some(&1));
        assert_eq!(stats.by_status.get("pending"), Some(&2));
        assert_eq!(stats.overdue_count, 0);
        assert_eq!(stats.by_type.len(), 3);

        let mine = engine.assignments(99, None).await.unwrap();
        assert_eq!(mine.len(), 2);
        let pending = engine
            .assignments(99, Some(TrackerStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }
}
