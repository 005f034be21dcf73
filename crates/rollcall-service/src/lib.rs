//! rollcall-service — Orchestration of the attendance pipeline.
//!
//! One probe runs: extract → match against the gallery snapshot →
//! idempotent ledger write → (first time only) queue an arrival mail.
//! Matching and detection failures are typed outcomes, never faults;
//! only the store can abort a mark. Notification state is metadata and
//! never changes whether the call succeeded.

pub mod gallery;

use std::sync::Arc;

use chrono::{Local, NaiveDate, NaiveTime};
use thiserror::Error;

use rollcall_core::{EmbeddingExtractor, ExtractorError, MatchOutcome, Matcher};
use rollcall_notify::{DispatcherHandle, Notification};
use rollcall_store::{
    AttendanceRecord, MarkOutcome, Source, Store, StoreError, Student,
};

pub use gallery::GalleryCache;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("probe extraction failed: {0}")]
    Extractor(#[from] ExtractorError),
}

/// Whether a mark led to a queued notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyDisposition {
    /// Handed to the dispatcher; delivery outcome lands in the
    /// notification log.
    Queued,
    /// Nothing to send: repeat mark, or no guardian address on file.
    Skipped,
}

/// Terminal state of one probe submission.
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    /// Upstream extraction found no face in the frame. Distinct from
    /// [`NoMatch`](ProbeOutcome::NoMatch); the ledger is untouched.
    NoFaceDetected,
    /// A face was found but nobody enrolled is close enough.
    NoMatch,
    /// Attendance is recorded (now or earlier today) — both are
    /// success; `first_time` tells them apart.
    Marked {
        student: Student,
        first_time: bool,
        time: NaiveTime,
        notification: NotifyDisposition,
    },
}

/// Result of enrolling one captured image.
#[derive(Debug, Clone)]
pub enum EnrollOutcome {
    NoFaceDetected,
    /// One embedding stored per detected face; several samples per
    /// student improve recall.
    Enrolled { embedding_ids: Vec<String> },
}

/// Orchestrates matcher, ledger, and dispatcher. Cheap to clone; all
/// clones share the gallery cache and the store connection.
#[derive(Clone)]
pub struct AttendanceService {
    store: Store,
    gallery: Arc<GalleryCache>,
    matcher: Arc<dyn Matcher>,
    extractor: Arc<dyn EmbeddingExtractor>,
    notifier: DispatcherHandle,
    tolerance: f32,
}

impl AttendanceService {
    /// Build the service and load the initial gallery snapshot.
    pub async fn new(
        store: Store,
        matcher: Arc<dyn Matcher>,
        extractor: Arc<dyn EmbeddingExtractor>,
        notifier: DispatcherHandle,
        tolerance: f32,
    ) -> Result<Self, ServiceError> {
        let gallery = Arc::new(GalleryCache::new(store.clone()));
        gallery.refresh().await?;
        Ok(Self {
            store,
            gallery,
            matcher,
            extractor,
            notifier,
            tolerance,
        })
    }

    /// Submit one captured frame for `context`, stamped with the local
    /// date and time.
    pub async fn submit_probe(
        &self,
        image: &[u8],
        context: &str,
    ) -> Result<ProbeOutcome, ServiceError> {
        let now = Local::now().naive_local();
        self.submit_probe_at(image, context, now.date(), now.time())
            .await
    }

    /// Clock-injected variant of [`submit_probe`](Self::submit_probe),
    /// used by tests and backfill tooling.
    pub async fn submit_probe_at(
        &self,
        image: &[u8],
        context: &str,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<ProbeOutcome, ServiceError> {
        let probes = self.extractor.extract(image)?;
        if probes.is_empty() {
            tracing::info!(context, "no face detected in probe");
            return Ok(ProbeOutcome::NoFaceDetected);
        }

        let gallery = self.gallery.snapshot().await;
        // A frame can hold several faces; mark the closest identity.
        let mut best: Option<(String, f32)> = None;
        for probe in &probes {
            if let MatchOutcome::Match {
                student_id,
                distance,
                ..
            } = self.matcher.best_match(probe, &gallery, self.tolerance)
            {
                let closer = best
                    .as_ref()
                    .map(|(_, d)| distance < *d)
                    .unwrap_or(true);
                if closer {
                    best = Some((student_id, distance));
                }
            }
        }

        let Some((student_id, distance)) = best else {
            tracing::info!(context, faces = probes.len(), "probe not recognized");
            return Ok(ProbeOutcome::NoMatch);
        };

        let student = self.store.student(&student_id).await?;
        let outcome = self
            .store
            .mark_present(&student.id, context, date, time, Source::Face)
            .await?;
        let first_time = outcome == MarkOutcome::Created;

        let notification = if first_time {
            match &student.guardian_email {
                Some(recipient) => {
                    self.notifier.dispatch(Notification::Arrival {
                        recipient: recipient.clone(),
                        student_name: student.full_name.clone(),
                        class_name: student.class_name.clone(),
                        time,
                    });
                    NotifyDisposition::Queued
                }
                None => NotifyDisposition::Skipped,
            }
        } else {
            NotifyDisposition::Skipped
        };

        tracing::info!(
            student_id = %student.id,
            context,
            distance,
            first_time,
            "attendance marked"
        );
        Ok(ProbeOutcome::Marked {
            student,
            first_time,
            time,
            notification,
        })
    }

    /// Enroll one captured image for an already-registered student.
    /// Every detected face becomes a stored embedding, and the gallery
    /// snapshot is refreshed so the next probe sees it.
    pub async fn enroll(
        &self,
        student_id: &str,
        image: &[u8],
    ) -> Result<EnrollOutcome, ServiceError> {
        let embeddings = self.extractor.extract(image)?;
        if embeddings.is_empty() {
            return Ok(EnrollOutcome::NoFaceDetected);
        }
        let mut embedding_ids = Vec::with_capacity(embeddings.len());
        for embedding in &embeddings {
            embedding_ids.push(self.store.add_embedding(student_id, embedding).await?);
        }
        self.gallery.refresh().await?;
        tracing::info!(student_id, samples = embedding_ids.len(), "faces enrolled");
        Ok(EnrollOutcome::Enrolled { embedding_ids })
    }

    pub async fn attendance(
        &self,
        context: &str,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, ServiceError> {
        Ok(self.store.attendance_for(context, date).await?)
    }

    pub async fn attendance_percentage(
        &self,
        student_id: &str,
        context: &str,
        since: NaiveDate,
    ) -> Result<Option<f32>, ServiceError> {
        Ok(self.store.percent_present(student_id, context, since).await?)
    }

    /// End-of-session sweep: write explicit absences, then queue one
    /// absence mail per newly-absent student with a guardian address.
    pub async fn reconcile(
        &self,
        context: &str,
        date: NaiveDate,
    ) -> Result<Vec<Student>, ServiceError> {
        let time = Local::now().naive_local().time();
        let absentees = self.store.reconcile(context, date, time).await?;
        for student in &absentees {
            if let Some(recipient) = &student.guardian_email {
                self.notifier.dispatch(Notification::Absence {
                    recipient: recipient.clone(),
                    student_name: student.full_name.clone(),
                    class_name: student.class_name.clone(),
                    date,
                });
            }
        }
        tracing::info!(context, %date, absent = absentees.len(), "reconciled session");
        Ok(absentees)
    }

    /// Queue a low-attendance alert for every enrolled student in
    /// `context` below `threshold` percent, counting sessions held
    /// since `since`. Returns the flagged students with their
    /// percentages.
    pub async fn low_attendance_sweep(
        &self,
        context: &str,
        since: NaiveDate,
        threshold: f32,
    ) -> Result<Vec<(Student, f32)>, ServiceError> {
        let students = self.store.students_in_class(context).await?;
        let mut flagged = Vec::new();
        for student in students {
            let Some(percentage) = self
                .store
                .percent_present(&student.id, context, since)
                .await?
            else {
                continue;
            };
            if percentage < threshold {
                if let Some(recipient) = &student.guardian_email {
                    self.notifier.dispatch(Notification::LowAttendance {
                        recipient: recipient.clone(),
                        student_name: student.full_name.clone(),
                        class_name: student.class_name.clone(),
                        percentage,
                    });
                }
                flagged.push((student, percentage));
            }
        }
        Ok(flagged)
    }

    /// Reload the gallery snapshot, e.g. after out-of-band enrollment.
    pub async fn refresh_gallery(&self) -> Result<(), ServiceError> {
        Ok(self.gallery.refresh().await?)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}
