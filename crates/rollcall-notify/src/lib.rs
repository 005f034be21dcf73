//! rollcall-notify — Best-effort delivery of attendance mail.
//!
//! The dispatcher is fire-and-forget relative to the ledger: a failed
//! send never rolls back or blocks an attendance mark. Every attempt,
//! success or failure, lands in the store's notification log; a log
//! write failure is itself only traced. No automatic retries — a failed
//! notification is terminal for that event.

pub mod smtp;

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use rollcall_store::Store;

pub use smtp::{NullTransport, SmtpConfig, SmtpMailer};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid mail address: {0}")]
    Address(String),
    #[error("message build failed: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("smtp delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("smtp transport not configured")]
    NotConfigured,
}

/// A rendered outbound mail, ready for the transport.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// Deliver one mail, or fail. Implementations must bound delivery with
/// a network timeout so a slow relay cannot stall the worker.
pub trait MailTransport: Send + Sync {
    fn send(&self, mail: &OutboundEmail) -> Result<(), NotifyError>;
}

/// An attendance event worth a mail. Carries the already-resolved
/// recipient; the dispatcher does not look up contact details.
#[derive(Debug, Clone)]
pub enum Notification {
    Arrival {
        recipient: String,
        student_name: String,
        class_name: String,
        time: NaiveTime,
    },
    Absence {
        recipient: String,
        student_name: String,
        class_name: String,
        date: NaiveDate,
    },
    LowAttendance {
        recipient: String,
        student_name: String,
        class_name: String,
        percentage: f32,
    },
}

impl Notification {
    pub fn render(&self) -> OutboundEmail {
        match self {
            Notification::Arrival {
                recipient,
                student_name,
                class_name,
                time,
            } => OutboundEmail {
                to: recipient.clone(),
                subject: "School Arrival Notification".into(),
                html_body: format!(
                    "<html><body>\
                     <p>Your ward <strong>{student_name}</strong> of class \
                     <strong>{class_name}</strong> is present at school at {time}.</p>\
                     <p style=\"color:#888;font-size:12px\">Sent automatically by the \
                     face attendance system.</p>\
                     </body></html>",
                    time = time.format("%H:%M:%S"),
                ),
            },
            Notification::Absence {
                recipient,
                student_name,
                class_name,
                date,
            } => OutboundEmail {
                to: recipient.clone(),
                subject: "School Absence Notification".into(),
                html_body: format!(
                    "<html><body>\
                     <p>Your ward <strong>{student_name}</strong> of class \
                     <strong>{class_name}</strong> was absent from school on {date}.</p>\
                     <p style=\"color:#888;font-size:12px\">Sent automatically by the \
                     face attendance system.</p>\
                     </body></html>",
                ),
            },
            Notification::LowAttendance {
                recipient,
                student_name,
                class_name,
                percentage,
            } => OutboundEmail {
                to: recipient.clone(),
                subject: format!("Low Attendance Alert \u{2013} {class_name}"),
                html_body: format!(
                    "<html><body>\
                     <h2>Low Attendance Alert</h2>\
                     <p>Dear <strong>{student_name}</strong>,</p>\
                     <p>Your current attendance in <strong>{class_name}</strong> is \
                     <span style=\"color:red\"><strong>{percentage:.1}%</strong></span>, \
                     which is below the required 75%.</p>\
                     <p>Please contact your class teacher.</p>\
                     </body></html>",
                ),
            },
        }
    }
}

/// Clone-safe handle to the dispatcher worker.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<Notification>,
}

impl DispatcherHandle {
    /// Queue a notification without waiting for delivery. A full queue
    /// drops the event with a warning — the ledger write that triggered
    /// it has already committed and must not be held up.
    pub fn dispatch(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(n)) => {
                tracing::warn!(mail = ?n.render().subject, "notification queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(n)) => {
                tracing::warn!(mail = ?n.render().subject, "notification worker gone, dropping event");
            }
        }
    }
}

/// Notification worker: single task draining a bounded queue.
pub struct Dispatcher;

impl Dispatcher {
    /// Spawn the worker. Dropping every [`DispatcherHandle`] closes the
    /// queue; the worker drains what is already queued and exits, so
    /// awaiting the returned handle gives a clean best-effort shutdown.
    pub fn spawn(
        transport: Arc<dyn MailTransport>,
        store: Store,
        capacity: usize,
    ) -> (DispatcherHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Notification>(capacity);

        let worker = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                let mail = notification.render();
                let transport = Arc::clone(&transport);
                let to_send = mail.clone();
                // The SMTP transport blocks; keep it off the runtime.
                let result =
                    tokio::task::spawn_blocking(move || transport.send(&to_send)).await;

                let error = match result {
                    Ok(Ok(())) => {
                        tracing::info!(recipient = %mail.to, subject = %mail.subject, "notification sent");
                        None
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(recipient = %mail.to, subject = %mail.subject, error = %e, "notification failed");
                        Some(e.to_string())
                    }
                    Err(e) => {
                        tracing::warn!(recipient = %mail.to, error = %e, "notification send task aborted");
                        Some(format!("send task aborted: {e}"))
                    }
                };

                if let Err(e) = store
                    .log_notification(
                        &mail.to,
                        &mail.subject,
                        &mail.html_body,
                        error.is_none(),
                        error.as_deref(),
                    )
                    .await
                {
                    tracing::warn!(error = %e, "could not record notification attempt");
                }
            }
            tracing::debug!("notification worker exiting");
        });

        (DispatcherHandle { tx }, worker)
    }
}
