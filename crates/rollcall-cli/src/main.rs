use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rollcall_core::{JsonEmbeddingExtractor, NearestMatcher};
use rollcall_notify::{Dispatcher, MailTransport, NullTransport, SmtpMailer};
use rollcall_service::{AttendanceService, EnrollOutcome, NotifyDisposition, ProbeOutcome};
use rollcall_store::{OverrideOutcome, Status, Store};

mod config;
use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face attendance: enroll, mark, report")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new student and print the assigned roll number
    Register {
        /// Full name
        #[arg(short, long)]
        name: String,
        /// Class / group the student belongs to
        #[arg(short, long)]
        class: String,
        /// Guardian email for arrival and absence mail
        #[arg(short, long)]
        guardian: Option<String>,
    },
    /// Enroll face embeddings for a registered student
    Enroll {
        /// Roll number
        student: String,
        /// JSON file of embedding vectors from the extraction pipeline
        probe: PathBuf,
    },
    /// Mark attendance from one captured probe
    Mark {
        /// Class / context to mark under
        #[arg(short, long)]
        class: String,
        /// JSON file of embedding vectors from the extraction pipeline
        probe: PathBuf,
    },
    /// Show the ledger for a class and date
    Report {
        #[arg(short, long)]
        class: String,
        /// Defaults to today
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Write explicit absences for everyone not marked by end of session
    Reconcile {
        #[arg(short, long)]
        class: String,
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Manually correct one ledger entry (applies at most once)
    Override {
        /// Roll number
        student: String,
        #[arg(short, long)]
        class: String,
        #[arg(short, long)]
        date: Option<NaiveDate>,
        /// New status: present or absent
        #[arg(short, long)]
        status: String,
    },
    /// Attendance percentage over held sessions
    Percentage {
        student: String,
        #[arg(short, long)]
        class: String,
        /// Count sessions held since this date
        #[arg(short, long)]
        since: Option<NaiveDate>,
    },
    /// Queue low-attendance alerts for a class
    Alerts {
        #[arg(short, long)]
        class: String,
        #[arg(short, long)]
        since: Option<NaiveDate>,
    },
    /// List registered students
    Students {
        #[arg(short, long)]
        class: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let store = Store::open(&config.db_path).await?;

    let transport: Arc<dyn MailTransport> = if config.smtp.is_configured() {
        Arc::new(SmtpMailer::new(&config.smtp)?)
    } else {
        tracing::warn!("smtp credentials not configured, notifications will fail");
        Arc::new(NullTransport)
    };
    let (notifier, worker) = Dispatcher::spawn(transport, store.clone(), config.notify_queue);

    let service = AttendanceService::new(
        store.clone(),
        Arc::new(NearestMatcher),
        Arc::new(JsonEmbeddingExtractor),
        notifier,
        config.tolerance,
    )
    .await?;

    run(&cli.command, &service, &store, &config).await?;

    // Drain queued mail before exiting (best-effort).
    drop(service);
    worker.await?;
    Ok(())
}

async fn run(
    command: &Commands,
    service: &AttendanceService,
    store: &Store,
    config: &Config,
) -> Result<()> {
    match command {
        Commands::Register {
            name,
            class,
            guardian,
        } => {
            let student = store
                .register_student(name, class, guardian.as_deref())
                .await?;
            println!("Registered {} with roll number {}", student.full_name, student.id);
        }
        Commands::Enroll { student, probe } => {
            let payload = std::fs::read(probe)?;
            match service.enroll(student, &payload).await? {
                EnrollOutcome::NoFaceDetected => println!("No face detected in probe."),
                EnrollOutcome::Enrolled { embedding_ids } => {
                    println!("Enrolled {} face sample(s) for {student}", embedding_ids.len());
                }
            }
        }
        Commands::Mark { class, probe } => {
            let payload = std::fs::read(probe)?;
            match service.submit_probe(&payload, class).await? {
                ProbeOutcome::NoFaceDetected => println!("No face detected."),
                ProbeOutcome::NoMatch => println!("Face not recognized."),
                ProbeOutcome::Marked {
                    student,
                    first_time,
                    time,
                    notification,
                } => {
                    if first_time {
                        println!("Marked {} ({}) present at {}", student.full_name, student.id, time.format("%H:%M:%S"));
                        if notification == NotifyDisposition::Queued {
                            println!("Arrival notification queued for guardian.");
                        }
                    } else {
                        println!("{} ({}) already marked today.", student.full_name, student.id);
                    }
                }
            }
        }
        Commands::Report { class, date } => {
            let date = date.unwrap_or_else(today);
            let records = service.attendance(class, date).await?;
            if records.is_empty() {
                println!("No records for class {class} on {date}.");
            }
            for record in records {
                let student = store.student(&record.student_id).await?;
                println!(
                    "{}  {}  {}  {:?}/{:?}",
                    record.student_id,
                    student.full_name,
                    record.time.format("%H:%M:%S"),
                    record.status,
                    record.source,
                );
            }
        }
        Commands::Reconcile { class, date } => {
            let date = date.unwrap_or_else(today);
            let absentees = service.reconcile(class, date).await?;
            println!("Marked {} student(s) absent for {date}.", absentees.len());
            for student in absentees {
                println!("  {}  {}", student.id, student.full_name);
            }
        }
        Commands::Override {
            student,
            class,
            date,
            status,
        } => {
            let status = match status.as_str() {
                "present" => Status::Present,
                "absent" => Status::Absent,
                other => anyhow::bail!("invalid status {other:?}, expected present or absent"),
            };
            let date = date.unwrap_or_else(today);
            let time = Local::now().naive_local().time();
            match store
                .override_status(student, class, date, status, time)
                .await?
            {
                OverrideOutcome::Applied => println!("Correction applied for {student} on {date}."),
                OverrideOutcome::AlreadyCorrected => {
                    println!("{student} was already corrected manually for {date}.")
                }
            }
        }
        Commands::Percentage {
            student,
            class,
            since,
        } => {
            let since = since.unwrap_or(NaiveDate::MIN);
            match service.attendance_percentage(student, class, since).await? {
                Some(pct) => println!("{student}: {pct:.1}% of held sessions"),
                None => println!("No sessions held for class {class} since {since}."),
            }
        }
        Commands::Alerts { class, since } => {
            let since = since.unwrap_or(NaiveDate::MIN);
            let flagged = service
                .low_attendance_sweep(class, since, config.low_attendance_threshold)
                .await?;
            println!(
                "{} student(s) below {:.0}%.",
                flagged.len(),
                config.low_attendance_threshold
            );
            for (student, pct) in flagged {
                println!("  {}  {}  {pct:.1}%", student.id, student.full_name);
            }
        }
        Commands::Students { class } => {
            let students = match class {
                Some(class) => store.students_in_class(class).await?,
                None => store.all_students().await?,
            };
            for student in students {
                println!(
                    "{}  {}  class {}  {}",
                    student.id,
                    student.full_name,
                    student.class_name,
                    student.guardian_email.as_deref().unwrap_or("-"),
                );
            }
        }
    }
    Ok(())
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}
