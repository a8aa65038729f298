//! Outreach CLI - operator commands against the sequence store

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use outreach_core::application::{
    QualificationConfig, QualificationEngine, QualificationService, SequenceConfig,
    SequenceScheduler,
};
use outreach_core::domain::{
    parse_contacts, Contact, QualificationResult, RawContact, SequenceState, SequenceStatus,
};
use outreach_core::port::time_provider::SystemTimeProvider;
use outreach_core::port::{SequenceRepository, TimeProvider};
use outreach_core::AppError;
use outreach_infra_sqlite::{create_pool, database_url, run_migrations, SqliteSequenceRepository};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{Table, Tabled};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const DEFAULT_DB_PATH: &str = "~/.outreach/sequences.db";

#[derive(Parser)]
#[command(name = "outreach")]
#[command(about = "Lead outreach pipeline CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Sequence database
    #[arg(long, env = "OUTREACH_DB_PATH", default_value = DEFAULT_DB_PATH)]
    db_path: String,

    /// Refuse contacts without a well-formed email
    #[arg(long, env = "OUTREACH_REJECT_ON_MISSING_EMAIL")]
    reject_on_missing_email: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a contact without enrolling it
    Qualify {
        #[command(flatten)]
        contact: ContactArgs,
    },

    /// Qualify and enroll a single contact
    Enroll {
        #[command(flatten)]
        contact: ContactArgs,
    },

    /// Qualify and enroll every contact in a JSON array file
    Import {
        /// JSON file (array of contacts, flat or with `properties`)
        file: PathBuf,
    },

    /// List sequences
    Sequences {
        /// Only this status (active, paused, completed)
        #[arg(short, long)]
        status: Option<String>,

        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Pause a contact's sequence
    Pause {
        contact_id: String,

        #[arg(short, long, default_value = "manual pause")]
        reason: String,
    },

    /// Resume a paused sequence (due immediately)
    Resume { contact_id: String },

    /// Show sequence counts
    Status,
}

#[derive(clap::Args)]
struct ContactArgs {
    /// Contact id (defaults to the email)
    #[arg(long)]
    id: Option<String>,

    #[arg(long)]
    email: Option<String>,

    #[arg(long)]
    company: Option<String>,

    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    website: Option<String>,
}

impl ContactArgs {
    fn into_contact(self) -> Result<Contact> {
        let raw = RawContact {
            id: self.id,
            company: self.company,
            title: self.title,
            website: self.website,
            email: self.email,
            properties: None,
        };
        raw.normalize().context("Invalid contact")
    }
}

#[derive(Tabled)]
struct QualificationRow {
    contact: String,
    lead_type: String,
    template_set: String,
    steps: u32,
    score: u32,
    indicators: String,
    qualified: String,
}

impl QualificationRow {
    fn new(contact: &Contact, result: &QualificationResult) -> Self {
        Self {
            contact: contact.id.clone(),
            lead_type: result.lead_type.to_string(),
            template_set: result.template_set.to_string(),
            steps: result.step_count(),
            score: result.score,
            indicators: result.indicators.join(", "),
            qualified: match &result.rejection {
                Some(reason) => format!("no ({})", reason),
                None => "yes".to_string(),
            },
        }
    }
}

#[derive(Tabled)]
struct SequenceRow {
    contact: String,
    email: String,
    template_set: String,
    step: String,
    sent: u32,
    status: String,
    next_send: String,
    last_error: String,
}

impl From<&SequenceState> for SequenceRow {
    fn from(state: &SequenceState) -> Self {
        Self {
            contact: state.contact_id.clone(),
            email: state.email.clone(),
            template_set: state.template_set.to_string(),
            step: format!("{}/{}", state.current_step, state.total_steps),
            sent: state.emails_sent,
            status: state.status.to_string(),
            next_send: if state.status == SequenceStatus::Active {
                format_millis(state.next_send_at)
            } else {
                "-".to_string()
            },
            last_error: state.last_error.clone().unwrap_or_default(),
        }
    }
}

#[derive(Tabled)]
struct ImportRow {
    contact: String,
    lead_type: String,
    template_set: String,
    outcome: String,
}

#[derive(Tabled)]
struct StatusRow {
    status: String,
    count: i64,
}

struct App {
    repository: Arc<dyn SequenceRepository>,
    scheduler: SequenceScheduler,
    qualification: QualificationService,
}

impl App {
    async fn open(db_path: &str, reject_on_missing_email: bool) -> Result<Self> {
        let path = PathBuf::from(shellexpand::tilde(db_path).into_owned());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        debug!(db_path = %path.display(), "Opening database");

        let pool = create_pool(&database_url(&path))
            .await
            .context("Failed to open database")?;
        run_migrations(&pool).await.context("Migration failed")?;

        let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
        let repository: Arc<dyn SequenceRepository> =
            Arc::new(SqliteSequenceRepository::new(pool));
        let engine = QualificationEngine::new(QualificationConfig {
            reject_on_missing_email,
        });

        Ok(Self {
            scheduler: SequenceScheduler::new(
                repository.clone(),
                time_provider.clone(),
                SequenceConfig::default(),
            ),
            qualification: QualificationService::with_lead_cache(engine, time_provider),
            repository,
        })
    }
}

fn format_millis(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn read_contacts(file: &Path) -> Result<Vec<RawContact>> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    parse_contacts(&text).with_context(|| format!("Invalid contact JSON in {}", file.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();

    // Qualification needs no database
    if let Commands::Qualify { contact } = cli.command {
        let contact = contact.into_contact()?;
        let engine = QualificationEngine::new(QualificationConfig {
            reject_on_missing_email: cli.reject_on_missing_email,
        });
        let result = engine.qualify(&contact);

        println!("{}", "Qualification".cyan().bold());
        println!();
        println!("{}", Table::new(vec![QualificationRow::new(&contact, &result)]));
        return Ok(());
    }

    let app = App::open(&cli.db_path, cli.reject_on_missing_email).await?;

    match cli.command {
        Commands::Qualify { .. } => {}

        Commands::Enroll { contact } => {
            let contact = contact.into_contact()?;
            let result = app.qualification.qualify(&contact);
            let already = app.scheduler.get(&contact.id).await?.is_some();
            let state = app.scheduler.enroll(&contact, &result).await?;

            if already {
                println!(
                    "{}",
                    format!("○ {} already enrolled", state.contact_id).yellow()
                );
            } else {
                println!(
                    "{}",
                    format!("✓ {} enrolled", state.contact_id).green().bold()
                );
            }
            println!();
            println!("{}", Table::new(vec![SequenceRow::from(&state)]));
        }

        Commands::Import { file } => {
            let raw = read_contacts(&file)?;
            let mut rows = Vec::with_capacity(raw.len());
            let (mut enrolled, mut skipped) = (0usize, 0usize);

            for (index, raw_contact) in raw.iter().enumerate() {
                let contact = match raw_contact.normalize() {
                    Ok(contact) => contact,
                    Err(e) => {
                        skipped += 1;
                        rows.push(ImportRow {
                            contact: format!("#{}", index + 1),
                            lead_type: "-".to_string(),
                            template_set: "-".to_string(),
                            outcome: format!("skipped: {}", e),
                        });
                        continue;
                    }
                };

                let result = app.qualification.qualify(&contact);
                let already = app.scheduler.get(&contact.id).await?.is_some();
                let outcome = match app.scheduler.enroll(&contact, &result).await {
                    Ok(_) if already => {
                        skipped += 1;
                        "already enrolled".to_string()
                    }
                    Ok(_) => {
                        enrolled += 1;
                        "enrolled".to_string()
                    }
                    Err(AppError::Validation(reason)) => {
                        skipped += 1;
                        format!("rejected: {}", reason)
                    }
                    Err(e) => return Err(e).context("Import aborted"),
                };

                rows.push(ImportRow {
                    contact: contact.id.clone(),
                    lead_type: result.lead_type.to_string(),
                    template_set: result.template_set.to_string(),
                    outcome,
                });
            }

            println!("{}", Table::new(rows));
            println!();
            println!(
                "  {} {} enrolled, {} skipped",
                "✓".green(),
                enrolled,
                skipped
            );
        }

        Commands::Sequences { status, limit } => {
            let states = match status {
                Some(status) => {
                    let status: SequenceStatus =
                        status.parse().context("Invalid --status")?;
                    app.repository.find_by_status(status, limit).await?
                }
                None => app.repository.list(limit).await?,
            };

            if states.is_empty() {
                println!("{}", "No sequences".yellow());
            } else {
                let rows: Vec<SequenceRow> = states.iter().map(SequenceRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }

        Commands::Pause { contact_id, reason } => {
            let state = app.scheduler.pause(&contact_id, &reason).await?;
            println!(
                "{}",
                format!("✓ {} paused at step {}", state.contact_id, state.current_step)
                    .green()
                    .bold()
            );
        }

        Commands::Resume { contact_id } => {
            let state = app.scheduler.resume(&contact_id).await?;
            println!(
                "{}",
                format!("✓ {} resumed at step {}", state.contact_id, state.current_step)
                    .green()
                    .bold()
            );
        }

        Commands::Status => {
            println!("{}", "Sequence Status".cyan().bold());
            println!();

            let mut rows = Vec::new();
            for status in [
                SequenceStatus::Active,
                SequenceStatus::Paused,
                SequenceStatus::Completed,
            ] {
                rows.push(StatusRow {
                    status: status.to_string(),
                    count: app.repository.count_by_status(status).await?,
                });
            }
            println!("{}", Table::new(rows));
            println!();
            println!("  {} {}", "Database:".bold(), cli.db_path);
        }
    }

    Ok(())
}
