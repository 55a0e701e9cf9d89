use std::path::PathBuf;
use std::time::{Duration as StdDuration, Instant};

use anyhow::Context;
use chrono::{Duration, Utc};
use clap::{ArgGroup, Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use cohort_analytics::db::{self, CohortScope};
use cohort_analytics::exclusion::resolve_scoped;
use cohort_analytics::performance::exam_statistics;
use cohort_analytics::progress::chapter_statuses;
use cohort_analytics::report;
use cohort_analytics::{AnalyticsEngine, CurriculumIndex, EngineConfig};

#[derive(Parser)]
#[command(name = "cohort-analytics")]
#[command(about = "Academic progress and cohort risk analytics", long_about = None)]
struct Cli {
    /// Engine config file (TOML). Falls back to COHORT_ANALYTICS_CONFIG.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("scope")
        .args(["class", "institution"])
        .required(true)
        .multiple(false)
))]
struct ScopeArgs {
    #[arg(long)]
    class: Option<String>,
    #[arg(long)]
    institution: Option<String>,
}

impl ScopeArgs {
    fn scope(&self) -> anyhow::Result<CohortScope> {
        match (&self.class, &self.institution) {
            (Some(class), None) => Ok(CohortScope::Class(class.clone())),
            (None, Some(institution)) => Ok(CohortScope::Institution(institution.clone())),
            _ => anyhow::bail!("pass exactly one of --class or --institution"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small demo cohort
    Seed,
    /// Import exam results from a CSV file
    ImportExams {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Import study sessions from a CSV file
    ImportSessions {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record a login and update the learner's streak
    Login {
        #[arg(long)]
        email: String,
    },
    /// Show one learner's progress snapshot
    Progress {
        #[arg(long)]
        email: String,
        /// Include the per-chapter completion board
        #[arg(long)]
        chapters: bool,
        #[arg(long)]
        json: bool,
    },
    /// Classify cohort members by risk
    Risk {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Stop classifying after this many milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Weekday × hour study heatmap for a cohort
    Heatmap {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long)]
        window_days: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

async fn build_engine(
    pool: &PgPool,
    config: EngineConfig,
) -> anyhow::Result<AnalyticsEngine<cohort_analytics::InMemoryCurriculumIndex>> {
    let index = db::load_curriculum_index(pool, config.default_board.as_deref()).await?;
    info!(curricula = index.len(), "curriculum index loaded");
    Ok(AnalyticsEngine::new(index, config))
}

/// Oldest session any score needs.
fn sessions_since(config: &EngineConfig) -> chrono::DateTime<Utc> {
    let days = i64::from(config.consistency_window_days).max(config.heatmap_window_days);
    Utc::now() - Duration::days(days + 1)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = EngineConfig::resolve(cli.config.as_deref())?;

    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportExams { csv } => {
            let inserted = db::import_exam_csv(&pool, &csv).await?;
            println!("Inserted {inserted} exam results from {}.", csv.display());
        }
        Commands::ImportSessions { csv } => {
            let inserted = db::import_session_csv(&pool, &csv).await?;
            println!("Inserted {inserted} study sessions from {}.", csv.display());
        }
        Commands::Login { email } => match db::record_login(&pool, &email, Utc::now()).await? {
            Some(streak) => println!("Login recorded for {email}; streak is {streak} days."),
            None => println!("No learner with email {email}."),
        },
        Commands::Progress {
            email,
            chapters,
            json,
        } => {
            let since = sessions_since(&config);
            let Some((profile, inputs)) = db::fetch_learner_inputs(&pool, &email, since).await?
            else {
                println!("No learner with email {email}.");
                return Ok(());
            };

            let engine = build_engine(&pool, config).await?;
            let snapshot = engine.learner_snapshot(&inputs);
            let statistics = exam_statistics(&inputs.exam_results);
            let board = chapters.then(|| {
                let tree = engine
                    .curriculum()
                    .lookup(&inputs.curriculum, inputs.subject_filter.as_deref());
                chapter_statuses(&tree, &resolve_scoped(&inputs.exclusions), &inputs.completion)
            });

            if json {
                let payload = serde_json::json!({
                    "learner": profile,
                    "snapshot": snapshot,
                    "exam_statistics": statistics,
                    "chapters": board,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
                return Ok(());
            }

            println!("Progress for {} ({})", profile.display_name, profile.email);
            println!(
                "Overall {:.1}% ({} of {} chapters)",
                snapshot.overall, snapshot.total_completed_chapters, snapshot.total_valid_chapters
            );
            for (subject, progress) in &snapshot.by_subject {
                println!(
                    "- {}: {:.1}% ({}/{})",
                    subject,
                    progress.percentage,
                    progress.completed_chapters,
                    progress.valid_chapters
                );
            }
            println!(
                "Momentum {:+.1}, consistency {:.0}, readiness {:.1} \
                 (avg exam {:.1}% over {} results)",
                snapshot.performance.momentum,
                snapshot.performance.consistency,
                snapshot.performance.readiness,
                snapshot.average_exam_percentage,
                snapshot.valid_exam_count
            );
            for (test_type, average) in &statistics.by_test_type {
                println!("  {test_type}: {average:.2}%");
            }
            if let Some(board) = board {
                for (subject, chapters) in board {
                    println!("{subject}");
                    for (chapter, status) in chapters {
                        let mark = match (status.excluded, status.completed) {
                            (true, _) => "excluded",
                            (false, true) => "done",
                            (false, false) => "open",
                        };
                        println!("  [{mark}] {chapter}");
                    }
                }
            }
        }
        Commands::Risk {
            scope,
            limit,
            deadline_ms,
            json,
        } => {
            let scope = scope.scope()?;
            let members = db::fetch_cohort(&pool, &scope, sessions_since(&config)).await?;
            let engine = build_engine(&pool, config).await?;

            let (records, processed) = match deadline_ms {
                Some(ms) => {
                    let partial = engine
                        .cohort_risk_until(&members, Instant::now() + StdDuration::from_millis(ms));
                    (partial.records, partial.processed)
                }
                None => (engine.cohort_risk(&members), members.len()),
            };
            let ranked = report::rank_records(&records);

            if json {
                println!("{}", serde_json::to_string_pretty(&ranked)?);
                return Ok(());
            }

            if processed < members.len() {
                println!("Deadline reached after {processed} of {} learners.", members.len());
            }
            if ranked.is_empty() {
                println!("No learners flagged in {}.", scope.label());
                return Ok(());
            }

            println!("Learners needing attention in {}:", scope.label());
            for record in ranked.iter().take(limit) {
                let inactivity = record
                    .days_inactive
                    .map(|days| format!("{days} days inactive"))
                    .unwrap_or_else(|| "never logged in".to_string());
                println!(
                    "- {} ({}) {} momentum {:+.1}, {}",
                    record.display_name,
                    record.class_label,
                    record.status,
                    record.momentum,
                    inactivity
                );
            }
        }
        Commands::Heatmap {
            scope,
            window_days,
            json,
        } => {
            if let Some(days) = window_days {
                config.heatmap_window_days = days;
                config.validate()?;
            }
            let scope = scope.scope()?;
            let members = db::fetch_cohort(&pool, &scope, sessions_since(&config)).await?;
            let window = config.heatmap_window_days;
            let engine = build_engine(&pool, config).await?;
            let heatmap = engine.cohort_heatmap(&members);

            if json {
                println!("{}", serde_json::to_string_pretty(&heatmap)?);
                return Ok(());
            }

            println!(
                "{} sessions across {} learners in the last {} days.",
                heatmap.total(),
                members.len(),
                window
            );
            for (slot, count) in heatmap.peaks(10) {
                println!("- {}: {}", report::describe_slot(&slot), count);
            }
        }
        Commands::Report { scope, out } => {
            let scope = scope.scope()?;
            let members = db::fetch_cohort(&pool, &scope, sessions_since(&config)).await?;
            let window = config.heatmap_window_days;
            let engine = build_engine(&pool, config).await?;

            let records = engine.cohort_risk(&members);
            let heatmap = engine.cohort_heatmap(&members);
            let report = report::build_report(
                Some(scope.label()),
                Utc::now().date_naive(),
                window,
                &records,
                &heatmap,
            );
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
