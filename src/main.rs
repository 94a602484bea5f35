use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};

use course_recommender::bundle::ModelBundle;
use course_recommender::catalog::CourseCatalog;
use course_recommender::dataset::{self, find_record};
use course_recommender::db;
use course_recommender::forest::ForestParams;
use course_recommender::pipeline::{Pipeline, PipelineConfig, ReadySource};
use course_recommender::recommend::DEFAULT_TOP_N;
use course_recommender::report;
use course_recommender::trainer::TrainerConfig;

#[derive(Parser)]
#[command(name = "course-recommender")]
#[command(about = "Student records and course recommendations backed by a grade classifier", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Settings {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://academic.db", global = true)]
    database_url: String,
    /// Student performance CSV used for training and import
    #[arg(long, env = "DATASET_PATH", default_value = "data/students_performance.csv", global = true)]
    dataset: PathBuf,
    /// Directory holding the persisted model bundle
    #[arg(long, env = "ARTIFACTS_DIR", default_value = "artifacts", global = true)]
    artifacts_dir: PathBuf,
    /// Course catalog TOML; the built-in catalog is used when omitted
    #[arg(long, env = "CATALOG_PATH", global = true)]
    catalog: Option<PathBuf>,
    /// Seed for the train/test split and the forest
    #[arg(long, default_value_t = 42, global = true)]
    seed: u64,
    #[arg(long, default_value_t = 100, global = true)]
    trees: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Restore or train the model, then import the dataset
    Bootstrap,
    /// Import students and performance rows from a CSV file
    Import {
        /// Defaults to the configured dataset
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Train a new model and make it live
    Train {
        /// Also write a markdown evaluation report
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Show whether a trained model is available
    Status,
    /// Write a markdown evaluation report for the stored model
    Report {
        #[arg(long, default_value = "model_report.md")]
        out: PathBuf,
    },
    /// Recommend courses for a student
    Recommend {
        #[arg(long)]
        student_id: String,
        #[arg(long, default_value_t = DEFAULT_TOP_N)]
        top_n: usize,
        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Predict the grade of a student in the dataset
    Predict {
        #[arg(long)]
        student_id: String,
    },
    /// List every stored student
    Students,
    /// Show a student's profile and performance
    Student {
        #[arg(long)]
        student_id: String,
    },
    /// Record a course score for a student
    AddScore {
        #[arg(long)]
        student_id: String,
        #[arg(long)]
        course: String,
        #[arg(long)]
        score: f64,
    },
    /// List recorded course scores for a student
    Scores {
        #[arg(long)]
        student_id: String,
    },
    /// List sleep hours against total score for every student
    SleepPerformance,
}

impl Settings {
    fn pipeline(&self) -> anyhow::Result<Arc<Pipeline>> {
        let catalog = match &self.catalog {
            Some(path) => CourseCatalog::from_path(path)?,
            None => CourseCatalog::builtin()?,
        };
        let config = PipelineConfig {
            dataset_path: self.dataset.clone(),
            artifacts_dir: self.artifacts_dir.clone(),
            trainer: TrainerConfig {
                split_seed: self.seed,
                forest: ForestParams {
                    n_trees: self.trees,
                    seed: self.seed,
                    ..ForestParams::default()
                },
                ..TrainerConfig::default()
            },
            top_n: DEFAULT_TOP_N,
        };
        Ok(Arc::new(Pipeline::new(config, catalog)))
    }
}

async fn ensure_ready(pipeline: &Arc<Pipeline>) -> anyhow::Result<()> {
    let worker = Arc::clone(pipeline);
    match tokio::task::spawn_blocking(move || worker.ensure_ready()).await?? {
        ReadySource::Restored => tracing::debug!("Serving the stored model"),
        ReadySource::Trained(outcome) => {
            tracing::info!("Trained a new model, accuracy {:.2}", outcome.accuracy)
        }
    }
    Ok(())
}

fn stored_bundle(pipeline: &Pipeline) -> anyhow::Result<Arc<ModelBundle>> {
    if !pipeline.restore() {
        bail!("no trained model available; run `train` first");
    }
    Ok(pipeline.bundle()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("course_recommender=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let settings = &cli.settings;

    match cli.command {
        Commands::InitDb => {
            let pool = db::connect(&settings.database_url).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Bootstrap => {
            let pipeline = settings.pipeline()?;
            ensure_ready(&pipeline).await?;

            let pool = db::connect(&settings.database_url).await?;
            db::init_db(&pool).await?;
            let records = dataset::load_dataset(&settings.dataset)?;
            let summary = db::import_records(&pool, &records).await?;
            println!(
                "Imported {} rows: {} new students, {} already present.",
                summary.performance_upserted, summary.students_inserted, summary.students_skipped
            );
        }
        Commands::Import { csv } => {
            let path = csv.unwrap_or_else(|| settings.dataset.clone());
            let records = dataset::load_dataset(&path)?;
            let pool = db::connect(&settings.database_url).await?;
            let summary = db::import_records(&pool, &records).await?;
            println!(
                "Imported {} rows from {}: {} new students, {} already present.",
                summary.performance_upserted,
                path.display(),
                summary.students_inserted,
                summary.students_skipped
            );
        }
        Commands::Train { report: out } => {
            let pipeline = settings.pipeline()?;
            let worker = Arc::clone(&pipeline);
            let outcome = tokio::task::spawn_blocking(move || worker.train()).await??;
            println!("Model trained with accuracy {:.2}.", outcome.accuracy);

            if let Some(out) = out {
                std::fs::write(&out, report::build_report(&*pipeline.bundle()?))
                    .with_context(|| format!("cannot write report to {}", out.display()))?;
                println!("Report written to {}.", out.display());
            }
        }
        Commands::Status => {
            let pipeline = settings.pipeline()?;
            if pipeline.restore() {
                let bundle = pipeline.bundle()?;
                println!(
                    "Ready: bundle {} trained at {} (accuracy {:.2}, {} classes).",
                    bundle.manifest.bundle_id,
                    bundle.manifest.trained_at,
                    bundle.evaluation.accuracy,
                    bundle.manifest.classes.len()
                );
            } else {
                println!(
                    "Not ready: no usable model under {}; `train` will read {}.",
                    pipeline.config().artifacts_dir.display(),
                    pipeline.config().dataset_path.display()
                );
            }
        }
        Commands::Report { out } => {
            let pipeline = settings.pipeline()?;
            let bundle = stored_bundle(&pipeline)?;
            std::fs::write(&out, report::build_report(&bundle))
                .with_context(|| format!("cannot write report to {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Recommend {
            student_id,
            top_n,
            json,
        } => {
            let pool = db::connect(&settings.database_url).await?;
            let Some(student) = db::fetch_student(&pool, &student_id).await? else {
                bail!("student {student_id} not found");
            };

            let pipeline = settings.pipeline()?;
            ensure_ready(&pipeline).await?;
            let recommendation =
                pipeline.recommend(&student.student_id, &student.department, Some(top_n))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&recommendation)?);
            } else {
                println!(
                    "Recommended courses for {} ({}, {}):",
                    student.full_name, student.student_id, student.department
                );
                for course in &recommendation.courses {
                    println!("- {} ({} credits)", course.course_name, course.credit_units);
                }
            }
        }
        Commands::Predict { student_id } => {
            let records = dataset::load_dataset(&settings.dataset)?;
            let Some(record) = find_record(&records, &student_id) else {
                bail!("student {student_id} not in {}", settings.dataset.display());
            };

            let pipeline = settings.pipeline()?;
            ensure_ready(&pipeline).await?;
            let prediction = pipeline.predict(record)?;
            println!(
                "Predicted grade for {} ({}): {} (recorded {})",
                record.full_name(),
                record.student_id,
                prediction.grade,
                record.grade
            );
            for (label, probability) in &prediction.probabilities {
                println!("- {label}: {probability:.2}");
            }
        }
        Commands::Students => {
            let pool = db::connect(&settings.database_url).await?;
            let students = db::list_students(&pool).await?;
            if students.is_empty() {
                println!("No students stored.");
                return Ok(());
            }
            for student in students {
                println!(
                    "{}  {:<28} {:<12} {}",
                    student.student_id, student.full_name, student.department, student.email
                );
            }
        }
        Commands::Student { student_id } => {
            let pool = db::connect(&settings.database_url).await?;
            let Some(student) = db::fetch_student(&pool, &student_id).await? else {
                bail!("student {student_id} not found");
            };
            println!(
                "{} ({}) {} - {}",
                student.full_name, student.student_id, student.email, student.department
            );

            match db::fetch_performance(&pool, &student_id).await? {
                Some(p) => println!(
                    "Grade {} | total {} | attendance {} | study {}h/week | sleep {}h/night | stress {}",
                    p.grade,
                    display(p.total_score),
                    display(p.attendance),
                    display(p.study_hours_per_week),
                    display(p.sleep_hours_per_night),
                    p.stress_level.map_or_else(|| "-".to_string(), |s| s.to_string())
                ),
                None => println!("No performance record."),
            }
        }
        Commands::AddScore {
            student_id,
            course,
            score,
        } => {
            let pool = db::connect(&settings.database_url).await?;
            db::add_course_score(&pool, &student_id, &course, score).await?;
            println!("Score saved.");
        }
        Commands::Scores { student_id } => {
            let pool = db::connect(&settings.database_url).await?;
            let scores = db::fetch_course_scores(&pool, &student_id).await?;
            if scores.is_empty() {
                println!("No course scores for {student_id}.");
                return Ok(());
            }
            for score in scores {
                println!("- {}: {:.1} ({})", score.course, score.score, score.recorded_at.date_naive());
            }
        }
        Commands::SleepPerformance => {
            let pool = db::connect(&settings.database_url).await?;
            let pairs = db::fetch_sleep_performance(&pool).await?;
            println!("{}", serde_json::to_string_pretty(&pairs)?);
        }
    }

    Ok(())
}

fn display(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.1}"))
}
