use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use phatam_lib::archive::LocalArchive;
use phatam_lib::audio::load_recording;
use phatam_lib::engine::dataset::build_dataset;
use phatam_lib::engine::{fit, ScoringService, Wav2Vec2Embedder};
use phatam_lib::session::{evaluate_attempt, Feedback, Session};
use phatam_lib::storage::{self, Database};
use phatam_lib::{init_logging, AppConfig, Label, Scorer};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "phatam")]
#[command(about = "Score Vietnamese letter pronunciation and collect recordings", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Directory with the exported wav2vec2 model
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Serialized classifier
    #[arg(long)]
    classifier: Option<PathBuf>,

    /// Root of the recording archive
    #[arg(long)]
    archive_dir: Option<PathBuf>,

    /// SQLite database for sessions and attempts
    #[arg(long)]
    db: Option<PathBuf>,

    /// Verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score WAV recordings against one expected letter
    Score {
        /// Expected letter (E, H, I, L, N, Ơ, U, V)
        label: String,
        /// Recordings to score
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Fit the classifier on `<data>/<label>/*.wav`
    Train {
        data: PathBuf,
        /// Where to write the classifier (defaults to the configured path)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        max_iter: Option<usize>,
    },
    /// Walk through the lessons, reading one WAV path per attempt from stdin
    Session,
    /// Show the attempts recorded for a session
    Attempts {
        session_id: String,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

impl Args {
    /// Command-line paths win over the file and the environment
    fn apply_flags(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.model_dir {
            config.model_dir = dir.clone();
        }
        if let Some(path) = &self.classifier {
            config.classifier_path = path.clone();
        }
        if let Some(dir) = &self.archive_dir {
            config.archive_dir = dir.clone();
        }
        if let Some(path) = &self.db {
            config.database_path = path.clone();
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => AppConfig::load_json(path)?,
        None => AppConfig::default(),
    };
    init_logging(config.log_file.as_deref(), args.verbose)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }
    for key in config.apply_overrides(|key| std::env::var(key).ok()) {
        debug!("{} overrides the configured path", key);
    }
    args.apply_flags(&mut config);
    config.validate()?;
    info!(
        "Models {:?} + {:?}, archive {:?}, database {:?}",
        config.model_dir, config.classifier_path, config.archive_dir, config.database_path
    );

    match args.command {
        Command::Score { label, files } => score(&config, &label, files),
        Command::Train {
            data,
            output,
            seed,
            max_iter,
        } => train(&config, data, output, seed, max_iter),
        Command::Session => session(&config),
        Command::Attempts { session_id, json } => attempts(&config, &session_id, json),
    }
}

fn load_scorer(config: &AppConfig) -> Result<Scorer> {
    Scorer::load(&config.model_dir, &config.embedding, &config.classifier_path)
        .context("Failed to load scoring models")
}

fn score(config: &AppConfig, label: &str, files: Vec<PathBuf>) -> Result<()> {
    let label = Label::parse(label)?;
    let service = ScoringService::spawn(&config.service, |_| {
        Scorer::load(&config.model_dir, &config.embedding, &config.classifier_path)
    })
    .context("Failed to start scoring service")?;

    let runtime = tokio::runtime::Runtime::new()?;
    let outcome = runtime.block_on(async {
        for path in &files {
            let waveform = match load_recording(path) {
                Ok(waveform) => waveform,
                Err(e) => {
                    warn!("Skipping {:?}: {}", path, e);
                    continue;
                }
            };
            match service.score(waveform, label.symbol()).await {
                Ok(score) => println!("{}\t{:.3}", path.display(), score),
                Err(e) if e.is_per_request() => println!("{}\terror: {}", path.display(), e),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    });

    service.shutdown();
    Ok(outcome?)
}

fn train(
    config: &AppConfig,
    data: PathBuf,
    output: Option<PathBuf>,
    seed: Option<u64>,
    max_iter: Option<usize>,
) -> Result<()> {
    let mut training = config.training.clone();
    if let Some(seed) = seed {
        training = training.with_seed(seed);
    }
    if let Some(max_iter) = max_iter {
        training = training.with_max_iter(max_iter);
    }

    let embedder = Wav2Vec2Embedder::load(&config.model_dir, &config.embedding)?;
    let dataset = build_dataset(&data, &embedder)?;
    let (classifier, report) = fit(&dataset.features, &dataset.labels, &training)?;

    let output = output.unwrap_or_else(|| config.classifier_path.clone());
    classifier.save(&output)?;

    info!(
        "Trained for {} epochs on {} samples ({} held out)",
        report.epochs, report.n_train, report.n_validation
    );
    if let Some(accuracy) = report.best_validation_score {
        println!("Validation accuracy: {:.3}", accuracy);
    }
    if let Some(loss) = report.final_loss() {
        println!("Final loss: {:.5}", loss);
    }
    println!("Classifier written to {}", output.display());
    Ok(())
}

fn session(config: &AppConfig) -> Result<()> {
    let scorer = load_scorer(config)?;
    let db = Database::open(&config.database_path)?;
    let archive = LocalArchive::new(&config.archive_dir);
    let mut session = Session::start(&db)?;

    println!("Xin chào! Session {}", session.id());
    println!("For each letter, enter the path of a WAV recording, or `next` to move on.");

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();

    session.next_step();
    while let Some(lesson) = session.current_lesson() {
        println!(
            "\n{} {} (video: {})",
            session.progress().unwrap_or_default(),
            lesson.title,
            lesson.video_path(&config.videos_dir).display()
        );

        let Some(line) = lines.next() else { break };
        let line = line?;
        let input = line.trim();
        if input == "next" {
            session.next_step();
            continue;
        }

        let waveform = if input.is_empty() {
            Vec::new()
        } else {
            match load_recording(Path::new(input)) {
                Ok(waveform) => waveform,
                Err(e) => {
                    println!("Could not read {}: {}", input, e);
                    continue;
                }
            }
        };

        let report = evaluate_attempt(
            &scorer,
            &archive,
            &db,
            &session,
            lesson,
            &waveform,
            config.good_threshold,
        )?;
        match report.score {
            Some(score) => println!("Score {:.2}/5: {}", score, report.feedback.message()),
            None => println!("{}", report.feedback.message()),
        }
        if matches!(report.feedback, Feedback::Verdict(_)) {
            session.next_step();
        }
    }

    let summary = db.with_conn(|conn| storage::session_summary(conn, session.id()))?;
    println!(
        "\nSession {} finished: {} attempts, {} scored",
        session.id(),
        summary.attempts,
        summary.scored
    );
    Ok(())
}

fn attempts(config: &AppConfig, session_id: &str, json: bool) -> Result<()> {
    let db = Database::open(&config.database_path)?;
    if db.with_conn(|conn| storage::get_session(conn, session_id))?.is_none() {
        anyhow::bail!("Unknown session {}", session_id);
    }

    let attempts = db.with_conn(|conn| storage::list_attempts(conn, session_id))?;
    let summary = db.with_conn(|conn| storage::session_summary(conn, session_id))?;

    if json {
        let out = serde_json::json!({ "summary": summary, "attempts": attempts });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for a in &attempts {
        let score = a
            .score
            .map(|s| format!("{:.3}", s))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}\t{}\t{}\t{}\t{}",
            a.created_at,
            a.label,
            a.outcome.as_str(),
            score,
            a.archive_path.as_deref().unwrap_or("-")
        );
    }
    if let Some(mean) = summary.mean_score {
        println!("Mean score {:.3} over {} scored attempts", mean, summary.scored);
    }
    Ok(())
}
