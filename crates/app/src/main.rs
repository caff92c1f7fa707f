use std::fmt;
use std::path::PathBuf;

use practice_core::model::{
    ChapterId, LessonId, LessonKey, LessonPhase, TrackerSettings, TrackerSettingsDraft, UserId,
};
use services::{Clock, ProgressServices, SessionOutcome};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt as log_fmt};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidNumber { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
    InvalidUser { raw: String },
    MissingFlag { flag: &'static str },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidUser { raw } => write!(f, "invalid --user value: {raw:?}"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required for this command"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_number<T: std::str::FromStr>(raw: String, flag: &'static str) -> Result<T, ArgsError> {
    raw.trim()
        .parse()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- stats    [--user <id>]");
    eprintln!("  cargo run -p app -- week     [--user <id>]");
    eprintln!("  cargo run -p app -- complete --chapter <n> --lesson <n> --seconds <n> [--user <id>]");
    eprintln!("  cargo run -p app -- partial  --chapter <n> --lesson <n> --seconds <n> [--user <id>]");
    eprintln!("  cargo run -p app -- practice --seconds <n> [--user <id>]");
    eprintln!("  cargo run -p app -- recover  --chapter <n> --lesson <n> [--user <id>]");
    eprintln!("  cargo run -p app -- chapter  --chapter <n> [--user <id>]");
    eprintln!();
    eprintln!("Common flags:");
    eprintln!("  --db <sqlite_url>      default sqlite:progress.sqlite3");
    eprintln!("  --snapshots <dir>      default ./snapshots");
    eprintln!("  --user <id>            default local");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LEARN_DB_URL, LEARN_SNAPSHOT_DIR, LEARN_LESSON_THRESHOLD_SECS, LEARN_ROADMAP, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Stats,
    Week,
    Complete,
    Partial,
    Practice,
    Recover,
    Chapter,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "stats" => Some(Self::Stats),
            "week" => Some(Self::Week),
            "complete" => Some(Self::Complete),
            "partial" => Some(Self::Partial),
            "practice" => Some(Self::Practice),
            "recover" => Some(Self::Recover),
            "chapter" => Some(Self::Chapter),
            _ => None,
        }
    }
}

struct Args {
    db_url: String,
    snapshot_dir: PathBuf,
    user: UserId,
    chapter: Option<u32>,
    lesson: Option<u32>,
    seconds: Option<u64>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("LEARN_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://progress.sqlite3".into(), normalize_sqlite_url);
        let mut snapshot_dir = std::env::var("LEARN_SNAPSHOT_DIR")
            .ok()
            .map_or_else(|| PathBuf::from("snapshots"), PathBuf::from);
        let mut parsed = Self {
            db_url: String::new(),
            snapshot_dir: PathBuf::new(),
            user: UserId::new("local"),
            chapter: None,
            lesson: None,
            seconds: None,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--snapshots" => {
                    snapshot_dir = PathBuf::from(require_value(args, "--snapshots")?);
                }
                "--user" => {
                    let value = require_value(args, "--user")?;
                    parsed.user = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidUser { raw: value.clone() })?;
                }
                "--chapter" => {
                    parsed.chapter = Some(parse_number(require_value(args, "--chapter")?, "--chapter")?);
                }
                "--lesson" => {
                    parsed.lesson = Some(parse_number(require_value(args, "--lesson")?, "--lesson")?);
                }
                "--seconds" => {
                    parsed.seconds = Some(parse_number(require_value(args, "--seconds")?, "--seconds")?);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        parsed.db_url = db_url;
        parsed.snapshot_dir = snapshot_dir;
        Ok(parsed)
    }

    fn chapter(&self) -> Result<ChapterId, ArgsError> {
        self.chapter
            .map(ChapterId::new)
            .ok_or(ArgsError::MissingFlag { flag: "--chapter" })
    }

    fn lesson_key(&self) -> Result<LessonKey, ArgsError> {
        let lesson = self
            .lesson
            .ok_or(ArgsError::MissingFlag { flag: "--lesson" })?;
        Ok(LessonKey::new(self.chapter()?, LessonId::new(lesson)))
    }

    fn seconds(&self) -> Result<u64, ArgsError> {
        self.seconds.ok_or(ArgsError::MissingFlag { flag: "--seconds" })
    }
}

fn settings_from_env() -> Result<TrackerSettings, Box<dyn std::error::Error>> {
    let mut draft = TrackerSettingsDraft::new();
    if let Ok(raw) = std::env::var("LEARN_LESSON_THRESHOLD_SECS") {
        draft.lesson_threshold_secs = Some(parse_number(raw, "LEARN_LESSON_THRESHOLD_SECS")?);
    }
    if let Ok(raw) = std::env::var("LEARN_ROADMAP") {
        let counts = raw
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(|part| parse_number(part.to_string(), "LEARN_ROADMAP"))
            .collect::<Result<Vec<u32>, _>>()?;
        draft.chapter_lesson_counts = Some(counts);
    }
    Ok(draft.validate()?)
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn phase_label(phase: LessonPhase) -> &'static str {
    match phase {
        LessonPhase::Locked => "locked",
        LessonPhase::Unlocked => "unlocked",
        LessonPhase::Started => "started",
        LessonPhase::Completed => "completed",
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None | Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Stats,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let mut iter = argv.into_iter().skip_while(|arg| !arg.starts_with("--"));
    let parsed = Args::parse(&mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;
    let settings = settings_from_env()?;

    prepare_sqlite_file(&parsed.db_url)?;
    let services = ProgressServices::new_sqlite(
        &parsed.db_url,
        parsed.snapshot_dir.clone(),
        Clock::default_clock(),
        settings,
    )
    .await?;
    info!(db = %parsed.db_url, user = %parsed.user, ?cmd, "progress store ready");

    let user = &parsed.user;
    match cmd {
        Command::Stats => {
            let view = services.dashboard().load(user).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::Week => {
            let view = services.weekly().weekly_view(user).await?;
            for bucket in &view.days {
                println!("{:<4} {:>4} min", bucket.day.to_string(), bucket.minutes);
            }
            println!("total {:>4} min", view.total_minutes);
        }
        Command::Complete => {
            let key = parsed.lesson_key()?;
            let seconds = parsed.seconds()?;
            match services.sessions().complete_lesson(user, key, seconds).await {
                Ok(SessionOutcome::Replayed) => {
                    println!("replayed pending completion for lesson {key}");
                }
                Ok(SessionOutcome::Saved | SessionOutcome::AlreadySaved) => {
                    println!("lesson {key} completed");
                }
                Ok(outcome) => {
                    eprintln!("lesson {key}: completion not recorded ({outcome:?})");
                    std::process::exit(1);
                }
                Err(err) => {
                    eprintln!("lesson {key}: progress may not have been saved: {err}");
                    std::process::exit(1);
                }
            }
        }
        Command::Partial => {
            let key = parsed.lesson_key()?;
            let seconds = parsed.seconds()?;
            let tracker = services.tracker();
            let messages = tracker
                .lesson(user, key)
                .await?
                .map(|lesson| lesson.messages().to_vec())
                .unwrap_or_default();
            if tracker
                .save_partial_progress(user, key, seconds, messages)
                .await
            {
                println!("partial progress for lesson {key} saved");
            } else {
                eprintln!("lesson {key}: progress may not have been saved");
                std::process::exit(1);
            }
        }
        Command::Practice => {
            let seconds = parsed.seconds()?;
            match services.practice().complete_practice(user, seconds).await? {
                Some(progress) => println!(
                    "practice recorded: {} min total over {} sessions",
                    progress.total_minutes, progress.sessions_completed
                ),
                None => println!("empty practice session, nothing recorded"),
            }
        }
        Command::Recover => {
            let key = parsed.lesson_key()?;
            match services.sessions().recover(user, key).await? {
                Some(snapshot) => println!(
                    "replayed snapshot for lesson {key} ({} s, {} messages)",
                    snapshot.duration_secs,
                    snapshot.messages.len()
                ),
                None => println!("no pending snapshot for lesson {key}"),
            }
        }
        Command::Chapter => {
            let chapter = parsed.chapter()?;
            for lesson in services.tracker().chapter_overview(user, chapter).await? {
                println!(
                    "{:<8} {:<10} {:>4} min",
                    lesson.key().to_string(),
                    phase_label(lesson.phase()),
                    lesson.minutes_spent()
                );
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    log_fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
