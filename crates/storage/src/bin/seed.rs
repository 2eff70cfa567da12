use std::fmt;

use chrono::{DateTime, Utc};
use progress_core::keys::{DataKind, namespaced_key};
use progress_core::model::ProfileId;
use storage::repository::{KeyValueStore, Storage};

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    profile: ProfileId,
    lessons: u32,
    courses: u32,
    legacy: bool,
    corrupt: bool,
    now: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidProfile { raw: String },
    InvalidLessons { raw: String },
    InvalidCourses { raw: String },
    InvalidDbUrl { raw: String },
    InvalidNow { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidProfile { raw } => write!(f, "invalid --profile value: {raw:?}"),
            ArgsError::InvalidLessons { raw } => write!(f, "invalid --lessons value: {raw}"),
            ArgsError::InvalidCourses { raw } => write!(f, "invalid --courses value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidNow { raw } => {
                write!(f, "invalid --now value (expected RFC3339): {raw}")
            }
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

fn parse_profile(raw: String) -> Result<ProfileId, ArgsError> {
    ProfileId::new(raw.clone()).map_err(|_| ArgsError::InvalidProfile { raw })
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("PROGRESS_DB_URL").unwrap_or_else(|_| "sqlite:progress.sqlite3".into());
        let mut profile = parse_profile(
            std::env::var("PROGRESS_PROFILE").unwrap_or_else(|_| "kid_1".into()),
        )?;
        let mut lessons = std::env::var("PROGRESS_SEED_LESSONS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(3);
        let mut courses = 1;
        let mut legacy = false;
        let mut corrupt = false;
        let mut now: Option<DateTime<Utc>> = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--profile" => {
                    profile = parse_profile(require_value(&mut args, "--profile")?)?;
                }
                "--lessons" => {
                    let value = require_value(&mut args, "--lessons")?;
                    lessons = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidLessons { raw: value.clone() })?;
                }
                "--courses" => {
                    let value = require_value(&mut args, "--courses")?;
                    courses = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidCourses { raw: value.clone() })?;
                }
                "--legacy" => legacy = true,
                "--corrupt" => corrupt = true,
                "--now" => {
                    let value = require_value(&mut args, "--now")?;
                    let parsed = DateTime::parse_from_rfc3339(&value)
                        .map_err(|_| ArgsError::InvalidNow { raw: value.clone() })?
                        .with_timezone(&Utc);
                    now = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            profile,
            lessons,
            courses,
            legacy,
            corrupt,
            now,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p progress-storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite:progress.sqlite3)");
    eprintln!("  --profile <id>            Profile to seed (default: kid_1)");
    eprintln!("  --lessons <n>             Lesson progress records to write (default: 3)");
    eprintln!("  --courses <n>             Courses with overall progress and award (default: 1)");
    eprintln!("  --legacy                  Write the pre-namespacing key layout");
    eprintln!("  --corrupt                 Also write one unparsable lesson record");
    eprintln!("  --now <rfc3339>           Fixed current time for deterministic seeding");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PROGRESS_DB_URL, PROGRESS_PROFILE, PROGRESS_SEED_LESSONS");
}

/// Key for `kind`/`identifier` in the requested layout.
fn seed_key(args: &Args, kind: &DataKind, identifier: &str) -> String {
    if args.legacy {
        format!("{kind}_{}_{identifier}", args.profile)
    } else {
        namespaced_key(&args.profile, kind, Some(identifier))
    }
}

/// Progress of the `index`-th seeded lesson: steps of 35, capped at 100.
fn seeded_progress(index: u32) -> u32 {
    index.saturating_mul(35).min(100)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&args.db_url).await?;
    let now = args.now.unwrap_or_else(Utc::now);

    for i in 0..args.lessons {
        let progress = seeded_progress(i);
        let completed_tests: Vec<String> = if progress >= 70 {
            vec![format!("quiz_{}", i + 1)]
        } else {
            Vec::new()
        };
        let record = serde_json::json!({
            "videoCompleted": progress > 0,
            "interactiveCompleted": progress >= 70,
            "lessonCompleted": progress == 100,
            "currentProgress": progress,
            "completedTests": completed_tests,
            "lastUpdated": now,
            "ownerProfileId": args.profile,
        });
        let key = seed_key(&args, &DataKind::LessonProgress, &format!("lesson_{}", i + 1));
        storage.kv.set(&key, &record.to_string()).await?;
    }

    for i in 0..args.courses {
        let course = format!("course_{}", i + 1);
        let overall = seed_key(&args, &DataKind::CourseOverallProgress, &course);
        storage.kv.set(&overall, "100").await?;

        let award = serde_json::json!({
            "pointsAwarded": 50,
            "timestamp": now,
            "courseName": format!("Course {}", i + 1),
            "ownerProfileId": args.profile,
        });
        let award_key = seed_key(&args, &DataKind::CoursePointsAwarded, &course);
        storage.kv.set(&award_key, &award.to_string()).await?;
    }

    if args.corrupt {
        let key = namespaced_key(&args.profile, &DataKind::LessonProgress, Some("broken"));
        storage.kv.set(&key, "{not valid json").await?;
    }

    println!(
        "Seeded {} lessons and {} courses for profile {} ({} layout) into {}",
        args.lessons,
        args.courses,
        args.profile,
        if args.legacy { "legacy" } else { "current" },
        args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
