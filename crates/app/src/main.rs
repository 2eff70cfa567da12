use std::fmt;
use std::sync::Arc;

use progress_core::model::{
    AwardDraft, CourseId, IdError, LessonId, LessonProgressPatch, Percent, ProfileId,
};
use services::{Clock, MigrationService, ProgressService};
use storage::repository::Storage;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_DB_URL: &str = "sqlite://progress.sqlite3";
const DEFAULT_LOG_DIRECTIVES: &str = "warn,services=info,storage=info";

#[derive(Debug)]
enum ArgsError {
    MissingCommand,
    UnknownCommand(String),
    MissingValue { flag: &'static str },
    MissingArgument { name: &'static str },
    UnknownArg(String),
    MissingProfile,
    Invalid(progress_core::Error),
    InvalidDbUrl { raw: String },
    InvalidPercent { raw: String },
    InvalidPoints { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingCommand => write!(f, "missing subcommand"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown subcommand: {cmd}"),
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingArgument { name } => write!(f, "missing <{name}> argument"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::MissingProfile => {
                write!(f, "no profile selected; pass --profile or set PROGRESS_PROFILE")
            }
            ArgsError::Invalid(err) => write!(f, "{err}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidPercent { raw } => write!(f, "invalid percentage: {raw}"),
            ArgsError::InvalidPoints { raw } => write!(f, "invalid --points value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<progress_core::Error> for ArgsError {
    fn from(err: progress_core::Error) -> Self {
        ArgsError::Invalid(err)
    }
}

impl From<IdError> for ArgsError {
    fn from(err: IdError) -> Self {
        ArgsError::Invalid(err.into())
    }
}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_percent(raw: String) -> Result<Percent, ArgsError> {
    let Ok(value) = raw.trim().parse::<i64>() else {
        return Err(ArgsError::InvalidPercent { raw });
    };
    let percent = Percent::new(value).map_err(progress_core::Error::from)?;
    Ok(percent)
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  progress show       [<lesson_id>]");
    eprintln!("  progress set-lesson <lesson_id> [--video] [--interactive] [--completed]");
    eprintln!("                      [--progress <0-100>] [--test <test_id>]...");
    eprintln!("  progress course     <course_id> [--set <0-100>] [--recompute <lesson,lesson,..>]");
    eprintln!("  progress award      <course_id> [--points <n> --name <course_name>] [--force]");
    eprintln!("  progress migrate");
    eprintln!("  progress clear");
    eprintln!();
    eprintln!("Every subcommand accepts:");
    eprintln!("  --db <sqlite_url>     (default {DEFAULT_DB_URL})");
    eprintln!("  --profile <id>");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PROGRESS_DB_URL, PROGRESS_PROFILE, RUST_LOG");
}

#[derive(Debug)]
enum Command {
    Show {
        lesson: Option<LessonId>,
    },
    SetLesson {
        lesson: LessonId,
        patch: LessonProgressPatch,
    },
    Course {
        course: CourseId,
        set: Option<Percent>,
        recompute: Option<Vec<LessonId>>,
    },
    Award {
        course: CourseId,
        grant: Option<AwardDraft>,
        force: bool,
    },
    Migrate,
    Clear,
}

struct Args {
    db_url: String,
    profile: ProfileId,
    command: Command,
}

/// Flags shared by every subcommand.
struct Common {
    db_url: String,
    profile: Option<String>,
}

impl Common {
    fn from_env() -> Self {
        Self {
            db_url: std::env::var("PROGRESS_DB_URL")
                .ok()
                .map_or_else(|| DEFAULT_DB_URL.into(), normalize_sqlite_url),
            profile: std::env::var("PROGRESS_PROFILE")
                .ok()
                .filter(|value| !value.trim().is_empty()),
        }
    }

    /// Consumes `arg` if it is a shared flag.
    fn take(
        &mut self,
        arg: &str,
        args: &mut impl Iterator<Item = String>,
    ) -> Result<bool, ArgsError> {
        match arg {
            "--db" => {
                let value = require_value(args, "--db")?;
                if value.trim().is_empty() {
                    return Err(ArgsError::InvalidDbUrl { raw: value });
                }
                self.db_url = normalize_sqlite_url(value);
                Ok(true)
            }
            "--profile" => {
                self.profile = Some(require_value(args, "--profile")?);
                Ok(true)
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            _ => Ok(false),
        }
    }
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let name = args.next().ok_or(ArgsError::MissingCommand)?;
        let mut common = Common::from_env();
        let mut positional: Vec<String> = Vec::new();

        let command = match name.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "show" => {
                while let Some(arg) = args.next() {
                    if !common.take(&arg, &mut args)? {
                        positional.push(arg);
                    }
                }
                let lesson = single_optional(positional)?.map(LessonId::new).transpose()?;
                Command::Show { lesson }
            }
            "set-lesson" => {
                let mut patch = LessonProgressPatch::new();
                while let Some(arg) = args.next() {
                    match arg.as_str() {
                        "--video" => patch = patch.video_completed(true),
                        "--interactive" => patch = patch.interactive_completed(true),
                        "--completed" => patch = patch.lesson_completed(true),
                        "--progress" => {
                            let value = require_value(&mut args, "--progress")?;
                            patch = patch.current_progress(parse_percent(value)?);
                        }
                        "--test" => {
                            patch = patch.add_completed_test(require_value(&mut args, "--test")?);
                        }
                        _ if common.take(&arg, &mut args)? => {}
                        _ => positional.push(arg),
                    }
                }
                let lesson = LessonId::new(single_required(positional, "lesson_id")?)?;
                Command::SetLesson { lesson, patch }
            }
            "course" => {
                let mut set = None;
                let mut recompute = None;
                while let Some(arg) = args.next() {
                    match arg.as_str() {
                        "--set" => set = Some(parse_percent(require_value(&mut args, "--set")?)?),
                        "--recompute" => {
                            let value = require_value(&mut args, "--recompute")?;
                            let lessons = value
                                .split(',')
                                .filter(|part| !part.trim().is_empty())
                                .map(|part| LessonId::new(part.trim()))
                                .collect::<Result<Vec<_>, _>>()?;
                            recompute = Some(lessons);
                        }
                        _ if common.take(&arg, &mut args)? => {}
                        _ => positional.push(arg),
                    }
                }
                let course = CourseId::new(single_required(positional, "course_id")?)?;
                Command::Course {
                    course,
                    set,
                    recompute,
                }
            }
            "award" => {
                let mut points = None;
                let mut course_name = None;
                let mut force = false;
                while let Some(arg) = args.next() {
                    match arg.as_str() {
                        "--points" => {
                            let value = require_value(&mut args, "--points")?;
                            let parsed: u32 = value
                                .trim()
                                .parse()
                                .map_err(|_| ArgsError::InvalidPoints { raw: value.clone() })?;
                            points = Some(parsed);
                        }
                        "--name" => course_name = Some(require_value(&mut args, "--name")?),
                        "--force" => force = true,
                        _ if common.take(&arg, &mut args)? => {}
                        _ => positional.push(arg),
                    }
                }
                let course = CourseId::new(single_required(positional, "course_id")?)?;
                let grant = match (points, course_name) {
                    (Some(points), Some(name)) => Some(AwardDraft::new(points, name)),
                    (None, None) => None,
                    (Some(_), None) => return Err(ArgsError::MissingValue { flag: "--name" }),
                    (None, Some(_)) => return Err(ArgsError::MissingValue { flag: "--points" }),
                };
                Command::Award {
                    course,
                    grant,
                    force,
                }
            }
            "migrate" | "clear" => {
                while let Some(arg) = args.next() {
                    if !common.take(&arg, &mut args)? {
                        return Err(ArgsError::UnknownArg(arg));
                    }
                }
                if name == "migrate" {
                    Command::Migrate
                } else {
                    Command::Clear
                }
            }
            _ => return Err(ArgsError::UnknownCommand(name)),
        };

        let profile = ProfileId::new(common.profile.ok_or(ArgsError::MissingProfile)?)?;
        Ok(Self {
            db_url: common.db_url,
            profile,
            command,
        })
    }
}

fn single_optional(mut positional: Vec<String>) -> Result<Option<String>, ArgsError> {
    if positional.len() > 1 {
        return Err(ArgsError::UnknownArg(positional.remove(1)));
    }
    Ok(positional.pop())
}

fn single_required(positional: Vec<String>, name: &'static str) -> Result<String, ArgsError> {
    single_optional(positional)?.ok_or(ArgsError::MissingArgument { name })
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
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
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

fn print_json(value: &impl serde::Serialize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let parsed = Args::parse(std::env::args().skip(1)).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    prepare_sqlite_file(&parsed.db_url)?;
    let storage = Storage::sqlite(&parsed.db_url).await?;
    let clock = Clock::system();
    let profile = &parsed.profile;

    match parsed.command {
        Command::Show { lesson: Some(lesson) } => {
            let progress = ProgressService::new(clock, Arc::clone(&storage.kv));
            match progress.get_lesson_progress(profile, &lesson).await? {
                Some(record) => print_json(&record)?,
                None => println!("no progress recorded for {lesson}"),
            }
        }
        Command::Show { lesson: None } => {
            let progress = ProgressService::new(clock, Arc::clone(&storage.kv));
            let lessons = progress.list_lesson_progress(profile).await?;
            let listing: serde_json::Map<String, serde_json::Value> = lessons
                .into_iter()
                .map(|(id, record)| serde_json::to_value(record).map(|value| (id.to_string(), value)))
                .collect::<Result<_, serde_json::Error>>()?;
            print_json(&listing)?;
        }
        Command::SetLesson { lesson, patch } => {
            let progress = ProgressService::new(clock, Arc::clone(&storage.kv));
            let record = progress.set_lesson_progress(profile, &lesson, patch).await?;
            print_json(&record)?;
        }
        Command::Course {
            course,
            set,
            recompute,
        } => {
            let progress = ProgressService::new(clock, Arc::clone(&storage.kv));
            if let Some(value) = set {
                progress
                    .set_course_overall_progress(profile, &course, value)
                    .await?;
            }
            if let Some(lessons) = recompute {
                progress
                    .recompute_course_progress(profile, &course, &lessons)
                    .await?;
            }
            let value = progress.get_course_overall_progress(profile, &course).await?;
            println!("{course}: {value}%");
        }
        Command::Award {
            course,
            grant,
            force,
        } => {
            let progress = ProgressService::new(clock, Arc::clone(&storage.kv));
            match grant {
                Some(draft) if force => {
                    let award = progress.mark_points_awarded(profile, &course, draft).await?;
                    print_json(&award)?;
                }
                Some(draft) => match progress.award_points_once(profile, &course, draft).await? {
                    Some(award) => print_json(&award)?,
                    None => {
                        eprintln!("points for {course} were already awarded");
                        if let Some(existing) =
                            progress.get_points_award_data(profile, &course).await?
                        {
                            print_json(&existing)?;
                        }
                    }
                },
                None => match progress.get_points_award_data(profile, &course).await? {
                    Some(award) => print_json(&award)?,
                    None if progress.has_points_been_awarded(profile, &course).await? => {
                        println!("{course}: awarded (record unreadable)");
                    }
                    None => println!("{course}: not awarded"),
                },
            }
        }
        Command::Migrate => {
            let migration = MigrationService::new(clock, Arc::clone(&storage.kv));
            let report = migration.run(profile).await?;
            println!(
                "scanned {} keys: {} invalid removed, {} migrated, {} superseded, {} failed",
                report.scanned,
                report.invalid_removed,
                report.migrated,
                report.superseded,
                report.failures
            );
        }
        Command::Clear => {
            let progress = ProgressService::new(clock, Arc::clone(&storage.kv));
            let removed = progress.clear_profile_data(profile).await?;
            info!(profile = %profile, removed, "cleared profile data");
            println!("removed {removed} keys for {profile}");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVES));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
