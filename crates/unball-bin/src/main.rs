//! `unball`: extract archives given only their file names

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use console::style;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};
use unball_archive::{
    ExtractError, Extractor, ExtractorBuilder, IndicatifProgressReporter, ProgressReporter,
    Registry,
};

/// Exit code for failures outside of any single archive
const EXIT_UNKNOWN: u8 = 7;

/// Extract one or more archives, given only the filename, without making a mess
#[derive(Debug, Parser)]
#[command(name = "unball", version)]
struct Opt {
    /// Archives to extract
    #[arg(required_unless_present = "self_test")]
    paths: Vec<PathBuf>,

    /// Target directory for extracted files (defaults to the current directory)
    #[arg(short = 'd', long = "dir", value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Extract each archive next to itself
    #[arg(short = 'D', long, conflicts_with = "dir")]
    samedir: bool,

    /// Exit with an error when a file is not a recognised archive
    #[arg(long)]
    strict: bool,

    /// Check the built-in format tables for consistency and exit
    #[arg(long)]
    self_test: bool,

    /// Kill extraction tools that run longer than this many seconds
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Only use the extractors built into unball, never external tools
    #[arg(long)]
    internal_only: bool,

    /// Do not draw progress spinners
    #[arg(long)]
    no_progress: bool,

    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,
}

fn main() -> ExitCode {
    let opt = Opt::parse();

    let level = opt.verbose.tracing_level_filter();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    match run(opt, level) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:?}", style("error:").red().bold());
            ExitCode::from(EXIT_UNKNOWN)
        }
    }
}

fn run(opt: Opt, level: LevelFilter) -> anyhow::Result<ExitCode> {
    if opt.self_test {
        return self_test();
    }

    let target = if opt.samedir {
        None
    } else {
        let dir = match opt.dir.clone() {
            Some(dir) => dir,
            None => std::env::current_dir().context("failed to determine the current directory")?,
        };
        if !is_writable_dir(&dir) {
            eprintln!(
                "{} cannot write to target directory {}",
                style("error:").red().bold(),
                dir.display()
            );
            return Ok(ExitCode::from(2));
        }
        Some(dir)
    };

    let registry = if opt.internal_only {
        Registry::internal_only()
    } else {
        Registry::builtin()
    }
    .context("failed to build the extractor registry")?;

    // Tool output and spinners would draw over each other
    let verbose = level >= LevelFilter::DEBUG;
    let builder = ExtractorBuilder::new()
        .with_registry(Arc::new(registry))
        .with_verbose(verbose)
        .with_timeout(opt.timeout.map(Duration::from_secs));

    let show_progress = !opt.no_progress && !verbose && console::Term::stderr().is_term();
    let outcome = if show_progress {
        let extractor = builder
            .with_progress_reporter(IndicatifProgressReporter::with_default_style())
            .build()?;
        extract_all(&extractor, &opt.paths, target.as_deref(), opt.strict)
    } else {
        extract_all(&builder.build()?, &opt.paths, target.as_deref(), opt.strict)
    };

    outcome.report();
    Ok(ExitCode::from(outcome.exit_code))
}

fn self_test() -> anyhow::Result<ExitCode> {
    let report = unball_archive::self_test().context("failed to build the extractor registry")?;
    print!("{report}");
    if report.is_clean() {
        println!("{}", style("self-test passed").green());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{}", style("self-test failed").red());
        Ok(ExitCode::from(1))
    }
}

fn extract_all<P: ProgressReporter>(
    extractor: &Extractor<P>,
    paths: &[PathBuf],
    target: Option<&Path>,
    strict: bool,
) -> Outcome {
    let mut outcome = Outcome::new(strict);
    for path in paths {
        let result = extractor.extract(path, target);
        if let Ok(published) = &result {
            tracing::info!("{} -> {}", path.display(), published.display());
        }
        if !outcome.record(path, result) {
            break;
        }
    }
    outcome
}

/// Accumulated results of one batch
#[derive(Debug, Default)]
struct Outcome {
    strict: bool,
    exit_code: u8,
    failures: Vec<(PathBuf, ExtractError)>,
    cautions: Vec<(PathBuf, ExtractError)>,
}

impl Outcome {
    fn new(strict: bool) -> Self {
        Self {
            strict,
            ..Self::default()
        }
    }

    /// Record the result for `path`. Returns `false` when the batch must stop.
    fn record(&mut self, path: &Path, result: Result<PathBuf, ExtractError>) -> bool {
        let err = match result {
            Ok(_) => return true,
            Err(err) => err,
        };
        let code = u8::try_from(err.exit_code()).unwrap_or(EXIT_UNKNOWN);
        match err {
            ExtractError::UnsupportedFiletype { .. } => {
                if self.strict {
                    self.exit_code = self.exit_code.max(code);
                }
                self.cautions.push((path.to_owned(), err));
                true
            }
            ExtractError::ToolKilled { .. } => {
                self.exit_code = code;
                self.failures.push((path.to_owned(), err));
                false
            }
            err => {
                self.exit_code = self.exit_code.max(code);
                self.failures.push((path.to_owned(), err));
                true
            }
        }
    }

    fn report(&self) {
        if !self.cautions.is_empty() {
            eprintln!(
                "{}",
                style("The following files were not recognised as archives:").yellow()
            );
            for (path, err) in &self.cautions {
                eprintln!("  {}: {err}", path.display());
            }
        }
        if !self.failures.is_empty() {
            eprintln!(
                "{}",
                style("The following files could not be extracted:").red()
            );
            for (path, err) in &self.failures {
                eprintln!("  {}: {err}", path.display());
            }
        }
    }
}

#[cfg(unix)]
fn is_writable_dir(dir: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    if !dir.is_dir() {
        return false;
    }
    let Ok(path) = CString::new(dir.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: `path` is a valid NUL-terminated string that outlives the call.
    unsafe { libc::access(path.as_ptr(), libc::W_OK | libc::X_OK) == 0 }
}

#[cfg(not(unix))]
fn is_writable_dir(dir: &Path) -> bool {
    std::fs::metadata(dir)
        .map(|metadata| metadata.is_dir() && !metadata.permissions().readonly())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn unsupported() -> Result<PathBuf, ExtractError> {
        Err(ExtractError::unsupported("text/plain", None))
    }

    #[test]
    fn test_cli_definition() {
        Opt::command().debug_assert();
    }

    #[test]
    fn test_samedir_conflicts_with_dir() {
        assert!(Opt::try_parse_from(["unball", "-D", "-d", "/tmp", "a.zip"]).is_err());
        assert!(Opt::try_parse_from(["unball"]).is_err());
        let opt = Opt::try_parse_from(["unball", "--self-test"]).unwrap();
        assert!(opt.self_test && opt.paths.is_empty());
    }

    #[test]
    fn test_exit_code_is_most_severe() {
        let mut outcome = Outcome::new(false);
        assert!(outcome.record(Path::new("a"), Ok(PathBuf::from("a.out"))));
        assert!(outcome.record(
            Path::new("b"),
            Err(ExtractError::NoExtractor {
                mimetype: "application/x-rar".into()
            })
        ));
        assert!(outcome.record(
            Path::new("c"),
            Err(ExtractError::AlreadyExists {
                path: PathBuf::from("c")
            })
        ));
        assert_eq!(outcome.exit_code, 4);
        assert_eq!(outcome.failures.len(), 2);
    }

    #[test]
    fn test_unsupported_only_fails_when_strict() {
        let mut lenient = Outcome::new(false);
        assert!(lenient.record(Path::new("notes.txt"), unsupported()));
        assert_eq!(lenient.exit_code, 0);
        assert_eq!(lenient.cautions.len(), 1);

        let mut strict = Outcome::new(true);
        assert!(strict.record(Path::new("notes.txt"), unsupported()));
        assert_eq!(strict.exit_code, 1);
    }

    #[test]
    fn test_killed_tool_stops_the_batch() {
        let mut outcome = Outcome::new(false);
        assert!(outcome.record(
            Path::new("a"),
            Err(ExtractError::ToolFailed {
                tool: "unzip".into(),
                code: 9
            })
        ));
        assert!(!outcome.record(
            Path::new("b"),
            Err(ExtractError::ToolKilled {
                tool: "unrar".into(),
                signal: 2
            })
        ));
        assert_eq!(outcome.exit_code, 6);
    }

    #[test]
    fn test_writable_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_writable_dir(dir.path()));
        assert!(!is_writable_dir(&dir.path().join("missing")));
    }
}
