//! Strategies that run an external extraction program
//!
//! All of them run with the target directory as working directory. Tools
//! that can ask questions get an endless stream of `y` lines on stdin so a
//! confirmation prompt cannot block us; their output is discarded unless
//! [`InvokeOptions::verbose`] is set.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::{InvokeOptions, Strategy, ViabilityCache};
use crate::error::{ExtractError, Result};

/// How often a child is polled when a timeout is configured
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Directories searched for `unstuff` in addition to `PATH`
const STUFFIT_PREFIXES: &[&str] = &["/opt/stuffit/bin"];

/// A plain `program args... <source>` invocation
#[derive(Debug)]
pub struct CommandExtractor {
    args: Vec<String>,
    viable: ViabilityCache,
}

impl CommandExtractor {
    /// `args[0]` is the program, the rest are passed before the source path
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            viable: ViabilityCache::default(),
        }
    }

    fn program(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or_default()
    }

    fn command(&self, target: &Path) -> Command {
        let mut command = Command::new(self.program());
        command.args(self.args.iter().skip(1)).current_dir(target);
        command
    }
}

impl Strategy for CommandExtractor {
    fn name(&self) -> String {
        self.program().to_owned()
    }

    fn is_viable(&self) -> bool {
        self.viable.check(|| which::which(self.program()).is_ok())
    }

    fn extract(&self, source: &Path, target: &Path, options: &InvokeOptions) -> Result<()> {
        let mut command = self.command(target);
        command.arg(source);
        run_tool(self.program(), command, Input::Yes, Output::Inherit, options)
    }
}

/// A tool that does not pick its own output name and has to be given one
#[derive(Debug)]
pub struct NamedOutputExtractor {
    inner: CommandExtractor,
    strip: Vec<String>,
    append: Option<String>,
    outfile_flag: Option<String>,
}

impl NamedOutputExtractor {
    /// At least one of `strip` or `append` should be given, otherwise the
    /// output name can only ever differ from the source by `.out`.
    pub fn new<I, S>(args: I, strip: &[&str], append: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: CommandExtractor::new(args),
            strip: strip.iter().map(|ext| (*ext).to_owned()).collect(),
            append: append.map(str::to_owned),
            outfile_flag: None,
        }
    }

    /// Prefix the output name with `flag`. If `flag` ends in a space the two
    /// are passed as separate arguments, otherwise they are glued together.
    pub fn with_outfile_flag(mut self, flag: impl Into<String>) -> Self {
        self.outfile_flag = Some(flag.into());
        self
    }

    fn output_args(&self, output: &Path) -> Vec<OsString> {
        match &self.outfile_flag {
            None => vec![output.as_os_str().to_owned()],
            Some(flag) if flag.ends_with(' ') => {
                vec![OsString::from(flag.trim()), output.as_os_str().to_owned()]
            }
            Some(flag) => {
                let mut joined = OsString::from(flag.trim());
                joined.push(output.as_os_str());
                vec![joined]
            }
        }
    }
}

impl Strategy for NamedOutputExtractor {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn is_viable(&self) -> bool {
        self.inner.is_viable()
    }

    fn extract(&self, source: &Path, target: &Path, options: &InvokeOptions) -> Result<()> {
        let output = output_path(source, target, self.strip.as_slice(), self.append.as_deref());
        let mut command = self.inner.command(target);
        command.arg(source).args(self.output_args(&output));
        run_tool(self.inner.program(), command, Input::Yes, Output::Inherit, options)
    }
}

/// A stream decompressor.
///
/// Tools like `gunzip` delete their input on success when given a file
/// name, so the source is fed through stdin instead and stdout goes straight
/// into the output file.
#[derive(Debug)]
pub struct PipeExtractor {
    inner: CommandExtractor,
    strip: Vec<String>,
    append: Option<String>,
}

impl PipeExtractor {
    pub fn new<I, S>(args: I, strip: &[&str], append: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: CommandExtractor::new(args),
            strip: strip.iter().map(|ext| (*ext).to_owned()).collect(),
            append: append.map(str::to_owned),
        }
    }
}

impl Strategy for PipeExtractor {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn is_viable(&self) -> bool {
        self.inner.is_viable()
    }

    fn extract(&self, source: &Path, target: &Path, options: &InvokeOptions) -> Result<()> {
        let output = output_path(source, target, self.strip.as_slice(), self.append.as_deref());
        let input = fs_err::File::open(source)?;
        let sink = fs_err::File::create(&output)?;
        run_tool(
            self.inner.program(),
            self.inner.command(target),
            Input::File(input.into_parts().0),
            Output::File(sink.into_parts().0),
            options,
        )
    }
}

/// StuffIt's `unstuff`, which lives outside `PATH` in its default install
/// location and only accepts source paths relative to its working directory
#[derive(Debug)]
pub struct StuffitExtractor {
    search_path: OsString,
    viable: ViabilityCache,
}

impl StuffitExtractor {
    pub fn new() -> Self {
        let mut dirs: Vec<PathBuf> = std::env::var_os("PATH")
            .map(|path| std::env::split_paths(&path).collect())
            .unwrap_or_default();
        dirs.extend(STUFFIT_PREFIXES.iter().map(PathBuf::from));
        Self {
            search_path: std::env::join_paths(dirs).unwrap_or_default(),
            viable: ViabilityCache::default(),
        }
    }

    fn locate(&self) -> Option<PathBuf> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        which::which_in("unstuff", Some(&self.search_path), cwd).ok()
    }
}

impl Default for StuffitExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for StuffitExtractor {
    fn name(&self) -> String {
        "unstuff".to_owned()
    }

    fn is_viable(&self) -> bool {
        self.viable.check(|| self.locate().is_some())
    }

    fn extract(&self, source: &Path, target: &Path, options: &InvokeOptions) -> Result<()> {
        let program = self.locate().ok_or_else(|| ExtractError::NoExtractor {
            mimetype: "application/x-stuffit".to_owned(),
        })?;
        let relative = pathdiff::diff_paths(source, target).unwrap_or_else(|| source.to_owned());

        let mut command = Command::new(program);
        command
            .arg("--destination=.")
            .arg(relative)
            .env("PATH", &self.search_path)
            .current_dir(target);
        run_tool("unstuff", command, Input::Yes, Output::Inherit, options)
    }
}

/// Compute the file name a single-file decoder should write.
///
/// The first of `strip` found (case-insensitively) at the end of the source
/// name is removed and `append` is added. If that lands on the source path
/// itself, `.out` is appended.
pub fn output_path<S: AsRef<str>>(
    source: &Path,
    target: &Path,
    strip: &[S],
    append: Option<&str>,
) -> PathBuf {
    let original = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut name = original.clone();
    if let Some(ext) = strip
        .iter()
        .map(AsRef::as_ref)
        .find(|ext| has_suffix_ignore_case(&name, ext))
    {
        name.truncate(name.len() - ext.len());
    }
    if name.is_empty() {
        name = original;
    }
    if let Some(ext) = append {
        name.push_str(ext);
    }

    let mut output = target.join(&name);
    if output == source {
        name.push_str(".out");
        output = target.join(name);
    }
    output
}

fn has_suffix_ignore_case(name: &str, suffix: &str) -> bool {
    name.len() >= suffix.len()
        && name.is_char_boundary(name.len() - suffix.len())
        && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

enum Input {
    /// An endless stream of `y\n`
    Yes,
    File(std::fs::File),
}

enum Output {
    /// Discarded, or passed through in verbose mode
    Inherit,
    File(std::fs::File),
}

fn run_tool(
    tool: &str,
    mut command: Command,
    input: Input,
    output: Output,
    options: &InvokeOptions,
) -> Result<()> {
    let passthrough = || {
        if options.verbose {
            Stdio::inherit()
        } else {
            Stdio::null()
        }
    };

    match input {
        Input::Yes => command.stdin(Stdio::piped()),
        Input::File(file) => command.stdin(Stdio::from(file)),
    };
    match output {
        Output::Inherit => command.stdout(passthrough()),
        Output::File(file) => command.stdout(Stdio::from(file)),
    };
    command.stderr(passthrough());

    tracing::trace!("running {:?}", command);
    let mut child = command.spawn().map_err(|source| ExtractError::ToolSpawn {
        tool: tool.to_owned(),
        source,
    })?;

    let feeder = child.stdin.take().map(|mut stdin| {
        thread::spawn(move || {
            let chunk = b"y\n".repeat(2048);
            // Ends with a broken pipe once the child exits.
            while stdin.write_all(&chunk).is_ok() {}
        })
    });

    let status = wait_for(&mut child, tool, options.timeout);
    if let Some(feeder) = feeder {
        let _ = feeder.join();
    }
    check_status(tool, status?)
}

fn wait_for(child: &mut Child, tool: &str, timeout: Option<Duration>) -> Result<ExitStatus> {
    let Some(timeout) = timeout else {
        return Ok(child.wait()?);
    };

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            tracing::warn!("{tool} exceeded {}s, killing it", timeout.as_secs_f32());
            let _ = child.kill();
            let _ = child.wait();
            return Err(ExtractError::ToolTimedOut {
                tool: tool.to_owned(),
                timeout,
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn check_status(tool: &str, status: ExitStatus) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    if let Some(code) = status.code() {
        return Err(ExtractError::ToolFailed {
            tool: tool.to_owned(),
            code,
        });
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Err(ExtractError::ToolKilled {
                tool: tool.to_owned(),
                signal,
            });
        }
    }
    Err(ExtractError::ToolFailed {
        tool: tool.to_owned(),
        code: -1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const NO_EXT: &[&str] = &[];

    #[test]
    fn test_output_path_naming() {
        let src = Path::new("/src/foo.gz");
        let dst = Path::new("/dst");
        assert_eq!(
            output_path(src, dst, &[".gz"], None),
            PathBuf::from("/dst/foo")
        );
        assert_eq!(
            output_path(src, dst, &[".gz"], Some(".txt")),
            PathBuf::from("/dst/foo.txt")
        );
        assert_eq!(
            output_path(Path::new("/src/foo.goz"), dst, &[".gz"], Some(".out")),
            PathBuf::from("/dst/foo.goz.out")
        );
        assert_eq!(
            output_path(Path::new("/src/foo.lol"), dst, NO_EXT, Some(".wut")),
            PathBuf::from("/dst/foo.lol.wut")
        );
        assert_eq!(
            output_path(Path::new("/src/FOO.GZ"), dst, &[".gz"], None),
            PathBuf::from("/dst/FOO")
        );
    }

    #[test]
    fn test_output_path_never_equals_source() {
        let src = Path::new("/same/archive");
        assert_eq!(
            output_path(src, Path::new("/same"), &[".gz"], None),
            PathBuf::from("/same/archive.out")
        );
        assert_eq!(
            output_path(Path::new("/src/.gz"), Path::new("/dst"), &[".gz"], None),
            PathBuf::from("/dst/.gz")
        );
    }

    #[test]
    fn test_outfile_flag_forms() {
        let out = Path::new("/dst/foo");
        let bare = NamedOutputExtractor::new(["runzip"], &[".rz"], None);
        assert_eq!(bare.output_args(out), vec![OsString::from("/dst/foo")]);

        let spaced = NamedOutputExtractor::new(["runzip"], &[".rz"], None).with_outfile_flag("-o ");
        assert_eq!(
            spaced.output_args(out),
            vec![OsString::from("-o"), OsString::from("/dst/foo")]
        );

        let glued = NamedOutputExtractor::new(["7z"], &[".rz"], None).with_outfile_flag("-o");
        assert_eq!(glued.output_args(out), vec![OsString::from("-o/dst/foo")]);
    }

    #[test]
    fn test_missing_program_is_not_viable() {
        let extractor = CommandExtractor::new(["unball-test-no-such-program", "x"]);
        assert!(!extractor.is_viable());
        assert_eq!(extractor.name(), "unball-test-no-such-program");
    }

    #[test]
    fn test_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = CommandExtractor::new(["unball-test-no-such-program"]);
        let result = extractor.extract(
            &dir.path().join("a.zip"),
            dir.path(),
            &InvokeOptions::default(),
        );
        assert_matches!(result, Err(ExtractError::ToolSpawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_is_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("input");
        fs_err::write(&source, b"data").unwrap();

        let ok = CommandExtractor::new(["true"]);
        assert!(ok.extract(&source, dir.path(), &InvokeOptions::default()).is_ok());

        let failing = CommandExtractor::new(["false"]);
        assert_matches!(
            failing.extract(&source, dir.path(), &InvokeOptions::default()),
            Err(ExtractError::ToolFailed { code: 1, .. })
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_prompting_tool_gets_yes() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("input");
        fs_err::write(&source, b"data").unwrap();

        // `head -n 3` reads three answers from stdin and writes them to the
        // file named after it; cwd must be the target directory.
        let extractor = NamedOutputExtractor::new(["sh", "-c", "head -n 3 > answers", "sh"], &[], Some(".x"));
        extractor
            .extract(&source, dir.path(), &InvokeOptions::default())
            .unwrap();
        assert_eq!(
            fs_err::read_to_string(dir.path().join("answers")).unwrap(),
            "y\ny\ny\n"
        );
        assert!(source.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_pipe_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        fs_err::create_dir(&target).unwrap();
        let source = dir.path().join("data.gz");
        fs_err::write(&source, b"hello").unwrap();

        let extractor = PipeExtractor::new(["cat"], &[".gz"], None);
        extractor
            .extract(&source, &target, &InvokeOptions::default())
            .unwrap();
        assert_eq!(fs_err::read(target.join("data")).unwrap(), b"hello");
        assert_eq!(fs_err::read(&source).unwrap(), b"hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_tool() {
        let dir = tempfile::tempdir().unwrap();
        let options = InvokeOptions {
            verbose: false,
            timeout: Some(Duration::from_millis(200)),
        };
        let sleeper = CommandExtractor::new(["sh", "-c", "exec sleep 5", "sh"]);
        let started = Instant::now();
        assert_matches!(
            sleeper.extract(&dir.path().join("x"), dir.path(), &options),
            Err(ExtractError::ToolTimedOut { .. })
        );
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
