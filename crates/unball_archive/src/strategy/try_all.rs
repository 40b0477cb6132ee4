//! A meta-strategy for formats that no single tool reliably handles
//!
//! Each group is a list of interchangeable alternatives; the first viable
//! member of every group gets one attempt, in order, until one of them
//! leaves something new in the target directory.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;

use super::{InvokeOptions, Strategy};
use crate::error::{ExtractError, Result};

/// Try several strategies in turn until one produces output
#[derive(Debug)]
pub struct TryAll {
    mimetype: String,
    groups: Vec<Vec<Arc<dyn Strategy>>>,
    hint: Option<String>,
}

impl TryAll {
    /// `mimetype` and `hint` only feed the error returned when every
    /// attempt fails.
    pub fn new(
        mimetype: impl Into<String>,
        groups: Vec<Vec<Arc<dyn Strategy>>>,
        hint: Option<String>,
    ) -> Self {
        Self {
            mimetype: mimetype.into(),
            groups,
            hint,
        }
    }

    /// The strategies that will actually be attempted, in order
    pub fn trials(&self) -> impl Iterator<Item = &Arc<dyn Strategy>> + '_ {
        self.groups
            .iter()
            .filter_map(|group| group.iter().find(|strategy| strategy.is_viable()))
    }
}

impl Strategy for TryAll {
    fn name(&self) -> String {
        let names: Vec<String> = self.trials().map(|strategy| strategy.name()).collect();
        format!("try-all [{}]", names.join(", "))
    }

    fn is_viable(&self) -> bool {
        self.trials().next().is_some()
    }

    fn extract(&self, source: &Path, target: &Path, options: &InvokeOptions) -> Result<()> {
        if self.trials().next().is_none() {
            return Err(ExtractError::NoExtractor {
                mimetype: self.mimetype.clone(),
            });
        }

        for strategy in self.trials() {
            let before = snapshot(target)?;
            match strategy.extract(source, target, options) {
                Ok(()) if snapshot(target)?.len() > before.len() => {
                    tracing::debug!("{} succeeded on {}", strategy.name(), source.display());
                    return Ok(());
                }
                Ok(()) => {
                    tracing::debug!("{} produced nothing", strategy.name());
                }
                Err(err) if err.is_candidate_failure() => {
                    tracing::debug!("{} failed: {err}", strategy.name());
                }
                Err(err) => return Err(err),
            }
            discard_new_entries(target, &before);
        }

        Err(ExtractError::AllCandidatesFailed {
            mimetype: self.mimetype.clone(),
            hint: self.hint.clone(),
        })
    }
}

fn snapshot(dir: &Path) -> Result<HashSet<OsString>> {
    let mut names = HashSet::new();
    for entry in fs_err::read_dir(dir)? {
        names.insert(entry?.file_name());
    }
    Ok(names)
}

/// Remove whatever a failed attempt left behind
fn discard_new_entries(dir: &Path, keep: &HashSet<OsString>) {
    let Ok(entries) = fs_err::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        if keep.contains(&entry.file_name()) {
            continue;
        }
        let path = entry.path();
        let removed = match entry.file_type() {
            Ok(file_type) if file_type.is_dir() => fs_err::remove_dir_all(&path),
            _ => fs_err::remove_file(&path),
        };
        if let Err(err) = removed {
            tracing::warn!("could not clean up after failed attempt: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    #[derive(Debug)]
    struct Scripted {
        viable: bool,
        calls: AtomicUsize,
        action: fn(&Path) -> Result<()>,
    }

    impl Scripted {
        fn new(viable: bool, action: fn(&Path) -> Result<()>) -> Arc<Self> {
            Arc::new(Self {
                viable,
                calls: AtomicUsize::new(0),
                action,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Strategy for Scripted {
        fn name(&self) -> String {
            "scripted".to_owned()
        }

        fn is_viable(&self) -> bool {
            self.viable
        }

        fn extract(&self, _source: &Path, target: &Path, _options: &InvokeOptions) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.action)(target)
        }
    }

    fn fail_with_leftovers(target: &Path) -> Result<()> {
        fs_err::write(target.join("partial"), b"junk")?;
        Err(ExtractError::ToolFailed {
            tool: "broken".into(),
            code: 1,
        })
    }

    fn succeed(target: &Path) -> Result<()> {
        fs_err::write(target.join("payload"), b"data")?;
        Ok(())
    }

    fn do_nothing(_target: &Path) -> Result<()> {
        Ok(())
    }

    fn get_killed(_target: &Path) -> Result<()> {
        Err(ExtractError::ToolKilled {
            tool: "victim".into(),
            signal: 9,
        })
    }

    fn groups(strategies: &[&Arc<Scripted>]) -> Vec<Vec<Arc<dyn Strategy>>> {
        strategies
            .iter()
            .map(|s| vec![Arc::clone(*s) as Arc<dyn Strategy>])
            .collect()
    }

    fn run(try_all: &TryAll, target: &Path) -> Result<()> {
        try_all.extract(Path::new("input.bin"), target, &InvokeOptions::default())
    }

    #[test]
    fn test_failed_attempt_is_cleaned_up() {
        let target = tempfile::tempdir().unwrap();
        let first = Scripted::new(true, fail_with_leftovers);
        let second = Scripted::new(true, succeed);
        let try_all = TryAll::new("application/x-test", groups(&[&first, &second]), None);

        run(&try_all, target.path()).unwrap();

        assert!(!target.path().join("partial").exists());
        assert!(target.path().join("payload").exists());
        assert_eq!((first.calls(), second.calls()), (1, 1));
    }

    #[test]
    fn test_exhaustion_carries_hint() {
        let target = tempfile::tempdir().unwrap();
        let first = Scripted::new(true, fail_with_leftovers);
        let second = Scripted::new(true, do_nothing);
        let try_all = TryAll::new(
            "application/x-test",
            groups(&[&first, &second]),
            Some("try harder".to_owned()),
        );

        let err = run(&try_all, target.path()).unwrap_err();
        assert_matches!(
            &err,
            ExtractError::AllCandidatesFailed { mimetype, hint: Some(hint) }
                if mimetype == "application/x-test" && hint == "try harder"
        );
        assert_eq!(fs_err::read_dir(target.path()).unwrap().count(), 0);
    }

    #[traced_test]
    #[test]
    fn test_empty_success_moves_on() {
        let target = tempfile::tempdir().unwrap();
        let first = Scripted::new(true, do_nothing);
        let second = Scripted::new(true, succeed);
        let try_all = TryAll::new("application/x-test", groups(&[&first, &second]), None);

        run(&try_all, target.path()).unwrap();
        assert_eq!(second.calls(), 1);
        assert!(logs_contain("produced nothing"));
    }

    #[test]
    fn test_kill_stops_the_run() {
        let target = tempfile::tempdir().unwrap();
        let first = Scripted::new(true, get_killed);
        let second = Scripted::new(true, succeed);
        let try_all = TryAll::new("application/x-test", groups(&[&first, &second]), None);

        assert_matches!(
            run(&try_all, target.path()),
            Err(ExtractError::ToolKilled { .. })
        );
        assert_eq!(second.calls(), 0);
    }

    #[test]
    fn test_only_first_viable_member_of_a_group_runs() {
        let target = tempfile::tempdir().unwrap();
        let missing = Scripted::new(false, succeed);
        let chosen = Scripted::new(true, fail_with_leftovers);
        let alternative = Scripted::new(true, succeed);
        let group: Vec<Arc<dyn Strategy>> = vec![
            missing.clone(),
            chosen.clone(),
            alternative.clone(),
        ];
        let try_all = TryAll::new("application/x-test", vec![group], None);

        assert_eq!(try_all.trials().count(), 1);
        assert_matches!(
            run(&try_all, target.path()),
            Err(ExtractError::AllCandidatesFailed { .. })
        );
        assert_eq!(
            (missing.calls(), chosen.calls(), alternative.calls()),
            (0, 1, 0)
        );
    }

    #[test]
    fn test_viability() {
        let missing = Scripted::new(false, succeed);
        let try_all = TryAll::new("application/x-test", groups(&[&missing]), None);
        assert!(!try_all.is_viable());
        assert!(!TryAll::new("application/x-test", Vec::new(), None).is_viable());
    }

    #[test]
    fn test_nothing_viable_is_no_extractor() {
        let target = tempfile::tempdir().unwrap();
        let missing = Scripted::new(false, succeed);
        let try_all = TryAll::new("application/x-test", groups(&[&missing]), None);

        assert_matches!(
            run(&try_all, target.path()),
            Err(ExtractError::NoExtractor { mimetype }) if mimetype == "application/x-test"
        );
        assert_eq!(missing.calls(), 0);
    }
}
