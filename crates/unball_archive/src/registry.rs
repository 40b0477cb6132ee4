//! The extractor registry
//!
//! A [`Registry`] is built once from a set of [`RawTables`] and never
//! changes afterwards. Building happens in two passes: concrete candidates
//! become strategies first, then try-all entries that refer to other
//! mimetypes are resolved against what the first pass produced.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{ExtractError, Result};
use crate::mimetype::DEFAULT_MIMETYPE;
use crate::strategy::{
    BuiltinExtractor, CommandExtractor, NamedOutputExtractor, PipeExtractor, Strategy,
    StuffitExtractor, TryAll,
};
use crate::table::{Candidate, RawTables, Trial};

/// Immutable mimetype to strategy mapping
#[derive(Debug)]
pub struct Registry {
    tables: RawTables,
    extractors: HashMap<String, Vec<Arc<dyn Strategy>>>,
    extensions: HashMap<String, Vec<String>>,
    aliases: HashMap<String, String>,
    descriptions: HashMap<String, String>,
    hints: HashMap<String, String>,
}

/// Candidates the first pass could not build yet
enum Slot {
    Ready(Arc<dyn Strategy>),
    Pending(&'static [Trial]),
}

impl Registry {
    /// The registry for the tables shipped with this crate
    pub fn builtin() -> Result<Self> {
        Self::from_tables(RawTables::builtin())
    }

    /// The shipped tables restricted to in-process decoders.
    ///
    /// Results do not depend on which tools happen to be installed.
    pub fn internal_only() -> Result<Self> {
        Self::build(RawTables::builtin(), true)
    }

    /// Build a registry from custom tables
    pub fn from_tables(tables: RawTables) -> Result<Self> {
        Self::build(tables, false)
    }

    fn build(tables: RawTables, internal_only: bool) -> Result<Self> {
        let descriptions: HashMap<String, String> = tables
            .descriptions
            .iter()
            .map(|(mimetype, text)| ((*mimetype).to_owned(), (*text).to_owned()))
            .collect();
        let registered: HashSet<&str> = tables.extractors.iter().map(|(m, _)| *m).collect();
        if registered.len() != tables.extractors.len() {
            return Err(ExtractError::invalid_table(
                "a mimetype is listed twice in the extractor table",
            ));
        }

        let mut aliases = HashMap::new();
        for (alias, target) in tables.aliases {
            if registered.contains(alias) || descriptions.contains_key(*alias) {
                return Err(ExtractError::invalid_table(format!(
                    "alias {alias} shadows a registered mimetype"
                )));
            }
            if !registered.contains(target) && !descriptions.contains_key(*target) {
                return Err(ExtractError::invalid_table(format!(
                    "alias {alias} points at unregistered mimetype {target}"
                )));
            }
            aliases.insert((*alias).to_owned(), (*target).to_owned());
        }

        let mut slots: HashMap<&'static str, Vec<Slot>> = HashMap::new();
        for (mimetype, candidates) in tables.extractors {
            let mut built = Vec::with_capacity(candidates.len());
            for candidate in *candidates {
                match candidate {
                    Candidate::TryAll(trials) => built.push(Slot::Pending(*trials)),
                    _ => {
                        if let Some(strategy) = concrete(candidate, internal_only)? {
                            built.push(Slot::Ready(strategy));
                        }
                    }
                }
            }
            slots.insert(*mimetype, built);
        }

        let hints: HashMap<String, String> = tables
            .hints
            .iter()
            .map(|(mimetype, text)| ((*mimetype).to_owned(), (*text).to_owned()))
            .collect();

        let mut extractors = HashMap::with_capacity(slots.len());
        for (mimetype, built) in &slots {
            let mut strategies = Vec::with_capacity(built.len());
            for slot in built {
                match slot {
                    Slot::Ready(strategy) => strategies.push(Arc::clone(strategy)),
                    Slot::Pending(trials) => {
                        let groups = resolve_trials(trials, &slots, &aliases, internal_only)?;
                        strategies.push(Arc::new(TryAll::new(
                            *mimetype,
                            groups,
                            hints.get(*mimetype).cloned(),
                        )) as Arc<dyn Strategy>);
                    }
                }
            }
            extractors.insert((*mimetype).to_owned(), strategies);
        }

        let extensions = tables
            .extensions
            .iter()
            .map(|(ext, mimetypes)| {
                (
                    (*ext).to_owned(),
                    mimetypes.iter().map(|m| (*m).to_owned()).collect(),
                )
            })
            .collect();

        Ok(Self {
            tables,
            extractors,
            extensions,
            aliases,
            descriptions,
            hints,
        })
    }

    /// Lowercase `mimetype` and follow its alias, if any
    pub fn canonicalize(&self, mimetype: &str) -> String {
        let lower = mimetype.to_ascii_lowercase();
        match self.aliases.get(&lower) {
            Some(target) => target.clone(),
            None => lower,
        }
    }

    /// Whether the registry has anything to say about `mimetype`, be it
    /// extractors or an explanation of why there are none
    pub fn is_known(&self, mimetype: &str) -> bool {
        let canonical = self.canonicalize(mimetype);
        self.extractors.contains_key(&canonical) || self.descriptions.contains_key(&canonical)
    }

    /// Mimetypes registered for a suffix such as `.gz`
    pub fn mimetypes_for_extension(&self, extension: &str) -> Option<&[String]> {
        self.extensions
            .get(&extension.to_ascii_lowercase())
            .map(Vec::as_slice)
    }

    /// Every strategy registered for `mimetype`, viable or not
    pub fn strategies(&self, mimetype: &str) -> &[Arc<dyn Strategy>] {
        self.extractors
            .get(&self.canonicalize(mimetype))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Why a recognised format cannot be extracted
    pub fn description(&self, mimetype: &str) -> Option<&str> {
        self.descriptions
            .get(&self.canonicalize(mimetype))
            .map(String::as_str)
    }

    /// Advice for when extracting a supported format fails
    pub fn hint(&self, mimetype: &str) -> Option<&str> {
        self.hints
            .get(&self.canonicalize(mimetype))
            .map(String::as_str)
    }

    /// Viable strategies for an ordered list of mimetypes.
    ///
    /// Mimetype order comes first, then each mimetype's own preference
    /// order. When nothing is viable, a described format yields an
    /// unsupported error carrying its description, a registered format
    /// yields [`ExtractError::NoExtractor`] and anything else is unsupported.
    pub fn candidates_for<S: AsRef<str>>(&self, mimetypes: &[S]) -> Result<Vec<Arc<dyn Strategy>>> {
        let mut viable = Vec::new();
        let mut registered = None;
        let mut described = None;

        for mimetype in mimetypes {
            let canonical = self.canonicalize(mimetype.as_ref());
            if let Some(strategies) = self.extractors.get(&canonical) {
                viable.extend(strategies.iter().filter(|s| s.is_viable()).cloned());
                registered.get_or_insert(canonical);
            } else if let Some(description) = self.descriptions.get(&canonical) {
                described.get_or_insert((canonical, description));
            }
        }

        if !viable.is_empty() {
            return Ok(viable);
        }
        if let Some((mimetype, description)) = described {
            return Err(ExtractError::unsupported(mimetype, Some(description.as_str())));
        }
        if let Some(mimetype) = registered {
            return Err(ExtractError::NoExtractor { mimetype });
        }
        let first = mimetypes
            .first()
            .map(|m| m.as_ref())
            .unwrap_or(DEFAULT_MIMETYPE);
        Err(ExtractError::unsupported(first, None))
    }

    /// Table integrity check, plus the list of formats with no usable tool
    /// on this host
    pub fn self_test(&self) -> SelfTestReport {
        let mut report = self_test(&self.tables);
        let mut unviable: Vec<String> = self
            .extractors
            .iter()
            .filter(|(_, strategies)| !strategies.iter().any(|s| s.is_viable()))
            .map(|(mimetype, _)| mimetype.clone())
            .collect();
        unviable.sort();
        report.unviable = unviable;
        report
    }
}

/// Build one non-try-all candidate, or `None` if it is filtered out
fn concrete(candidate: &Candidate, internal_only: bool) -> Result<Option<Arc<dyn Strategy>>> {
    if internal_only && !matches!(candidate, Candidate::Builtin(_)) {
        return Ok(None);
    }

    let strategy: Arc<dyn Strategy> = match *candidate {
        Candidate::Command(args) => {
            require_program(args)?;
            Arc::new(CommandExtractor::new(args.iter().copied()))
        }
        Candidate::NamedOutput {
            args,
            strip,
            append,
            outfile_flag,
        } => {
            require_program(args)?;
            if strip.is_empty() && append.is_none() {
                return Err(ExtractError::invalid_table(format!(
                    "{} needs an extension to strip or append",
                    args[0]
                )));
            }
            let extractor = NamedOutputExtractor::new(args.iter().copied(), strip, append);
            match outfile_flag {
                Some(flag) => Arc::new(extractor.with_outfile_flag(flag)),
                None => Arc::new(extractor),
            }
        }
        Candidate::Pipe {
            args,
            strip,
            append,
        } => {
            require_program(args)?;
            Arc::new(PipeExtractor::new(args.iter().copied(), strip, append))
        }
        Candidate::Stuffit => Arc::new(StuffitExtractor::new()),
        Candidate::Builtin(format) => Arc::new(BuiltinExtractor::new(format)),
        Candidate::TryAll(_) => {
            return Err(ExtractError::invalid_table("try-all entries cannot be nested"))
        }
    };
    Ok(Some(strategy))
}

fn require_program(args: &[&str]) -> Result<()> {
    if args.is_empty() {
        return Err(ExtractError::invalid_table("command with no program"));
    }
    Ok(())
}

/// Second pass: turn a try-all's trial list into candidate groups
fn resolve_trials(
    trials: &[Trial],
    slots: &HashMap<&'static str, Vec<Slot>>,
    aliases: &HashMap<String, String>,
    internal_only: bool,
) -> Result<Vec<Vec<Arc<dyn Strategy>>>> {
    let mut groups = Vec::with_capacity(trials.len());
    for trial in trials {
        match trial {
            Trial::Mimetype(mimetype) => {
                let canonical = aliases
                    .get(*mimetype)
                    .map(String::as_str)
                    .unwrap_or(*mimetype);
                let built = slots.get(canonical).ok_or_else(|| {
                    ExtractError::invalid_table(format!(
                        "try-all refers to unregistered mimetype {mimetype}"
                    ))
                })?;
                let mut group = Vec::with_capacity(built.len());
                for slot in built {
                    match slot {
                        Slot::Ready(strategy) => group.push(Arc::clone(strategy)),
                        Slot::Pending(_) => {
                            return Err(ExtractError::invalid_table(format!(
                                "try-all refers to {mimetype}, which is itself a try-all"
                            )))
                        }
                    }
                }
                groups.push(group);
            }
            Trial::Tool(candidate) => {
                if let Some(strategy) = concrete(candidate, internal_only)? {
                    groups.push(vec![strategy]);
                }
            }
        }
    }
    Ok(groups)
}

/// Problems found by [`self_test`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SelfTestReport {
    /// Mimetypes with both extractors and an "unsupported" description
    pub conflicts: Vec<String>,
    /// `(extension, mimetype)` pairs pointing at nothing
    pub dangling_extensions: Vec<(String, String)>,
    /// Mimetypes no extension leads to
    pub orphaned_mimetypes: Vec<String>,
    /// Table keys that are not lowercase
    pub non_lowercase_keys: Vec<String>,
    /// Hints attached to mimetypes without extractors
    pub misplaced_hints: Vec<String>,
    /// Mimetypes with no viable strategy on this host. Informational.
    pub unviable: Vec<String>,
}

impl SelfTestReport {
    /// No integrity problems were found
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
            && self.dangling_extensions.is_empty()
            && self.orphaned_mimetypes.is_empty()
            && self.non_lowercase_keys.is_empty()
            && self.misplaced_hints.is_empty()
    }
}

impl fmt::Display for SelfTestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for mimetype in &self.conflicts {
            writeln!(f, "{mimetype} has both extractors and a fallback description")?;
        }
        for (extension, mimetype) in &self.dangling_extensions {
            writeln!(f, "{extension} maps to unregistered mimetype {mimetype}")?;
        }
        for mimetype in &self.orphaned_mimetypes {
            writeln!(f, "{mimetype} is not reachable from any extension")?;
        }
        for key in &self.non_lowercase_keys {
            writeln!(f, "{key} is not lowercase")?;
        }
        for mimetype in &self.misplaced_hints {
            writeln!(f, "hint for {mimetype}, which has no extractors")?;
        }
        for mimetype in &self.unviable {
            writeln!(f, "no usable extractor for {mimetype} on this system")?;
        }
        Ok(())
    }
}

/// Check a set of tables for internal consistency
pub fn self_test(tables: &RawTables) -> SelfTestReport {
    let extractors: BTreeSet<&str> = tables.extractors.iter().map(|(m, _)| *m).collect();
    let descriptions: BTreeSet<&str> = tables.descriptions.iter().map(|(m, _)| *m).collect();
    let aliases: HashMap<&str, &str> = tables.aliases.iter().copied().collect();
    let canonical = |mimetype: &str| -> String {
        let lower = mimetype.to_ascii_lowercase();
        aliases
            .get(lower.as_str())
            .map(|target| (*target).to_owned())
            .unwrap_or(lower)
    };

    let mut report = SelfTestReport {
        conflicts: extractors
            .intersection(&descriptions)
            .map(|m| (*m).to_owned())
            .collect(),
        ..SelfTestReport::default()
    };

    let mut reachable = HashSet::new();
    for (extension, mimetypes) in tables.extensions {
        for mimetype in *mimetypes {
            let target = canonical(*mimetype);
            if extractors.contains(target.as_str()) || descriptions.contains(target.as_str()) {
                reachable.insert(target);
            } else {
                report
                    .dangling_extensions
                    .push(((*extension).to_owned(), (*mimetype).to_owned()));
            }
        }
    }
    report.orphaned_mimetypes = extractors
        .union(&descriptions)
        .filter(|m| !reachable.contains(**m))
        .map(|m| (*m).to_owned())
        .collect();

    let keys = tables
        .extractors
        .iter()
        .map(|(k, _)| *k)
        .chain(tables.extensions.iter().map(|(k, _)| *k))
        .chain(tables.extensions.iter().flat_map(|(_, v)| v.iter().copied()))
        .chain(tables.aliases.iter().flat_map(|(k, v)| [*k, *v]))
        .chain(tables.descriptions.iter().map(|(k, _)| *k))
        .chain(tables.hints.iter().map(|(k, _)| *k));
    let mut non_lowercase: BTreeSet<&str> = BTreeSet::new();
    for key in keys {
        if key.chars().any(|c| c.is_uppercase()) {
            non_lowercase.insert(key);
        }
    }
    report.non_lowercase_keys = non_lowercase.into_iter().map(str::to_owned).collect();

    report.misplaced_hints = tables
        .hints
        .iter()
        .map(|(m, _)| *m)
        .filter(|m| !extractors.contains(m))
        .map(str::to_owned)
        .collect();

    report
}
