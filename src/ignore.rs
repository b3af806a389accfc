//! `.rnignore`-style path exclusion rules
//!
//! Workspace snapshots honor an ignore file with conventional semantics:
//! glob patterns (`*`, `**`, `?`, character classes), `!` negation, a
//! leading `/` anchoring a pattern to the workspace root, a trailing `/`
//! restricting it to directories, and last-match-wins evaluation order.
//!
//! The matcher returns a tagged [`MatchDecision`] rather than a boolean so
//! the directory walker can short-circuit: a directory whose last matching
//! rule ignores it yields [`MatchDecision::ExcludeSubtree`] and is never
//! recursed into. This means a negated pattern cannot re-include a file
//! inside an excluded directory (standard ignore-file behavior, and a
//! known limitation).
//!
//! All paths are matched relative to the workspace root with forward
//! slashes regardless of host OS.

use globset::{GlobBuilder, GlobMatcher};
use std::fs;
use std::path::Path;
use tracing::{debug, trace, warn};

/// Name of the per-workspace ignore file
pub const DEFAULT_IGNORE_FILE: &str = ".rnignore";

/// Built-in rules used when no ignore file exists
///
/// A conservative default list: version control internals, virtual
/// environments, caches, editor state, and the storage root itself.
pub const DEFAULT_PATTERNS: &[&str] = &[
    ".git/",
    ".venv/",
    "__pycache__/",
    "*.pyc",
    ".idea/",
    "node_modules/",
    ".snapvault/",
];

/// Per-path decision produced by [`IgnoreMatcher::decide`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDecision {
    /// Path is included in the snapshot
    Include,
    /// File is excluded
    Exclude,
    /// Directory is excluded and the walk must not descend into it
    ExcludeSubtree,
}

/// A single compiled ignore rule
#[derive(Debug)]
struct IgnoreRule {
    /// Original pattern text, for diagnostics
    pattern: String,
    matcher: GlobMatcher,
    /// `!pattern` re-includes a previously excluded path
    negated: bool,
    /// Leading `/` means the pattern only matches from the root
    anchored: bool,
    /// Trailing `/` means the pattern only matches directories
    dir_only: bool,
}

/// Ordered set of ignore rules with last-match-wins semantics
#[derive(Debug)]
pub struct IgnoreMatcher {
    rules: Vec<IgnoreRule>,
}

impl IgnoreMatcher {
    /// Load rules from `<root>/<ignore_file>`, falling back to the
    /// built-in defaults when the file is absent or unreadable
    pub fn load(root: &Path, ignore_file: &str) -> Self {
        let path = root.join(ignore_file);
        match fs::read_to_string(&path) {
            Ok(text) => {
                let matcher = Self::from_patterns(text.lines());
                debug!(
                    "loaded {} ignore rules from {:?}",
                    matcher.rules.len(),
                    path
                );
                matcher
            }
            Err(_) => {
                debug!("no ignore file at {:?}, using built-in defaults", path);
                Self::default_rules()
            }
        }
    }

    /// The built-in conservative rule set
    pub fn default_rules() -> Self {
        Self::from_patterns(DEFAULT_PATTERNS.iter().copied())
    }

    /// Compile rules from pattern lines in file order
    ///
    /// Blank lines and `#` comments are skipped. A pattern that fails to
    /// compile is skipped with a warning rather than failing the load.
    pub fn from_patterns<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rules = Vec::new();
        for raw in lines {
            let line = raw.as_ref();
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let (negated, rest) = match trimmed.strip_prefix('!') {
                Some(rest) => (true, rest.trim()),
                None => (false, trimmed),
            };
            let (anchored, rest) = match rest.strip_prefix('/') {
                Some(rest) => (true, rest),
                None => (false, rest),
            };
            let (dir_only, rest) = match rest.strip_suffix('/') {
                Some(rest) => (true, rest),
                None => (false, rest),
            };
            if rest.is_empty() {
                continue;
            }

            // literal_separator makes `*` stop at `/` while `**` spans
            // directories, matching conventional ignore-file globs.
            match GlobBuilder::new(rest).literal_separator(true).build() {
                Ok(glob) => rules.push(IgnoreRule {
                    pattern: trimmed.to_string(),
                    matcher: glob.compile_matcher(),
                    negated,
                    anchored,
                    dir_only,
                }),
                Err(e) => {
                    warn!("skipping unparsable ignore pattern {:?}: {}", trimmed, e);
                }
            }
        }
        Self { rules }
    }

    /// Decide whether a path is included, excluded, or prunes the walk
    ///
    /// `rel_path` must be relative to the workspace root and use forward
    /// slashes. All rules are evaluated in file order and the last rule
    /// that matched wins.
    pub fn decide(&self, rel_path: &str, is_dir: bool) -> MatchDecision {
        let mut ignored: Option<bool> = None;

        for rule in &self.rules {
            if rule.dir_only && !is_dir {
                continue;
            }
            if rule.matches(rel_path) {
                trace!("{:?} matched by {:?}", rel_path, rule.pattern);
                ignored = Some(!rule.negated);
            }
        }

        match (ignored.unwrap_or(false), is_dir) {
            (false, _) => MatchDecision::Include,
            (true, false) => MatchDecision::Exclude,
            (true, true) => MatchDecision::ExcludeSubtree,
        }
    }

    /// Boolean convenience wrapper over [`decide`](Self::decide)
    pub fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
        self.decide(rel_path, is_dir) != MatchDecision::Include
    }

    /// Number of compiled rules
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl IgnoreRule {
    fn matches(&self, rel_path: &str) -> bool {
        if self.anchored {
            return self.matcher.is_match(rel_path);
        }

        // Unanchored patterns match at any depth: test the path and every
        // suffix starting at a component boundary.
        let mut rest = rel_path;
        loop {
            if self.matcher.is_match(rest) {
                return true;
            }
            match rest.find('/') {
                Some(idx) => rest = &rest[idx + 1..],
                None => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_basic_glob() {
        let m = IgnoreMatcher::from_patterns(["*.log"]);
        assert_eq!(m.decide("debug.log", false), MatchDecision::Exclude);
        assert_eq!(m.decide("nested/deep/debug.log", false), MatchDecision::Exclude);
        assert_eq!(m.decide("debug.txt", false), MatchDecision::Include);
    }

    #[test]
    fn test_last_match_wins_negation() {
        let m = IgnoreMatcher::from_patterns(["*.log", "!keep.log"]);
        assert_eq!(m.decide("keep.log", false), MatchDecision::Include);
        assert_eq!(m.decide("drop.log", false), MatchDecision::Exclude);

        // Re-excluding after a negation also wins.
        let m = IgnoreMatcher::from_patterns(["*.log", "!keep.log", "keep.log"]);
        assert_eq!(m.decide("keep.log", false), MatchDecision::Exclude);
    }

    #[test]
    fn test_dir_only_pattern_prunes_subtree() {
        let m = IgnoreMatcher::from_patterns(["node_modules/"]);
        assert_eq!(m.decide("node_modules", true), MatchDecision::ExcludeSubtree);
        assert_eq!(m.decide("pkg/node_modules", true), MatchDecision::ExcludeSubtree);
        // A file with the same name is not matched by a dir-only rule.
        assert_eq!(m.decide("node_modules", false), MatchDecision::Include);
    }

    #[test]
    fn test_anchored_pattern() {
        let m = IgnoreMatcher::from_patterns(["/build"]);
        assert_eq!(m.decide("build", true), MatchDecision::ExcludeSubtree);
        assert_eq!(m.decide("src/build", true), MatchDecision::Include);
    }

    #[test]
    fn test_star_does_not_cross_separator() {
        let m = IgnoreMatcher::from_patterns(["/out/*.bin"]);
        assert_eq!(m.decide("out/a.bin", false), MatchDecision::Exclude);
        assert_eq!(m.decide("out/sub/a.bin", false), MatchDecision::Include);

        let m = IgnoreMatcher::from_patterns(["/out/**/*.bin"]);
        assert_eq!(m.decide("out/sub/a.bin", false), MatchDecision::Exclude);
    }

    #[test]
    fn test_character_class_and_question_mark() {
        let m = IgnoreMatcher::from_patterns(["run-[0-9].tmp", "cache?"]);
        assert_eq!(m.decide("run-3.tmp", false), MatchDecision::Exclude);
        assert_eq!(m.decide("run-x.tmp", false), MatchDecision::Include);
        assert_eq!(m.decide("cache1", false), MatchDecision::Exclude);
        assert_eq!(m.decide("cache", false), MatchDecision::Include);
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        let m = IgnoreMatcher::from_patterns(["# a comment", "", "   ", "*.tmp"]);
        assert_eq!(m.rule_count(), 1);
    }

    #[test]
    fn test_load_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let m = IgnoreMatcher::load(dir.path(), DEFAULT_IGNORE_FILE);
        assert_eq!(m.decide(".git", true), MatchDecision::ExcludeSubtree);
        assert_eq!(m.decide("model.pt", false), MatchDecision::Include);
    }

    #[test]
    fn test_load_reads_workspace_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(DEFAULT_IGNORE_FILE), "*.ckpt\n!final.ckpt\n").unwrap();
        let m = IgnoreMatcher::load(dir.path(), DEFAULT_IGNORE_FILE);
        assert!(m.is_ignored("epoch1.ckpt", false));
        assert!(!m.is_ignored("final.ckpt", false));
        // Workspace file replaces the defaults entirely.
        assert!(!m.is_ignored(".git", true));
    }
}
