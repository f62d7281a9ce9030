//! Layered `.gitignore`-style rule compilation.
//!
//! Rules come from three layers in increasing precedence: built-in defaults,
//! VCS ignore files discovered anywhere in the tree, and one tool-specific
//! ignore file at the project root. The last matching rule in that total
//! order decides, so a later `!pattern` can re-include what an earlier layer
//! excluded.

use std::fs;
use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::Match;

use super::error::ConfigError;
use crate::config::CoreConfig;

/// Exclusions that apply to every project before any ignore file is read.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    // Version control
    ".git/",
    ".hg/",
    ".svn/",
    ".gitattributes",
    ".gitmodules",
    // Dependencies and build output
    "node_modules/",
    "bower_components/",
    "vendor/",
    "target/",
    "build/",
    "dist/",
    "out/",
    "__pycache__/",
    "*.egg-info/",
    ".eggs/",
    ".tox/",
    ".mypy_cache/",
    ".pytest_cache/",
    "*.pyc",
    "*.pyo",
    "*.class",
    "*.o",
    // Virtual environments
    "env/",
    "venv/",
    ".env/",
    ".venv/",
    // IDE and editor
    ".vscode/",
    ".idea/",
    ".vs/",
    "*.swp",
    "*~",
    // OS
    ".DS_Store",
    "Thumbs.db",
    // Lock files
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Cargo.lock",
    "poetry.lock",
    "Pipfile.lock",
    // Logs and temp
    "*.log",
    "*.tmp",
    // Images
    "*.png",
    "*.jpg",
    "*.jpeg",
    "*.gif",
    "*.ico",
];

/// Which layer a rule came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleLayer {
    Default,
    Vcs,
    Tool,
}

/// The rule that decided a path's fate, as reported by [`IgnoreRuleSet::explain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOrigin {
    pub layer: RuleLayer,
    pub pattern: String,
    /// The ignore file the rule was read from; `None` for built-in defaults.
    pub source: Option<PathBuf>,
    /// `true` for an exclusion, `false` for a `!` re-inclusion.
    pub excluded: bool,
}

/// Where the rule layers are read from.
#[derive(Debug, Clone)]
pub struct RuleSources {
    pub vcs_file_name: String,
    pub tool_file_name: String,
    pub extra_patterns: Vec<String>,
}

impl Default for RuleSources {
    fn default() -> Self {
        Self {
            vcs_file_name: ".gitignore".to_string(),
            tool_file_name: ".llmignore".to_string(),
            extra_patterns: Vec::new(),
        }
    }
}

impl From<&CoreConfig> for RuleSources {
    fn from(config: &CoreConfig) -> Self {
        Self {
            vcs_file_name: config.vcs_ignore_file.clone(),
            tool_file_name: config.tool_ignore_file.clone(),
            extra_patterns: config.extra_ignore_patterns.clone(),
        }
    }
}

/// An immutable, per-scan compilation of all ignore layers for one project root.
#[derive(Debug)]
pub struct IgnoreRuleSet {
    root: PathBuf,
    defaults: Gitignore,
    /// Discovered VCS ignore files, ancestors before descendants.
    vcs: Vec<Gitignore>,
    tool: Gitignore,
    issues: Vec<ConfigError>,
    vcs_file_name: String,
    strict: bool,
    /// Only the root's VCS file was read; nested ones are picked up by a [`RuleWalk`].
    deferred: bool,
}

impl IgnoreRuleSet {
    /// Compiles the default sources for `root`.
    ///
    /// Fails only if a discovered ignore file is not valid text.
    pub fn build(root: &Path) -> Result<Self, ConfigError> {
        Self::build_with(root, &RuleSources::default())
    }

    pub fn build_with(root: &Path, sources: &RuleSources) -> Result<Self, ConfigError> {
        Self::compile(root, sources, true, false)
    }

    /// Like [`build_with`](Self::build_with), but skips undecodable ignore files
    /// and records them in [`issues`](Self::issues) instead of failing.
    pub fn build_lenient(root: &Path, sources: &RuleSources) -> Self {
        Self::compile_lenient(root, sources, false)
    }

    /// Lenient build that reads only the root's VCS ignore file.
    ///
    /// Nested VCS files are loaded by [`RuleWalk::enter_dir`] as a scan reaches
    /// their directory, so the tree is walked once and every step of it is
    /// cancellable.
    pub fn build_deferred(root: &Path, sources: &RuleSources) -> Self {
        Self::compile_lenient(root, sources, true)
    }

    fn compile_lenient(root: &Path, sources: &RuleSources, deferred: bool) -> Self {
        match Self::compile(root, sources, false, deferred) {
            Ok(rules) => rules,
            // Non-strict compilation never returns an error.
            Err(e) => {
                tracing::error!("Unexpected ignore compilation failure: {}", e);
                Self::empty(root)
            }
        }
    }

    /// A rule set that excludes nothing.
    pub fn empty(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            defaults: Gitignore::empty(),
            vcs: Vec::new(),
            tool: Gitignore::empty(),
            issues: Vec::new(),
            vcs_file_name: String::new(),
            strict: false,
            deferred: false,
        }
    }

    fn compile(
        root: &Path,
        sources: &RuleSources,
        strict: bool,
        deferred: bool,
    ) -> Result<Self, ConfigError> {
        let mut issues = Vec::new();

        let mut builder = GitignoreBuilder::new(root);
        let default_lines = DEFAULT_IGNORE_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .chain([sources.vcs_file_name.clone(), sources.tool_file_name.clone()])
            .chain(sources.extra_patterns.iter().cloned());
        for (idx, line) in default_lines.enumerate() {
            if let Err(e) = builder.add_line(None, &line) {
                issues.push(ConfigError::InvalidPattern {
                    file: PathBuf::from("<defaults>"),
                    line: idx + 1,
                    pattern: line,
                    source: e,
                });
            }
        }
        let defaults = finish(builder, &mut issues);

        let tool_path = root.join(&sources.tool_file_name);
        let tool = compile_file(root, &tool_path, strict, &mut issues)?.unwrap_or_else(Gitignore::empty);

        let mut rules = Self {
            root: root.to_path_buf(),
            defaults,
            vcs: Vec::new(),
            tool,
            issues: Vec::new(),
            vcs_file_name: sources.vcs_file_name.clone(),
            strict,
            deferred,
        };
        if deferred {
            if let Some(gitignore) = rules.load_vcs_file(root, &mut issues)? {
                rules.vcs.push(gitignore);
            }
        } else {
            rules.discover_vcs(root, &mut issues)?;
        }
        rules.issues = issues;

        tracing::info!(
            "Compiled ignore rules for {}{}: {} default, {} VCS file(s), {} tool rule(s), {} issue(s)",
            root.display(),
            if deferred { " (nested VCS files deferred)" } else { "" },
            rules.defaults.len(),
            rules.vcs.len(),
            rules.tool.len(),
            rules.issues.len()
        );
        Ok(rules)
    }

    /// Depth-first discovery of VCS ignore files, never descending into
    /// directories the rules found so far already exclude.
    fn discover_vcs(&mut self, dir: &Path, issues: &mut Vec<ConfigError>) -> Result<(), ConfigError> {
        if let Some(gitignore) = self.load_vcs_file(dir, issues)? {
            self.vcs.push(gitignore);
        }

        let mut subdirs: Vec<PathBuf> = match fs::read_dir(dir) {
            Ok(read_dir) => read_dir
                .filter_map(Result::ok)
                .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
                .map(|e| e.path())
                .collect(),
            Err(e) => {
                tracing::debug!("Skipping unreadable directory {}: {}", dir.display(), e);
                return Ok(());
            }
        };
        subdirs.sort();

        for subdir in subdirs {
            let Ok(relative) = subdir.strip_prefix(&self.root) else {
                continue;
            };
            if self.matches(relative, true) {
                continue;
            }
            self.discover_vcs(&subdir, issues)?;
        }
        Ok(())
    }

    fn load_vcs_file(
        &self,
        dir: &Path,
        issues: &mut Vec<ConfigError>,
    ) -> Result<Option<Gitignore>, ConfigError> {
        compile_file(dir, &dir.join(&self.vcs_file_name), self.strict, issues)
    }

    /// Starts evaluating paths for one walk over the tree.
    pub fn walk(&self) -> RuleWalk<'_> {
        RuleWalk {
            rules: self,
            nested: Vec::new(),
            issues: Vec::new(),
        }
    }

    /// Returns `true` if `relative_path` is excluded.
    ///
    /// Only the path itself is evaluated. Paths beneath an excluded directory
    /// are kept out by the walk pruning that directory.
    pub fn matches(&self, relative_path: &Path, is_directory: bool) -> bool {
        self.decide(&[], relative_path, is_directory)
            .map(|(_, m)| m.is_ignore())
            .unwrap_or(false)
    }

    /// Reports which rule decided the outcome for `relative_path`, if any.
    pub fn explain(&self, relative_path: &Path, is_directory: bool) -> Option<RuleOrigin> {
        let (layer, matched) = self.decide(&[], relative_path, is_directory)?;
        let glob = matched.inner()?;
        Some(RuleOrigin {
            layer,
            pattern: glob.original().to_string(),
            source: glob.from().map(Path::to_path_buf),
            excluded: matched.is_ignore(),
        })
    }

    /// Finds the highest-precedence layer with a matching rule.
    ///
    /// `nested` holds VCS files found by a walk; they all sit below the ones
    /// compiled up front and therefore take precedence over them.
    fn decide<'a>(
        &'a self,
        nested: &'a [Gitignore],
        relative_path: &Path,
        is_directory: bool,
    ) -> Option<(RuleLayer, Match<&'a ignore::gitignore::Glob>)> {
        if relative_path.as_os_str().is_empty() {
            return None;
        }
        let absolute = self.root.join(relative_path);

        let tool = std::iter::once((RuleLayer::Tool, &self.tool));
        let vcs = nested
            .iter()
            .rev()
            .chain(self.vcs.iter().rev())
            .map(|g| (RuleLayer::Vcs, g));
        let defaults = std::iter::once((RuleLayer::Default, &self.defaults));

        for (layer, gitignore) in tool.chain(vcs).chain(defaults) {
            if gitignore.is_empty() || !absolute.starts_with(gitignore.path()) {
                continue;
            }
            let matched = gitignore.matched(&absolute, is_directory);
            if !matched.is_none() {
                tracing::trace!("{:?} rule decided {}", layer, relative_path.display());
                return Some((layer, matched));
            }
        }
        None
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Malformed or unreadable sources that were skipped during compilation.
    pub fn issues(&self) -> &[ConfigError] {
        &self.issues
    }

    /// Directories whose VCS ignore file contributed rules, in precedence order.
    pub fn vcs_files(&self) -> Vec<&Path> {
        self.vcs.iter().map(|g| g.path()).collect()
    }

    pub fn rule_count(&self) -> usize {
        self.defaults.len() + self.tool.len() + self.vcs.iter().map(Gitignore::len).sum::<usize>()
    }
}

/// Rule evaluation for one walk of the tree.
///
/// For a deferred rule set, each directory's VCS ignore file is compiled when
/// the walk enters that directory, before any of its children are evaluated.
pub struct RuleWalk<'a> {
    rules: &'a IgnoreRuleSet,
    /// VCS files found during the walk, in discovery order.
    nested: Vec<Gitignore>,
    issues: Vec<ConfigError>,
}

impl RuleWalk<'_> {
    /// Loads the VCS ignore file of `dir`, an absolute path below the root
    /// that the walk is about to descend into. A no-op for fully built sets.
    pub fn enter_dir(&mut self, dir: &Path) -> Result<(), ConfigError> {
        if !self.rules.deferred || dir == self.rules.root {
            return Ok(());
        }
        if let Some(gitignore) = self.rules.load_vcs_file(dir, &mut self.issues)? {
            tracing::debug!("Loaded nested ignore file in {}", dir.display());
            self.nested.push(gitignore);
        }
        Ok(())
    }

    pub fn matches(&self, relative_path: &Path, is_directory: bool) -> bool {
        self.rules
            .decide(&self.nested, relative_path, is_directory)
            .map(|(_, m)| m.is_ignore())
            .unwrap_or(false)
    }

    /// Nested VCS files loaded so far.
    pub fn nested_files(&self) -> usize {
        self.nested.len()
    }

    /// Sources skipped while entering directories.
    pub fn issues(&self) -> &[ConfigError] {
        &self.issues
    }
}

fn finish(builder: GitignoreBuilder, issues: &mut Vec<ConfigError>) -> Gitignore {
    builder.build().unwrap_or_else(|e| {
        tracing::error!("Failed to build ignore matcher: {}", e);
        issues.push(ConfigError::InvalidPattern {
            file: PathBuf::new(),
            line: 0,
            pattern: String::new(),
            source: e,
        });
        Gitignore::empty()
    })
}

/// Compiles one ignore file anchored at `dir`. Absent files yield `None`.
fn compile_file(
    dir: &Path,
    path: &Path,
    strict: bool,
    issues: &mut Vec<ConfigError>,
) -> Result<Option<Gitignore>, ConfigError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) if path.is_dir() => {
            tracing::debug!("Ignore path {} is a directory: {}", path.display(), e);
            return Ok(None);
        }
        Err(e) => {
            tracing::warn!("Could not read ignore file {}: {}", path.display(), e);
            issues.push(ConfigError::Io(e, path.to_path_buf()));
            return Ok(None);
        }
    };

    let contents = match String::from_utf8(bytes) {
        Ok(contents) => contents,
        Err(_) if strict => return Err(ConfigError::Undecodable(path.to_path_buf())),
        Err(_) => {
            tracing::warn!("Skipping undecodable ignore file {}", path.display());
            issues.push(ConfigError::Undecodable(path.to_path_buf()));
            return Ok(None);
        }
    };

    let mut builder = GitignoreBuilder::new(dir);
    let mut loaded = 0;
    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match builder.add_line(Some(path.to_path_buf()), line) {
            Ok(_) => loaded += 1,
            Err(e) => {
                tracing::warn!(
                    "Skipping invalid pattern {:?} at {}:{}: {}",
                    line,
                    path.display(),
                    idx + 1,
                    e
                );
                issues.push(ConfigError::InvalidPattern {
                    file: path.to_path_buf(),
                    line: idx + 1,
                    pattern: line.to_string(),
                    source: e,
                });
            }
        }
    }
    tracing::debug!("Loaded {} patterns from {}", loaded, path.display());
    Ok(Some(finish(builder, issues)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn project(files: &[(&str, &[u8])]) -> TempDir {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        for (path, content) in files {
            let full = dir.path().join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(full, content).unwrap();
        }
        dir
    }

    #[test]
    fn test_no_rules_means_included() {
        let dir = project(&[]);
        let rules = IgnoreRuleSet::build(dir.path()).unwrap();
        assert!(!rules.matches(Path::new("src/main.rs"), false));
        assert!(rules.explain(Path::new("src/main.rs"), false).is_none());
    }

    #[test]
    fn test_defaults_exclude_dependency_dirs_and_ignore_files() {
        let dir = project(&[]);
        let rules = IgnoreRuleSet::build(dir.path()).unwrap();
        assert!(rules.matches(Path::new("node_modules"), true));
        assert!(rules.matches(Path::new("web/node_modules"), true));
        assert!(rules.matches(Path::new(".gitignore"), false));
        assert!(rules.matches(Path::new(".llmignore"), false));

        let origin = rules.explain(Path::new("node_modules"), true).unwrap();
        assert_eq!(origin.layer, RuleLayer::Default);
        assert_eq!(origin.pattern, "node_modules/");
        assert_eq!(origin.source, None);
    }

    #[test]
    fn test_directory_only_rule_never_matches_files() {
        let dir = project(&[(".gitignore", b"cache/\n")]);
        let rules = IgnoreRuleSet::build(dir.path()).unwrap();
        assert!(rules.matches(Path::new("cache"), true));
        assert!(!rules.matches(Path::new("cache"), false));
    }

    #[test]
    fn test_reinclusion_after_exclusion_restores() {
        let dir = project(&[(".gitignore", b"*.md\n!README.md\n")]);
        let rules = IgnoreRuleSet::build(dir.path()).unwrap();
        assert!(rules.matches(Path::new("notes.md"), false));
        assert!(!rules.matches(Path::new("README.md"), false));

        let origin = rules.explain(Path::new("README.md"), false).unwrap();
        assert!(!origin.excluded);
        assert_eq!(origin.pattern, "!README.md");
    }

    #[test]
    fn test_reinclusion_before_exclusion_does_not_restore() {
        let dir = project(&[(".gitignore", b"!README.md\n*.md\n")]);
        let rules = IgnoreRuleSet::build(dir.path()).unwrap();
        assert!(rules.matches(Path::new("README.md"), false));
    }

    #[test]
    fn test_tool_file_overrides_vcs_and_defaults() {
        let dir = project(&[
            (".gitignore", b"secret.txt\n"),
            (".llmignore", b"!secret.txt\n!*.png\n"),
        ]);
        let rules = IgnoreRuleSet::build(dir.path()).unwrap();
        assert!(!rules.matches(Path::new("secret.txt"), false));
        assert!(!rules.matches(Path::new("logo.png"), false));
        assert_eq!(
            rules.explain(Path::new("logo.png"), false).unwrap().layer,
            RuleLayer::Tool
        );
    }

    #[test]
    fn test_nested_vcs_file_is_anchored_to_its_directory() {
        let dir = project(&[
            ("pkg/.gitignore", b"/generated.rs\n"),
            ("pkg/generated.rs", b""),
            ("generated.rs", b""),
        ]);
        let rules = IgnoreRuleSet::build(dir.path()).unwrap();
        assert!(rules.matches(Path::new("pkg/generated.rs"), false));
        assert!(!rules.matches(Path::new("generated.rs"), false));
        assert_eq!(rules.vcs_files().len(), 1);
    }

    #[test]
    fn test_vcs_files_under_excluded_directories_are_not_read() {
        let dir = project(&[
            ("node_modules/lib/.gitignore", b"!*.png\n"),
            ("src/.gitignore", b"*.bak\n"),
        ]);
        let rules = IgnoreRuleSet::build(dir.path()).unwrap();
        let discovered = rules.vcs_files();
        assert_eq!(discovered, vec![dir.path().join("src").as_path()]);
    }

    #[test]
    fn test_extra_patterns_join_the_default_layer() {
        let dir = project(&[(".gitignore", b"!keep.snap\n")]);
        let sources = RuleSources {
            extra_patterns: vec!["*.snap".to_string()],
            ..RuleSources::default()
        };
        let rules = IgnoreRuleSet::build_with(dir.path(), &sources).unwrap();
        assert!(rules.matches(Path::new("a.snap"), false));
        assert!(!rules.matches(Path::new("keep.snap"), false));
    }

    #[test]
    fn test_undecodable_file_fails_strict_build() {
        let dir = project(&[(".gitignore", &[0xff, 0xfe, b'*', 0x00, 0xc3])]);
        let err = IgnoreRuleSet::build(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Undecodable(_)));
    }

    #[test]
    #[traced_test]
    fn test_lenient_build_skips_bad_sources() {
        let dir = project(&[
            (".gitignore", &[0xff, 0xfe, 0x00]),
            (".llmignore", b"ok.txt\nbroken[\n"),
        ]);
        let rules = IgnoreRuleSet::build_lenient(dir.path(), &RuleSources::default());

        assert_eq!(rules.issues().len(), 2);
        assert!(rules.matches(Path::new("ok.txt"), false));
        assert!(logs_contain("Skipping undecodable ignore file"));
        assert!(logs_contain("Skipping invalid pattern"));
    }

    #[test]
    fn test_deferred_build_reads_only_the_root_vcs_file() {
        let dir = project(&[
            (".gitignore", b"*.bak\n"),
            ("pkg/.gitignore", b"/generated.rs\n"),
            ("pkg/deep/.gitignore", b"!keep.bak\n"),
        ]);
        let rules = IgnoreRuleSet::build_deferred(dir.path(), &RuleSources::default());
        assert_eq!(rules.vcs_files(), vec![dir.path()]);
        assert!(!rules.matches(Path::new("pkg/generated.rs"), false));

        let mut walk = rules.walk();
        walk.enter_dir(&dir.path().join("pkg")).unwrap();
        walk.enter_dir(&dir.path().join("pkg/deep")).unwrap();
        assert_eq!(walk.nested_files(), 2);
        assert!(walk.matches(Path::new("pkg/generated.rs"), false));
        assert!(walk.matches(Path::new("pkg/deep/x.bak"), false));
        assert!(!walk.matches(Path::new("pkg/deep/keep.bak"), false));
        assert!(!walk.matches(Path::new("generated.rs"), false));
    }

    #[test]
    fn test_walk_over_full_build_loads_nothing_twice() {
        let dir = project(&[("pkg/.gitignore", b"*.tmp2\n")]);
        let rules = IgnoreRuleSet::build(dir.path()).unwrap();
        let mut walk = rules.walk();
        walk.enter_dir(&dir.path().join("pkg")).unwrap();
        assert_eq!(walk.nested_files(), 0);
        assert!(walk.matches(Path::new("pkg/a.tmp2"), false));
    }

    #[test]
    fn test_deferred_walk_skips_undecodable_nested_file() {
        let dir = project(&[("pkg/.gitignore", &[0xff, 0xfe, 0x00])]);
        let rules = IgnoreRuleSet::build_deferred(dir.path(), &RuleSources::default());
        let mut walk = rules.walk();
        walk.enter_dir(&dir.path().join("pkg")).unwrap();
        assert_eq!(walk.issues().len(), 1);
        assert_eq!(walk.nested_files(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_last_matching_rule_wins(stem in "[a-z]{1,8}", other in "[a-z]{1,8}") {
            let name = format!("{stem}.dat");
            let exclude_then_include = format!("*.dat\n!{name}\n");
            let include_then_exclude = format!("!{name}\n*.dat\n");

            let dir = project(&[(".gitignore", exclude_then_include.as_bytes())]);
            let rules = IgnoreRuleSet::build(dir.path()).unwrap();
            prop_assert!(!rules.matches(Path::new(&name), false));
            if other != stem {
                let other_name = format!("{other}.dat");
                prop_assert!(rules.matches(Path::new(&other_name), false));
            }

            let dir = project(&[(".gitignore", include_then_exclude.as_bytes())]);
            let rules = IgnoreRuleSet::build(dir.path()).unwrap();
            prop_assert!(rules.matches(Path::new(&name), false));
        }
    }
}
