//! Pattern registry: the static routing tables.
//!
//! The registry holds three tables, all supplied through configuration:
//! - domains, in priority order, each with keywords and file globs
//! - commands (verbs) with an inherent complexity, an optional wave template
//!   and an optional lead handler
//! - complexity keywords used by the complexity scorer
//!
//! Keywords are matched case-insensitively on whole words or phrases; a
//! trailing `*` turns a keyword into a prefix match (`optimi*` matches
//! "optimize" and "optimization"). File patterns are globs where `**` spans
//! directories, `*` and `?` stay within one path segment, and `{a,b}` is an
//! alternation.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::core::ids::{DomainTag, HandlerId};
use crate::core::plan::WaveStrategy;
use crate::error::{Error, Result};

/// Keyword and file-pattern signals for one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainPattern {
    pub domain: DomainTag,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub file_patterns: Vec<String>,
}

impl DomainPattern {
    pub fn new(domain: &str, keywords: &[&str], file_patterns: &[&str]) -> Self {
        Self {
            domain: DomainTag::new(domain),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            file_patterns: file_patterns.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// A command verb and what it implies for routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMapping {
    /// The verb, with the same matching rules as domain keywords.
    pub verb: String,
    /// Inherent complexity of the command in [0, 1].
    pub complexity: f64,
    /// Wave template preferred when the task qualifies for wave mode.
    #[serde(default)]
    pub wave: Option<WaveStrategy>,
    /// Handler that leads runs started by this command.
    #[serde(default)]
    pub lead: Option<HandlerId>,
}

impl CommandMapping {
    pub fn new(verb: &str, complexity: f64) -> Self {
        Self {
            verb: verb.to_string(),
            complexity,
            wave: None,
            lead: None,
        }
    }

    pub fn with_wave(mut self, wave: WaveStrategy) -> Self {
        self.wave = Some(wave);
        self
    }

    pub fn with_lead(mut self, lead: &str) -> Self {
        self.lead = Some(HandlerId::new(lead));
        self
    }
}

/// The routing tables. Domain order is the tie-breaking priority order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRegistry {
    #[serde(default)]
    pub domains: Vec<DomainPattern>,
    #[serde(default)]
    pub commands: Vec<CommandMapping>,
    #[serde(default)]
    pub complexity_keywords: Vec<String>,
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self {
            domains: vec![
                DomainPattern::new(
                    "interface-layer",
                    &[
                        "ui", "ux", "screen", "view", "component", "layout", "button", "form",
                        "page", "responsive", "animation", "navigation", "swiftui", "frontend",
                    ],
                    &[
                        "**/*View.swift", "**/*Screen*", "**/*.tsx", "**/*.jsx", "**/*.vue",
                        "**/*.css", "**/*.scss", "**/*.html", "**/components/**", "**/ui/**",
                        "**/views/**",
                    ],
                ),
                DomainPattern::new(
                    "data-layer",
                    &[
                        "api", "endpoint", "database", "schema", "query", "migration",
                        "persistence", "backend", "server", "sql", "repository", "core data",
                    ],
                    &[
                        "**/*.sql", "**/migrations/**", "**/models/**", "**/api/**", "**/db/**",
                        "**/*Repository*", "**/*Store.swift",
                    ],
                ),
                DomainPattern::new(
                    "architecture",
                    &[
                        "architecture", "design", "structure", "modular*", "scalab*",
                        "dependency injection", "coupling", "system design",
                    ],
                    &["**/Package.swift", "**/Cargo.toml", "**/package.json", "**/*.xcodeproj/**"],
                ),
                DomainPattern::new(
                    "security",
                    &[
                        "security", "secure", "vulnerab*", "auth", "authentication",
                        "authorization", "encrypt*", "credential*", "permission*", "threat",
                        "xss", "injection",
                    ],
                    &["**/auth/**", "**/*Auth*", "**/security/**", "**/*.pem", "**/*Keychain*"],
                ),
                DomainPattern::new(
                    "performance",
                    &[
                        "performance", "optimi*", "slow", "latency", "speed", "launch time",
                        "memory", "bottleneck*", "profil*", "throughput",
                    ],
                    &["**/benches/**", "**/*Benchmark*", "**/*Perf*"],
                ),
                DomainPattern::new(
                    "quality",
                    &["test*", "coverage", "quality", "bug*", "regression", "flaky"],
                    &["**/tests/**", "**/*Tests.swift", "**/*_test.*", "**/*.test.*", "**/*.spec.*"],
                ),
                DomainPattern::new(
                    "infrastructure",
                    &[
                        "deploy*", "ci", "docker", "kubernetes", "infrastructure", "monitoring",
                        "release pipeline",
                    ],
                    &["**/Dockerfile", "**/.github/**", "**/*.yml", "**/*.yaml", "**/fastlane/**"],
                ),
                DomainPattern::new(
                    "documentation",
                    &["document*", "docs", "readme", "guide", "explain", "wiki", "changelog"],
                    &["**/*.md", "**/docs/**"],
                ),
                DomainPattern::new(
                    "refactoring",
                    &[
                        "refactor*", "cleanup", "clean up", "simplify", "technical debt",
                        "tech debt", "dead code",
                    ],
                    &[],
                ),
            ],
            commands: vec![
                CommandMapping::new("implement", 0.9),
                CommandMapping::new("build", 0.8),
                CommandMapping::new("design", 0.8).with_lead("architect"),
                CommandMapping::new("migrat*", 1.0).with_wave(WaveStrategy::Systematic),
                CommandMapping::new("refactor*", 0.8)
                    .with_wave(WaveStrategy::Progressive)
                    .with_lead("refactorer"),
                CommandMapping::new("improve", 0.7)
                    .with_wave(WaveStrategy::Progressive)
                    .with_lead("refactorer"),
                CommandMapping::new("optimi*", 0.8).with_wave(WaveStrategy::Progressive),
                CommandMapping::new("cleanup", 0.4)
                    .with_wave(WaveStrategy::Progressive)
                    .with_lead("refactorer"),
                CommandMapping::new("analy*", 0.6)
                    .with_wave(WaveStrategy::Systematic)
                    .with_lead("architect"),
                CommandMapping::new("audit", 0.8)
                    .with_wave(WaveStrategy::Systematic)
                    .with_lead("security"),
                CommandMapping::new("review", 0.5).with_wave(WaveStrategy::Systematic),
                CommandMapping::new("troubleshoot", 0.5).with_wave(WaveStrategy::Adaptive),
                CommandMapping::new("fix", 0.4).with_wave(WaveStrategy::Adaptive),
                CommandMapping::new("test", 0.4).with_lead("qa"),
                CommandMapping::new("document", 0.2).with_lead("scribe"),
                CommandMapping::new("explain", 0.1),
            ],
            complexity_keywords: [
                "architecture", "refactor*", "migrat*", "system-wide", "across", "entire",
                "comprehensive", "scalab*", "distributed", "concurren*", "security", "optimi*",
                "integrat*", "enterprise", "legacy", "multiple", "every",
            ]
            .iter()
            .map(|k| k.to_string())
            .collect(),
        }
    }
}

impl PatternRegistry {
    /// Check the registry for configuration defects.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for pattern in &self.domains {
            if pattern.domain.as_str().is_empty() {
                return Err(Error::Validation("Domain tag must not be empty".to_string()));
            }
            if !seen.insert(&pattern.domain) {
                return Err(Error::Validation(format!(
                    "Domain '{}' is declared more than once",
                    pattern.domain
                )));
            }
        }
        for command in &self.commands {
            if !(0.0..=1.0).contains(&command.complexity) {
                return Err(Error::Validation(format!(
                    "Command '{}' has complexity {} outside [0, 1]",
                    command.verb, command.complexity
                )));
            }
        }
        Ok(())
    }

    pub fn contains_domain(&self, domain: &DomainTag) -> bool {
        self.domains.iter().any(|p| &p.domain == domain)
    }

    /// Validate and compile every keyword and glob into matchers.
    pub fn compile(&self) -> Result<CompiledRegistry> {
        self.validate()?;

        let domains = self
            .domains
            .iter()
            .enumerate()
            .map(|(priority, pattern)| {
                Ok(CompiledDomain {
                    tag: pattern.domain.clone(),
                    priority,
                    keywords: compile_keywords(&pattern.keywords)?,
                    globs: pattern
                        .file_patterns
                        .iter()
                        .map(|p| GlobMatcher::new(p))
                        .collect::<Result<Vec<_>>>()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let commands = self
            .commands
            .iter()
            .map(|mapping| {
                Ok(CompiledCommand {
                    matcher: KeywordMatcher::new(&mapping.verb)?,
                    mapping: mapping.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CompiledRegistry {
            domains,
            commands,
            complexity_keywords: compile_keywords(&self.complexity_keywords)?,
        })
    }
}

fn compile_keywords(keywords: &[String]) -> Result<Vec<KeywordMatcher>> {
    keywords
        .iter()
        .filter(|k| !k.trim().is_empty())
        .map(|k| KeywordMatcher::new(k))
        .collect()
}

/// Case-insensitive whole-word (or prefix, with a trailing `*`) matcher.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    keyword: String,
    regex: Regex,
}

impl KeywordMatcher {
    pub fn new(keyword: &str) -> Result<Self> {
        let keyword = keyword.trim();
        let (stem, prefix) = match keyword.strip_suffix('*') {
            Some(stem) => (stem, true),
            None => (keyword, false),
        };
        // Phrases match across any run of whitespace.
        let body = stem
            .split_whitespace()
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(r"\s+");
        let pattern = if prefix {
            format!(r"(?i)\b{}\w*", body)
        } else {
            format!(r"(?i)\b{}\b", body)
        };
        let regex = Regex::new(&pattern).map_err(|source| Error::InvalidPattern {
            pattern: keyword.to_string(),
            source,
        })?;
        Ok(Self {
            keyword: keyword.to_string(),
            regex,
        })
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Byte offset of the first match, if any.
    pub fn find(&self, text: &str) -> Option<usize> {
        self.regex.find(text).map(|m| m.start())
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// A compiled file glob.
#[derive(Debug, Clone)]
pub struct GlobMatcher {
    pattern: String,
    regex: Regex,
}

impl GlobMatcher {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&glob_to_regex(pattern)).map_err(|source| Error::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(&path.replace('\\', "/"))
    }
}

/// Translate a glob into an anchored regular expression.
pub fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    let mut in_group = false;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '{' => {
                in_group = true;
                out.push_str("(?:");
            }
            '}' if in_group => {
                in_group = false;
                out.push(')');
            }
            ',' if in_group => out.push('|'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}

/// A domain with its matchers, in registry priority order.
#[derive(Debug, Clone)]
pub struct CompiledDomain {
    pub tag: DomainTag,
    /// Position in the registry; lower wins ties.
    pub priority: usize,
    pub keywords: Vec<KeywordMatcher>,
    pub globs: Vec<GlobMatcher>,
}

#[derive(Debug, Clone)]
pub struct CompiledCommand {
    pub mapping: CommandMapping,
    matcher: KeywordMatcher,
}

/// The registry with every pattern compiled.
#[derive(Debug, Clone)]
pub struct CompiledRegistry {
    domains: Vec<CompiledDomain>,
    commands: Vec<CompiledCommand>,
    complexity_keywords: Vec<KeywordMatcher>,
}

impl CompiledRegistry {
    pub fn domains(&self) -> &[CompiledDomain] {
        &self.domains
    }

    pub fn domain(&self, tag: &DomainTag) -> Option<&CompiledDomain> {
        self.domains.iter().find(|d| &d.tag == tag)
    }

    pub fn complexity_keywords(&self) -> &[KeywordMatcher] {
        &self.complexity_keywords
    }

    /// The command requested by the text: the earliest verb occurring in it.
    ///
    /// Equal positions resolve to the command declared first.
    pub fn detect_command(&self, text: &str) -> Option<&CommandMapping> {
        self.commands
            .iter()
            .filter_map(|c| c.matcher.find(text).map(|pos| (pos, c)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, c)| &c.mapping)
    }
}
