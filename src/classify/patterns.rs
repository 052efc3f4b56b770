//! Classification pattern table.
//!
//! Patterns are case-insensitive and are matched against normalized text, where
//! every numeric literal has already been replaced by `#`.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::domain::{Category, Severity};
use crate::error::{FixloopError, Result};

/// One row of the pattern table, as written in config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub category: Category,
    pub severity: Severity,
    pub regex: String,
    pub retryable: bool,
    #[serde(default = "default_fix_seconds")]
    pub typical_fix_seconds: u64,
}

fn default_fix_seconds() -> u64 {
    180
}

impl PatternSpec {
    fn new(
        category: Category,
        severity: Severity,
        regex: &str,
        retryable: bool,
        typical_fix_seconds: u64,
    ) -> Self {
        Self {
            category,
            severity,
            regex: regex.to_string(),
            retryable,
            typical_fix_seconds,
        }
    }

    /// Compile this row, rejecting rows that target `unknown`.
    pub fn compile(&self) -> Result<Regex> {
        if self.category == Category::Unknown {
            return Err(FixloopError::Config(format!(
                "pattern '{}' targets category 'unknown', which is reserved for unmatched text",
                self.regex
            )));
        }
        Ok(RegexBuilder::new(&self.regex).case_insensitive(true).build()?)
    }
}

/// Built-in table, in evaluation order.
pub fn default_patterns() -> Vec<PatternSpec> {
    use Category::*;
    use Severity::*;

    vec![
        PatternSpec::new(Syntax, Low, r"SyntaxError|syntax error|invalid syntax", false, 300),
        PatternSpec::new(Syntax, Low, r"IndentationError|unexpected indent", false, 180),
        PatternSpec::new(Syntax, Medium, r"TypeError|type error|mismatched types", false, 240),
        PatternSpec::new(
            Dependency,
            Medium,
            r"ModuleNotFoundError|ImportError|No module named",
            true,
            120,
        ),
        PatternSpec::new(
            Dependency,
            Medium,
            r"pip install.*failed|dependency.*not found|could not resolve dependencies|unresolved import",
            true,
            180,
        ),
        PatternSpec::new(
            Dependency,
            High,
            r"cmake.*not found|gcc.*not found|command not found",
            false,
            600,
        ),
        PatternSpec::new(
            Configuration,
            Medium,
            r"config.*error|configuration.*invalid|invalid config",
            false,
            240,
        ),
        PatternSpec::new(
            Configuration,
            Medium,
            r"environment.*variable.*not set|env.*missing|missing.*environment variable",
            false,
            180,
        ),
        PatternSpec::new(
            Network,
            Medium,
            r"connection.*refused|network.*unreachable|connection reset|could not resolve host",
            true,
            60,
        ),
        PatternSpec::new(
            Network,
            Medium,
            r"http error|request.*failed|bad gateway|service unavailable|too many requests",
            true,
            90,
        ),
        PatternSpec::new(
            Permission,
            High,
            r"permission.*denied|access.*denied|unauthorized|forbidden",
            false,
            300,
        ),
        PatternSpec::new(
            Permission,
            Medium,
            r"read.*permission|write.*permission|eacces|operation not permitted",
            false,
            180,
        ),
        PatternSpec::new(Timeout, Medium, r"timeout|timed out|deadline exceeded", true, 60),
        PatternSpec::new(
            Runtime,
            High,
            r"RuntimeError|runtime.*error|execution.*failed|panicked at|segmentation fault",
            true,
            180,
        ),
        PatternSpec::new(
            Runtime,
            High,
            r"AssertionError|assert.*failed|assertion.*failed",
            false,
            240,
        ),
        PatternSpec::new(
            System,
            Critical,
            r"OutOfMemoryError|out of memory|memory.*error|disk.*full|no space left on device",
            true,
            600,
        ),
        PatternSpec::new(
            System,
            Medium,
            r"FileNotFoundError|file.*not found|no such file or directory",
            false,
            120,
        ),
    ]
}

/// A compiled row.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub spec: PatternSpec,
    pub regex: Regex,
}

impl CompiledPattern {
    /// Length of the longest match in `text`, if any.
    pub fn longest_span(&self, text: &str) -> Option<usize> {
        self.regex.find_iter(text).map(|m| m.end() - m.start()).max()
    }
}

/// The active, ordered table.
#[derive(Debug, Clone)]
pub struct PatternTable {
    patterns: Vec<CompiledPattern>,
}

impl PatternTable {
    /// Built-ins (optionally) followed by `extra`, all compiled up front.
    pub fn build(include_defaults: bool, extra: &[PatternSpec]) -> Result<Self> {
        let specs = if include_defaults {
            default_patterns().into_iter().chain(extra.iter().cloned()).collect::<Vec<_>>()
        } else {
            extra.to_vec()
        };

        let patterns = specs
            .into_iter()
            .map(|spec| {
                let regex = spec.compile()?;
                Ok(CompiledPattern { spec, regex })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    pub fn patterns(&self) -> &[CompiledPattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for PatternTable {
    fn default() -> Self {
        Self::build(true, &[]).expect("built-in patterns compile")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_patterns_compile() {
        let table = PatternTable::build(true, &[]).unwrap();
        assert_eq!(table.len(), default_patterns().len());
        assert!(table.patterns().iter().all(|p| p.spec.category != Category::Unknown));
    }

    #[test]
    fn test_every_known_category_has_a_pattern() {
        let specs = default_patterns();
        for cat in Category::ALL.iter().filter(|c| **c != Category::Unknown) {
            assert!(specs.iter().any(|s| s.category == *cat), "no pattern for {}", cat);
        }
    }

    #[test]
    fn test_extra_patterns_follow_defaults() {
        let extra = PatternSpec::new(Category::Network, Severity::High, r"econnreset", true, 30);
        let table = PatternTable::build(true, std::slice::from_ref(&extra)).unwrap();
        assert_eq!(table.patterns().last().unwrap().spec, extra);

        let only = PatternTable::build(false, &[extra]).unwrap();
        assert_eq!(only.len(), 1);
    }

    #[test]
    fn test_unknown_target_rejected() {
        let bad = PatternSpec::new(Category::Unknown, Severity::Low, r"oops", true, 30);
        let err = PatternTable::build(false, &[bad]).unwrap_err();
        assert!(matches!(err, FixloopError::Config(_)));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let bad = PatternSpec::new(Category::Runtime, Severity::Low, r"(unclosed", true, 30);
        assert!(matches!(PatternTable::build(false, &[bad]), Err(FixloopError::Regex(_))));
    }

    #[test]
    fn test_longest_span_is_case_insensitive() {
        let table = PatternTable::build(true, &[]).unwrap();
        let syntax = &table.patterns()[0];
        assert_eq!(syntax.longest_span("syntaxerror: invalid syntax (line #)"), Some(14));
        assert_eq!(syntax.longest_span("all good"), None);
    }

    #[test]
    fn test_pattern_spec_yaml() {
        let yaml = "category: network\nseverity: high\nregex: 'econnreset'\nretryable: true\n";
        let spec: PatternSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.category, Category::Network);
        assert_eq!(spec.typical_fix_seconds, 180);

        let bad = "category: flaky\nseverity: high\nregex: 'x'\nretryable: true\n";
        assert!(serde_yaml::from_str::<PatternSpec>(bad).is_err());
    }
}
