//! Error category and severity taxonomy

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FixloopError;

/// Why a task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Syntax,
    Dependency,
    Configuration,
    Runtime,
    Network,
    Permission,
    Timeout,
    System,
    Unknown,
}

impl Category {
    /// Every category, in declaration order.
    pub const ALL: [Category; 9] = [
        Category::Syntax,
        Category::Dependency,
        Category::Configuration,
        Category::Runtime,
        Category::Network,
        Category::Permission,
        Category::Timeout,
        Category::System,
        Category::Unknown,
    ];

    /// Tie-break rank when two matches have equal span; lower wins.
    ///
    /// permission > timeout > network > dependency > configuration > syntax > runtime > system
    pub fn precedence(&self) -> u8 {
        match self {
            Category::Permission => 0,
            Category::Timeout => 1,
            Category::Network => 2,
            Category::Dependency => 3,
            Category::Configuration => 4,
            Category::Syntax => 5,
            Category::Runtime => 6,
            Category::System => 7,
            Category::Unknown => 8,
        }
    }

    /// Failures that usually clear up on their own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Category::Network | Category::Timeout | Category::System)
    }

    /// Suggested remediation shown alongside a classification.
    pub fn suggested_fix(&self) -> &'static str {
        match self {
            Category::Syntax => "Check for syntax errors, typos, or incorrect language constructs",
            Category::Dependency => "Install missing dependencies or update package versions",
            Category::Configuration => {
                "Review and fix configuration files or environment variables"
            }
            Category::Network => "Check network connectivity and firewall settings",
            Category::Permission => "Verify file/directory permissions and access rights",
            Category::Timeout => "Increase timeout values or optimize performance",
            Category::Runtime => "Debug runtime logic and check program flow",
            Category::System => "Check system resources and disk space",
            Category::Unknown => "Review error logs and investigate root cause",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Syntax => "syntax",
            Category::Dependency => "dependency",
            Category::Configuration => "configuration",
            Category::Runtime => "runtime",
            Category::Network => "network",
            Category::Permission => "permission",
            Category::Timeout => "timeout",
            Category::System => "system",
            Category::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = FixloopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == needle)
            .ok_or_else(|| FixloopError::InvalidInput(format!("unknown category: {}", s)))
    }
}

/// How badly a task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Numeric weight on the 0..1 scale used by feedback severity.
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Low => 0.25,
            Severity::Medium => 0.5,
            Severity::High => 0.75,
            Severity::Critical => 1.0,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_order() {
        let mut cats: Vec<Category> = Category::ALL.to_vec();
        cats.sort_by_key(|c| c.precedence());
        assert_eq!(
            cats,
            vec![
                Category::Permission,
                Category::Timeout,
                Category::Network,
                Category::Dependency,
                Category::Configuration,
                Category::Syntax,
                Category::Runtime,
                Category::System,
                Category::Unknown,
            ]
        );
    }

    #[test]
    fn test_category_from_str() {
        assert_eq!("network".parse::<Category>().unwrap(), Category::Network);
        assert_eq!(" Timeout ".parse::<Category>().unwrap(), Category::Timeout);
        assert!("flaky".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_serde_roundtrip() {
        let json = serde_json::to_string(&Category::Permission).unwrap();
        assert_eq!(json, "\"permission\"");
        let parsed: Category = serde_json::from_str("\"dependency\"").unwrap();
        assert_eq!(parsed, Category::Dependency);
    }

    #[test]
    fn test_transient_categories() {
        assert!(Category::Network.is_transient());
        assert!(Category::System.is_transient());
        assert!(!Category::Syntax.is_transient());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low < Severity::Medium);
        assert_eq!(Severity::High.to_string(), "high");
    }
}
