//! CLI command definitions using clap.
//!
//! - classify-error: classify an error text (optionally split into messages)
//! - decide-retry: retry decision for a category and attempt
//! - build-context: bounded context bundle for a project
//! - record-feedback: append one feedback record
//! - report: metrics and feedback summary
//! - cleanup: drop expired cache entries and old metrics
//! - run: drive a command through the fix/retry loop

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use fixloop::domain::Category;
use fixloop::feedback::{FeedbackSource, FeedbackType, Outcome};

/// fixloop - error classification, adaptive retry and context caching for CI fix loops
#[derive(Parser, Debug)]
#[command(name = "fixloop")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ContextFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReportFormat {
    #[default]
    Json,
    Markdown,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify error text read from a file or stdin
    ClassifyError {
        /// Input file, or - for stdin
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Where the error came from (build, test, ...)
        #[arg(short, long)]
        source: Option<String>,

        /// Split multi-error output and analyze each message
        #[arg(long)]
        split: bool,
    },

    /// Decide whether to retry a failure
    DecideRetry {
        #[arg(long)]
        category: Category,

        /// 0-based attempt count
        #[arg(long, default_value_t = 0)]
        attempt: u32,
    },

    /// Build a context bundle within a token budget
    BuildContext {
        /// Project root (defaults to the current directory)
        #[arg(long)]
        root: Option<PathBuf>,

        /// Comma-separated task keywords
        #[arg(short, long, value_delimiter = ',')]
        keywords: Vec<String>,

        #[arg(long)]
        max_tokens: Option<usize>,

        #[arg(long)]
        max_items: Option<usize>,

        /// Re-read files even when cached
        #[arg(long)]
        force_refresh: bool,

        #[arg(long, value_enum, default_value_t = ContextFormat::Json)]
        format: ContextFormat,
    },

    /// Append a feedback record
    RecordFeedback {
        #[arg(short, long)]
        message: String,

        #[arg(short = 't', long = "type")]
        feedback_type: FeedbackType,

        #[arg(short, long)]
        source: FeedbackSource,

        /// 0.0 (trivial) to 1.0 (blocking)
        #[arg(long, default_value_t = 0.5)]
        severity: f64,

        #[arg(long, default_value = "info")]
        outcome: Outcome,

        #[arg(long)]
        category: Option<Category>,
    },

    /// Metrics summary and optimization recommendations
    Report {
        /// Trailing window in days (defaults to the configured window)
        #[arg(short, long)]
        days: Option<u32>,

        #[arg(long, value_enum, default_value_t = ReportFormat::Json)]
        format: ReportFormat,
    },

    /// Remove expired cache entries and metrics older than the window
    Cleanup,

    /// Run a command, retrying failures until resolved or exhausted
    Run {
        #[arg(long, default_value = "local")]
        workflow_id: String,

        /// Run id (generated when omitted)
        #[arg(long)]
        run_id: Option<String>,

        /// Where failures come from (build, test, ...)
        #[arg(long)]
        source: Option<String>,

        /// Give up (and exhaust) after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Write a text context bundle here before each retry
        #[arg(long)]
        context_out: Option<PathBuf>,

        /// Command to run
        #[arg(trailing_var_arg = true, required = true, num_args = 1..)]
        command: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["fixloop"]).is_err());
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from(["fixloop", "-v", "-c", "/tmp/f.yml", "cleanup"]).unwrap();
        assert!(cli.is_verbose());
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/f.yml")));
        assert!(matches!(cli.command, Commands::Cleanup));
    }

    #[test]
    fn test_classify_error_defaults() {
        let cli = Cli::try_parse_from(["fixloop", "classify-error"]).unwrap();
        match cli.command {
            Commands::ClassifyError {
                input,
                source,
                split,
            } => {
                assert_eq!(input, PathBuf::from("-"));
                assert!(source.is_none());
                assert!(!split);
            }
            _ => panic!("Expected classify-error"),
        }
    }

    #[test]
    fn test_decide_retry_parses_category() {
        let args = ["fixloop", "decide-retry", "--category", "network", "--attempt", "3"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::DecideRetry { category, attempt } => {
                assert_eq!(category, Category::Network);
                assert_eq!(attempt, 3);
            }
            _ => panic!("Expected decide-retry"),
        }
        assert!(Cli::try_parse_from(["fixloop", "decide-retry", "--category", "cosmic"]).is_err());
    }

    #[test]
    fn test_build_context_keywords() {
        let cli = Cli::try_parse_from([
            "fixloop",
            "build-context",
            "--keywords",
            "auth,login",
            "--max-tokens",
            "1000",
            "--max-items",
            "5",
            "--format",
            "text",
        ])
        .unwrap();
        match cli.command {
            Commands::BuildContext {
                keywords,
                max_tokens,
                max_items,
                format,
                force_refresh,
                ..
            } => {
                assert_eq!(keywords, vec!["auth", "login"]);
                assert_eq!(max_tokens, Some(1000));
                assert_eq!(max_items, Some(5));
                assert_eq!(format, ContextFormat::Text);
                assert!(!force_refresh);
            }
            _ => panic!("Expected build-context"),
        }
    }

    #[test]
    fn test_record_feedback() {
        let cli = Cli::try_parse_from([
            "fixloop",
            "record-feedback",
            "--message",
            "flaky test",
            "--type",
            "error",
            "--source",
            "tests",
            "--outcome",
            "resolved",
        ])
        .unwrap();
        match cli.command {
            Commands::RecordFeedback {
                message,
                feedback_type,
                source,
                severity,
                outcome,
                category,
            } => {
                assert_eq!(message, "flaky test");
                assert_eq!(feedback_type, FeedbackType::Error);
                assert_eq!(source, FeedbackSource::Tests);
                assert_eq!(severity, 0.5);
                assert_eq!(outcome, Outcome::Resolved);
                assert!(category.is_none());
            }
            _ => panic!("Expected record-feedback"),
        }
    }

    #[test]
    fn test_report_format() {
        let args = ["fixloop", "report", "--days", "7", "--format", "markdown"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Report { days, format } => {
                assert_eq!(days, Some(7));
                assert_eq!(format, ReportFormat::Markdown);
            }
            _ => panic!("Expected report"),
        }
    }

    #[test]
    fn test_run_trailing_command() {
        let args = ["fixloop", "run", "--timeout-secs", "60", "--", "cargo", "test", "--all"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Run {
                command,
                timeout_secs,
                workflow_id,
                run_id,
                ..
            } => {
                assert_eq!(command, vec!["cargo", "test", "--all"]);
                assert_eq!(timeout_secs, Some(60));
                assert_eq!(workflow_id, "local");
                assert!(run_id.is_none());
            }
            _ => panic!("Expected run"),
        }
        assert!(Cli::try_parse_from(["fixloop", "run"]).is_err());
    }
}
