//! Detail extraction from raw error text: location, error code, stack trace,
//! and splitting multi-error output into individual messages.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Location patterns. The `bool` marks patterns whose first group is the line.
static LOCATION: LazyLock<Vec<(Regex, bool)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r#"File "([^"]+)", line (\d+)"#).expect("python location"), false),
        (Regex::new(r"([^\s:]+):(\d+):").expect("colon location"), false),
        (Regex::new(r"at ([^\s:]+):(\d+)").expect("at location"), false),
        (Regex::new(r"line (\d+) in (\S+)").expect("line-in location"), true),
    ]
});

static ERROR_CODE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"[Ee]rror\[?\s*([A-Z]\d{3,4})").expect("error code"),
        Regex::new(r"[Ee]rrcode:\s*(\d+)").expect("errcode"),
        Regex::new(r"exit\s+code:?\s*(\d+)").expect("exit code"),
        Regex::new(r"status:\s*(\d+)").expect("status"),
    ]
});

static COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"command ['"]([^'"]+)['"]"#).expect("command"));

static DIRECTORY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"directory ['"]([^'"]+)['"]"#).expect("directory"));

static SEPARATORS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\n\s*\n").expect("blank line"),
        Regex::new(r";\s*").expect("semicolon"),
        Regex::new(r"\|\s*").expect("pipe"),
        Regex::new(r"---+").expect("dashes"),
    ]
});

/// Facts pulled out of the raw text. Never affects the classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub file_path: Option<String>,
    pub line_number: Option<u32>,
    pub error_code: Option<String>,
    pub has_stack_trace: bool,
    pub stack_depth: usize,
    pub command: Option<String>,
    pub directory: Option<String>,
}

pub fn extract_details(raw: &str) -> ErrorDetails {
    let (file_path, line_number) = extract_location(raw);
    let has_stack_trace = raw.contains("Traceback") || raw.contains("stack backtrace");
    let stack_depth = if has_stack_trace {
        raw.lines()
            .filter(|l| {
                let t = l.trim_start();
                t.starts_with("File ") || t.starts_with("at ")
            })
            .count()
    } else {
        0
    };

    ErrorDetails {
        file_path,
        line_number,
        error_code: extract_error_code(raw),
        has_stack_trace,
        stack_depth,
        command: COMMAND.captures(raw).map(|c| c[1].to_string()),
        directory: DIRECTORY.captures(raw).map(|c| c[1].to_string()),
    }
}

/// First matching `(path, line)` pair.
pub fn extract_location(raw: &str) -> (Option<String>, Option<u32>) {
    for (re, line_first) in LOCATION.iter() {
        if let Some(caps) = re.captures(raw) {
            let (path, line) = if *line_first {
                (&caps[2], &caps[1])
            } else {
                (&caps[1], &caps[2])
            };
            if let Ok(n) = line.parse::<u32>() {
                return (Some(path.to_string()), Some(n));
            }
        }
    }
    (None, None)
}

pub fn extract_error_code(raw: &str) -> Option<String> {
    ERROR_CODE
        .iter()
        .find_map(|re| re.captures(raw).map(|c| c[1].to_string()))
}

/// Split combined output into individual error messages.
pub fn split_messages(output: &str) -> Vec<String> {
    let mut messages = vec![output.trim().to_string()];
    for sep in SEPARATORS.iter() {
        messages = messages
            .iter()
            .flat_map(|m| sep.split(m).map(|s| s.trim().to_string()).collect::<Vec<_>>())
            .filter(|s| !s.is_empty())
            .collect();
    }
    messages
}
