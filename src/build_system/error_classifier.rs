// Compiler diagnostic classification
// Line-oriented substring rules over captured compiler output

use std::fmt;
use std::sync::LazyLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Default number of entries rendered in a summary
pub const DEFAULT_SUMMARY_CAP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    MissingFile,
    LinkError,
    Permission,
    Syntax,
    LibraryNotFound,
    Other,
}

impl ErrorCategory {
    /// Remediation advice shown next to a diagnostic
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            ErrorCategory::MissingFile => Some("Check include paths or install package"),
            ErrorCategory::LinkError => Some("Check library paths (-L) and library names (-l)"),
            ErrorCategory::Permission => Some("Check file permissions (chmod +x)"),
            ErrorCategory::Syntax => Some("Fix the syntax error in the source code"),
            ErrorCategory::LibraryNotFound => Some("Install the library development package"),
            ErrorCategory::Other => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::MissingFile => "Missing file/header",
            ErrorCategory::LinkError => "Linking error",
            ErrorCategory::Permission => "Permission denied",
            ErrorCategory::Syntax => "Syntax error",
            ErrorCategory::LibraryNotFound => "Library not found",
            ErrorCategory::Other => "Diagnostic",
        }
    }
}

/// `file:line[:column]` position parsed from a diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.column {
            Some(column) => write!(f, "{}:{}:{}", self.file, self.line, column),
            None => write!(f, "{}:{}", self.file, self.line),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub severity: Severity,
    pub category: ErrorCategory,
    pub raw_line: String,
    pub location: Option<SourceLocation>,
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Fatal => "fatal",
        };
        match self.category.hint() {
            Some(hint) => write!(f, "[{}] {} - {}: {}", tag, self.category.label(), hint, self.raw_line),
            None => write!(f, "[{}] {}", tag, self.raw_line),
        }
    }
}

/// Capped view over a classified list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSummary {
    pub shown: Vec<ClassifiedError>,
    pub remaining: usize,
}

impl ErrorSummary {
    pub fn is_empty(&self) -> bool {
        self.shown.is_empty()
    }

    /// Number of classified lines, shown or not
    pub fn total(&self) -> usize {
        self.shown.len() + self.remaining
    }
}

impl fmt::Display for ErrorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.shown.is_empty() {
            return write!(f, "No specific errors detected in output");
        }
        let lines: Vec<String> = self.shown.iter().map(ToString::to_string).collect();
        write!(f, "{}", lines.join("\n"))?;
        if self.remaining > 0 {
            write!(f, "\n... and {} more errors", self.remaining)?;
        }
        Ok(())
    }
}

// Ordered; first rule with a matching needle decides the category.
// Library lookups come first because ld reports them as "cannot find -lfoo: No such file or directory".
const RULES: &[(ErrorCategory, &[&str])] = &[
    (ErrorCategory::LibraryNotFound, &["cannot find -l", "library not found for", "cannot find library", "cannot open file '"]),
    (ErrorCategory::MissingFile, &["no such file or directory", "file not found", "cannot open include file", "cannot open source file"]),
    (ErrorCategory::LinkError, &["undefined reference", "unresolved external symbol", "undefined symbol", "ld returned"]),
    (ErrorCategory::Permission, &["permission denied", "access is denied"]),
    (ErrorCategory::Syntax, &["syntax error", "parse error"]),
];

static GNU_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<file>(?:[A-Za-z]:)?[^:\s][^:]*?):(?P<line>\d+)(?::(?P<col>\d+))?:").expect("valid regex")
});

static MSVC_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<file>[^(]+?)\((?P<line>\d+)(?:,(?P<col>\d+))?\)\s*:").expect("valid regex")
});

/// Stateless classifier for compiler and linker output
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    cap: usize,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self { cap: DEFAULT_SUMMARY_CAP }
    }
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifier whose summaries show at most `cap` lines
    pub fn with_cap(cap: usize) -> Self {
        Self { cap }
    }

    /// Classify every diagnostic-looking line of `text`, in order
    pub fn classify(&self, text: &str) -> Vec<ClassifiedError> {
        text.lines().filter_map(classify_line).collect()
    }

    /// Classify and cap at the configured summary size
    pub fn summarize(&self, text: &str) -> ErrorSummary {
        let mut shown = self.classify(text);
        let remaining = shown.len().saturating_sub(self.cap);
        shown.truncate(self.cap);
        ErrorSummary { shown, remaining }
    }
}

/// Classify a single line; `None` when it does not look like a diagnostic
pub fn classify_line(line: &str) -> Option<ClassifiedError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();

    let category = RULES
        .iter()
        .find(|(_, needles)| needles.iter().any(|needle| lower.contains(needle)))
        .map(|(category, _)| *category)
        .or_else(|| {
            (lower.contains("error") || lower.contains("warning") || lower.contains("fatal"))
                .then_some(ErrorCategory::Other)
        })?;

    Some(ClassifiedError {
        severity: severity_of(&lower),
        category,
        raw_line: trimmed.to_string(),
        location: parse_location(trimmed),
    })
}

fn severity_of(lower: &str) -> Severity {
    if lower.contains("fatal") {
        Severity::Fatal
    } else if lower.contains("warning:") {
        Severity::Warning
    } else if lower.contains("error") {
        Severity::Error
    } else if lower.contains("warning") {
        Severity::Warning
    } else {
        Severity::Error
    }
}

fn parse_location(line: &str) -> Option<SourceLocation> {
    let caps = GNU_LOCATION
        .captures(line)
        .or_else(|| MSVC_LOCATION.captures(line))?;

    Some(SourceLocation {
        file: caps.name("file")?.as_str().trim().to_string(),
        line: caps.name("line")?.as_str().parse().ok()?,
        column: caps.name("col").and_then(|c| c.as_str().parse().ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GCC_OUTPUT: &str = "\
main.cpp: In function 'int main()':
main.cpp:3:10: fatal error: cryptopp/aes.h: No such file or directory
    3 | #include <cryptopp/aes.h>
      |          ^~~~~~~~~~~~~~~~
compilation terminated.
";

    #[test]
    fn test_fatal_missing_header() {
        let errors = ErrorClassifier::new().classify(GCC_OUTPUT);
        assert_eq!(errors.len(), 1);
        let err = &errors[0];
        assert_eq!(err.severity, Severity::Fatal);
        assert_eq!(err.category, ErrorCategory::MissingFile);
        assert_eq!(
            err.location,
            Some(SourceLocation { file: "main.cpp".to_string(), line: 3, column: Some(10) })
        );
    }

    #[test]
    fn test_link_errors() {
        let output = "\
/usr/bin/ld: /tmp/ccX.o: in function `main':
main.cpp:(.text+0x1f): undefined reference to `CryptoPP::AES::Encryption'
/usr/bin/ld: cannot find -lcryptopp: No such file or directory
collect2: error: ld returned 1 exit status
";
        let errors = ErrorClassifier::new().classify(output);
        let categories: Vec<_> = errors.iter().map(|e| e.category).collect();
        assert_eq!(
            categories,
            vec![ErrorCategory::LinkError, ErrorCategory::LibraryNotFound, ErrorCategory::LinkError]
        );
        assert_eq!(errors[0].severity, Severity::Error);
        assert_eq!(errors[2].severity, Severity::Error);
    }

    #[test]
    fn test_warning_and_other() {
        let output = "\
aes.cpp:12:5: warning: unused variable 'key' [-Wunused-variable]
aes.cpp:20:1: error: expected ';' before '}' token
note: candidate is here
";
        let errors = ErrorClassifier::new().classify(output);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].severity, Severity::Warning);
        assert_eq!(errors[0].category, ErrorCategory::Other);
        assert_eq!(errors[1].severity, Severity::Error);
        assert_eq!(errors[1].category, ErrorCategory::Other);
    }

    #[test]
    fn test_case_insensitive_and_msvc_location() {
        let line = r"C:\src\aes.cpp(42,7): error C2065: 'key': undeclared identifier";
        let err = classify_line(line).unwrap();
        assert_eq!(err.category, ErrorCategory::Other);
        let location = err.location.unwrap();
        assert_eq!(location.file, r"C:\src\aes.cpp");
        assert_eq!(location.line, 42);
        assert_eq!(location.column, Some(7));

        let permission = classify_line("sh: 1: ./app: PERMISSION DENIED").unwrap();
        assert_eq!(permission.category, ErrorCategory::Permission);
        assert_eq!(permission.severity, Severity::Error);
    }

    #[test]
    fn test_unmatched_lines_are_dropped() {
        let errors = ErrorClassifier::new().classify("Compiling...\n\n   \nDone\n");
        assert!(errors.is_empty());
    }

    #[test]
    fn test_summary_cap() {
        let output: String = (0..13).map(|i| format!("x.cpp:{}:1: error: bad\n", i + 1)).collect();
        let summary = ErrorClassifier::new().summarize(&output);
        assert_eq!(summary.shown.len(), 10);
        assert_eq!(summary.remaining, 3);
        assert_eq!(summary.total(), 13);
        assert!(summary.to_string().ends_with("... and 3 more errors"));
    }

    #[test]
    fn test_empty_summary() {
        let summary = ErrorClassifier::with_cap(5).summarize("all good");
        assert!(summary.is_empty());
        assert_eq!(summary.to_string(), "No specific errors detected in output");
    }

    #[test]
    fn test_hint_in_display() {
        let err = classify_line("main.cpp:1:10: fatal error: openssl/evp.h: No such file or directory").unwrap();
        let rendered = err.to_string();
        assert!(rendered.starts_with("[fatal] Missing file/header - Check include paths"));
    }
}
