//! Parsing of the tool's error output into diagnostics.
//!
//! The tool reports problems in a few shapes:
//!
//! ```text
//! CMake Error at src/CMakeLists.txt:8 (add_subdirectory):
//!   add_subdirectory given source "app1" which is not an existing directory.
//!
//! CMake Error in src/CMakeLists.txt:
//!   Cannot find source file:
//!
//! CMake Error: Error in cmake code at
//! /p/CMakeLists.txt:9:
//! Parse error.  Expected "(", got newline with text "
//! ".
//! ```
//!
//! Indented lines extend the current diagnostic. One empty line is part of
//! the message, a second one ends it. Progress lines (`-- `, ` * `) are
//! dropped; everything else passes through as plain output.

use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[allow(clippy::expect_used)]
static ERROR_AT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^CMake Error at (.*?):([0-9]*)( \((.*?)\))?:").expect("valid error pattern")
});

#[allow(clippy::expect_used)]
static ERROR_IN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^CMake Error in (.*?):").expect("valid error pattern"));

#[allow(clippy::expect_used)]
static LOCATION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":(\d+):(?:(\d+))?$").expect("valid location pattern"));

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The configure step failed or will fail.
    Error,
    /// A problem the tool tolerated.
    Warning,
}

/// One problem reported by the tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Error or warning.
    pub severity: Severity,
    /// The message, continuation lines joined with spaces.
    pub message: String,
    /// The build-description file the problem is in, if known.
    pub file: Option<Utf8PathBuf>,
    /// 1-based line in `file`, if known.
    pub line: Option<u32>,
}

impl Diagnostic {
    /// Creates a diagnostic without a location.
    #[must_use]
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            file: None,
            line: None,
        }
    }

    /// Creates an error without a location.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{file}:{line}: {label}: {}", self.message),
            (Some(file), None) => write!(f, "{file}: {label}: {}", self.message),
            _ => write!(f, "{label}: {}", self.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    None,
    Location,
    Description,
    SecondDescription,
}

/// Line-wise parser for the tool's error stream.
///
/// # Examples
///
/// ```
/// use cms_reader::{DiagnosticsParser, Severity};
///
/// let mut parser = DiagnosticsParser::new();
/// parser.push_line("CMake Error at CMakeLists.txt:8 (message):");
/// parser.push_line("  message called with incorrect number of arguments");
/// parser.flush();
///
/// let diagnostics = parser.take_diagnostics();
/// assert_eq!(diagnostics[0].severity, Severity::Error);
/// assert_eq!(diagnostics[0].line, Some(8));
/// ```
#[derive(Debug)]
pub struct DiagnosticsParser {
    source_dir: Option<Utf8PathBuf>,
    expect: Expect,
    current: Option<Diagnostic>,
    skipped_empty_line: bool,
    diagnostics: Vec<Diagnostic>,
    output: Vec<String>,
}

impl DiagnosticsParser {
    /// Creates a parser that leaves relative file names as they are.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            source_dir: None,
            expect: Expect::None,
            current: None,
            skipped_empty_line: false,
            diagnostics: Vec::new(),
            output: Vec::new(),
        }
    }

    /// Resolves relative file names against `source_dir`.
    #[must_use]
    pub fn with_source_dir(mut self, source_dir: impl Into<Utf8PathBuf>) -> Self {
        self.source_dir = Some(source_dir.into());
        self
    }

    /// Feeds one line of the error stream.
    pub fn push_line(&mut self, line: &str) {
        let trimmed = line.trim_end();
        match self.expect {
            Expect::None => self.handle_line(line, trimmed),
            Expect::Location => {
                if let Some(current) = self.current.as_mut() {
                    if let Some(m) = LOCATION_LINE.captures(trimmed) {
                        let start = m.get(0).map_or(trimmed.len(), |g| g.start());
                        current.file = Some(Utf8PathBuf::from(&trimmed[..start]));
                        current.line = m.get(1).and_then(|g| g.as_str().parse().ok());
                    } else {
                        current.file = Some(Utf8PathBuf::from(trimmed));
                    }
                }
                self.expect = Expect::Description;
            }
            Expect::Description => {
                if let Some(current) = self.current.as_mut() {
                    current.message = trimmed.to_owned();
                }
                if trimmed.ends_with('"') {
                    self.expect = Expect::SecondDescription;
                } else {
                    self.expect = Expect::None;
                    self.flush();
                }
            }
            Expect::SecondDescription => {
                if let Some(current) = self.current.as_mut() {
                    current.message.push('\n');
                    current.message.push_str(trimmed);
                }
                self.expect = Expect::None;
                self.flush();
            }
        }
    }

    fn handle_line(&mut self, line: &str, trimmed: &str) {
        if trimmed.is_empty() && self.current.is_some() {
            if self.skipped_empty_line {
                self.flush();
            } else {
                self.skipped_empty_line = true;
            }
            return;
        }
        self.skipped_empty_line = false;

        if let Some(m) = ERROR_AT.captures(trimmed) {
            self.flush();
            let file = m.get(1).map(|g| self.resolve(g.as_str()));
            let line = m.get(2).and_then(|g| g.as_str().parse().ok());
            self.current = Some(Diagnostic {
                file,
                line,
                ..Diagnostic::error("")
            });
        } else if let Some(m) = ERROR_IN.captures(trimmed) {
            self.flush();
            let file = m.get(1).map(|g| self.resolve(g.as_str()));
            self.current = Some(Diagnostic {
                file,
                ..Diagnostic::error("")
            });
        } else if trimmed.starts_with("  ") && self.current.is_some() {
            if let Some(current) = self.current.as_mut() {
                if !current.message.is_empty() {
                    current.message.push(' ');
                }
                current.message.push_str(trimmed.trim());
            }
        } else if trimmed.ends_with("in cmake code at") {
            self.flush();
            let severity = if trimmed.contains("Error") {
                Severity::Error
            } else {
                Severity::Warning
            };
            self.current = Some(Diagnostic::new(severity, ""));
            self.expect = Expect::Location;
        } else if let Some(rest) = trimmed.strip_prefix("CMake Error: ") {
            self.flush();
            self.current = Some(Diagnostic::error(rest));
        } else if trimmed.starts_with("-- ") || trimmed.starts_with(" * ") {
            // Progress output.
        } else {
            self.output.push(line.to_owned());
        }
    }

    fn resolve(&self, file: &str) -> Utf8PathBuf {
        let path = Utf8Path::new(file);
        match &self.source_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_owned(),
        }
    }

    /// Ends the current diagnostic, if any.
    pub fn flush(&mut self) {
        if let Some(diagnostic) = self.current.take() {
            tracing::debug!(%diagnostic, "Tool diagnostic");
            self.diagnostics.push(diagnostic);
        }
        self.skipped_empty_line = false;
    }

    /// Returns the diagnostics finished so far.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Takes the finished diagnostics.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Takes the lines that were neither diagnostics nor progress.
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }
}

impl Default for DiagnosticsParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> (Vec<Diagnostic>, Vec<String>) {
        let mut parser = DiagnosticsParser::new();
        for line in input.lines() {
            parser.push_line(line);
        }
        parser.flush();
        (parser.take_diagnostics(), parser.take_output())
    }

    fn located(message: &str, file: &str, line: Option<u32>) -> Diagnostic {
        Diagnostic {
            file: Some(Utf8PathBuf::from(file)),
            line,
            ..Diagnostic::error(message)
        }
    }

    #[test]
    fn test_error_at_and_error_in() {
        let input = "CMake Error at src/1/app/CMakeLists.txt:70 (add_custom_target):\n\
                     \x20 Cannot find source file:\n\n\
                     \x20   unknownFile.qml\n\n\
                     \x20 Tried extensions .c .C .c++ .cc .cpp .cxx .m .M .mm .h .hh .h++ .hm .hpp\n\
                     \x20 .hxx .in .txx\n\n\n\
                     CMake Error in src/1/app/CMakeLists.txt:\n\
                     \x20 Cannot find source file:\n\n\
                     \x20   CMakeLists.txt2\n\n\
                     \x20 Tried extensions .c .C .c++ .cc .cpp .cxx .m .M .mm .h .hh .h++ .hm .hpp\n\
                     \x20 .hxx .in .txx\n\n";
        let (diagnostics, output) = parse(input);
        let tried = "Tried extensions .c .C .c++ .cc .cpp .cxx .m .M .mm .h .hh .h++ .hm .hpp .hxx .in .txx";
        assert_eq!(
            diagnostics,
            [
                located(
                    &format!("Cannot find source file: unknownFile.qml {tried}"),
                    "src/1/app/CMakeLists.txt",
                    Some(70)
                ),
                located(
                    &format!("Cannot find source file: CMakeLists.txt2 {tried}"),
                    "src/1/app/CMakeLists.txt",
                    None
                ),
            ]
        );
        assert!(output.is_empty());
    }

    #[test]
    fn test_add_subdirectory() {
        let (diagnostics, _) = parse(
            "CMake Error at src/1/CMakeLists.txt:8 (add_subdirectory):\n  \
             add_subdirectory given source \"app1\" which is not an existing directory.\n\n",
        );
        assert_eq!(
            diagnostics,
            [located(
                "add_subdirectory given source \"app1\" which is not an existing directory.",
                "src/1/CMakeLists.txt",
                Some(8)
            )]
        );
    }

    #[test]
    fn test_unknown_command() {
        let (diagnostics, _) = parse(
            "CMake Error at src/1/CMakeLists.txt:8 (i_am_wrong_command):\n  \
             Unknown CMake command \"i_am_wrong_command\".\n\n",
        );
        assert_eq!(diagnostics[0].message, "Unknown CMake command \"i_am_wrong_command\".");
        assert_eq!(diagnostics[0].line, Some(8));
    }

    #[test]
    fn test_error_in_cmake_code_triple_line() {
        let (diagnostics, output) = parse(
            "CMake Error: Error in cmake code at\n\
             /test/path/CMakeLists.txt:9:\n\
             Parse error.  Expected \"(\", got newline with text \"\n\
             \".",
        );
        assert_eq!(
            diagnostics,
            [located(
                "Parse error.  Expected \"(\", got newline with text \"\n\".",
                "/test/path/CMakeLists.txt",
                Some(9)
            )]
        );
        assert!(output.is_empty());
    }

    #[test]
    fn test_plain_error_keeps_following_lines_as_output() {
        let (diagnostics, output) = parse(
            "CMake Error: Error required internal CMake variable not set, cmake may be not be built correctly.\n\
             Missing variable is:\n\
             CMAKE_MAKE_PROGRAM\n",
        );
        assert_eq!(
            diagnostics,
            [Diagnostic::error(
                "Error required internal CMake variable not set, cmake may be not be built correctly."
            )]
        );
        assert_eq!(output, ["Missing variable is:", "CMAKE_MAKE_PROGRAM"]);
    }

    #[test]
    fn test_error_at_with_inner_empty_line() {
        let (diagnostics, _) = parse(
            "CMake Error at CMakeLists.txt:4:\n  \
             Parse error.  Expected \"(\", got newline with text \"\n\
             \n  \
             \".\n",
        );
        assert_eq!(
            diagnostics,
            [located(
                "Parse error.  Expected \"(\", got newline with text \" \".",
                "CMakeLists.txt",
                Some(4)
            )]
        );
    }

    #[test]
    fn test_syntax_warning() {
        let (diagnostics, _) = parse(
            "Syntax Warning in cmake code at\n\
             /test/path/CMakeLists.txt:9:15\n\
             Argument not separated from preceding token by whitespace.",
        );
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Warning);
        assert_eq!(diagnostics[0].file.as_deref(), Some(Utf8Path::new("/test/path/CMakeLists.txt")));
        assert_eq!(diagnostics[0].line, Some(9));
    }

    #[test]
    fn test_progress_output_is_dropped() {
        let (diagnostics, output) = parse(
            "-- Qt5 install prefix: /usr/lib\n \
             * Plugin componentsplugin, with CONDITION TARGET QmlDesigner",
        );
        assert!(diagnostics.is_empty());
        assert!(output.is_empty());
    }

    #[test]
    fn test_pass_through() {
        let (diagnostics, output) = parse("Sometext");
        assert!(diagnostics.is_empty());
        assert_eq!(output, ["Sometext"]);
    }

    #[test]
    fn test_relative_files_resolved_against_source_dir() {
        let mut parser = DiagnosticsParser::new().with_source_dir("/work/src");
        parser.push_line("CMake Error at sub/CMakeLists.txt:3 (message):");
        parser.push_line("  boom");
        parser.push_line("CMake Error at /abs/CMakeLists.txt:1 (message):");
        parser.flush();
        let files: Vec<_> = parser
            .diagnostics()
            .iter()
            .filter_map(|d| d.file.as_ref().map(|f| f.as_str()))
            .collect();
        assert_eq!(files, ["/work/src/sub/CMakeLists.txt", "/abs/CMakeLists.txt"]);
    }

    #[test]
    fn test_display() {
        let diagnostic = located("boom", "/p/CMakeLists.txt", Some(3));
        assert_eq!(diagnostic.to_string(), "/p/CMakeLists.txt:3: error: boom");
        assert_eq!(Diagnostic::error("x").to_string(), "error: x");
    }
}
