//! Architectural Enforcement
//!
//! Source scanners behind the workspace's architectural tests:
//! - No sleep calls in production code. Deferred protocol work goes through
//!   the engine's deadline queue and the daemon waits on `sleep_until` of
//!   that deadline, so a bare sleep is always a timing bug.
//! - The protocol engine stays runtime-free. `voicelink-core` is driven one
//!   event at a time by its host and must not grow async functions or spawn
//!   tasks of its own.
//!
//! Scanners work on plain text. Comments are stripped per line, and
//! everything after the first `#[cfg(test)]` counts as test code.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

// =============================================================================
// Violations
// =============================================================================

/// One offending source line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// File the line came from
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What rule the line breaks
    pub rule: &'static str,
    /// The trimmed source line
    pub source: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.rule,
            self.source
        )
    }
}

// =============================================================================
// Policies
// =============================================================================

/// Where sleep calls are tolerated
#[derive(Clone, Copy, Debug, Default)]
pub struct SleepPolicy {
    /// Exponential backoff in retry or reconnect logic
    pub allow_backoff: bool,
    /// Code in `#[cfg(test)]` modules
    pub allow_tests: bool,
}

/// A source rule applied line by line
#[derive(Clone, Copy, Debug)]
pub enum Rule {
    /// Forbid `::sleep(` and `.sleep(`
    NoSleep(SleepPolicy),
    /// Forbid `async fn`, `.await` and task spawning
    Synchronous,
}

impl Rule {
    fn name(self) -> &'static str {
        match self {
            Self::NoSleep(_) => "sleep call",
            Self::Synchronous => "async code in synchronous crate",
        }
    }
}

// =============================================================================
// Scanning
// =============================================================================

/// Scan every `.rs` file below `dir`
///
/// A missing directory yields no violations.
#[must_use]
pub fn scan_directory(dir: &Path, rule: Rule) -> Vec<Violation> {
    if !dir.exists() {
        return Vec::new();
    }

    let mut violations = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("rs") {
            continue;
        }
        let Ok(content) = fs::read_to_string(path) else {
            continue;
        };
        violations.extend(scan_source(path, &content, rule));
    }
    violations
}

/// Scan one file's content
#[must_use]
pub fn scan_source(path: &Path, content: &str, rule: Rule) -> Vec<Violation> {
    let lines: Vec<&str> = content.lines().collect();
    let tests_start = test_module_start(&lines);
    let mut violations = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let in_tests = tests_start.is_some_and(|start| idx > start);
        let code = code_part(line);

        let offending = match rule {
            Rule::NoSleep(policy) => {
                is_sleep_call(code)
                    && !(policy.allow_tests && in_tests)
                    && !(policy.allow_backoff && is_backoff_context(&lines, idx))
                    && !is_interval_pattern(&lines, idx)
            }
            Rule::Synchronous => !in_tests && is_async_code(code),
        };

        if offending {
            violations.push(Violation {
                path: path.to_path_buf(),
                line: idx + 1,
                rule: rule.name(),
                source: line.trim().to_string(),
            });
        }
    }
    violations
}

/// Strip a trailing line comment
fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Index of the first `#[cfg(test)]` line
fn test_module_start(lines: &[&str]) -> Option<usize> {
    lines
        .iter()
        .position(|line| line.trim_start().starts_with("#[cfg(test)]"))
}

fn is_sleep_call(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(")
}

fn is_async_code(code: &str) -> bool {
    code.contains("async fn")
        || code.contains(".await")
        || code.contains("tokio::spawn")
        || code.contains("async move")
}

/// Sleep used for exponential backoff in retry logic
fn is_backoff_context(lines: &[&str], current_idx: usize) -> bool {
    let context = &lines[current_idx.saturating_sub(15)..(current_idx + 5).min(lines.len())];

    let mut has_backoff_calc = false;
    let mut has_retry_context = false;

    for line in context {
        let line = line.to_lowercase();
        if line.contains("<<") || line.contains("pow") || line.contains("* 2") {
            has_backoff_calc = true;
        }
        if line.contains("retry")
            || line.contains("reconnect")
            || line.contains("backoff")
            || line.contains("attempt")
        {
            has_retry_context = true;
        }
    }

    has_backoff_calc && has_retry_context
}

/// Sleep driven by a `tokio::time::interval`
fn is_interval_pattern(lines: &[&str], current_idx: usize) -> bool {
    let before = &lines[current_idx.saturating_sub(20)..current_idx];
    if before
        .iter()
        .any(|line| line.contains("interval.tick()") || line.contains("tokio::time::interval"))
    {
        return true;
    }

    lines[current_idx..(current_idx + 5).min(lines.len())]
        .iter()
        .any(|line| line.contains("interval.tick()"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(code: &[&str], rule: Rule) -> Vec<Violation> {
        scan_source(Path::new("src/sample.rs"), &code.join("\n"), rule)
    }

    const STRICT: Rule = Rule::NoSleep(SleepPolicy {
        allow_backoff: false,
        allow_tests: false,
    });

    #[test]
    fn test_sleep_violation_detection() {
        let code = [
            "fn wait_for_drain() {",
            "    std::thread::sleep(Duration::from_millis(300));",
            "}",
        ];

        let violations = scan(&code, STRICT);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 2);
    }

    #[test]
    fn test_deadline_wait_is_not_a_sleep() {
        let code = [
            "async fn deferred_due(deadline: Instant) {",
            "    time::sleep_until(deadline).await;",
            "}",
        ];

        assert!(scan(&code, STRICT).is_empty());
    }

    #[test]
    fn test_commented_sleep_is_ignored() {
        let code = ["    // tokio::time::sleep(d).await would drop frames"];
        assert!(scan(&code, STRICT).is_empty());
    }

    #[test]
    fn test_backoff_detection() {
        let code = [
            "fn reconnect() {",
            "    let delay = base_delay * (1 << attempt);",
            "    tokio::time::sleep(Duration::from_millis(delay)).await;",
            "}",
        ];

        assert!(is_backoff_context(&code, 2));
        let policy = Rule::NoSleep(SleepPolicy {
            allow_backoff: true,
            allow_tests: false,
        });
        assert!(scan(&code, policy).is_empty());
        assert_eq!(scan(&code, STRICT).len(), 1);
    }

    #[test]
    fn test_sleep_in_test_module() {
        let code = [
            "fn handler() {}",
            "#[cfg(test)]",
            "mod tests {",
            "    fn slow() { std::thread::sleep(d); }",
            "}",
        ];

        let lenient = Rule::NoSleep(SleepPolicy {
            allow_backoff: false,
            allow_tests: true,
        });
        assert!(scan(&code, lenient).is_empty());
        assert_eq!(scan(&code, STRICT).len(), 1);
    }

    #[test]
    fn test_async_detection() {
        let code = [
            "pub fn handle_event(&mut self) {}",
            "pub async fn run(&mut self) {",
            "    self.link.send(msg).await;",
            "}",
            "#[cfg(test)]",
            "mod tests {",
            "    async fn helper() {}",
            "}",
        ];

        let violations = scan(&code, Rule::Synchronous);
        let lines: Vec<usize> = violations.iter().map(|v| v.line).collect();
        assert_eq!(lines, vec![2, 3]);
    }

    #[test]
    fn test_violation_display() {
        let violation = Violation {
            path: PathBuf::from("src/engine.rs"),
            line: 7,
            rule: "sleep call",
            source: "std::thread::sleep(d);".to_string(),
        };
        assert_eq!(
            violation.to_string(),
            "src/engine.rs:7 - sleep call: std::thread::sleep(d);"
        );
    }

    #[test]
    fn test_missing_directory_is_clean() {
        assert!(scan_directory(Path::new("does/not/exist"), STRICT).is_empty());
    }
}
