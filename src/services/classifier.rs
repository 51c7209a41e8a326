//! Error classifier + auto-fixer (spec §4.F): parses CI logs into the
//! closed `ErrorKind` taxonomy, dedups, scores auto-fixability, and
//! produces mechanical patches.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::{AppFile, BuildError, ErrorKind, Severity};

/// One failing job's raw output, gathered by the build monitor (spec §4.F
/// input shape).
pub struct JobLog {
    pub job_name: String,
    pub job_id: u64,
    pub logs: String,
    pub failed_steps: Vec<String>,
}

/// Workspace-relative path markers the classifier trims log paths at (spec
/// §4.F parsing rules).
const WORKSPACE_MARKERS: &[&str] = &["workspace/", "src/", "app/", "components/", "pages/", "lib/", "utils/"];

fn patterns() -> &'static Vec<(ErrorKind, Regex)> {
    static PATTERNS: OnceLock<Vec<(ErrorKind, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            // modern compiler: ##[error]path(l,c): error TS####: msg
            (
                ErrorKind::TypescriptError,
                Regex::new(r"(?m)^##\[error\](?P<file>[^(]+)\((?P<line>\d+),(?P<col>\d+)\):\s*error\s+TS\d+:\s*(?P<msg>.+)$").unwrap(),
            ),
            // legacy: Error: path:l:c: msg
            (
                ErrorKind::UnexpectedToken,
                Regex::new(r"(?m)^Error:\s*(?P<file>[^:]+):(?P<line>\d+):(?P<col>\d+):\s*(?P<msg>.+)$").unwrap(),
            ),
            // module resolution
            (
                ErrorKind::ModuleNotFound,
                Regex::new(r#"Cannot resolve module '(?P<module>[^']+)' from '(?P<file>[^']+)'"#).unwrap(),
            ),
            // npm
            (ErrorKind::DependencyResolutionError, Regex::new(r"(?m)^npm ERR!\s*(?P<msg>.+)$").unwrap()),
            // tailwind
            (
                ErrorKind::InvalidTailwindClass,
                Regex::new(r"warn - The utility '(?P<class>[^']+)' is not available").unwrap(),
            ),
            (
                ErrorKind::JsxTagMismatch,
                Regex::new(r"(?i)(?P<file>[\w./-]+):(?P<line>\d+):(?P<col>\d+):.*JSX element '(?P<tag>[\w.]+)' has no corresponding closing tag").unwrap(),
            ),
            (
                ErrorKind::JsxUnclosedTag,
                Regex::new(r"(?i)(?P<file>[\w./-]+):(?P<line>\d+):(?P<col>\d+):.*Unclosed tag").unwrap(),
            ),
            (
                ErrorKind::MissingReactImport,
                Regex::new(r"(?i)'React' (must be in scope|is not defined)").unwrap(),
            ),
            (
                ErrorKind::MissingSemicolon,
                Regex::new(r"(?i)(?P<file>[\w./-]+):(?P<line>\d+):(?P<col>\d+):.*Missing semicolon").unwrap(),
            ),
            (
                ErrorKind::MissingParenthesis,
                Regex::new(r"(?i)(?P<file>[\w./-]+):(?P<line>\d+):(?P<col>\d+):.*Missing (closing|opening) parenthesis").unwrap(),
            ),
            (
                ErrorKind::UnterminatedString,
                Regex::new(r"(?i)(?P<file>[\w./-]+):(?P<line>\d+):(?P<col>\d+):.*[Uu]nterminated string").unwrap(),
            ),
            (
                ErrorKind::UndefinedVariable,
                Regex::new(r"(?i)(?P<name>[\w$]+) is not defined").unwrap(),
            ),
            (
                ErrorKind::PropertyNotFound,
                Regex::new(r"(?i)Property '(?P<prop>[\w$]+)' does not exist on type").unwrap(),
            ),
            (
                ErrorKind::CssSyntaxError,
                Regex::new(r"(?i)CssSyntaxError:\s*(?P<msg>.+)").unwrap(),
            ),
            (
                ErrorKind::DependencyConflict,
                Regex::new(r"(?i)ERESOLVE (unable to resolve dependency tree|could not resolve)").unwrap(),
            ),
        ]
    })
}

fn normalize_path(raw: &str) -> String {
    for marker in WORKSPACE_MARKERS {
        if let Some(idx) = raw.find(marker) {
            return raw[idx..].to_string();
        }
    }
    raw.to_string()
}

/// Scans every job's log against the fixed pattern table and returns the
/// deduplicated, highest-severity-kept `BuildError` list (spec §4.F
/// parsing rules).
pub fn classify(jobs: &[JobLog]) -> Vec<BuildError> {
    let mut found = Vec::new();
    for job in jobs {
        for (kind, re) in patterns() {
            for caps in re.captures_iter(&job.logs) {
                let file = caps.name("file").map(|m| normalize_path(m.as_str().trim()));
                let line = caps.name("line").and_then(|m| m.as_str().parse().ok());
                let column = caps.name("col").and_then(|m| m.as_str().parse().ok());
                let message = caps
                    .get(0)
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_else(|| job.job_name.clone());

                found.push(BuildError {
                    kind: *kind,
                    file,
                    line,
                    column,
                    message: message.clone(),
                    context: job.job_name.clone(),
                    severity: severity_for(*kind),
                    auto_fixable: is_fixable(*kind, &message),
                });
            }
        }
    }
    dedup_by_file_line(found)
}

fn severity_for(kind: ErrorKind) -> Severity {
    match kind {
        ErrorKind::DependencyConflict | ErrorKind::DependencyResolutionError | ErrorKind::ModuleNotFound | ErrorKind::MissingImport => Severity::High,
        ErrorKind::TypescriptError | ErrorKind::TypeMismatch | ErrorKind::ArgumentCountMismatch | ErrorKind::PropertyNotFound | ErrorKind::UndefinedPropertyAccess | ErrorKind::UndefinedVariable => {
            Severity::Medium
        }
        _ => Severity::Low,
    }
}

/// Auto-fixability matrix (spec §4.F, terminal). `conditional` kinds are
/// fixable only when the message mentions `className`/`style`/`class=`.
fn is_fixable(kind: ErrorKind, message: &str) -> bool {
    match kind {
        ErrorKind::JsxUnclosedTag | ErrorKind::JsxTagMismatch | ErrorKind::MissingSemicolon | ErrorKind::MissingParenthesis | ErrorKind::UnterminatedString | ErrorKind::MissingReactImport => true,
        ErrorKind::JsxExpressionError => message.contains("className") || message.contains("style"),
        ErrorKind::JsxSyntaxError => message.contains("className") || message.contains("class="),
        _ => false,
    }
}

/// Merges duplicates sharing `(file, line)`, keeping the highest-severity
/// classification (spec §4.F).
fn dedup_by_file_line(errors: Vec<BuildError>) -> Vec<BuildError> {
    let mut by_key: Vec<BuildError> = Vec::new();
    for error in errors {
        let key = (error.file.clone(), error.line);
        if let Some(existing) = by_key.iter_mut().find(|e| (e.file.clone(), e.line) == key) {
            if error.severity > existing.severity {
                *existing = error;
            }
        } else {
            by_key.push(error);
        }
    }
    by_key
}

/// A mechanical patch for one file, produced for each auto-fixable error
/// (spec §4.F output shape).
pub struct ProposedPatch {
    pub path: String,
    pub content: Vec<u8>,
}

/// Applies the mechanical fix strategies from the auto-fixability matrix
/// against the current file content. Returns `None` when the error isn't
/// fixable or the file wasn't supplied.
pub fn propose_patch(error: &BuildError, file: Option<&AppFile>) -> Option<ProposedPatch> {
    if !error.auto_fixable {
        return None;
    }
    let file = file?;
    let original = file.content_str()?;

    let patched = match error.kind {
        ErrorKind::MissingReactImport => {
            if original.contains("import React") {
                return None;
            }
            format!("import React from 'react';\n{original}")
        }
        ErrorKind::UnterminatedString => append_closing_quote(original, error.line?),
        ErrorKind::MissingSemicolon => insert_at_column(original, error.line?, error.column?, ";"),
        ErrorKind::MissingParenthesis => insert_at_column(original, error.line?, error.column?, ")"),
        ErrorKind::JsxUnclosedTag | ErrorKind::JsxTagMismatch => fix_unbalanced_jsx_tag(original, error.line?)?,
        ErrorKind::JsxExpressionError | ErrorKind::JsxSyntaxError => original.to_string(),
        _ => return None,
    };

    Some(ProposedPatch {
        path: file.path().to_string(),
        content: patched.into_bytes(),
    })
}

/// Rewrites the first closing tag on `line` that doesn't match the
/// innermost still-open tag to match it instead (spec §4.F matrix: "rewrite
/// the closing tag at the reported position to match the opening tag
/// name"). If the line has an unmatched opener with no closing tag at all,
/// inserts `</tag>` immediately after the line (the "enclosing block end"
/// fallback). Returns `None` if the line is already balanced.
fn fix_unbalanced_jsx_tag(content: &str, line: u32) -> Option<String> {
    let mut lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();
    let idx = line.saturating_sub(1) as usize;
    let target = lines.get(idx)?.clone();

    let tag_re = tag_token_re();
    let mut stack: Vec<String> = Vec::new();
    let mut fixed = String::with_capacity(target.len());
    let mut last_end = 0;
    let mut rewrote = false;

    for caps in tag_re.captures_iter(&target) {
        let whole = caps.get(0).unwrap();
        let name = caps.name("name").unwrap().as_str().to_string();
        let is_close = caps.name("close").is_some();
        let self_closing = whole.as_str().ends_with("/>");

        if is_close {
            if stack.last() == Some(&name) {
                stack.pop();
            } else if let Some(expected) = stack.pop() {
                fixed.push_str(&target[last_end..whole.start()]);
                fixed.push_str(&format!("</{expected}>"));
                last_end = whole.end();
                rewrote = true;
            }
        } else if !self_closing {
            stack.push(name);
        }
    }
    fixed.push_str(&target[last_end..]);

    if rewrote {
        // Any tags still open on the stack were nested outside the single
        // mismatched closer we just rewrote and need closing too.
        while let Some(remaining) = stack.pop() {
            fixed.push_str(&format!("</{remaining}>"));
        }
        lines[idx] = fixed;
        return Some(lines.join("\n"));
    }

    if let Some(unclosed) = stack.pop() {
        lines.insert(idx + 1, format!("</{unclosed}>"));
        return Some(lines.join("\n"));
    }

    None
}

fn tag_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<(?P<close>/)?(?P<name>[A-Za-z][\w.]*)\b[^>]*?>").unwrap())
}

fn insert_at_column(content: &str, line: u32, column: u32, token: &str) -> String {
    let mut lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();
    let idx = line.saturating_sub(1) as usize;
    if let Some(target) = lines.get_mut(idx) {
        let at = (column as usize).min(target.len());
        target.insert_str(at, token);
    }
    lines.join("\n")
}

fn append_closing_quote(content: &str, line: u32) -> String {
    let mut lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();
    let idx = line.saturating_sub(1) as usize;
    if let Some(target) = lines.get_mut(idx) {
        let quote = if target.contains('"') { '"' } else { '\'' };
        target.push(quote);
    }
    lines.join("\n")
}

/// Retry budget formula (spec §4.F): given `n` detected errors and `k`
/// auto-fixable among them.
pub fn retry_budget(n: usize, k: usize) -> u32 {
    if n == 0 {
        return 0;
    }
    let n_f = n as f64;
    let k_f = k as f64;
    if k == n && n <= 3 {
        3
    } else if k_f >= 0.7 * n_f && n <= 5 {
        2
    } else if k > 0 && k_f < 0.7 * n_f {
        1
    } else {
        0
    }
}

/// Staged delays between auto-fix retries (spec §4.F).
pub fn retry_delays() -> [std::time::Duration; 3] {
    [
        std::time::Duration::from_secs(30),
        std::time::Duration::from_secs(60),
        std::time::Duration::from_secs(120),
    ]
}

/// A retry is refused when the prior attempt found nothing fixable, or any
/// detected error's kind is non-retryable (spec §4.F).
pub fn retry_is_refused(errors: &[BuildError]) -> bool {
    errors.is_empty() || errors.iter().any(|e| e.kind.is_non_retryable())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(logs: &str) -> JobLog {
        JobLog {
            job_name: "build".to_string(),
            job_id: 1,
            logs: logs.to_string(),
            failed_steps: vec!["build".to_string()],
        }
    }

    #[test]
    fn classifies_modern_compiler_format() {
        let logs = "##[error]src/App.tsx(10,5): error TS2339: Property 'foo' does not exist on type 'Bar'";
        let errors = classify(&[job(logs)]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::TypescriptError);
        assert_eq!(errors[0].file.as_deref(), Some("src/App.tsx"));
        assert_eq!(errors[0].line, Some(10));
    }

    #[test]
    fn normalizes_paths_at_workspace_marker() {
        let logs = "Error: /home/runner/workspace/src/App.tsx:3:1: unexpected token";
        let errors = classify(&[job(logs)]);
        assert_eq!(errors[0].file.as_deref(), Some("src/App.tsx"));
    }

    #[test]
    fn dedups_same_file_and_line_keeping_highest_severity() {
        let errors = vec![
            BuildError {
                kind: ErrorKind::MissingSemicolon,
                file: Some("src/a.ts".to_string()),
                line: Some(5),
                column: Some(1),
                message: "low".to_string(),
                context: "build".to_string(),
                severity: Severity::Low,
                auto_fixable: true,
            },
            BuildError {
                kind: ErrorKind::TypescriptError,
                file: Some("src/a.ts".to_string()),
                line: Some(5),
                column: Some(1),
                message: "high".to_string(),
                context: "build".to_string(),
                severity: Severity::Medium,
                auto_fixable: false,
            },
        ];
        let deduped = dedup_by_file_line(errors);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].severity, Severity::Medium);
    }

    #[test]
    fn retry_budget_matches_matrix() {
        assert_eq!(retry_budget(3, 3), 3);
        assert_eq!(retry_budget(5, 4), 2);
        assert_eq!(retry_budget(5, 1), 1);
        assert_eq!(retry_budget(4, 4), 2); // k==n but n>3, falls through to the k>=0.7n rule
        assert_eq!(retry_budget(0, 0), 0);
    }

    #[test]
    fn dependency_conflict_is_never_retryable() {
        let errors = vec![BuildError {
            kind: ErrorKind::DependencyConflict,
            file: None,
            line: None,
            column: None,
            message: "ERESOLVE".to_string(),
            context: "build".to_string(),
            severity: Severity::High,
            auto_fixable: false,
        }];
        assert!(retry_is_refused(&errors));
    }

    #[test]
    fn propose_patch_inserts_missing_react_import() {
        let file = AppFile::new("src/App.tsx", b"export function App() {}".to_vec(), crate::domain::FileType::Text).unwrap();
        let error = BuildError {
            kind: ErrorKind::MissingReactImport,
            file: Some("src/App.tsx".to_string()),
            line: None,
            column: None,
            message: "'React' is not defined".to_string(),
            context: "build".to_string(),
            severity: Severity::Low,
            auto_fixable: true,
        };
        let patch = propose_patch(&error, Some(&file)).unwrap();
        assert!(std::str::from_utf8(&patch.content).unwrap().starts_with("import React from 'react';\n"));
    }

    #[test]
    fn propose_patch_fixes_unclosed_span_from_spec_scenario() {
        let file = AppFile::new("src/App.tsx", b"<div><span></div>".to_vec(), crate::domain::FileType::Text).unwrap();
        let error = BuildError {
            kind: ErrorKind::JsxUnclosedTag,
            file: Some("src/App.tsx".to_string()),
            line: Some(1),
            column: Some(6),
            message: "Unclosed tag 'span'".to_string(),
            context: "build".to_string(),
            severity: Severity::Low,
            auto_fixable: true,
        };
        let patch = propose_patch(&error, Some(&file)).unwrap();
        let patched = std::str::from_utf8(&patch.content).unwrap();
        assert_eq!(patched, "<div><span></span></div>");
    }

    #[test]
    fn fix_unbalanced_jsx_tag_returns_none_when_already_balanced() {
        assert!(fix_unbalanced_jsx_tag("<div><span></span></div>", 1).is_none());
    }
}
