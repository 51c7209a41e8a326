/// Closed taxonomy of CI failure classes the classifier can recognize.
/// Never extend this ad hoc from parsed text — every variant
/// that can appear must be named here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    JsxTagMismatch,
    JsxUnclosedTag,
    JsxExpressionError,
    JsxSyntaxError,
    MissingReactImport,
    PropertyNotFound,
    UndefinedVariable,
    TypeMismatch,
    ArgumentCountMismatch,
    TypescriptError,
    MissingSemicolon,
    MissingParenthesis,
    UnterminatedString,
    UnexpectedToken,
    InvalidExpression,
    InvalidStatement,
    ModuleNotFound,
    MissingImport,
    CssSyntaxError,
    InvalidTailwindClass,
    DependencyResolutionError,
    DependencyConflict,
    UndefinedPropertyAccess,
}

impl ErrorKind {
    /// `dependency_conflict` and `dependency_resolution_error` are
    /// explicitly non-retryable.
    pub fn is_non_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::DependencyConflict | ErrorKind::DependencyResolutionError
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A single classified build failure. Transient — never
/// persisted; lives only for the duration of one monitor/classifier pass.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BuildError {
    pub kind: ErrorKind,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub message: String,
    pub context: String,
    pub severity: Severity,
    pub auto_fixable: bool,
}
