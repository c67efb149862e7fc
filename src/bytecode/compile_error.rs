use thiserror::Error;

/// Reason a syntax-validation or generation step rejected an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxKind {
    /// Nothing to compile.
    Empty,
    /// A function name not followed by `(`.
    MissingCallParen,
    /// A call with an empty argument list, `f()`.
    EmptyCall,
    /// A name that is neither a function nor a known variable.
    UnknownName,
    /// Digits that do not form a finite number.
    BadNumber,
    /// A character that cannot start any token.
    InvalidCharacter,
    /// `)` with no open `(`.
    UnmatchedClose,
    /// End of input with `(` still open.
    Unclosed,
    /// Last character is neither alphanumeric nor `)`.
    BadTerminator,
    /// A `,` outside a function argument list.
    MisplacedComma,
    /// `=` where no assignment is allowed, or with a malformed target.
    BadAssignment,
}

impl SyntaxKind {
    pub fn description(self) -> &'static str {
        match self {
            SyntaxKind::Empty => "empty expression",
            SyntaxKind::MissingCallParen => "function name must be followed by '('",
            SyntaxKind::EmptyCall => "empty argument list",
            SyntaxKind::UnknownName => "unknown name",
            SyntaxKind::BadNumber => "malformed number",
            SyntaxKind::InvalidCharacter => "invalid character",
            SyntaxKind::UnmatchedClose => "')' without matching '('",
            SyntaxKind::Unclosed => "unclosed '('",
            SyntaxKind::BadTerminator => "expression must end with a name, number or ')'",
            SyntaxKind::MisplacedComma => "',' outside a function call",
            SyntaxKind::BadAssignment => "invalid assignment",
        }
    }
}

impl std::fmt::Display for SyntaxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// Rejected by syntax validation (or the equivalent check during generation).
    #[error("syntax error at offset {offset} in `{expr}`: {kind}")]
    Syntax {
        expr: String,
        offset: usize,
        kind: SyntaxKind,
    },

    /// Generation met something it cannot compile at this position.
    #[error("unexpected token at offset {offset} in `{expr}`")]
    UnknownToken { expr: String, offset: usize },

    /// A call whose argument list leaves the wrong number of values.
    #[error("function '{function}' takes {expected} argument(s), got {actual} (offset {offset} in `{expr}`)")]
    ArityMismatch {
        expr: String,
        offset: usize,
        function: String,
        expected: usize,
        actual: usize,
    },

    /// Nesting deeper than the configured evaluation stack.
    #[error("`{expr}` needs a stack depth of {depth}, limit is {limit}")]
    StackLimit {
        expr: String,
        depth: usize,
        limit: usize,
    },

    /// Groups, calls or exponents nested past the compiler's limit.
    #[error("nesting deeper than {limit} levels at offset {offset} in `{expr}`")]
    NestingLimit {
        expr: String,
        offset: usize,
        limit: usize,
    },

    /// A variable name no expression could refer to.
    #[error("'{name}' is not a valid variable name")]
    InvalidName { name: String },
}

impl CompileError {
    pub fn syntax(expr: &str, offset: usize, kind: SyntaxKind) -> Self {
        CompileError::Syntax {
            expr: expr.to_string(),
            offset,
            kind,
        }
    }

    pub fn unknown_token(expr: &str, offset: usize) -> Self {
        CompileError::UnknownToken {
            expr: expr.to_string(),
            offset,
        }
    }

    /// The expression that failed to compile.
    pub fn expr(&self) -> &str {
        match self {
            CompileError::Syntax { expr, .. }
            | CompileError::UnknownToken { expr, .. }
            | CompileError::ArityMismatch { expr, .. }
            | CompileError::StackLimit { expr, .. }
            | CompileError::NestingLimit { expr, .. } => expr,
            CompileError::InvalidName { name } => name,
        }
    }

    /// Character offset into [`CompileError::expr`] of the failing token.
    pub fn offset(&self) -> Option<usize> {
        match self {
            CompileError::Syntax { offset, .. }
            | CompileError::UnknownToken { offset, .. }
            | CompileError::ArityMismatch { offset, .. }
            | CompileError::NestingLimit { offset, .. } => Some(*offset),
            CompileError::StackLimit { .. } | CompileError::InvalidName { .. } => None,
        }
    }

    pub fn hint(&self) -> Option<&'static str> {
        match self {
            CompileError::Syntax { kind, .. } => match kind {
                SyntaxKind::UnknownName => {
                    Some("variables must be defined before a formula that uses them is compiled")
                }
                SyntaxKind::MissingCallParen => Some("call functions as name(arg, ...)"),
                SyntaxKind::BadTerminator => Some("the expression ends with a dangling operator"),
                _ => None,
            },
            CompileError::ArityMismatch { .. } => {
                Some("check the argument count; arguments are separated by ','")
            }
            CompileError::StackLimit { .. } | CompileError::NestingLimit { .. } => {
                Some("split the expression into helper variables")
            }
            CompileError::InvalidName { .. } => {
                Some("names start with a letter or '_' followed by letters, digits or '_'")
            }
            CompileError::UnknownToken { .. } => None,
        }
    }

    /// Two-line rendering: the expression, then a caret under the failing
    /// character.
    pub fn pointer(&self) -> String {
        let expr = self.expr();
        match self.offset() {
            Some(offset) => format!("{}\n{}^", expr, " ".repeat(offset)),
            None => expr.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_display() {
        let err = CompileError::syntax("a+*b", 2, SyntaxKind::UnknownName);

        let msg = err.to_string();
        assert!(msg.contains("offset 2"));
        assert!(msg.contains("a+*b"));
        assert!(msg.contains("unknown name"));
    }

    #[test]
    fn test_arity_display() {
        let err = CompileError::ArityMismatch {
            expr: "atan2(1)".to_string(),
            offset: 0,
            function: "atan2".to_string(),
            expected: 2,
            actual: 1,
        };

        let msg = err.to_string();
        assert!(msg.contains("atan2"));
        assert!(msg.contains("takes 2"));
        assert!(msg.contains("got 1"));
        assert!(err.hint().is_some());
    }

    #[test]
    fn test_pointer_marks_offset() {
        let err = CompileError::unknown_token("1 + )", 4);
        assert_eq!(err.pointer(), "1 + )\n    ^");
    }

    #[test]
    fn test_stack_limit_has_no_offset() {
        let err = CompileError::StackLimit {
            expr: "x".to_string(),
            depth: 3,
            limit: 2,
        };
        assert_eq!(err.offset(), None);
        assert_eq!(err.pointer(), "x");
        assert!(err.to_string().contains("limit is 2"));
    }

    #[test]
    fn test_nesting_limit_points_at_group() {
        let err = CompileError::NestingLimit {
            expr: "1+((2))".to_string(),
            offset: 3,
            limit: 1,
        };
        assert_eq!(err.pointer(), "1+((2))\n   ^");
        assert!(err.hint().is_some());
    }

    #[test]
    fn test_invalid_name_renders_name() {
        let err = CompileError::InvalidName {
            name: "b c".to_string(),
        };
        assert_eq!(err.to_string(), "'b c' is not a valid variable name");
        assert_eq!(err.expr(), "b c");
        assert_eq!(err.offset(), None);
    }

    #[test]
    fn test_error_implements_std_error() {
        let err = CompileError::syntax("", 0, SyntaxKind::Empty);
        let _: &dyn std::error::Error = &err;
    }

    #[test]
    fn test_error_clone() {
        let err1 = CompileError::syntax("f(", 2, SyntaxKind::Unclosed);
        let err2 = err1.clone();

        assert_eq!(err1, err2);
        assert_eq!(err1.to_string(), err2.to_string());
    }
}
