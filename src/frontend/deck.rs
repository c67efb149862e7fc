use thiserror::Error;
use tracing::debug;

use crate::frontend::scanner::is_identifier;
use crate::lang::Value;
use crate::runtime::EngineError;
use crate::store::VariableStore;

/// Variable deck: one statement per line.
///
/// ```text
/// # comment
/// radius = 2.5                 live formula
/// let area = 3.14 * radius^2   evaluated once, stored as a literal
/// print area / 2
/// ```
///
/// Every `name = expr` and `let` target is declared before any line is
/// compiled, so a formula may refer to a variable defined further down. A
/// `#` starts a comment anywhere on a line.
#[derive(Debug, Error)]
pub enum DeckError {
    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("line {line}: {source}")]
    Engine {
        line: usize,
        #[source]
        source: EngineError,
    },
}

impl DeckError {
    /// 1-based line number.
    pub fn line(&self) -> usize {
        match self {
            DeckError::Malformed { line, .. } | DeckError::Engine { line, .. } => *line,
        }
    }
}

/// Outcome of a deck load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeckReport {
    /// Statements executed.
    pub statements: usize,
    /// `print` results, in file order: expression text and value.
    pub printed: Vec<(String, Value)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Statement<'a> {
    Formula { name: &'a str, expr: &'a str },
    Let { name: &'a str, expr: &'a str },
    Print { expr: &'a str },
}

/// Loads a deck into `store`, stopping at the first failing line.
pub fn load_deck(source: &str, store: &mut VariableStore) -> Result<DeckReport, DeckError> {
    let mut statements = Vec::new();
    for (i, raw) in source.lines().enumerate() {
        if let Some(statement) = parse_line(raw, i + 1)? {
            statements.push((i + 1, statement));
        }
    }

    for &(line, statement) in &statements {
        if let Statement::Formula { name, .. } | Statement::Let { name, .. } = statement {
            store.declare(name).map_err(|err| DeckError::Engine {
                line,
                source: err.into(),
            })?;
        }
    }

    let mut report = DeckReport::default();
    for (line, statement) in statements {
        let engine = |source: EngineError| DeckError::Engine { line, source };

        match statement {
            Statement::Formula { name, expr } => {
                store
                    .add_formula(name, expr)
                    .map_err(|err| engine(err.into()))?;
            }
            Statement::Let { name, expr } => {
                let value = store.evaluate(expr).map_err(engine)?;
                store
                    .add_literal(name, value)
                    .map_err(|err| engine(err.into()))?;
                debug!(line, name, %value, "deck let");
            }
            Statement::Print { expr } => {
                let value = store.evaluate(expr).map_err(engine)?;
                report.printed.push((expr.to_string(), value));
            }
        }
        report.statements += 1;
    }

    debug!(
        statements = report.statements,
        variables = store.len(),
        "deck loaded"
    );
    Ok(report)
}

fn parse_line(raw: &str, line: usize) -> Result<Option<Statement<'_>>, DeckError> {
    let text = raw.split('#').next().unwrap_or_default().trim();
    if text.is_empty() {
        return Ok(None);
    }

    let malformed = |message: String| DeckError::Malformed { line, message };

    if let Some(expr) = keyword(text, "print") {
        if expr.is_empty() {
            return Err(malformed("print needs an expression".to_string()));
        }
        return Ok(Some(Statement::Print { expr }));
    }

    let (is_let, body) = match keyword(text, "let") {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    let Some((lhs, rhs)) = body.split_once('=') else {
        return Err(malformed(format!("expected 'name = expression', found '{}'", text)));
    };
    let name = lhs.trim();
    let expr = rhs.trim();

    if !is_identifier(name) {
        return Err(malformed(format!("'{}' is not a valid variable name", name)));
    }
    if expr.is_empty() {
        return Err(malformed(format!("'{}' has no expression", name)));
    }

    Ok(Some(if is_let {
        Statement::Let { name, expr }
    } else {
        Statement::Formula { name, expr }
    }))
}

/// `text` minus a leading keyword that is followed by whitespace.
fn keyword<'a>(text: &'a str, word: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(word)?;
    rest.starts_with(char::is_whitespace).then(|| rest.trim_start())
}
