use crate::bytecode::compile_error::{CompileError, SyntaxKind};
use crate::frontend::scanner::{Scanner, is_ident_start, is_identifier};
use crate::lang::{FunctionRegistry, NameResolver};

/// Syntax-validation pass run before bytecode generation.
///
/// Scans the whitespace-stripped expression once, left to right, tracking
/// parenthesis depth. It classifies every name against the function registry
/// and the variable resolver, so a typo is reported at its own offset rather
/// than wherever generation happens to give up.
///
/// The pass does not check operator placement (`2++3`); generation reports
/// that as an unexpected token.
pub struct SyntaxChecker<'a> {
    source: &'a str,
    registry: &'a FunctionRegistry,
    resolver: &'a dyn NameResolver,
    allow_assignment: bool,
}

impl<'a> SyntaxChecker<'a> {
    pub fn new(
        source: &'a str,
        registry: &'a FunctionRegistry,
        resolver: &'a dyn NameResolver,
    ) -> Self {
        SyntaxChecker {
            source,
            registry,
            resolver,
            allow_assignment: false,
        }
    }

    /// Accept a leading `name =` assignment target.
    pub fn allow_assignment(mut self, allow: bool) -> Self {
        self.allow_assignment = allow;
        self
    }

    pub fn check(&self) -> Result<(), CompileError> {
        let mut scanner = Scanner::new(self.source);
        if scanner.is_empty() {
            return Err(self.error(&scanner, 0, SyntaxKind::Empty));
        }

        let mut body_start = 0;
        if let Some(eq) = scanner.find('=', 0) {
            if !self.allow_assignment {
                return Err(self.error(&scanner, eq, SyntaxKind::BadAssignment));
            }
            self.check_target(&mut scanner, eq)?;
            body_start = eq + 1;
            if body_start >= scanner.len() {
                return Err(self.error(&scanner, body_start, SyntaxKind::Empty));
            }
        }

        scanner.set_pos(body_start);
        self.check_body(&mut scanner)
    }

    /// The text before `=` must be exactly one known variable name.
    fn check_target(&self, scanner: &mut Scanner, eq: usize) -> Result<(), CompileError> {
        scanner.set_pos(0);
        let target = scanner.read_identifier().unwrap_or_default();
        if scanner.pos() != eq || !is_identifier(&target) {
            return Err(self.error(scanner, 0, SyntaxKind::BadAssignment));
        }
        if self.resolver.resolve_index(&target).is_none() {
            return Err(self.error(scanner, 0, SyntaxKind::UnknownName));
        }
        Ok(())
    }

    fn check_body(&self, scanner: &mut Scanner) -> Result<(), CompileError> {
        let mut depth: usize = 0;

        while let Some(ch) = scanner.current() {
            let pos = scanner.pos();
            match ch {
                '(' => {
                    if scanner.peek() == Some(')') {
                        return Err(self.error(scanner, pos + 1, SyntaxKind::EmptyCall));
                    }
                    depth += 1;
                    scanner.advance();
                }
                ')' => {
                    if depth == 0 {
                        return Err(self.error(scanner, pos, SyntaxKind::UnmatchedClose));
                    }
                    depth -= 1;
                    scanner.advance();
                }
                '+' | '-' | '*' | '/' | '%' | '^' | ',' => {
                    scanner.advance();
                }
                c if c.is_ascii_digit() || c == '.' => {
                    if scanner.read_number().is_none() {
                        return Err(self.error(scanner, pos, SyntaxKind::BadNumber));
                    }
                }
                c if is_ident_start(c) => {
                    let name = scanner.read_identifier().unwrap_or_default();
                    let called = scanner.current() == Some('(');
                    let is_function = self.registry.contains(&name);

                    if called && is_function {
                        continue;
                    }
                    if self.resolver.resolve_index(&name).is_some() {
                        continue;
                    }
                    if is_function {
                        let after = scanner.pos();
                        return Err(self.error(scanner, after, SyntaxKind::MissingCallParen));
                    }
                    return Err(self.error(scanner, pos, SyntaxKind::UnknownName));
                }
                '=' => return Err(self.error(scanner, pos, SyntaxKind::BadAssignment)),
                _ => return Err(self.error(scanner, pos, SyntaxKind::InvalidCharacter)),
            }
        }

        if depth > 0 {
            return Err(self.error(scanner, scanner.len(), SyntaxKind::Unclosed));
        }

        let last = scanner.len() - 1;
        let ends_well = scanner
            .char_at(last)
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == ')');
        if !ends_well {
            return Err(self.error(scanner, last, SyntaxKind::BadTerminator));
        }

        Ok(())
    }

    fn error(&self, scanner: &Scanner, pos: usize, kind: SyntaxKind) -> CompileError {
        CompileError::syntax(self.source, scanner.offset_at(pos), kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(expr: &str) -> Result<(), CompileError> {
        let registry = FunctionRegistry::with_builtins();
        let names = vec!["a", "b", "wall_1"];
        SyntaxChecker::new(expr, &registry, &names).check()
    }

    fn check_statement(expr: &str) -> Result<(), CompileError> {
        let registry = FunctionRegistry::with_builtins();
        let names = vec!["a", "b"];
        SyntaxChecker::new(expr, &registry, &names)
            .allow_assignment(true)
            .check()
    }

    fn assert_syntax(result: Result<(), CompileError>, offset: usize, kind: SyntaxKind) {
        match result {
            Err(CompileError::Syntax {
                offset: o, kind: k, ..
            }) => {
                assert_eq!(k, kind, "kind");
                assert_eq!(o, offset, "offset");
            }
            other => panic!("expected {:?} at {}, got {:?}", kind, offset, other),
        }
    }

    #[test]
    fn test_accepts_well_formed() {
        assert!(check("2+3*4").is_ok());
        assert!(check("-2.5e-3 * a").is_ok());
        assert!(check("atan2(a, b) + sqrt(wall_1)").is_ok());
        assert!(check("dot(vec3d(1,2,3), vec3d(a,b,1))").is_ok());
        assert!(check("((a))").is_ok());
    }

    #[test]
    fn test_empty() {
        assert_syntax(check(""), 0, SyntaxKind::Empty);
        assert_syntax(check("   "), 3, SyntaxKind::Empty);
    }

    #[test]
    fn test_function_without_paren() {
        // detected right after the name
        assert_syntax(check("sqrt+1"), 4, SyntaxKind::MissingCallParen);
        assert_syntax(check("1 + sin"), 7, SyntaxKind::MissingCallParen);
    }

    #[test]
    fn test_empty_call() {
        assert_syntax(check("sin()"), 4, SyntaxKind::EmptyCall);
    }

    #[test]
    fn test_unknown_name() {
        assert_syntax(check("a + nope * 2"), 4, SyntaxKind::UnknownName);
    }

    #[test]
    fn test_bad_number() {
        assert_syntax(check("1 + ."), 4, SyntaxKind::BadNumber);
    }

    #[test]
    fn test_invalid_character() {
        assert_syntax(check("a $ b"), 2, SyntaxKind::InvalidCharacter);
    }

    #[test]
    fn test_unmatched_close() {
        assert_syntax(check("(a))"), 3, SyntaxKind::UnmatchedClose);
        assert_syntax(check(")"), 0, SyntaxKind::UnmatchedClose);
    }

    #[test]
    fn test_unclosed() {
        assert_syntax(check("sin(a"), 5, SyntaxKind::Unclosed);
        assert_syntax(check("((1)"), 4, SyntaxKind::Unclosed);
    }

    #[test]
    fn test_bad_terminator() {
        assert_syntax(check("a +"), 2, SyntaxKind::BadTerminator);
        assert_syntax(check("3."), 1, SyntaxKind::BadTerminator);
    }

    #[test]
    fn test_assignment_rejected_in_expression() {
        assert_syntax(check("a = 2"), 2, SyntaxKind::BadAssignment);
    }

    #[test]
    fn test_statement() {
        assert!(check_statement("a = b * 2").is_ok());
        assert_syntax(check_statement("zz = 1"), 0, SyntaxKind::UnknownName);
        assert_syntax(check_statement("a+b = 1"), 0, SyntaxKind::BadAssignment);
        assert_syntax(check_statement("a = "), 4, SyntaxKind::Empty);
        assert_syntax(check_statement("a = b = 1"), 6, SyntaxKind::BadAssignment);
    }

    #[test]
    fn test_variable_shadowing_function_name() {
        let registry = FunctionRegistry::with_builtins();
        let names = vec!["min"];
        // `min` without '(' is the variable, with '(' the function
        assert!(SyntaxChecker::new("min * 2", &registry, &names).check().is_ok());
        assert!(
            SyntaxChecker::new("min(min, 2)", &registry, &names)
                .check()
                .is_ok()
        );
    }
}
