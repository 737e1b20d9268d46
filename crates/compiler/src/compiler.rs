//! Single-pass Pratt compiler
//!
//! Consumes the token stream and emits bytecode directly; there is no AST.
//! Expression parsing is table-driven: every token kind maps to an optional
//! prefix function, an optional infix function, and a precedence, and
//! `parse_precedence` folds the two together top-down.
//!
//! Errors are values. Parse functions propagate a `CompileError` with `?`;
//! the top-level declaration loop is the only place that catches one, prints
//! it, and synchronizes to the next statement boundary so later errors in
//! the same source still get reported.

use std::fmt;
use std::fmt::Write as _;

use ell_core::{Bytecode, OpCode, Value};

use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

/// A scan or parse diagnostic: 1-based source line plus pre-formatted
/// message (`Error at 'lexeme': ...`, `Error at end: ...`, or a bare
/// `Error: ...` for scanner-produced messages).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub line: u32,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] {}", self.line, self.message)
    }
}

impl std::error::Error for CompileError {}

/// Binding strength, weakest to strongest. The discriminant order is what
/// `parse_precedence` compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    /// One level tighter; used by left-associative infix operators.
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn = for<'src> fn(&mut Compiler<'src>) -> Result<(), CompileError>;

#[derive(Clone, Copy)]
struct ParseRule {
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    precedence: Precedence,
}

const fn rule(prefix: Option<ParseFn>, infix: Option<ParseFn>, precedence: Precedence) -> ParseRule {
    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

/// The rule table, indexed by token kind. Kinds that can't start or extend
/// an expression fall through to an empty rule.
fn rule_for(kind: TokenKind) -> ParseRule {
    match kind {
        TokenKind::LeftParen => rule(Some(grouping), None, Precedence::None),
        TokenKind::Minus => rule(Some(unary), Some(binary), Precedence::Term),
        TokenKind::Plus => rule(None, Some(binary), Precedence::Term),
        TokenKind::Slash | TokenKind::Star => rule(None, Some(binary), Precedence::Factor),
        TokenKind::Bang => rule(Some(unary), None, Precedence::Unary),
        TokenKind::BangEqual | TokenKind::EqualEqual => {
            rule(None, Some(binary), Precedence::Equality)
        }
        TokenKind::Greater
        | TokenKind::GreaterEqual
        | TokenKind::Less
        | TokenKind::LessEqual => rule(None, Some(binary), Precedence::Comparison),
        TokenKind::Equal => rule(None, None, Precedence::Assignment),
        TokenKind::Or => rule(None, None, Precedence::Or),
        TokenKind::And => rule(None, None, Precedence::And),
        TokenKind::Integer | TokenKind::Double => rule(Some(number), None, Precedence::None),
        TokenKind::String => rule(Some(string), None, Precedence::None),
        TokenKind::True | TokenKind::False | TokenKind::Nil => {
            rule(Some(literal), None, Precedence::None)
        }
        TokenKind::Identifier => rule(Some(variable), None, Precedence::None),
        _ => rule(None, None, Precedence::None),
    }
}

/// Compile `source` to bytecode.
///
/// Every diagnostic is printed to stderr as it is found (compilation keeps
/// going after a parse error); the returned `Err` carries the first one.
pub fn compile(source: &str) -> Result<Bytecode, CompileError> {
    let mut compiler = Compiler::new(source);
    compiler.program();
    compiler.finish()
}

pub struct Compiler<'src> {
    lexer: Lexer<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    bytecode: Bytecode,
    first_error: Option<CompileError>,
}

impl<'src> Compiler<'src> {
    fn new(source: &'src str) -> Self {
        Compiler {
            lexer: Lexer::new(source),
            current: Token::new(TokenKind::Eof, "", None, 1),
            previous: Token::new(TokenKind::Eof, "", None, 1),
            bytecode: Bytecode::new(),
            first_error: None,
        }
    }

    fn program(&mut self) {
        if let Err(err) = self.advance() {
            self.recover(err);
        }
        while !self.check(TokenKind::Eof) {
            if let Err(err) = self.declaration() {
                self.recover(err);
            }
        }
        self.emit_op(OpCode::Return);
    }

    /// Report a diagnostic and re-align the parser on a statement boundary.
    fn recover(&mut self, err: CompileError) {
        eprintln!("{err}");
        if self.first_error.is_none() {
            self.first_error = Some(err);
        }
        if !self.check(TokenKind::Eof) {
            self.synchronize();
        }
    }

    fn finish(self) -> Result<Bytecode, CompileError> {
        #[cfg(feature = "print-code")]
        {
            if self.first_error.is_none() {
                print!(
                    "{}",
                    ell_core::disasm::disassemble_bytecode(&self.bytecode, "code")
                );
            }
        }
        match self.first_error {
            None => Ok(self.bytecode),
            Some(err) => Err(err),
        }
    }

    // Declarations and statements

    fn declaration(&mut self) -> Result<(), CompileError> {
        let lead = self.current.kind;
        match lead {
            TokenKind::Let
            | TokenKind::LetBool
            | TokenKind::LetInteger
            | TokenKind::LetDouble
            | TokenKind::LetString => {
                self.advance()?;
                self.var_declaration(lead)
            }
            _ => self.statement(),
        }
    }

    fn var_declaration(&mut self, lead: TokenKind) -> Result<(), CompileError> {
        let index = self.parse_variable("Expect variable name.")?;
        if self.match_token(TokenKind::Equal)? {
            self.expression()?;
        } else {
            self.emit_default_value(lead)?;
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.")?;
        self.emit_variable(OpCode::DefineGlobal, OpCode::DefineGlobalLong, index);
        Ok(())
    }

    /// Typed declarations without an initializer get their type's default;
    /// untyped `let` requires one.
    fn emit_default_value(&mut self, lead: TokenKind) -> Result<(), CompileError> {
        match lead {
            TokenKind::LetBool => self.emit_op(OpCode::False),
            TokenKind::LetInteger => self.emit_constant(Value::Int(0)),
            TokenKind::LetDouble => self.emit_constant(Value::Double(0.0)),
            TokenKind::LetString => self.emit_constant(Value::string("")),
            _ => {
                let message = format!(
                    "Declaration of 'let {}' requires an initializer.",
                    self.previous.lexeme
                );
                return Err(self.error(&message));
            }
        }
        Ok(())
    }

    fn parse_variable(&mut self, message: &str) -> Result<usize, CompileError> {
        self.consume(TokenKind::Identifier, message)?;
        Ok(self.identifier_constant())
    }

    /// Intern the name in `previous` and park it in the constant pool for
    /// the global opcodes to load.
    fn identifier_constant(&mut self) -> usize {
        self.bytecode.add_constant(Value::string(self.previous.lexeme))
    }

    fn statement(&mut self) -> Result<(), CompileError> {
        self.expression_statement()
    }

    fn expression_statement(&mut self) -> Result<(), CompileError> {
        self.expression()?;
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.")?;
        self.emit_op(OpCode::Pop);
        Ok(())
    }

    // Expressions

    fn expression(&mut self) -> Result<(), CompileError> {
        self.parse_precedence(Precedence::Assignment)
    }

    fn parse_precedence(&mut self, precedence: Precedence) -> Result<(), CompileError> {
        self.advance()?;
        let Some(prefix) = rule_for(self.previous.kind).prefix else {
            return Err(self.error("Expect expression."));
        };
        prefix(self)?;

        while precedence <= rule_for(self.current.kind).precedence {
            self.advance()?;
            match rule_for(self.previous.kind).infix {
                Some(infix) => infix(self)?,
                // Reachable for tokens that declare a precedence but no
                // infix handler (`=`, `and`, `or`).
                None => return Err(self.error("Expect expression.")),
            }
        }
        Ok(())
    }

    // Token plumbing

    fn advance(&mut self) -> Result<(), CompileError> {
        let token = self.lexer.scan_token();
        self.previous = std::mem::replace(&mut self.current, token);
        if self.current.kind == TokenKind::Error {
            return Err(error_at(&self.current, self.current.lexeme));
        }
        Ok(())
    }

    /// Like `advance`, but drops scan-error tokens on the floor; used only
    /// while synchronizing, where they have already been reported once.
    fn advance_skipping_errors(&mut self) {
        loop {
            let token = self.lexer.scan_token();
            if token.kind == TokenKind::Error {
                continue;
            }
            self.previous = std::mem::replace(&mut self.current, token);
            return;
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<(), CompileError> {
        if self.current.kind == kind {
            self.advance()
        } else {
            Err(self.error_at_current(message))
        }
    }

    fn match_token(&mut self, kind: TokenKind) -> Result<bool, CompileError> {
        if self.current.kind != kind {
            return Ok(false);
        }
        self.advance()?;
        Ok(true)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    /// Skip forward to a likely statement boundary: just past a `;`, or just
    /// before a token that can begin a declaration or statement.
    fn synchronize(&mut self) {
        self.advance_skipping_errors();
        while !self.check(TokenKind::Eof) {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Struct
                | TokenKind::Fn
                | TokenKind::Let
                | TokenKind::LetBool
                | TokenKind::LetDouble
                | TokenKind::LetInteger
                | TokenKind::LetString
                | TokenKind::For
                | TokenKind::If
                | TokenKind::Return
                | TokenKind::ReturnIf => return,
                _ => {}
            }
            self.advance_skipping_errors();
        }
    }

    fn error(&self, message: &str) -> CompileError {
        error_at(&self.previous, message)
    }

    fn error_at_current(&self, message: &str) -> CompileError {
        error_at(&self.current, message)
    }

    // Emission

    fn emit_op(&mut self, op: OpCode) {
        self.bytecode.put_op(op, self.previous.line);
    }

    fn emit_constant(&mut self, value: Value) {
        self.bytecode.put_constant(value, self.previous.line);
    }

    /// Short form with a one-byte operand while the index fits, long form
    /// with a 24-bit little-endian operand afterwards.
    fn emit_variable(&mut self, short: OpCode, long: OpCode, index: usize) {
        let line = self.previous.line;
        if index < 256 {
            self.bytecode.put_op(short, line);
            self.bytecode.put_byte(index as u8, line);
        } else {
            self.bytecode.put_op(long, line);
            self.bytecode.put_byte(index as u8, line);
            self.bytecode.put_byte((index >> 8) as u8, line);
            self.bytecode.put_byte((index >> 16) as u8, line);
        }
    }
}

fn error_at(token: &Token<'_>, message: &str) -> CompileError {
    let mut text = String::from("Error");
    match token.kind {
        TokenKind::Eof => text.push_str(" at end"),
        TokenKind::Error => {}
        _ => {
            let _ = write!(text, " at '{}'", token.lexeme);
        }
    }
    let _ = write!(text, ": {message}");
    CompileError {
        line: token.line,
        message: text,
    }
}

// Rule-table parse functions. Free functions over a compiler handle so the
// table holds plain fn pointers.

fn grouping(c: &mut Compiler<'_>) -> Result<(), CompileError> {
    c.expression()?;
    c.consume(TokenKind::RightParen, "Expect ')' after expression.")
}

fn binary(c: &mut Compiler<'_>) -> Result<(), CompileError> {
    let op_kind = c.previous.kind;
    c.parse_precedence(rule_for(op_kind).precedence.next())?;

    match op_kind {
        TokenKind::Plus => c.emit_op(OpCode::Add),
        TokenKind::Minus => c.emit_op(OpCode::Subtract),
        TokenKind::Star => c.emit_op(OpCode::Multiply),
        TokenKind::Slash => c.emit_op(OpCode::Divide),
        TokenKind::EqualEqual => c.emit_op(OpCode::Equal),
        TokenKind::BangEqual => c.emit_op(OpCode::NotEqual),
        TokenKind::Greater => c.emit_op(OpCode::Greater),
        TokenKind::GreaterEqual => c.emit_op(OpCode::GreaterEqual),
        TokenKind::Less => c.emit_op(OpCode::Less),
        TokenKind::LessEqual => c.emit_op(OpCode::LessEqual),
        _ => {}
    }
    Ok(())
}

fn unary(c: &mut Compiler<'_>) -> Result<(), CompileError> {
    let op_kind = c.previous.kind;
    c.parse_precedence(Precedence::Unary)?;

    match op_kind {
        TokenKind::Minus => c.emit_op(OpCode::Negate),
        TokenKind::Bang => c.emit_op(OpCode::Not),
        _ => {}
    }
    Ok(())
}

fn number(c: &mut Compiler<'_>) -> Result<(), CompileError> {
    let Some(value) = c.previous.literal.clone() else {
        return Err(c.error("Invalid numeric literal."));
    };
    c.emit_constant(value);
    Ok(())
}

fn string(c: &mut Compiler<'_>) -> Result<(), CompileError> {
    let Some(value) = c.previous.literal.clone() else {
        return Err(c.error("Invalid string literal."));
    };
    c.emit_constant(value);
    Ok(())
}

fn literal(c: &mut Compiler<'_>) -> Result<(), CompileError> {
    match c.previous.kind {
        TokenKind::True => c.emit_op(OpCode::True),
        TokenKind::False => c.emit_op(OpCode::False),
        TokenKind::Nil => c.emit_op(OpCode::Nul),
        _ => {}
    }
    Ok(())
}

fn variable(c: &mut Compiler<'_>) -> Result<(), CompileError> {
    let index = c.identifier_constant();
    if c.match_token(TokenKind::Equal)? {
        c.expression()?;
        c.emit_variable(OpCode::SetGlobal, OpCode::SetGlobalLong, index);
    } else {
        c.emit_variable(OpCode::GetGlobal, OpCode::GetGlobalLong, index);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(code: OpCode) -> u8 {
        code as u8
    }

    #[test]
    fn test_expression_statement() {
        let bytecode = compile("1 + 2;").unwrap();
        assert_eq!(
            bytecode.code(),
            &[
                op(OpCode::Constant),
                0,
                op(OpCode::Constant),
                1,
                op(OpCode::Add),
                op(OpCode::Pop),
                op(OpCode::Return),
            ]
        );
        assert_eq!(*bytecode.constant(0), Value::Int(1));
        assert_eq!(*bytecode.constant(1), Value::Int(2));
    }

    #[test]
    fn test_grouping_beats_factor() {
        let bytecode = compile("(1 + 2) * 3;").unwrap();
        assert_eq!(
            bytecode.code(),
            &[
                op(OpCode::Constant),
                0,
                op(OpCode::Constant),
                1,
                op(OpCode::Add),
                op(OpCode::Constant),
                2,
                op(OpCode::Multiply),
                op(OpCode::Pop),
                op(OpCode::Return),
            ]
        );
    }

    #[test]
    fn test_factor_binds_tighter_than_term() {
        let bytecode = compile("1 + 2 * 3;").unwrap();
        assert_eq!(
            bytecode.code(),
            &[
                op(OpCode::Constant),
                0,
                op(OpCode::Constant),
                1,
                op(OpCode::Constant),
                2,
                op(OpCode::Multiply),
                op(OpCode::Add),
                op(OpCode::Pop),
                op(OpCode::Return),
            ]
        );
    }

    #[test]
    fn test_unary_negate_and_not() {
        let bytecode = compile("-1;").unwrap();
        assert_eq!(
            bytecode.code(),
            &[op(OpCode::Constant), 0, op(OpCode::Negate), op(OpCode::Pop), op(OpCode::Return)]
        );

        let bytecode = compile("!true;").unwrap();
        assert_eq!(
            bytecode.code(),
            &[op(OpCode::True), op(OpCode::Not), op(OpCode::Pop), op(OpCode::Return)]
        );
    }

    #[test]
    fn test_comparison_chain() {
        let bytecode = compile("1 < 2 == true;").unwrap();
        assert_eq!(
            bytecode.code(),
            &[
                op(OpCode::Constant),
                0,
                op(OpCode::Constant),
                1,
                op(OpCode::Less),
                op(OpCode::True),
                op(OpCode::Equal),
                op(OpCode::Pop),
                op(OpCode::Return),
            ]
        );
    }

    #[test]
    fn test_literals() {
        let bytecode = compile("nil;").unwrap();
        assert_eq!(
            bytecode.code(),
            &[op(OpCode::Nul), op(OpCode::Pop), op(OpCode::Return)]
        );
    }

    #[test]
    fn test_missing_operand_reports_at_offending_token() {
        let err = compile("1 + + 2;").unwrap_err();
        assert_eq!(err.to_string(), "[line 1] Error at '+': Expect expression.");
    }

    #[test]
    fn test_unclosed_group() {
        let err = compile("(1 + 2;").unwrap_err();
        assert_eq!(
            err.to_string(),
            "[line 1] Error at ';': Expect ')' after expression."
        );
    }

    #[test]
    fn test_error_at_end() {
        let err = compile("1 +").unwrap_err();
        assert_eq!(err.to_string(), "[line 1] Error at end: Expect expression.");
    }

    #[test]
    fn test_scan_error_surfaces_as_compile_error() {
        let err = compile("999999999999999999999999999999999").unwrap_err();
        assert_eq!(
            err.to_string(),
            "[line 1] Error: Numeric value is out of range."
        );

        let err = compile("\"unterminated").unwrap_err();
        assert_eq!(err.to_string(), "[line 1] Error: Unterminated string.");
    }

    #[test]
    fn test_var_declaration_with_initializer() {
        let bytecode = compile("let x = 42;").unwrap();
        assert_eq!(*bytecode.constant(0), Value::string("x"));
        assert_eq!(*bytecode.constant(1), Value::Int(42));
        assert_eq!(
            bytecode.code(),
            &[
                op(OpCode::Constant),
                1,
                op(OpCode::DefineGlobal),
                0,
                op(OpCode::Return),
            ]
        );
    }

    #[test]
    fn test_var_declaration_terminated_by_newline() {
        let bytecode = compile("let x = 42\n").unwrap();
        assert_eq!(
            bytecode.code(),
            &[
                op(OpCode::Constant),
                1,
                op(OpCode::DefineGlobal),
                0,
                op(OpCode::Return),
            ]
        );
    }

    #[test]
    fn test_untyped_let_requires_initializer() {
        let err = compile("let n;").unwrap_err();
        assert_eq!(
            err.to_string(),
            "[line 1] Error at 'n': Declaration of 'let n' requires an initializer."
        );
    }

    #[test]
    fn test_typed_declaration_defaults() {
        let bytecode = compile("int n;").unwrap();
        assert_eq!(*bytecode.constant(0), Value::string("n"));
        assert_eq!(*bytecode.constant(1), Value::Int(0));

        let bytecode = compile("double d;").unwrap();
        assert_eq!(*bytecode.constant(1), Value::Double(0.0));

        let bytecode = compile("string s;").unwrap();
        assert_eq!(*bytecode.constant(1), Value::string(""));

        let bytecode = compile("bool b;").unwrap();
        assert_eq!(
            bytecode.code(),
            &[op(OpCode::False), op(OpCode::DefineGlobal), 0, op(OpCode::Return)]
        );
    }

    #[test]
    fn test_variable_reference_and_assignment() {
        let bytecode = compile("x;").unwrap();
        assert_eq!(
            bytecode.code(),
            &[op(OpCode::GetGlobal), 0, op(OpCode::Pop), op(OpCode::Return)]
        );

        let bytecode = compile("x = 5;").unwrap();
        assert_eq!(
            bytecode.code(),
            &[
                op(OpCode::Constant),
                1,
                op(OpCode::SetGlobal),
                0,
                op(OpCode::Pop),
                op(OpCode::Return),
            ]
        );
    }

    #[test]
    fn test_assignment_has_no_infix_body() {
        let err = compile("1 = 2;").unwrap_err();
        assert_eq!(err.to_string(), "[line 1] Error at '=': Expect expression.");
    }

    #[test]
    fn test_recovery_reports_later_errors() {
        // Both statements are bad; the first error is the one returned.
        let err = compile("1 + + 2;\n(3;").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("Expect expression."));
    }

    #[test]
    fn test_recovery_compiles_statement_after_error() {
        // The error must not cascade past the statement boundary.
        let err = compile("+ 1;\nlet ok = 2;").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_global_index_switches_to_long_form() {
        // 130 declarations produce two constants each (name, value), so the
        // later names land past index 255 and need the long opcodes.
        let mut source = String::new();
        for i in 0..130 {
            source.push_str(&format!("let v{i} = {i};\n"));
        }
        let bytecode = compile(&source).unwrap();
        let code = bytecode.code();
        // Last declaration: name constant index 258.
        let tail = &code[code.len() - 5..];
        assert_eq!(tail[0], op(OpCode::DefineGlobalLong));
        assert_eq!(
            u32::from_le_bytes([tail[1], tail[2], tail[3], 0]),
            258
        );
        assert_eq!(tail[4], op(OpCode::Return));
        assert_eq!(*bytecode.constant(258), Value::string("v129"));
    }

    #[test]
    fn test_line_table_tracks_statements() {
        let bytecode = compile("1;\n2;\n").unwrap();
        assert_eq!(bytecode.line_of(0), 1); // first constant
        assert_eq!(bytecode.line_of(3), 2); // second constant
    }

    #[test]
    fn test_string_expression() {
        let bytecode = compile("\"foo\" + \"bar\";").unwrap();
        assert_eq!(*bytecode.constant(0), Value::string("foo"));
        assert_eq!(*bytecode.constant(1), Value::string("bar"));
        assert_eq!(
            bytecode.code(),
            &[
                op(OpCode::Constant),
                0,
                op(OpCode::Constant),
                1,
                op(OpCode::Add),
                op(OpCode::Pop),
                op(OpCode::Return),
            ]
        );
    }
}
