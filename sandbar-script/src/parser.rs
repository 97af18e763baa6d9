//! Recursive-descent parser for strategy scripts.
//!
//! Grammar (lowest to highest precedence):
//! - test: or_test ['if' or_test 'else' test] | lambda
//! - or_test / and_test / not_test
//! - comparison: bit_or (comp_op bit_or)*
//! - bit_or / bit_xor / bit_and / arith / term / factor / power
//! - primary: atom trailer*
//!
//! Syntax errors are fatal and reported once. Recognized-but-unsupported
//! constructs parse successfully and are left for the checker.
//!
//! Nesting is bounded by `MAX_NESTING`: every bracket level, block, unary
//! operator, and every link of a binary-operator or trailer chain counts,
//! so the depth of the resulting tree never exceeds it. The checker and the
//! interpreter recurse over that tree and rely on the bound.

use crate::ast::*;
use crate::lexer::{tokenize, Keyword, LexError, Token, TokenKind};
use std::rc::Rc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("{message} at line {line}, column {column}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },
}

impl ParseError {
    pub fn line(&self) -> usize {
        match self {
            ParseError::Lex(e) => e.line(),
            ParseError::Syntax { line, .. } => *line,
        }
    }

    pub fn column(&self) -> usize {
        match self {
            ParseError::Lex(e) => e.column(),
            ParseError::Syntax { column, .. } => *column,
        }
    }

    /// Message without the position suffix.
    pub fn message(&self) -> String {
        match self {
            ParseError::Lex(e) => e.to_string(),
            ParseError::Syntax { message, .. } => message.clone(),
        }
    }
}

type PResult<T> = Result<T, ParseError>;

/// Deepest nesting of expressions and blocks a script may use.
pub const MAX_NESTING: usize = 100;

/// Parse a whole script.
pub fn parse(source: &str) -> PResult<Module> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse_module()
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    pub fn parse_module(&mut self) -> PResult<Module> {
        let mut body = Vec::new();
        loop {
            while self.eat(&TokenKind::Newline) {}
            if self.check(&TokenKind::Eof) {
                break;
            }
            body.extend(self.parse_statement()?);
        }
        Ok(Module { body })
    }

    // ─── Statements ──────────────────────────────────────────────────

    fn parse_statement(&mut self) -> PResult<Vec<Stmt>> {
        let stmt = match self.peek().clone() {
            TokenKind::Keyword(Keyword::If) => self.parse_if()?,
            TokenKind::Keyword(Keyword::For) => self.parse_for()?,
            TokenKind::Keyword(Keyword::Def) => self.parse_funcdef(Vec::new())?,
            TokenKind::Keyword(Keyword::Class) => self.parse_classdef(Vec::new())?,
            TokenKind::At => self.parse_decorated()?,
            TokenKind::Keyword(Keyword::While) => self.parse_unsupported_compound("while loop")?,
            TokenKind::Keyword(Keyword::With) => self.parse_unsupported_compound("with statement")?,
            TokenKind::Keyword(Keyword::Try) => self.parse_unsupported_compound("try statement")?,
            TokenKind::Keyword(Keyword::Async) => {
                let span = self.span();
                self.advance();
                // Parse whatever follows so the rest of the file is still checked.
                self.nested(Self::parse_statement)?;
                Stmt {
                    kind: StmtKind::Unsupported("async"),
                    span,
                }
            }
            _ => return self.parse_simple_line(),
        };
        Ok(vec![stmt])
    }

    /// Indented block or a same-line simple statement list, after the colon.
    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.nested(Self::parse_block_body)
    }

    fn parse_block_body(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(&TokenKind::Colon, "':'")?;
        if !self.eat(&TokenKind::Newline) {
            return self.parse_simple_line();
        }
        if !self.eat(&TokenKind::Indent) {
            return Err(self.error("expected an indented block"));
        }
        let mut body = Vec::new();
        loop {
            while self.eat(&TokenKind::Newline) {}
            if self.eat(&TokenKind::Dedent) || self.check(&TokenKind::Eof) {
                break;
            }
            body.extend(self.parse_statement()?);
        }
        Ok(body)
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        let span = self.span();
        self.advance();
        let test = self.parse_test()?;
        let body = self.parse_block()?;
        let orelse = match self.peek().clone() {
            TokenKind::Keyword(Keyword::Elif) => vec![self.nested(Self::parse_if)?],
            TokenKind::Keyword(Keyword::Else) => {
                self.advance();
                self.parse_block()?
            }
            _ => Vec::new(),
        };
        Ok(Stmt {
            kind: StmtKind::If { test, body, orelse },
            span,
        })
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        let span = self.span();
        self.advance();
        let target = self.parse_target_list()?;
        check_target(&target)?;
        self.expect_keyword(Keyword::In)?;
        let iter = self.parse_expr_list()?;
        let body = self.parse_block()?;
        let orelse = if self.eat_keyword(Keyword::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
            span,
        })
    }

    fn parse_decorated(&mut self) -> PResult<Stmt> {
        let mut decorators = Vec::new();
        while self.eat(&TokenKind::At) {
            decorators.push(self.parse_test()?);
            self.expect(&TokenKind::Newline, "newline after decorator")?;
        }
        match self.peek().clone() {
            TokenKind::Keyword(Keyword::Def) => self.parse_funcdef(decorators),
            TokenKind::Keyword(Keyword::Class) => self.parse_classdef(decorators),
            _ => Err(self.error("expected 'def' or 'class' after decorator")),
        }
    }

    fn parse_funcdef(&mut self, decorators: Vec<Expr>) -> PResult<Stmt> {
        let span = decorators.first().map(|d| d.span).unwrap_or_else(|| self.span());
        self.advance();
        let (name, _) = self.expect_name()?;
        self.expect(&TokenKind::LParen, "'('")?;

        let mut params = Vec::new();
        let mut variadic = false;
        while !self.check(&TokenKind::RParen) {
            if self.eat(&TokenKind::Star) || self.eat(&TokenKind::DoubleStar) {
                variadic = true;
                if matches!(self.peek(), TokenKind::Name(_)) {
                    self.advance();
                    if self.eat(&TokenKind::Colon) {
                        self.parse_test()?;
                    }
                }
            } else if self.eat(&TokenKind::Slash) {
                // positional-only marker carries no meaning here
            } else {
                let param_span = self.span();
                let (param, _) = self.expect_name()?;
                if self.eat(&TokenKind::Colon) {
                    self.parse_test()?;
                }
                let default = if self.eat(&TokenKind::Eq) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                params.push(Param {
                    name: param,
                    default,
                    span: param_span,
                });
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        if self.eat(&TokenKind::Arrow) {
            self.parse_test()?;
        }
        let body = self.parse_block()?;

        Ok(Stmt {
            kind: StmtKind::FunctionDef(Rc::new(FunctionDef {
                name,
                params,
                variadic,
                decorators,
                body,
                span,
            })),
            span,
        })
    }

    fn parse_classdef(&mut self, decorators: Vec<Expr>) -> PResult<Stmt> {
        let span = decorators.first().map(|d| d.span).unwrap_or_else(|| self.span());
        self.advance();
        let (name, _) = self.expect_name()?;
        let mut bases = Vec::new();
        if self.eat(&TokenKind::LParen) {
            while !self.check(&TokenKind::RParen) {
                if matches!(self.peek(), TokenKind::Name(_)) && self.peek_next() == &TokenKind::Eq {
                    return Err(self.error("class keyword arguments are not supported"));
                }
                bases.push(self.parse_test()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen, "')'")?;
        }
        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::ClassDef(Rc::new(ClassDef {
                name,
                bases,
                decorators,
                body,
                span,
            })),
            span,
        })
    }

    /// Parse a compound statement outside the subset, keeping its body
    /// well-formed but discarding it.
    fn parse_unsupported_compound(&mut self, what: &'static str) -> PResult<Stmt> {
        let span = self.span();
        self.advance();
        self.skip_to_block_colon()?;
        self.parse_block()?;
        while matches!(
            self.peek(),
            TokenKind::Keyword(Keyword::Except)
                | TokenKind::Keyword(Keyword::Finally)
                | TokenKind::Keyword(Keyword::Else)
        ) {
            self.advance();
            self.skip_to_block_colon()?;
            self.parse_block()?;
        }
        Ok(Stmt {
            kind: StmtKind::Unsupported(what),
            span,
        })
    }

    fn parse_simple_line(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = vec![self.parse_simple_stmt()?];
        while self.eat(&TokenKind::Semicolon) {
            if matches!(self.peek(), TokenKind::Newline | TokenKind::Eof) {
                break;
            }
            stmts.push(self.parse_simple_stmt()?);
        }
        if !self.eat(&TokenKind::Newline) && !self.check(&TokenKind::Eof) {
            return Err(self.error(&format!("unexpected {}", describe(self.peek()))));
        }
        Ok(stmts)
    }

    fn parse_simple_stmt(&mut self) -> PResult<Stmt> {
        let span = self.span();
        let kind = match self.peek().clone() {
            TokenKind::Keyword(Keyword::Pass) => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_expr_list()?))
                }
            }
            TokenKind::Keyword(Keyword::Import) => self.parse_import()?,
            TokenKind::Keyword(Keyword::From) => self.parse_from_import()?,
            TokenKind::Keyword(kw @ (Keyword::Global
            | Keyword::Nonlocal
            | Keyword::Del
            | Keyword::Assert
            | Keyword::Raise)) => {
                let what = match kw {
                    Keyword::Global => "global statement",
                    Keyword::Nonlocal => "nonlocal statement",
                    Keyword::Del => "del statement",
                    Keyword::Assert => "assert statement",
                    _ => "raise statement",
                };
                self.skip_to_statement_end();
                StmtKind::Unsupported(what)
            }
            _ => self.parse_expr_statement()?,
        };
        Ok(Stmt { kind, span })
    }

    fn parse_expr_statement(&mut self) -> PResult<StmtKind> {
        let first = self.parse_expr_list()?;

        if self.check(&TokenKind::Eq) {
            let mut targets = vec![first];
            let mut value;
            loop {
                self.advance();
                value = self.parse_expr_list()?;
                if self.check(&TokenKind::Eq) {
                    targets.push(value);
                } else {
                    break;
                }
            }
            for target in &targets {
                check_target(target)?;
            }
            return Ok(StmtKind::Assign { targets, value });
        }

        let aug = match self.peek().clone() {
            TokenKind::PlusEq => Some(BinOp::Add),
            TokenKind::MinusEq => Some(BinOp::Sub),
            TokenKind::StarEq => Some(BinOp::Mul),
            TokenKind::SlashEq => Some(BinOp::Div),
            _ => None,
        };
        if let Some(op) = aug {
            self.advance();
            if !matches!(
                first.kind,
                ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
            ) {
                return Err(syntax_at(first.span, "illegal target for augmented assignment"));
            }
            let value = self.parse_expr_list()?;
            return Ok(StmtKind::AugAssign {
                target: first,
                op,
                value,
            });
        }

        // Annotated assignment: `x: float = 1.0`
        if self.eat(&TokenKind::Colon) {
            check_target(&first)?;
            self.parse_test()?;
            if self.eat(&TokenKind::Eq) {
                let value = self.parse_expr_list()?;
                return Ok(StmtKind::Assign {
                    targets: vec![first],
                    value,
                });
            }
            return Ok(StmtKind::Pass);
        }

        Ok(StmtKind::Expr(first))
    }

    fn parse_import(&mut self) -> PResult<StmtKind> {
        self.advance();
        let mut names = Vec::new();
        loop {
            let span = self.span();
            let name = self.parse_dotted_name()?;
            let alias = if self.eat_keyword(Keyword::As) {
                Some(self.expect_name()?.0)
            } else {
                None
            };
            names.push(ImportName { name, alias, span });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(StmtKind::Import(names))
    }

    fn parse_from_import(&mut self) -> PResult<StmtKind> {
        self.advance();
        let mut module = String::new();
        while self.eat(&TokenKind::Dot) {
            module.push('.');
        }
        if !self.check(&TokenKind::Keyword(Keyword::Import)) {
            module.push_str(&self.parse_dotted_name()?);
        }
        self.expect_keyword(Keyword::Import)?;

        let mut names = Vec::new();
        if self.check(&TokenKind::Star) {
            let span = self.span();
            self.advance();
            names.push(ImportName {
                name: "*".to_string(),
                alias: None,
                span,
            });
            return Ok(StmtKind::ImportFrom { module, names });
        }

        let parenthesized = self.eat(&TokenKind::LParen);
        loop {
            if parenthesized && self.check(&TokenKind::RParen) {
                break;
            }
            let span = self.span();
            let (name, _) = self.expect_name()?;
            let alias = if self.eat_keyword(Keyword::As) {
                Some(self.expect_name()?.0)
            } else {
                None
            };
            names.push(ImportName { name, alias, span });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        if parenthesized {
            self.expect(&TokenKind::RParen, "')'")?;
        }
        Ok(StmtKind::ImportFrom { module, names })
    }

    fn parse_dotted_name(&mut self) -> PResult<String> {
        let (mut name, _) = self.expect_name()?;
        while self.eat(&TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.expect_name()?.0);
        }
        Ok(name)
    }

    // ─── Expressions ─────────────────────────────────────────────────

    /// Comma-separated expressions; more than one (or a trailing comma)
    /// makes a tuple.
    fn parse_expr_list(&mut self) -> PResult<Expr> {
        let first = self.parse_test_or_star()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let span = first.span;
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.at_expr_list_end() {
                break;
            }
            items.push(self.parse_test_or_star()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), span))
    }

    /// Assignment targets for `for`: stops before `in`.
    fn parse_target_list(&mut self) -> PResult<Expr> {
        let first = self.parse_bit_or()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let span = first.span;
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::Keyword(Keyword::In)) {
                break;
            }
            items.push(self.parse_bit_or()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), span))
    }

    fn parse_test_or_star(&mut self) -> PResult<Expr> {
        if self.check(&TokenKind::Star) {
            let span = self.span();
            self.advance();
            self.parse_bit_or()?;
            return Ok(Expr::new(ExprKind::Unsupported("starred expression"), span));
        }
        self.parse_test()
    }

    pub fn parse_test(&mut self) -> PResult<Expr> {
        self.nested(Self::parse_test_inner)
    }

    fn parse_test_inner(&mut self) -> PResult<Expr> {
        if self.check(&TokenKind::Keyword(Keyword::Lambda)) {
            let span = self.span();
            self.advance();
            self.skip_to_colon()?;
            self.advance();
            self.parse_test()?;
            return Ok(Expr::new(ExprKind::Unsupported("lambda"), span));
        }

        let body = self.parse_or_test()?;
        if !self.check(&TokenKind::Keyword(Keyword::If)) {
            return Ok(body);
        }
        self.advance();
        let test = self.parse_or_test()?;
        self.expect_keyword(Keyword::Else)?;
        let orelse = self.parse_test()?;
        let span = body.span;
        Ok(Expr::new(
            ExprKind::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
            span,
        ))
    }

    fn parse_or_test(&mut self) -> PResult<Expr> {
        self.parse_bool_chain(BoolOp::Or)
    }

    fn parse_bool_chain(&mut self, op: BoolOp) -> PResult<Expr> {
        let (keyword, next): (Keyword, fn(&mut Self) -> PResult<Expr>) = match op {
            BoolOp::Or => (Keyword::Or, |p| p.parse_bool_chain(BoolOp::And)),
            BoolOp::And => (Keyword::And, Self::parse_not_test),
        };
        let first = next(self)?;
        if !self.check(&TokenKind::Keyword(keyword)) {
            return Ok(first);
        }
        let span = first.span;
        let mut values = vec![first];
        while self.eat_keyword(keyword) {
            values.push(next(self)?);
        }
        Ok(Expr::new(ExprKind::BoolOp { op, values }, span))
    }

    fn parse_not_test(&mut self) -> PResult<Expr> {
        if self.check(&TokenKind::Keyword(Keyword::Not)) {
            let span = self.span();
            self.advance();
            let operand = self.nested(Self::parse_not_test)?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let left = self.parse_bit_or()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        loop {
            let op = match self.peek().clone() {
                TokenKind::EqEq => CmpOp::Eq,
                TokenKind::NotEq => CmpOp::NotEq,
                TokenKind::Lt => CmpOp::Lt,
                TokenKind::LtEq => CmpOp::LtEq,
                TokenKind::Gt => CmpOp::Gt,
                TokenKind::GtEq => CmpOp::GtEq,
                TokenKind::Keyword(Keyword::In) => CmpOp::In,
                TokenKind::Keyword(Keyword::Is) => {
                    if self.peek_next() == &TokenKind::Keyword(Keyword::Not) {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                TokenKind::Keyword(Keyword::Not)
                    if self.peek_next() == &TokenKind::Keyword(Keyword::In) =>
                {
                    self.advance();
                    CmpOp::NotIn
                }
                _ => break,
            };
            self.advance();
            ops.push(op);
            comparators.push(self.parse_bit_or()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        let span = left.span;
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
                comparators,
            },
            span,
        ))
    }

    fn parse_bit_or(&mut self) -> PResult<Expr> {
        let base = self.depth;
        let mut left = self.parse_bit_xor()?;
        while self.eat(&TokenKind::Pipe) {
            self.descend()?;
            let right = self.parse_bit_xor()?;
            left = binop(left, BinOp::BitOr, right);
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_bit_xor(&mut self) -> PResult<Expr> {
        let base = self.depth;
        let mut left = self.parse_bit_and()?;
        while self.eat(&TokenKind::Caret) {
            self.descend()?;
            let right = self.parse_bit_and()?;
            left = binop(left, BinOp::BitXor, right);
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_bit_and(&mut self) -> PResult<Expr> {
        let base = self.depth;
        let mut left = self.parse_arith()?;
        while self.eat(&TokenKind::Amp) {
            self.descend()?;
            let right = self.parse_arith()?;
            left = binop(left, BinOp::BitAnd, right);
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_arith(&mut self) -> PResult<Expr> {
        let base = self.depth;
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek().clone() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            self.descend()?;
            let right = self.parse_term()?;
            left = binop(left, op, right);
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_term(&mut self) -> PResult<Expr> {
        let base = self.depth;
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek().clone() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::DoubleSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            self.descend()?;
            let right = self.parse_factor()?;
            left = binop(left, op, right);
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_factor(&mut self) -> PResult<Expr> {
        let op = match self.peek().clone() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            TokenKind::Tilde => UnaryOp::Invert,
            _ => return self.parse_power(),
        };
        let span = self.span();
        self.advance();
        let operand = self.nested(Self::parse_factor)?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn parse_power(&mut self) -> PResult<Expr> {
        if self.check(&TokenKind::Keyword(Keyword::Await)) {
            let span = self.span();
            self.advance();
            self.nested(Self::parse_power)?;
            return Ok(Expr::new(ExprKind::Unsupported("await"), span));
        }
        let base = self.parse_primary()?;
        if self.eat(&TokenKind::DoubleStar) {
            // Right-associative, binds tighter than unary minus on the left only.
            let exponent = self.nested(Self::parse_factor)?;
            return Ok(binop(base, BinOp::Pow, exponent));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let base = self.depth;
        let mut expr = self.parse_atom()?;
        loop {
            if matches!(self.peek(), TokenKind::Dot | TokenKind::LParen | TokenKind::LBracket) {
                self.descend()?;
            }
            match self.peek().clone() {
                TokenKind::Dot => {
                    self.advance();
                    let (attr, _) = self.expect_name()?;
                    let span = expr.span;
                    expr = Expr::new(
                        ExprKind::Attribute {
                            value: Box::new(expr),
                            attr,
                        },
                        span,
                    );
                }
                TokenKind::LParen => {
                    self.advance();
                    let (args, keywords) = self.parse_call_args()?;
                    let span = expr.span;
                    expr = Expr::new(
                        ExprKind::Call {
                            func: Box::new(expr),
                            args,
                            keywords,
                        },
                        span,
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_subscript()?;
                    self.expect(&TokenKind::RBracket, "']'")?;
                    let span = expr.span;
                    expr = Expr::new(
                        ExprKind::Subscript {
                            value: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                _ => {
                    self.depth = base;
                    return Ok(expr);
                }
            }
        }
    }

    fn parse_call_args(&mut self) -> PResult<(Vec<Expr>, Vec<KeywordArg>)> {
        let mut args = Vec::new();
        let mut keywords: Vec<KeywordArg> = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let span = self.span();
            if self.eat(&TokenKind::Star) || self.eat(&TokenKind::DoubleStar) {
                self.parse_test()?;
                args.push(Expr::new(ExprKind::Unsupported("starred argument"), span));
            } else if matches!(self.peek(), TokenKind::Name(_)) && self.peek_next() == &TokenKind::Eq {
                let (name, _) = self.expect_name()?;
                self.advance();
                let value = self.parse_test()?;
                if keywords.iter().any(|k| k.name == name) {
                    return Err(syntax_at(span, &format!("keyword argument repeated: {name}")));
                }
                keywords.push(KeywordArg { name, value, span });
            } else {
                let value = self.parse_test()?;
                if self.check(&TokenKind::Keyword(Keyword::For)) {
                    self.parse_comprehension_tail()?;
                    args.push(Expr::new(ExprKind::Unsupported("generator expression"), span));
                } else if !keywords.is_empty() {
                    return Err(syntax_at(span, "positional argument follows keyword argument"));
                } else {
                    args.push(value);
                }
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok((args, keywords))
    }

    fn parse_subscript(&mut self) -> PResult<Expr> {
        let first = self.parse_slice_item()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let span = first.span;
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_slice_item()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), span))
    }

    fn parse_slice_item(&mut self) -> PResult<Expr> {
        let span = self.span();
        let lower = if self.check(&TokenKind::Colon) {
            None
        } else {
            let expr = self.parse_test()?;
            if !self.check(&TokenKind::Colon) {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };
        self.expect(&TokenKind::Colon, "':'")?;
        let upper = if self.slice_part_ends() {
            None
        } else {
            Some(Box::new(self.parse_test()?))
        };
        let step = if self.eat(&TokenKind::Colon) && !self.slice_part_ends() {
            Some(Box::new(self.parse_test()?))
        } else {
            None
        };
        Ok(Expr::new(ExprKind::Slice { lower, upper, step }, span))
    }

    fn slice_part_ends(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Colon | TokenKind::Comma | TokenKind::RBracket
        )
    }

    fn parse_atom(&mut self) -> PResult<Expr> {
        let span = self.span();
        let kind = match self.peek().clone() {
            TokenKind::Name(name) => {
                self.advance();
                ExprKind::Name(name)
            }
            TokenKind::Number(n) => {
                self.advance();
                ExprKind::Number(n)
            }
            TokenKind::Str(s) => {
                self.advance();
                let mut text = s;
                // Adjacent literals concatenate.
                while let TokenKind::Str(more) = self.peek().clone() {
                    self.advance();
                    text.push_str(&more);
                }
                ExprKind::Str(Rc::from(text.as_str()))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::Keyword(Keyword::None) => {
                self.advance();
                ExprKind::None
            }
            TokenKind::Keyword(Keyword::Yield) => {
                self.advance();
                if !self.at_expr_list_end() {
                    self.parse_expr_list()?;
                }
                ExprKind::Unsupported("yield")
            }
            TokenKind::LParen => {
                self.advance();
                if self.eat(&TokenKind::RParen) {
                    return Ok(Expr::new(ExprKind::Tuple(Vec::new()), span));
                }
                let first = self.parse_test_or_star()?;
                if self.check(&TokenKind::Keyword(Keyword::For)) {
                    self.parse_comprehension_tail()?;
                    self.expect(&TokenKind::RParen, "')'")?;
                    return Ok(Expr::new(ExprKind::Unsupported("generator expression"), span));
                }
                if !self.check(&TokenKind::Comma) {
                    self.expect(&TokenKind::RParen, "')'")?;
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat(&TokenKind::Comma) {
                    if self.check(&TokenKind::RParen) {
                        break;
                    }
                    items.push(self.parse_test_or_star()?);
                }
                self.expect(&TokenKind::RParen, "')'")?;
                ExprKind::Tuple(items)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&TokenKind::RBracket) {
                    let item = self.parse_test_or_star()?;
                    if items.is_empty() && self.check(&TokenKind::Keyword(Keyword::For)) {
                        self.parse_comprehension_tail()?;
                        self.expect(&TokenKind::RBracket, "']'")?;
                        return Ok(Expr::new(ExprKind::Unsupported("list comprehension"), span));
                    }
                    items.push(item);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket, "']'")?;
                ExprKind::List(items)
            }
            TokenKind::LBrace => {
                self.skip_balanced()?;
                ExprKind::Unsupported("dict or set display")
            }
            other => return Err(self.error(&format!("unexpected {}", describe(&other)))),
        };
        Ok(Expr::new(kind, span))
    }

    fn parse_comprehension_tail(&mut self) -> PResult<()> {
        while self.eat_keyword(Keyword::For) {
            self.parse_target_list()?;
            self.expect_keyword(Keyword::In)?;
            self.parse_or_test()?;
            while self.eat_keyword(Keyword::If) {
                self.parse_or_test()?;
            }
        }
        Ok(())
    }

    // ─── Skipping ────────────────────────────────────────────────────

    fn skip_to_statement_end(&mut self) {
        while !matches!(
            self.peek(),
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof
        ) {
            self.advance();
        }
    }

    /// Advance to the `:` that opens a block (outside brackets).
    fn skip_to_block_colon(&mut self) -> PResult<()> {
        while !self.check(&TokenKind::Colon) {
            match self.peek().clone() {
                TokenKind::Newline | TokenKind::Eof => return Err(self.error("expected ':'")),
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => self.skip_balanced()?,
                _ => self.advance(),
            }
        }
        Ok(())
    }

    /// Advance to a `:` outside brackets without consuming it.
    fn skip_to_colon(&mut self) -> PResult<()> {
        self.skip_to_block_colon()
    }

    /// Skip a bracketed group, including the closing bracket.
    fn skip_balanced(&mut self) -> PResult<()> {
        let mut depth = 0usize;
        loop {
            match self.peek().clone() {
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth += 1,
                TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        self.advance();
                        return Ok(());
                    }
                }
                TokenKind::Eof => return Err(self.error("unexpected end of input")),
                _ => {}
            }
            self.advance();
        }
    }

    // ─── Cursor ──────────────────────────────────────────────────────

    fn peek(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn peek_next(&self) -> &TokenKind {
        self.tokens
            .get(self.pos + 1)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| Span::new(t.line, t.column))
            .unwrap_or_default()
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        self.eat(&TokenKind::Keyword(keyword))
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> PResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {what}, found {}", describe(self.peek()))))
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> PResult<()> {
        self.expect(
            &TokenKind::Keyword(keyword),
            &format!("'{}'", keyword.as_str()),
        )
    }

    fn expect_name(&mut self) -> PResult<(String, Span)> {
        let span = self.span();
        match self.peek().clone() {
            TokenKind::Name(name) => {
                self.advance();
                Ok((name, span))
            }
            other => Err(self.error(&format!("expected a name, found {}", describe(&other)))),
        }
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof
        )
    }

    fn at_expr_list_end(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Newline
                | TokenKind::Semicolon
                | TokenKind::Eof
                | TokenKind::Eq
                | TokenKind::Colon
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::PlusEq
                | TokenKind::MinusEq
                | TokenKind::StarEq
                | TokenKind::SlashEq
        )
    }

    // ─── Nesting ─────────────────────────────────────────────────────

    /// Run `parse` one level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        self.descend()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn descend(&mut self) -> PResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(&format!(
                "too many nested expressions or blocks (the limit is {MAX_NESTING})"
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn error(&self, message: &str) -> ParseError {
        syntax_at(self.span(), message)
    }
}

fn syntax_at(span: Span, message: &str) -> ParseError {
    ParseError::Syntax {
        message: message.to_string(),
        line: span.line,
        column: span.column,
    }
}

fn binop(left: Expr, op: BinOp, right: Expr) -> Expr {
    let span = left.span;
    Expr::new(
        ExprKind::BinOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
        span,
    )
}

/// Reject assignment to anything that is not a storage location.
fn check_target(target: &Expr) -> PResult<()> {
    match &target.kind {
        ExprKind::Name(_)
        | ExprKind::Attribute { .. }
        | ExprKind::Subscript { .. }
        | ExprKind::Unsupported(_) => Ok(()),
        ExprKind::Tuple(items) | ExprKind::List(items) => items.iter().try_for_each(check_target),
        _ => Err(syntax_at(target.span, "cannot assign to expression")),
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Name(n) => format!("name '{n}'"),
        TokenKind::Number(n) => format!("number {n}"),
        TokenKind::Str(_) => "string literal".to_string(),
        TokenKind::Keyword(k) => format!("keyword '{}'", k.as_str()),
        TokenKind::Newline => "end of line".to_string(),
        TokenKind::Indent => "unexpected indent".to_string(),
        TokenKind::Dedent => "dedent".to_string(),
        TokenKind::Eof => "end of input".to_string(),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_stmt(source: &str) -> StmtKind {
        parse(source).unwrap().body.remove(0).kind
    }

    // ── Statements ──

    #[test]
    fn class_with_params_and_methods() {
        let source = "\
class Rsi(Strategy):
    period = 14

    def init(self):
        self.rsi = self.I(talib.RSI, self.data.Close, self.period)

    def next(self):
        if self.rsi[-1] < 30:
            self.buy()
        elif self.rsi[-1] > 70:
            self.position.close()
";
        let StmtKind::ClassDef(class) = first_stmt(source) else {
            panic!("expected class");
        };
        assert_eq!(class.name, "Rsi");
        assert_eq!(class.bases.len(), 1);
        assert_eq!(class.body.len(), 3);
        let StmtKind::FunctionDef(next) = &class.body[2].kind else {
            panic!("expected def");
        };
        assert_eq!(next.params.len(), 1);
        assert!(matches!(next.body[0].kind, StmtKind::If { .. }));
    }

    #[test]
    fn chained_and_tuple_assignment() {
        let StmtKind::Assign { targets, value } = first_stmt("a = b = 1\n") else {
            panic!()
        };
        assert_eq!(targets.len(), 2);
        assert_eq!(value.kind, ExprKind::Number(1.0));

        let StmtKind::Assign { targets, .. } = first_stmt("x, y = 1, 2\n") else {
            panic!()
        };
        assert!(matches!(targets[0].kind, ExprKind::Tuple(ref t) if t.len() == 2));
    }

    #[test]
    fn imports() {
        let StmtKind::Import(names) = first_stmt("import numpy as np, talib\n") else {
            panic!()
        };
        assert_eq!(names[0].bound_name(), "np");
        assert_eq!(names[1].bound_name(), "talib");

        let StmtKind::ImportFrom { module, names } =
            first_stmt("from backtesting.lib import (crossover,)\n")
        else {
            panic!()
        };
        assert_eq!(module, "backtesting.lib");
        assert_eq!(names[0].name, "crossover");
    }

    #[test]
    fn unsupported_constructs_still_parse() {
        let source = "\
while True:
    pass
try:
    x = 1
except Exception:
    pass
global z
y = lambda a: a + 1
w = [i for i in range(3)]
d = {'a': 1}
";
        let module = parse(source).unwrap();
        let kinds: Vec<_> = module.body.iter().map(|s| &s.kind).collect();
        assert_eq!(kinds[0], &StmtKind::Unsupported("while loop"));
        assert_eq!(kinds[1], &StmtKind::Unsupported("try statement"));
        assert_eq!(kinds[2], &StmtKind::Unsupported("global statement"));
        for (stmt, what) in module.body[3..].iter().zip(["lambda", "list comprehension", "dict or set display"]) {
            let StmtKind::Assign { value, .. } = &stmt.kind else { panic!() };
            assert_eq!(value.kind, ExprKind::Unsupported(what));
        }
    }

    // ── Expressions ──

    #[test]
    fn precedence() {
        let StmtKind::Expr(expr) = first_stmt("1 + 2 * 3 ** 2\n") else { panic!() };
        let ExprKind::BinOp { op, right, .. } = expr.kind else { panic!() };
        assert_eq!(op, BinOp::Add);
        assert!(matches!(right.kind, ExprKind::BinOp { op: BinOp::Mul, .. }));
    }

    #[test]
    fn comparisons_and_membership() {
        let StmtKind::Expr(expr) = first_stmt("a is not None and b not in c\n") else { panic!() };
        let ExprKind::BoolOp { op, values } = expr.kind else { panic!() };
        assert_eq!(op, BoolOp::And);
        assert!(matches!(&values[0].kind, ExprKind::Compare { ops, .. } if ops == &[CmpOp::IsNot]));
        assert!(matches!(&values[1].kind, ExprKind::Compare { ops, .. } if ops == &[CmpOp::NotIn]));
    }

    #[test]
    fn slices_and_keywords() {
        let StmtKind::Expr(expr) = first_stmt("f(x[-5:], n=3)[::2]\n") else { panic!() };
        let ExprKind::Subscript { value, index } = expr.kind else { panic!() };
        assert!(matches!(index.kind, ExprKind::Slice { lower: None, upper: None, step: Some(_) }));
        let ExprKind::Call { args, keywords, .. } = value.kind else { panic!() };
        assert!(matches!(args[0].kind, ExprKind::Subscript { .. }));
        assert_eq!(keywords[0].name, "n");
    }

    // ── Errors ──

    #[test]
    fn syntax_errors_carry_position() {
        let err = parse("x = (1 +\n").unwrap_err();
        assert!(matches!(err, ParseError::Lex(_)));

        let err = parse("def f(:\n    pass\n").unwrap_err();
        assert_eq!(err.line(), 1);

        let err = parse("1 = x\n").unwrap_err();
        assert!(err.to_string().contains("cannot assign"));
    }

    #[test]
    fn missing_indent_is_error() {
        let err = parse("if x:\npass\n").unwrap_err();
        assert!(err.message().contains("indented block"));
    }
}
