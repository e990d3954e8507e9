use crate::ast::*;
use crate::error::{ParseError, ParseResult};
use dojo_lexer::{Span, Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    Or = 0,
    And = 1,
    Equality = 2,
    Comparison = 3,
    Term = 4,
    Factor = 5,
    /// Above every binary operator: it stops the recursion on the right
    /// and makes the levels left-associative.
    Unary = 6,
}

fn infix_op(tok: &TokenKind) -> Option<(Prec, BinOp)> {
    match tok {
        TokenKind::OrOr         => Some((Prec::Or, BinOp::Or)),
        TokenKind::AndAnd       => Some((Prec::And, BinOp::And)),
        TokenKind::EqualEqual   => Some((Prec::Equality, BinOp::Eq)),
        TokenKind::BangEqual    => Some((Prec::Equality, BinOp::Ne)),
        TokenKind::Less         => Some((Prec::Comparison, BinOp::Lt)),
        TokenKind::LessEqual    => Some((Prec::Comparison, BinOp::Le)),
        TokenKind::Greater      => Some((Prec::Comparison, BinOp::Gt)),
        TokenKind::GreaterEqual => Some((Prec::Comparison, BinOp::Ge)),
        TokenKind::Plus         => Some((Prec::Term, BinOp::Add)),
        TokenKind::Minus        => Some((Prec::Term, BinOp::Sub)),
        TokenKind::Star         => Some((Prec::Factor, BinOp::Mul)),
        TokenKind::Slash        => Some((Prec::Factor, BinOp::Div)),
        _ => None,
    }
}

fn next_prec(p: Prec) -> Prec {
    match p {
        Prec::Or => Prec::And,
        Prec::And => Prec::Equality,
        Prec::Equality => Prec::Comparison,
        Prec::Comparison => Prec::Term,
        Prec::Term => Prec::Factor,
        Prec::Factor | Prec::Unary => Prec::Unary,
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    pub errors: Vec<ParseError>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0, errors: Vec::new() }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn current_span(&self) -> Span {
        self.peek().span.clone()
    }

    fn match_tok(&mut self, kind: &TokenKind) -> bool {
        if std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, label: &str) -> ParseResult<Token> {
        if std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind) {
            Ok(self.advance())
        } else if matches!(self.peek_kind(), TokenKind::Eof) {
            Err(ParseError::UnexpectedEof { expected: label.to_string(), span: self.current_span() })
        } else {
            Err(ParseError::UnexpectedToken {
                expected: label.to_string(),
                found: self.peek().lexeme.clone(),
                span: self.current_span(),
            })
        }
    }

    fn expect_identifier(&mut self, label: &str) -> ParseResult<(String, Span)> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(name) => {
                let span = self.current_span();
                self.advance();
                Ok((name, span))
            }
            TokenKind::Eof => Err(ParseError::UnexpectedEof {
                expected: label.to_string(),
                span: self.current_span(),
            }),
            _ => Err(ParseError::UnexpectedToken {
                expected: label.to_string(),
                found: self.peek().lexeme.clone(),
                span: self.current_span(),
            }),
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline) {
            self.advance();
        }
    }

    /// Statements end at a `;` or newline; a closing brace, `else` or EOF
    /// also closes the statement without consuming anything.
    fn terminator(&mut self) -> ParseResult<()> {
        match self.peek_kind() {
            TokenKind::Semicolon | TokenKind::Newline => {
                self.advance();
                Ok(())
            }
            TokenKind::RBrace | TokenKind::Else | TokenKind::Eof => Ok(()),
            _ => Err(ParseError::UnexpectedToken {
                expected: "';' or newline after statement".to_string(),
                found: self.peek().lexeme.clone(),
                span: self.current_span(),
            }),
        }
    }

    /// Records the error and skips ahead to a likely statement boundary so
    /// one mistake does not cascade.
    fn error_stmt(&mut self, err: ParseError) -> Stmt {
        let span = self.current_span();
        self.errors.push(err);
        self.synchronize();
        Node::new(StmtKind::Expr(Node::new(ExprKind::Error, span.clone())), span)
    }

    fn synchronize(&mut self) {
        loop {
            match self.peek_kind() {
                TokenKind::Eof | TokenKind::RBrace => return,
                TokenKind::Semicolon | TokenKind::Newline => {
                    self.advance();
                    return;
                }
                TokenKind::Class
                | TokenKind::Fn
                | TokenKind::Var
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Return => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    // ── Entry point ───────────────────────────────────────────────────────

    pub fn parse(&mut self) -> Program {
        let mut stmts = Vec::new();
        self.skip_boundary();
        while !matches!(self.peek_kind(), TokenKind::Eof) {
            let before = self.pos;
            stmts.push(self.declaration());
            if self.pos == before {
                // an orphan token (e.g. `}` at top level) must not wedge us
                self.advance();
            }
            self.skip_boundary();
        }
        Program { stmts }
    }

    fn skip_boundary(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    // ── Declarations ──────────────────────────────────────────────────────

    fn declaration(&mut self) -> Stmt {
        match self.peek_kind() {
            TokenKind::Var => self.var_declaration(),
            TokenKind::Fn => self.fn_declaration(),
            TokenKind::Class => self.class_declaration(),
            _ => self.statement(),
        }
    }

    fn var_declaration(&mut self) -> Stmt {
        let span = self.current_span();
        self.advance();
        let (name, _) = match self.expect_identifier("variable name") {
            Ok(n) => n,
            Err(e) => return self.error_stmt(e),
        };
        let initializer = if self.match_tok(&TokenKind::Equal) {
            match self.expression() {
                Ok(e) => Some(e),
                Err(e) => return self.error_stmt(e),
            }
        } else {
            None
        };
        if let Err(e) = self.terminator() {
            return self.error_stmt(e);
        }
        Node::new(StmtKind::Var { name, initializer }, span)
    }

    fn fn_declaration(&mut self) -> Stmt {
        let span = self.current_span();
        self.advance();
        let (name, _) = match self.expect_identifier("function name") {
            Ok(n) => n,
            Err(e) => return self.error_stmt(e),
        };
        match self.function_rest(name, span.clone()) {
            Ok(stmt) => stmt,
            Err(e) => self.error_stmt(e),
        }
    }

    /// Parameter list and body, shared between declarations and methods.
    fn function_rest(&mut self, name: String, span: Span) -> ParseResult<Stmt> {
        self.expect(&TokenKind::LParen, "'(' after function name")?;
        let params = self.parameters()?;
        self.expect(&TokenKind::RParen, "')' after parameters")?;
        self.skip_newlines();
        self.expect(&TokenKind::LBrace, "'{' before function body")?;
        let body = self.block_body();
        Ok(Node::new(StmtKind::Fn { name, params, body }, span))
    }

    fn parameters(&mut self) -> ParseResult<Vec<Param>> {
        let mut params = Vec::new();
        self.skip_newlines();
        if matches!(self.peek_kind(), TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            let (name, span) = self.expect_identifier("parameter name")?;
            params.push(Param { name, span });
            if !self.match_tok(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        Ok(params)
    }

    fn class_declaration(&mut self) -> Stmt {
        let span = self.current_span();
        self.advance();
        let (name, _) = match self.expect_identifier("class name") {
            Ok(n) => n,
            Err(e) => return self.error_stmt(e),
        };
        let superclass = if self.match_tok(&TokenKind::Extends) {
            match self.expect_identifier("superclass name") {
                Ok((n, _)) => Some(n),
                Err(e) => return self.error_stmt(e),
            }
        } else {
            None
        };
        self.skip_newlines();
        if let Err(e) = self.expect(&TokenKind::LBrace, "'{' before class body") {
            return self.error_stmt(e);
        }
        let mut methods = Vec::new();
        self.skip_boundary();
        while !matches!(self.peek_kind(), TokenKind::RBrace | TokenKind::Eof) {
            let mspan = self.current_span();
            let method = self
                .expect_identifier("method name")
                .and_then(|(mname, _)| self.function_rest(mname, mspan));
            match method {
                Ok(m) => methods.push(m),
                Err(e) => {
                    methods.push(self.error_stmt(e));
                }
            }
            self.skip_boundary();
        }
        if let Err(e) = self.expect(&TokenKind::RBrace, "'}' after class body") {
            return self.error_stmt(e);
        }
        Node::new(StmtKind::Class { name, superclass, methods }, span)
    }

    // ── Statements ────────────────────────────────────────────────────────

    fn statement(&mut self) -> Stmt {
        let span = self.current_span();
        match self.peek_kind() {
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Return => self.return_statement(),
            TokenKind::Break => {
                self.advance();
                if let Err(e) = self.terminator() {
                    return self.error_stmt(e);
                }
                Node::new(StmtKind::Break, span)
            }
            TokenKind::Continue => {
                self.advance();
                if let Err(e) = self.terminator() {
                    return self.error_stmt(e);
                }
                Node::new(StmtKind::Continue, span)
            }
            TokenKind::LBrace => {
                self.advance();
                let stmts = self.block_body();
                Node::new(StmtKind::Block(stmts), span)
            }
            _ => self.expression_statement(),
        }
    }

    /// Parses statements up to (and including) the closing brace.
    fn block_body(&mut self) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        self.skip_boundary();
        while !matches!(self.peek_kind(), TokenKind::RBrace | TokenKind::Eof) {
            stmts.push(self.declaration());
            self.skip_boundary();
        }
        if let Err(e) = self.expect(&TokenKind::RBrace, "'}' after block") {
            self.errors.push(e);
        }
        stmts
    }

    fn if_statement(&mut self) -> Stmt {
        let span = self.current_span();
        self.advance();
        let parsed = self.expect(&TokenKind::LParen, "'(' after 'if'").and_then(|_| {
            let condition = self.expression()?;
            self.expect(&TokenKind::RParen, "')' after condition")?;
            Ok(condition)
        });
        let condition = match parsed {
            Ok(c) => c,
            Err(e) => return self.error_stmt(e),
        };
        self.skip_newlines();
        let then_branch = Box::new(self.statement());
        self.skip_boundary();
        let else_branch = if self.match_tok(&TokenKind::Else) {
            self.skip_newlines();
            Some(Box::new(self.statement()))
        } else {
            None
        };
        Node::new(StmtKind::If { condition, then_branch, else_branch }, span)
    }

    fn while_statement(&mut self) -> Stmt {
        let span = self.current_span();
        self.advance();
        let parsed = self.expect(&TokenKind::LParen, "'(' after 'while'").and_then(|_| {
            let condition = self.expression()?;
            self.expect(&TokenKind::RParen, "')' after condition")?;
            Ok(condition)
        });
        let condition = match parsed {
            Ok(c) => c,
            Err(e) => return self.error_stmt(e),
        };
        self.skip_newlines();
        let body = Box::new(self.statement());
        Node::new(StmtKind::While { condition, body }, span)
    }

    fn for_statement(&mut self) -> Stmt {
        let span = self.current_span();
        self.advance();
        if let Err(e) = self.expect(&TokenKind::LParen, "'(' after 'for'") {
            return self.error_stmt(e);
        }

        let init = if self.match_tok(&TokenKind::Semicolon) {
            None
        } else if matches!(self.peek_kind(), TokenKind::Var) {
            Some(Box::new(self.var_declaration()))
        } else {
            let ispan = self.current_span();
            match self.expression().and_then(|e| {
                self.expect(&TokenKind::Semicolon, "';' after loop initializer")?;
                Ok(e)
            }) {
                Ok(e) => Some(Box::new(Node::new(StmtKind::Expr(e), ispan))),
                Err(e) => return self.error_stmt(e),
            }
        };

        let condition = if matches!(self.peek_kind(), TokenKind::Semicolon) {
            None
        } else {
            match self.expression() {
                Ok(e) => Some(e),
                Err(e) => return self.error_stmt(e),
            }
        };
        if let Err(e) = self.expect(&TokenKind::Semicolon, "';' after loop condition") {
            return self.error_stmt(e);
        }

        let increment = if matches!(self.peek_kind(), TokenKind::RParen) {
            None
        } else {
            match self.expression() {
                Ok(e) => Some(e),
                Err(e) => return self.error_stmt(e),
            }
        };
        if let Err(e) = self.expect(&TokenKind::RParen, "')' after for clauses") {
            return self.error_stmt(e);
        }

        self.skip_newlines();
        let body = Box::new(self.statement());
        Node::new(StmtKind::For { init, condition, increment, body }, span)
    }

    fn return_statement(&mut self) -> Stmt {
        let span = self.current_span();
        self.advance();
        let value = if matches!(
            self.peek_kind(),
            TokenKind::Semicolon | TokenKind::Newline | TokenKind::RBrace | TokenKind::Eof
        ) {
            None
        } else {
            match self.expression() {
                Ok(e) => Some(e),
                Err(e) => return self.error_stmt(e),
            }
        };
        if let Err(e) = self.terminator() {
            return self.error_stmt(e);
        }
        Node::new(StmtKind::Return(value), span)
    }

    fn expression_statement(&mut self) -> Stmt {
        let span = self.current_span();
        match self.expression().and_then(|e| {
            self.terminator()?;
            Ok(e)
        }) {
            Ok(e) => Node::new(StmtKind::Expr(e), span),
            Err(e) => self.error_stmt(e),
        }
    }

    // ── Expressions ───────────────────────────────────────────────────────

    fn expression(&mut self) -> ParseResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> ParseResult<Expr> {
        let expr = self.ternary()?;
        if self.match_tok(&TokenKind::Equal) {
            let span = expr.span.clone();
            let value = self.assignment()?;
            return match &expr.inner {
                ExprKind::Var(_) | ExprKind::Property { .. } => Ok(Node::new(
                    ExprKind::Assign { target: Box::new(expr), value: Box::new(value) },
                    span,
                )),
                _ => Err(ParseError::InvalidAssignTarget { span }),
            };
        }
        Ok(expr)
    }

    fn ternary(&mut self) -> ParseResult<Expr> {
        let condition = self.binary(Prec::Or)?;
        if self.match_tok(&TokenKind::Question) {
            let span = condition.span.clone();
            let then_branch = self.expression()?;
            self.expect(&TokenKind::Colon, "':' in ternary expression")?;
            let else_branch = self.ternary()?;
            return Ok(Node::new(
                ExprKind::Ternary {
                    condition: Box::new(condition),
                    then_branch: Box::new(then_branch),
                    else_branch: Box::new(else_branch),
                },
                span,
            ));
        }
        Ok(condition)
    }

    fn binary(&mut self, min: Prec) -> ParseResult<Expr> {
        let mut lhs = self.unary()?;
        while let Some((prec, op)) = infix_op(self.peek_kind()) {
            if prec < min {
                break;
            }
            let span = self.current_span();
            self.advance();
            let rhs = self.binary(next_prec(prec))?;
            lhs = Node::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, span);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let span = self.current_span();
        let op = match self.peek_kind() {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Bang => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.unary()?;
            return Ok(Node::new(ExprKind::Unary { op, operand: Box::new(operand) }, span));
        }
        self.call()
    }

    fn call(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.match_tok(&TokenKind::LParen) {
                let span = expr.span.clone();
                let args = self.arguments()?;
                expr = Node::new(ExprKind::Call { callee: Box::new(expr), args }, span);
            } else if self.match_tok(&TokenKind::Dot) {
                let span = expr.span.clone();
                let (name, _) = self.expect_identifier("property name after '.'")?;
                expr = Node::new(ExprKind::Property { object: Box::new(expr), name }, span);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn arguments(&mut self) -> ParseResult<Vec<Expr>> {
        let mut args = Vec::new();
        self.skip_newlines();
        if self.match_tok(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if !self.match_tok(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.skip_newlines();
        self.expect(&TokenKind::RParen, "')' after arguments")?;
        Ok(args)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let span = self.current_span();
        match self.peek_kind().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Node::new(ExprKind::Number(n), span))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Node::new(ExprKind::Str(s), span))
            }
            TokenKind::TemplateHead(head) => {
                self.advance();
                self.template(head, span)
            }
            TokenKind::True => {
                self.advance();
                Ok(Node::new(ExprKind::True, span))
            }
            TokenKind::False => {
                self.advance();
                Ok(Node::new(ExprKind::False, span))
            }
            TokenKind::Nil => {
                self.advance();
                Ok(Node::new(ExprKind::Nil, span))
            }
            TokenKind::This => {
                self.advance();
                Ok(Node::new(ExprKind::This, span))
            }
            TokenKind::Super => {
                self.advance();
                self.expect(&TokenKind::Dot, "'.' after 'super'")?;
                let (method, _) = self.expect_identifier("superclass method name")?;
                Ok(Node::new(ExprKind::Super { method }, span))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Node::new(ExprKind::Var(name), span))
            }
            TokenKind::LParen => {
                self.advance();
                self.skip_newlines();
                let expr = self.expression()?;
                self.skip_newlines();
                self.expect(&TokenKind::RParen, "')' after expression")?;
                Ok(expr)
            }
            TokenKind::Eof => Err(ParseError::UnexpectedEof {
                expected: "expression".to_string(),
                span,
            }),
            _ => Err(ParseError::UnexpectedToken {
                expected: "expression".to_string(),
                found: self.peek().lexeme.clone(),
                span,
            }),
        }
    }

    /// The head literal was already consumed; each interpolated expression
    /// is followed by its trailing literal fragment (middle or tail).
    fn template(&mut self, head: String, span: Span) -> ParseResult<Expr> {
        let mut spans = Vec::new();
        loop {
            let expr = self.expression()?;
            match self.peek_kind().clone() {
                TokenKind::TemplateMiddle(frag) => {
                    self.advance();
                    spans.push((expr, frag));
                }
                TokenKind::TemplateTail(frag) => {
                    self.advance();
                    spans.push((expr, frag));
                    break;
                }
                TokenKind::Eof => {
                    return Err(ParseError::UnexpectedEof {
                        expected: "'}' in template string".to_string(),
                        span: self.current_span(),
                    });
                }
                _ => {
                    return Err(ParseError::UnexpectedToken {
                        expected: "'}' in template string".to_string(),
                        found: self.peek().lexeme.clone(),
                        span: self.current_span(),
                    });
                }
            }
        }
        Ok(Node::new(ExprKind::Template { head, spans }, span))
    }
}
