//! Recursive-descent parser with one token of lookahead.
//!
//! Expression parsing is precedence climbing; declarations are driven by
//! their leading keyword. The parser only builds the AST — reference
//! validation and temporal resolution belong to the compiler.

use chrono::{Days, NaiveDate};

use super::error::SyntaxError;
use super::lexer::{Spanned, Token};
use crate::ast::{
    AggregateOp, AmendDecl, BinaryOp, Builtin, EntityDecl, Expr, FieldDecl, Module, ParameterDecl,
    ParentLink, RepealDecl, UnaryOp, ValueClause, ValueType, VariableDecl,
};

pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Parser { tokens, pos: 0 }
    }

    pub fn parse_module(&mut self) -> Result<Module, SyntaxError> {
        let mut module = Module::default();
        loop {
            match self.peek() {
                Token::Eof => return Ok(module),
                Token::Variable => module.variables.push(self.variable_decl()?),
                Token::Parameter => module.parameters.push(self.parameter_decl()?),
                Token::Entity => module.entities.push(self.entity_decl()?),
                Token::Amend => module.amendments.push(self.amend_decl()?),
                Token::Repeal => module.repeals.push(self.repeal_decl()?),
                _ => return Err(self.unexpected("a declaration keyword")),
            }
        }
    }

    // --- Declarations ---

    fn variable_decl(&mut self) -> Result<VariableDecl, SyntaxError> {
        self.bump(); // 'variable'
        let path = self.ident("a variable path")?;
        self.expect(Token::Colon)?;

        let mut decl = VariableDecl { path, entity: None, ty: None, citation: None, clauses: Vec::new() };
        loop {
            match self.peek() {
                // `entity` opens both the scope clause (`entity: person`) and
                // a new top-level declaration (`entity person:`); the token
                // after it decides which.
                Token::Entity if self.peek_at(1) == &Token::Colon => {
                    self.bump();
                    self.bump();
                    decl.entity = Some(self.ident("an entity name")?);
                }
                Token::Type => {
                    self.bump();
                    self.expect(Token::Colon)?;
                    decl.ty = Some(self.type_name()?);
                }
                Token::Citation => {
                    self.bump();
                    self.expect(Token::Colon)?;
                    decl.citation = Some(self.string("a citation string")?);
                }
                Token::From => decl.clauses.push(self.value_clause()?),
                _ => break,
            }
        }
        if decl.clauses.is_empty() {
            return Err(self.unexpected("at least one 'from' clause"));
        }
        Ok(decl)
    }

    fn parameter_decl(&mut self) -> Result<ParameterDecl, SyntaxError> {
        self.bump(); // 'parameter'
        let path = self.ident("a parameter path")?;
        self.expect(Token::Colon)?;

        let mut decl = ParameterDecl { path, ty: None, citation: None, clauses: Vec::new() };
        loop {
            match self.peek() {
                Token::Type => {
                    self.bump();
                    self.expect(Token::Colon)?;
                    decl.ty = Some(self.type_name()?);
                }
                Token::Citation => {
                    self.bump();
                    self.expect(Token::Colon)?;
                    decl.citation = Some(self.string("a citation string")?);
                }
                Token::From => decl.clauses.push(self.value_clause()?),
                _ => break,
            }
        }
        if decl.clauses.is_empty() {
            return Err(self.unexpected("at least one 'from' clause"));
        }
        Ok(decl)
    }

    fn entity_decl(&mut self) -> Result<EntityDecl, SyntaxError> {
        self.bump(); // 'entity'
        let name = self.ident("an entity name")?;
        self.expect(Token::Colon)?;

        let mut decl = EntityDecl { name, key: "id".into(), parent: None, fields: Vec::new() };
        loop {
            match self.peek() {
                Token::Key => {
                    self.bump();
                    self.expect(Token::Colon)?;
                    decl.key = self.ident("a key field name")?;
                }
                Token::Parent => {
                    self.bump();
                    self.expect(Token::Colon)?;
                    let entity = self.ident("a parent entity name")?;
                    self.expect(Token::Via)?;
                    let fk_field = self.ident("a foreign-key field name")?;
                    decl.parent = Some(ParentLink { entity, fk_field });
                }
                Token::Ident(_) if self.peek_at(1) == &Token::Colon => {
                    let name = self.ident("a field name")?;
                    self.bump(); // ':'
                    let ty = self.type_name()?;
                    decl.fields.push(FieldDecl { name, ty });
                }
                _ => break,
            }
        }
        Ok(decl)
    }

    fn amend_decl(&mut self) -> Result<AmendDecl, SyntaxError> {
        self.bump(); // 'amend'
        let target = self.ident("an amendment target path")?;
        self.expect(Token::Colon)?;

        let mut decl = AmendDecl { target, known: None, clauses: Vec::new() };
        if self.peek() == &Token::Known {
            self.bump();
            decl.known = Some(self.date("the amendment's enactment date")?);
        }
        while self.peek() == &Token::From {
            decl.clauses.push(self.value_clause()?);
        }
        if decl.clauses.is_empty() {
            return Err(self.unexpected("at least one 'from' clause"));
        }
        Ok(decl)
    }

    fn repeal_decl(&mut self) -> Result<RepealDecl, SyntaxError> {
        self.bump(); // 'repeal'
        let target = self.ident("a repeal target path")?;
        self.expect(Token::Colon)?;
        self.expect(Token::From)?;
        let from = self.date("the repeal's effective date")?;
        Ok(RepealDecl { target, from })
    }

    /// `from DATE [to DATE]: expr` — the inclusive `to` becomes an exclusive
    /// end (the following day).
    fn value_clause(&mut self) -> Result<ValueClause, SyntaxError> {
        self.expect(Token::From)?;
        let from = self.date("an effective date")?;
        let to = if self.peek() == &Token::To {
            self.bump();
            let last = self.date("an end date")?;
            Some(last.checked_add_days(Days::new(1)).unwrap_or(last))
        } else {
            None
        };
        self.expect(Token::Colon)?;
        let expr = self.expr()?;
        Ok(ValueClause { from, to, expr })
    }

    fn type_name(&mut self) -> Result<ValueType, SyntaxError> {
        let (line, col) = self.position();
        let name = self.ident("a type name")?;
        match name.as_str() {
            "int" => Ok(ValueType::Int),
            "float" => Ok(ValueType::Float),
            "bool" => Ok(ValueType::Bool),
            "money" => Ok(ValueType::Money),
            "rate" => Ok(ValueType::Rate),
            other => Err(SyntaxError::new(
                line,
                col,
                "one of int, float, bool, money, rate",
                format!("'{other}'"),
            )),
        }
    }

    // --- Expressions (precedence climbing) ---

    pub fn expr(&mut self) -> Result<Expr, SyntaxError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.and_expr()?;
        while self.peek() == &Token::Or {
            self.bump();
            let right = self.and_expr()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.not_expr()?;
        while self.peek() == &Token::And {
            self.bump();
            let right = self.not_expr()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, SyntaxError> {
        if self.peek() == &Token::Not {
            self.bump();
            let operand = self.not_expr()?;
            return Ok(Expr::Unary { op: UnaryOp::Not, operand: Box::new(operand) });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        let left = self.additive()?;
        let op = match self.peek() {
            Token::Lt => BinaryOp::Lt,
            Token::Gt => BinaryOp::Gt,
            Token::Le => BinaryOp::Le,
            Token::Ge => BinaryOp::Ge,
            Token::EqEq => BinaryOp::Eq,
            Token::Ne => BinaryOp::Ne,
            _ => return Ok(left),
        };
        self.bump();
        let right = self.additive()?;
        Ok(binary(op, left, right))
    }

    fn additive(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.unary()?;
            left = binary(op, left, right);
        }
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        if self.peek() == &Token::Minus {
            self.bump();
            let operand = self.unary()?;
            return Ok(Expr::Unary { op: UnaryOp::Neg, operand: Box::new(operand) });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.bump();
                Ok(Expr::Number(n))
            }
            Token::True => {
                self.bump();
                Ok(Expr::Bool(true))
            }
            Token::False => {
                self.bump();
                Ok(Expr::Bool(false))
            }
            Token::LParen => {
                self.bump();
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBrace => self.bracket_literal(),
            Token::If => self.conditional(),
            Token::Ident(name) => {
                self.bump();
                if self.peek() == &Token::LParen {
                    self.call(name)
                } else {
                    Ok(Expr::Ref(name))
                }
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// `if cond: a else if cond2: b else: c` — `else` is mandatory so the
    /// expression always has a value.
    fn conditional(&mut self) -> Result<Expr, SyntaxError> {
        self.expect(Token::If)?;
        let cond = self.expr()?;
        self.expect(Token::Colon)?;
        let then = self.expr()?;
        self.expect(Token::Else)?;
        let otherwise = if self.peek() == &Token::If {
            self.conditional()?
        } else {
            self.expect(Token::Colon)?;
            self.expr()?
        };
        Ok(Expr::If {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    /// `{ threshold: rate, threshold: rate, ... }`
    fn bracket_literal(&mut self) -> Result<Expr, SyntaxError> {
        self.expect(Token::LBrace)?;
        let mut pairs = Vec::new();
        loop {
            let threshold = self.number("a bracket threshold")?;
            self.expect(Token::Colon)?;
            let rate = self.number("a bracket rate")?;
            pairs.push((threshold, rate));
            if self.peek() == &Token::Comma {
                self.bump();
            } else {
                break;
            }
        }
        self.expect(Token::RBrace)?;
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(Expr::Brackets(pairs))
    }

    /// Either an aggregation (`sum(child: body)`) or a builtin call
    /// (`min(a, b)`). The `ident ':'` right after `(` marks an aggregation.
    fn call(&mut self, name: String) -> Result<Expr, SyntaxError> {
        let (line, col) = self.position();
        self.expect(Token::LParen)?;

        let aggregation_form = matches!(self.peek(), Token::Ident(_)) && self.peek_at(1) == &Token::Colon;
        if aggregation_form {
            let op = match name.as_str() {
                "sum" => AggregateOp::Sum,
                "any" => AggregateOp::Any,
                "max" => AggregateOp::Max,
                "min" => AggregateOp::Min,
                other => {
                    return Err(SyntaxError::new(
                        line,
                        col,
                        "an aggregation (sum, any, max, min)",
                        format!("'{other}'"),
                    ))
                }
            };
            let entity = self.ident("a child entity name")?;
            self.expect(Token::Colon)?;
            let body = self.expr()?;
            self.expect(Token::RParen)?;
            return Ok(Expr::Aggregate { op, entity, body: Box::new(body) });
        }

        let func = match name.as_str() {
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "abs" => Builtin::Abs,
            "round" => Builtin::Round,
            "clip" => Builtin::Clip,
            "defined" => Builtin::Defined,
            "bracket_rate" => Builtin::BracketRate,
            "bracket_tax" => Builtin::BracketTax,
            other => {
                return Err(SyntaxError::new(line, col, "a builtin function name", format!("'{other}'")))
            }
        };

        let mut args = Vec::new();
        if self.peek() != &Token::RParen {
            args.push(self.expr()?);
            while self.peek() == &Token::Comma {
                self.bump();
                args.push(self.expr()?);
            }
        }
        self.expect(Token::RParen)?;

        if args.len() != func.arity() {
            return Err(SyntaxError::new(
                line,
                col,
                format!("{} argument(s) to '{name}'", func.arity()),
                format!("{}", args.len()),
            ));
        }
        Ok(Expr::Call { func, args })
    }

    // --- Token plumbing ---

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].tok
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].tok
    }

    fn position(&self) -> (u32, u32) {
        let s = &self.tokens[self.pos];
        (s.line, s.col)
    }

    fn bump(&mut self) -> &Spanned {
        let s = &self.tokens[self.pos];
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        s
    }

    fn expect(&mut self, want: Token) -> Result<(), SyntaxError> {
        if self.peek() == &want {
            self.bump();
            Ok(())
        } else {
            Err(self.unexpected(want.describe()))
        }
    }

    fn ident(&mut self, expected: &str) -> Result<String, SyntaxError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.bump();
                Ok(name)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn number(&mut self, expected: &str) -> Result<f64, SyntaxError> {
        match *self.peek() {
            Token::Number(n) => {
                self.bump();
                Ok(n)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn date(&mut self, expected: &str) -> Result<NaiveDate, SyntaxError> {
        match *self.peek() {
            Token::Date(d) => {
                self.bump();
                Ok(d)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn string(&mut self, expected: &str) -> Result<String, SyntaxError> {
        match self.peek().clone() {
            Token::Str(s) => {
                self.bump();
                Ok(s)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn unexpected(&self, expected: impl Into<String>) -> SyntaxError {
        let s = &self.tokens[self.pos];
        SyntaxError::new(s.line, s.col, expected, s.tok.describe())
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary { op, left: Box::new(left), right: Box::new(right) }
}
