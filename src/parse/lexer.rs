//! Tokenizer for the rule language.
//!
//! Handles path identifiers (`gov/irs/eitc/rate` — a `/` glued between
//! identifier characters extends the path; a spaced `/` is division),
//! numeric literals with `%` suffix and `$` prefix normalized to plain
//! numbers, `YYYY-MM-DD` date literals, and double-quoted strings.

use chrono::NaiveDate;

use super::error::SyntaxError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    Variable,
    Parameter,
    Entity,
    Amend,
    Repeal,
    From,
    To,
    Known,
    Citation,
    Type,
    Key,
    Parent,
    Via,
    If,
    Else,
    And,
    Or,
    Not,
    True,
    False,
    // Literals and names
    Ident(String),
    Number(f64),
    Date(NaiveDate),
    Str(String),
    // Punctuation
    Plus,
    Minus,
    Star,
    Slash,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    Ne,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Colon,
    Comma,
    Eof,
}

impl Token {
    /// Short human-readable description for error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("'{name}'"),
            Token::Number(n) => format!("number {n}"),
            Token::Date(d) => format!("date {d}"),
            Token::Str(_) => "string literal".into(),
            Token::Eof => "end of input".into(),
            Token::Variable => "'variable'".into(),
            Token::Parameter => "'parameter'".into(),
            Token::Entity => "'entity'".into(),
            Token::Amend => "'amend'".into(),
            Token::Repeal => "'repeal'".into(),
            Token::From => "'from'".into(),
            Token::To => "'to'".into(),
            Token::Known => "'known'".into(),
            Token::Citation => "'citation'".into(),
            Token::Type => "'type'".into(),
            Token::Key => "'key'".into(),
            Token::Parent => "'parent'".into(),
            Token::Via => "'via'".into(),
            Token::If => "'if'".into(),
            Token::Else => "'else'".into(),
            Token::And => "'and'".into(),
            Token::Or => "'or'".into(),
            Token::Not => "'not'".into(),
            Token::True => "'true'".into(),
            Token::False => "'false'".into(),
            Token::Plus => "'+'".into(),
            Token::Minus => "'-'".into(),
            Token::Star => "'*'".into(),
            Token::Slash => "'/'".into(),
            Token::Lt => "'<'".into(),
            Token::Gt => "'>'".into(),
            Token::Le => "'<='".into(),
            Token::Ge => "'>='".into(),
            Token::EqEq => "'=='".into(),
            Token::Ne => "'!='".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::LBrace => "'{'".into(),
            Token::RBrace => "'}'".into(),
            Token::Colon => "':'".into(),
            Token::Comma => "','".into(),
        }
    }
}

/// A token with its source position (1-based line and column).
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub tok: Token,
    pub line: u32,
    pub col: u32,
}

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
}

impl Lexer {
    pub fn new(src: &str) -> Self {
        Lexer { chars: src.chars().collect(), pos: 0, line: 1, col: 1 }
    }

    pub fn tokenize(mut self) -> Result<Vec<Spanned>, SyntaxError> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia();
            let (line, col) = (self.line, self.col);
            let Some(c) = self.peek() else {
                out.push(Spanned { tok: Token::Eof, line, col });
                return Ok(out);
            };
            let tok = self.next_token(c, line, col)?;
            out.push(Spanned { tok, line, col });
        }
    }

    fn next_token(&mut self, c: char, line: u32, col: u32) -> Result<Token, SyntaxError> {
        match c {
            '0'..='9' => self.number_or_date(line, col),
            '$' => {
                self.bump();
                self.currency_number(line, col)
            }
            'a'..='z' | 'A'..='Z' | '_' => Ok(self.ident_or_keyword()),
            '"' => self.string_literal(line, col),
            '+' => self.single(Token::Plus),
            '-' => self.single(Token::Minus),
            '*' => self.single(Token::Star),
            '/' => self.single(Token::Slash),
            '(' => self.single(Token::LParen),
            ')' => self.single(Token::RParen),
            '{' => self.single(Token::LBrace),
            '}' => self.single(Token::RBrace),
            ':' => self.single(Token::Colon),
            ',' => self.single(Token::Comma),
            '<' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Ok(Token::Le)
                } else {
                    Ok(Token::Lt)
                }
            }
            '>' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Ok(Token::Ge)
                } else {
                    Ok(Token::Gt)
                }
            }
            '=' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Ok(Token::EqEq)
                } else {
                    Err(SyntaxError::new(line, col, "'=='", "'='"))
                }
            }
            '!' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Ok(Token::Ne)
                } else {
                    Err(SyntaxError::new(line, col, "'!='", "'!'"))
                }
            }
            other => Err(SyntaxError::new(line, col, "a token", format!("'{other}'"))),
        }
    }

    fn single(&mut self, tok: Token) -> Result<Token, SyntaxError> {
        self.bump();
        Ok(tok)
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c == '#' {
                while self.peek().map_or(false, |c| c != '\n') {
                    self.bump();
                }
            } else if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        if let Some(c) = c {
            self.pos += 1;
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        c
    }

    fn ident_or_keyword(&mut self) -> Token {
        let first = self.segment();
        // A '/' glued directly between identifier characters continues a
        // path; keywords never contain '/'.
        if self.peek() == Some('/') && self.peek_at(1).map_or(false, is_ident_start) {
            let mut path = first;
            while self.peek() == Some('/') && self.peek_at(1).map_or(false, is_ident_start) {
                self.bump();
                path.push('/');
                path.push_str(&self.segment());
            }
            return Token::Ident(path);
        }
        match first.as_str() {
            "variable" => Token::Variable,
            "parameter" => Token::Parameter,
            "entity" => Token::Entity,
            "amend" => Token::Amend,
            "repeal" => Token::Repeal,
            "from" => Token::From,
            "to" => Token::To,
            "known" => Token::Known,
            "citation" => Token::Citation,
            "type" => Token::Type,
            "key" => Token::Key,
            "parent" => Token::Parent,
            "via" => Token::Via,
            "if" => Token::If,
            "else" => Token::Else,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "true" => Token::True,
            "false" => Token::False,
            _ => Token::Ident(first),
        }
    }

    fn segment(&mut self) -> String {
        let mut s = String::new();
        while self.peek().map_or(false, is_ident_continue) {
            s.push(self.bump().unwrap());
        }
        s
    }

    /// A run of digits that looks like `YYYY-MM-DD` lexes as a date;
    /// otherwise it is a number with optional decimal part and `%` suffix.
    fn number_or_date(&mut self, line: u32, col: u32) -> Result<Token, SyntaxError> {
        if self.looks_like_date() {
            let mut text = String::new();
            for _ in 0..10 {
                text.push(self.bump().unwrap());
            }
            let date = text.parse::<NaiveDate>().map_err(|_| {
                SyntaxError::new(line, col, "a valid YYYY-MM-DD date", format!("'{text}'"))
            })?;
            return Ok(Token::Date(date));
        }

        let mut text = String::new();
        while self.peek().map_or(false, |c| c.is_ascii_digit()) {
            text.push(self.bump().unwrap());
        }
        if self.peek() == Some('.') && self.peek_at(1).map_or(false, |c| c.is_ascii_digit()) {
            text.push(self.bump().unwrap());
            while self.peek().map_or(false, |c| c.is_ascii_digit()) {
                text.push(self.bump().unwrap());
            }
        }
        let mut value: f64 = text
            .parse()
            .map_err(|_| SyntaxError::new(line, col, "a number", format!("'{text}'")))?;
        if self.peek() == Some('%') {
            self.bump();
            value /= 100.0;
        }
        Ok(Token::Number(value))
    }

    fn looks_like_date(&self) -> bool {
        let digit = |i| self.peek_at(i).map_or(false, |c: char| c.is_ascii_digit());
        let dash = |i| self.peek_at(i) == Some('-');
        digit(0) && digit(1) && digit(2) && digit(3) && dash(4) && digit(5) && digit(6) && dash(7) && digit(8) && digit(9)
    }

    /// After a `$`: digits with optional thousands commas and decimal part,
    /// normalized to a plain number.
    fn currency_number(&mut self, line: u32, col: u32) -> Result<Token, SyntaxError> {
        let mut text = String::new();
        while self
            .peek()
            .map_or(false, |c| c.is_ascii_digit() || c == ',')
        {
            let c = self.bump().unwrap();
            if c != ',' {
                text.push(c);
            }
        }
        if self.peek() == Some('.') && self.peek_at(1).map_or(false, |c| c.is_ascii_digit()) {
            text.push(self.bump().unwrap());
            while self.peek().map_or(false, |c| c.is_ascii_digit()) {
                text.push(self.bump().unwrap());
            }
        }
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| SyntaxError::new(line, col, "an amount after '$'", format!("'${text}'")))
    }

    fn string_literal(&mut self, line: u32, col: u32) -> Result<Token, SyntaxError> {
        self.bump(); // opening quote
        let mut s = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(Token::Str(s)),
                Some('\\') => match self.bump() {
                    Some('"') => s.push('"'),
                    Some('\\') => s.push('\\'),
                    Some('n') => s.push('\n'),
                    other => {
                        return Err(SyntaxError::new(
                            line,
                            col,
                            "a valid escape",
                            other.map_or("end of input".into(), |c| format!("'\\{c}'")),
                        ))
                    }
                },
                Some(c) => s.push(c),
                None => return Err(SyntaxError::new(line, col, "closing '\"'", "end of input")),
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
