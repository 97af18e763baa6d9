//! Strategy script lexer
//!
//! Turns source text into a flat token stream. Block structure is carried
//! by explicit `Newline`, `Indent` and `Dedent` tokens computed from leading
//! whitespace, so the parser never looks at columns.
//!
//! Inside brackets, line breaks and indentation are insignificant.

use thiserror::Error;

/// Token kinds in strategy scripts
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(String),
    Number(f64),
    Str(String),
    Keyword(Keyword),

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    At,
    Arrow,
    Semicolon,

    // Operators
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Eq,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    Tilde,
    Amp,
    Pipe,
    Caret,

    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

/// Reserved words. Only some of them are part of the supported subset; the
/// rest are recognized so the checker can report them by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    False,
    None,
    True,
    And,
    As,
    Assert,
    Async,
    Await,
    Break,
    Class,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    Lambda,
    Nonlocal,
    Not,
    Or,
    Pass,
    Raise,
    Return,
    Try,
    While,
    With,
    Yield,
}

impl Keyword {
    fn from_word(word: &str) -> Option<Self> {
        Some(match word {
            "False" => Keyword::False,
            "None" => Keyword::None,
            "True" => Keyword::True,
            "and" => Keyword::And,
            "as" => Keyword::As,
            "assert" => Keyword::Assert,
            "async" => Keyword::Async,
            "await" => Keyword::Await,
            "break" => Keyword::Break,
            "class" => Keyword::Class,
            "continue" => Keyword::Continue,
            "def" => Keyword::Def,
            "del" => Keyword::Del,
            "elif" => Keyword::Elif,
            "else" => Keyword::Else,
            "except" => Keyword::Except,
            "finally" => Keyword::Finally,
            "for" => Keyword::For,
            "from" => Keyword::From,
            "global" => Keyword::Global,
            "if" => Keyword::If,
            "import" => Keyword::Import,
            "in" => Keyword::In,
            "is" => Keyword::Is,
            "lambda" => Keyword::Lambda,
            "nonlocal" => Keyword::Nonlocal,
            "not" => Keyword::Not,
            "or" => Keyword::Or,
            "pass" => Keyword::Pass,
            "raise" => Keyword::Raise,
            "return" => Keyword::Return,
            "try" => Keyword::Try,
            "while" => Keyword::While,
            "with" => Keyword::With,
            "yield" => Keyword::Yield,
            _ => return None,
        })
    }

    pub fn is_keyword(word: &str) -> bool {
        Self::from_word(word).is_some()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::False => "False",
            Keyword::None => "None",
            Keyword::True => "True",
            Keyword::And => "and",
            Keyword::As => "as",
            Keyword::Assert => "assert",
            Keyword::Async => "async",
            Keyword::Await => "await",
            Keyword::Break => "break",
            Keyword::Class => "class",
            Keyword::Continue => "continue",
            Keyword::Def => "def",
            Keyword::Del => "del",
            Keyword::Elif => "elif",
            Keyword::Else => "else",
            Keyword::Except => "except",
            Keyword::Finally => "finally",
            Keyword::For => "for",
            Keyword::From => "from",
            Keyword::Global => "global",
            Keyword::If => "if",
            Keyword::Import => "import",
            Keyword::In => "in",
            Keyword::Is => "is",
            Keyword::Lambda => "lambda",
            Keyword::Nonlocal => "nonlocal",
            Keyword::Not => "not",
            Keyword::Or => "or",
            Keyword::Pass => "pass",
            Keyword::Raise => "raise",
            Keyword::Return => "return",
            Keyword::Try => "try",
            Keyword::While => "while",
            Keyword::With => "with",
            Keyword::Yield => "yield",
        }
    }
}

/// A token with position information (1-based line and column)
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, line: usize, column: usize) -> Self {
        Self { kind, line, column }
    }
}

/// Lexer error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexError {
    #[error("unexpected character '{ch}' at line {line}, column {column}")]
    UnexpectedChar { ch: char, line: usize, column: usize },

    #[error("invalid number '{text}' at line {line}, column {column}")]
    InvalidNumber {
        text: String,
        line: usize,
        column: usize,
    },

    #[error("unterminated string starting at line {line}, column {column}")]
    UnterminatedString { line: usize, column: usize },

    #[error("{kind} strings are not supported (line {line}, column {column})")]
    UnsupportedStringPrefix {
        kind: &'static str,
        line: usize,
        column: usize,
    },

    #[error("unindent does not match any outer indentation level (line {line})")]
    InconsistentDedent { line: usize },

    #[error("unmatched '{ch}' at line {line}, column {column}")]
    UnmatchedBracket { ch: char, line: usize, column: usize },
}

impl LexError {
    pub fn line(&self) -> usize {
        match self {
            LexError::UnexpectedChar { line, .. }
            | LexError::InvalidNumber { line, .. }
            | LexError::UnterminatedString { line, .. }
            | LexError::UnsupportedStringPrefix { line, .. }
            | LexError::InconsistentDedent { line }
            | LexError::UnmatchedBracket { line, .. } => *line,
        }
    }

    pub fn column(&self) -> usize {
        match self {
            LexError::UnexpectedChar { column, .. }
            | LexError::InvalidNumber { column, .. }
            | LexError::UnterminatedString { column, .. }
            | LexError::UnsupportedStringPrefix { column, .. }
            | LexError::UnmatchedBracket { column, .. } => *column,
            LexError::InconsistentDedent { .. } => 1,
        }
    }
}

/// Lexer for strategy scripts
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    indents: Vec<usize>,
    /// Open brackets, for implicit line joining.
    brackets: Vec<(char, usize, usize)>,
    tokens: Vec<Token>,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            indents: vec![0],
            brackets: Vec::new(),
            tokens: Vec::new(),
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut at_line_start = true;

        while self.pos < self.chars.len() {
            if at_line_start {
                if self.handle_indentation()? {
                    // Blank or comment-only line, already consumed
                    continue;
                }
                at_line_start = false;
            }

            let ch = self.chars[self.pos];
            match ch {
                ' ' | '\t' | '\r' | '\x0c' => self.bump(),
                '#' => self.skip_comment(),
                '\n' => {
                    if self.brackets.is_empty() {
                        self.push_layout(TokenKind::Newline);
                        at_line_start = true;
                    }
                    self.newline();
                }
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.newline();
                }
                _ => self.lex_token()?,
            }
        }

        if let Some(&(ch, line, column)) = self.brackets.last() {
            return Err(LexError::UnmatchedBracket { ch, line, column });
        }
        if !matches!(
            self.tokens.last().map(|t| &t.kind),
            None | Some(TokenKind::Newline)
        ) {
            self.push_layout(TokenKind::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push_layout(TokenKind::Dedent);
        }
        self.push_layout(TokenKind::Eof);
        Ok(self.tokens)
    }

    // ─── Layout ──────────────────────────────────────────────────────

    /// Measure leading whitespace and emit Indent/Dedent tokens.
    /// Returns true when the line is blank or a comment.
    fn handle_indentation(&mut self) -> Result<bool, LexError> {
        let mut width = 0;
        while let Some(ch) = self.peek_at(0) {
            match ch {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\x0c' | '\r' => {}
                _ => break,
            }
            self.bump();
        }

        match self.peek_at(0) {
            None => return Ok(true),
            Some('\n') => {
                self.newline();
                return Ok(true);
            }
            Some('#') => {
                self.skip_comment();
                if self.peek_at(0) == Some('\n') {
                    self.newline();
                }
                return Ok(true);
            }
            _ => {}
        }

        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push_layout(TokenKind::Indent);
        } else if width < current {
            while self.indents.last().copied().unwrap_or(0) > width {
                self.indents.pop();
                self.push_layout(TokenKind::Dedent);
            }
            if self.indents.last().copied().unwrap_or(0) != width {
                return Err(LexError::InconsistentDedent { line: self.line });
            }
        }
        Ok(false)
    }

    fn push_layout(&mut self, kind: TokenKind) {
        self.tokens.push(Token::new(kind, self.line, self.column));
    }

    // ─── Tokens ──────────────────────────────────────────────────────

    fn lex_token(&mut self) -> Result<(), LexError> {
        let (line, column) = (self.line, self.column);
        let ch = self.chars[self.pos];

        if ch.is_alphabetic() || ch == '_' {
            return self.lex_word(line, column);
        }
        if ch.is_ascii_digit() || (ch == '.' && self.peek_at(1).is_some_and(|c| c.is_ascii_digit())) {
            return self.lex_number(line, column);
        }
        if ch == '"' || ch == '\'' {
            let text = self.lex_string(line, column, false)?;
            self.tokens.push(Token::new(TokenKind::Str(text), line, column));
            return Ok(());
        }

        let next = self.peek_at(1);
        let (kind, width) = match (ch, next) {
            ('*', Some('*')) => (TokenKind::DoubleStar, 2),
            ('/', Some('/')) => (TokenKind::DoubleSlash, 2),
            ('=', Some('=')) => (TokenKind::EqEq, 2),
            ('!', Some('=')) => (TokenKind::NotEq, 2),
            ('<', Some('=')) => (TokenKind::LtEq, 2),
            ('>', Some('=')) => (TokenKind::GtEq, 2),
            ('+', Some('=')) => (TokenKind::PlusEq, 2),
            ('-', Some('=')) => (TokenKind::MinusEq, 2),
            ('*', Some('=')) => (TokenKind::StarEq, 2),
            ('/', Some('=')) => (TokenKind::SlashEq, 2),
            ('-', Some('>')) => (TokenKind::Arrow, 2),
            ('(', _) => (TokenKind::LParen, 1),
            (')', _) => (TokenKind::RParen, 1),
            ('[', _) => (TokenKind::LBracket, 1),
            (']', _) => (TokenKind::RBracket, 1),
            ('{', _) => (TokenKind::LBrace, 1),
            ('}', _) => (TokenKind::RBrace, 1),
            (',', _) => (TokenKind::Comma, 1),
            (':', _) => (TokenKind::Colon, 1),
            ('.', _) => (TokenKind::Dot, 1),
            ('@', _) => (TokenKind::At, 1),
            (';', _) => (TokenKind::Semicolon, 1),
            ('+', _) => (TokenKind::Plus, 1),
            ('-', _) => (TokenKind::Minus, 1),
            ('*', _) => (TokenKind::Star, 1),
            ('/', _) => (TokenKind::Slash, 1),
            ('%', _) => (TokenKind::Percent, 1),
            ('=', _) => (TokenKind::Eq, 1),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', _) => (TokenKind::Gt, 1),
            ('~', _) => (TokenKind::Tilde, 1),
            ('&', _) => (TokenKind::Amp, 1),
            ('|', _) => (TokenKind::Pipe, 1),
            ('^', _) => (TokenKind::Caret, 1),
            _ => return Err(LexError::UnexpectedChar { ch, line, column }),
        };

        match kind {
            TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => {
                self.brackets.push((ch, line, column));
            }
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                let expected = match ch {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match self.brackets.pop() {
                    Some((open, _, _)) if open == expected => {}
                    _ => return Err(LexError::UnmatchedBracket { ch, line, column }),
                }
            }
            _ => {}
        }

        for _ in 0..width {
            self.bump();
        }
        self.tokens.push(Token::new(kind, line, column));
        Ok(())
    }

    fn lex_word(&mut self, line: usize, column: usize) -> Result<(), LexError> {
        let start = self.pos;
        while self
            .peek_at(0)
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.bump();
        }
        let word: String = self.chars[start..self.pos].iter().collect();

        // String prefixes
        if matches!(self.peek_at(0), Some('"') | Some('\'')) {
            match word.to_ascii_lowercase().as_str() {
                "r" => {
                    let text = self.lex_string(line, column, true)?;
                    self.tokens.push(Token::new(TokenKind::Str(text), line, column));
                    return Ok(());
                }
                "f" | "rf" | "fr" => {
                    return Err(LexError::UnsupportedStringPrefix {
                        kind: "formatted",
                        line,
                        column,
                    })
                }
                "b" | "rb" | "br" => {
                    return Err(LexError::UnsupportedStringPrefix {
                        kind: "byte",
                        line,
                        column,
                    })
                }
                _ => {}
            }
        }

        let kind = match Keyword::from_word(&word) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Name(word),
        };
        self.tokens.push(Token::new(kind, line, column));
        Ok(())
    }

    fn lex_number(&mut self, line: usize, column: usize) -> Result<(), LexError> {
        let start = self.pos;
        let mut seen_exp = false;
        while let Some(c) = self.peek_at(0) {
            if c.is_ascii_digit() || c == '.' || c == '_' {
                self.bump();
            } else if (c == 'e' || c == 'E') && !seen_exp {
                seen_exp = true;
                self.bump();
                if matches!(self.peek_at(0), Some('+') | Some('-')) {
                    self.bump();
                }
            } else if c.is_alphabetic() {
                // e.g. `1j` or `0x10`: consume so the error shows the whole literal
                self.bump();
                let text: String = self.chars[start..self.pos].iter().collect();
                return Err(LexError::InvalidNumber { text, line, column });
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos].iter().filter(|&&c| c != '_').collect();
        let value = text.parse::<f64>().map_err(|_| LexError::InvalidNumber {
            text: text.clone(),
            line,
            column,
        })?;
        self.tokens.push(Token::new(TokenKind::Number(value), line, column));
        Ok(())
    }

    fn lex_string(&mut self, line: usize, column: usize, raw: bool) -> Result<String, LexError> {
        let quote = self.chars[self.pos];
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        let delim = if triple { 3 } else { 1 };
        for _ in 0..delim {
            self.bump();
        }

        let mut text = String::new();
        loop {
            let Some(c) = self.peek_at(0) else {
                return Err(LexError::UnterminatedString { line, column });
            };
            if c == quote
                && (!triple || (self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote)))
            {
                for _ in 0..delim {
                    self.bump();
                }
                return Ok(text);
            }
            match c {
                '\n' if !triple => return Err(LexError::UnterminatedString { line, column }),
                '\n' => {
                    text.push('\n');
                    self.newline();
                }
                '\\' if !raw => {
                    self.bump();
                    let Some(esc) = self.peek_at(0) else {
                        return Err(LexError::UnterminatedString { line, column });
                    };
                    match esc {
                        'n' => text.push('\n'),
                        't' => text.push('\t'),
                        'r' => text.push('\r'),
                        '0' => text.push('\0'),
                        '\\' => text.push('\\'),
                        '\'' => text.push('\''),
                        '"' => text.push('"'),
                        '\n' => {
                            self.newline();
                            continue;
                        }
                        other => {
                            text.push('\\');
                            text.push(other);
                        }
                    }
                    self.bump();
                }
                _ => {
                    text.push(c);
                    self.bump();
                }
            }
        }
    }

    // ─── Cursor ──────────────────────────────────────────────────────

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) {
        self.pos += 1;
        self.column += 1;
    }

    fn newline(&mut self) {
        self.pos += 1;
        self.line += 1;
        self.column = 1;
    }

    fn skip_comment(&mut self) {
        while self.peek_at(0).is_some_and(|c| c != '\n') {
            self.bump();
        }
    }
}

/// Convenience wrapper around `Lexer::tokenize`.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).tokenize()
}
