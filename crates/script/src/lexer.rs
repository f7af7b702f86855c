//! Tokenizer for tool source, including indentation tracking.

use toolsmith_core::Location;

use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(String),
    Keyword(&'static str),
    Int(i64),
    Float(f64),
    Str(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub loc: Location,
}

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

// Longest first so that greedy matching picks `**=` over `**` over `*`.
const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=",
    "%=", "->", "<<", ">>", "+", "-", "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{",
    "}", ",", ":", ".", ";", "@", "&", "|", "^", "~",
];

const TAB_WIDTH: usize = 8;

pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    indents: Vec<usize>,
    brackets: Vec<char>,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            indents: vec![0],
            brackets: Vec::new(),
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn loc(&self) -> Location {
        Location::new(self.line, self.col, self.pos)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn push(&mut self, kind: TokenKind, loc: Location) {
        self.tokens.push(Token { kind, loc });
    }

    fn error(&self, message: impl Into<String>, loc: Location) -> ParseError {
        ParseError::new(message, loc)
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        loop {
            if self.at_line_start && self.brackets.is_empty() {
                if !self.handle_indentation()? {
                    break;
                }
                continue;
            }

            let Some(c) = self.peek() else { break };
            let loc = self.loc();
            match c {
                ' ' | '\t' | '\x0c' | '\r' => {
                    self.bump();
                }
                '#' => self.skip_comment(),
                '\n' => {
                    self.bump();
                    if self.brackets.is_empty() {
                        self.end_logical_line(loc);
                    }
                }
                '\\' => {
                    self.bump();
                    if self.peek() == Some('\r') {
                        self.bump();
                    }
                    if self.bump() != Some('\n') {
                        return Err(self.error("unexpected character after line continuation", loc));
                    }
                }
                '"' | '\'' => {
                    let text = self.lex_string(false, loc)?;
                    self.push(TokenKind::Str(text), loc);
                }
                c if c.is_ascii_digit() => self.lex_number(loc)?,
                '.' if self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) => {
                    self.lex_number(loc)?
                }
                c if c == '_' || c.is_alphabetic() => self.lex_word(loc)?,
                _ => self.lex_operator(loc)?,
            }
        }

        let end = self.loc();
        if let Some(open) = self.brackets.last() {
            return Err(self.error(format!("unclosed '{open}'"), end));
        }
        if !matches!(
            self.tokens.last().map(|t| &t.kind),
            None | Some(TokenKind::Newline)
        ) {
            self.push(TokenKind::Newline, end);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, end);
        }
        self.push(TokenKind::Eof, end);
        Ok(self.tokens)
    }

    /// Measure leading whitespace of a physical line. Returns false at end of
    /// input.
    fn handle_indentation(&mut self) -> Result<bool, ParseError> {
        let mut width = 0;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                '\x0c' => width = 0,
                _ => break,
            }
            self.bump();
        }

        match self.peek() {
            None => return Ok(false),
            Some('\n') | Some('\r') => {
                self.bump();
                return Ok(true);
            }
            Some('#') => {
                self.skip_comment();
                return Ok(true);
            }
            _ => {}
        }

        let loc = self.loc();
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(TokenKind::Indent, loc);
        } else {
            while width < self.indents.last().copied().unwrap_or(0) {
                self.indents.pop();
                self.push(TokenKind::Dedent, loc);
            }
            if width != self.indents.last().copied().unwrap_or(0) {
                return Err(self.error("unindent does not match any outer indentation level", loc));
            }
        }
        self.at_line_start = false;
        Ok(true)
    }

    fn end_logical_line(&mut self, loc: Location) {
        if !matches!(
            self.tokens.last().map(|t| &t.kind),
            None | Some(TokenKind::Newline) | Some(TokenKind::Indent) | Some(TokenKind::Dedent)
        ) {
            self.push(TokenKind::Newline, loc);
        }
        self.at_line_start = true;
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn lex_word(&mut self, loc: Location) -> Result<(), ParseError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                self.bump();
            } else {
                break;
            }
        }
        let word: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(), Some('"') | Some('\'')) {
            match word.to_ascii_lowercase().as_str() {
                "r" => {
                    let text = self.lex_string(true, loc)?;
                    self.push(TokenKind::Str(text), loc);
                    return Ok(());
                }
                "u" => {
                    let text = self.lex_string(false, loc)?;
                    self.push(TokenKind::Str(text), loc);
                    return Ok(());
                }
                "f" | "rf" | "fr" => {
                    return Err(self.error("f-strings are not supported; use str.format", loc));
                }
                "b" | "rb" | "br" => {
                    return Err(self.error("bytes literals are not supported", loc));
                }
                _ => {}
            }
        }

        match KEYWORDS.iter().find(|k| **k == word) {
            Some(keyword) => self.push(TokenKind::Keyword(keyword), loc),
            None => self.push(TokenKind::Name(word), loc),
        }
        Ok(())
    }

    fn lex_number(&mut self, loc: Location) -> Result<(), ParseError> {
        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x') | Some('X') => Some(16),
                Some('o') | Some('O') => Some(8),
                Some('b') | Some('B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.bump();
                self.bump();
                let mut digits = String::new();
                while let Some(c) = self.peek() {
                    if c == '_' {
                        self.bump();
                    } else if c.is_digit(radix) {
                        digits.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                let value = i64::from_str_radix(&digits, radix)
                    .map_err(|_| self.error("invalid or too large integer literal", loc))?;
                self.push(TokenKind::Int(value), loc);
                return Ok(());
            }
        }

        let mut text = String::new();
        let mut is_float = false;
        self.take_digits(&mut text);
        if self.peek() == Some('.') {
            is_float = true;
            text.push('.');
            self.bump();
            self.take_digits(&mut text);
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = self.peek_at(1);
            let has_exponent = match sign {
                Some('+') | Some('-') => self.peek_at(2).is_some_and(|c| c.is_ascii_digit()),
                Some(c) => c.is_ascii_digit(),
                None => false,
            };
            if has_exponent {
                is_float = true;
                text.push('e');
                self.bump();
                if let Some(s @ ('+' | '-')) = self.peek() {
                    text.push(s);
                    self.bump();
                }
                self.take_digits(&mut text);
            }
        }

        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error("invalid float literal", loc))?;
            self.push(TokenKind::Float(value), loc);
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| self.error("integer literal too large", loc))?;
            self.push(TokenKind::Int(value), loc);
        }
        Ok(())
    }

    fn take_digits(&mut self, into: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                into.push(c);
                self.bump();
            } else if c == '_' && self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn lex_string(&mut self, raw: bool, loc: Location) -> Result<String, ParseError> {
        let quote = self.peek().ok_or_else(|| self.error("expected string", loc))?;
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        let quote_len = if triple { 3 } else { 1 };
        for _ in 0..quote_len {
            self.bump();
        }

        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error("unterminated string literal", loc));
            };

            if c == quote {
                if !triple {
                    self.bump();
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.bump();
                    self.bump();
                    self.bump();
                    break;
                }
            }
            if c == '\n' && !triple {
                return Err(self.error("unterminated string literal", loc));
            }

            if c == '\\' {
                self.bump();
                let Some(esc) = self.peek() else {
                    return Err(self.error("unterminated string literal", loc));
                };
                if raw {
                    out.push('\\');
                    out.push(esc);
                    self.bump();
                    continue;
                }
                let esc_loc = self.loc();
                self.bump();
                match esc {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    '\n' => {}
                    'x' => out.push(self.lex_hex_escape(2, esc_loc)?),
                    'u' => out.push(self.lex_hex_escape(4, esc_loc)?),
                    'U' => out.push(self.lex_hex_escape(8, esc_loc)?),
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
                continue;
            }

            out.push(c);
            self.bump();
        }
        Ok(out)
    }

    fn lex_hex_escape(&mut self, len: usize, loc: Location) -> Result<char, ParseError> {
        let mut digits = String::with_capacity(len);
        for _ in 0..len {
            match self.peek() {
                Some(c) if c.is_ascii_hexdigit() => {
                    digits.push(c);
                    self.bump();
                }
                _ => return Err(self.error("truncated escape sequence", loc)),
            }
        }
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error("invalid escape sequence", loc))
    }

    fn lex_operator(&mut self, loc: Location) -> Result<(), ParseError> {
        let op = OPERATORS.iter().find(|op| {
            op.chars()
                .enumerate()
                .all(|(i, c)| self.peek_at(i) == Some(c))
        });
        let Some(op) = op else {
            let c = self.peek().unwrap_or(' ');
            return Err(self.error(format!("unexpected character {c:?}"), loc));
        };
        for _ in 0..op.chars().count() {
            self.bump();
        }

        match *op {
            "(" => self.brackets.push('('),
            "[" => self.brackets.push('['),
            "{" => self.brackets.push('{'),
            ")" | "]" | "}" => {
                let expected = match *op {
                    ")" => '(',
                    "]" => '[',
                    _ => '{',
                };
                if self.brackets.pop() != Some(expected) {
                    return Err(self.error(format!("unmatched '{op}'"), loc));
                }
            }
            _ => {}
        }
        self.push(TokenKind::Op(op), loc);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_indent_and_dedent() {
        let toks = kinds("def f(x):\n    return x\n");
        assert!(toks.contains(&TokenKind::Indent));
        assert!(toks.contains(&TokenKind::Dedent));
        assert_eq!(toks.last(), Some(&TokenKind::Eof));
    }

    #[test]
    fn test_newlines_ignored_inside_brackets() {
        let toks = kinds("x = [1,\n  2]\n");
        let newlines = toks.iter().filter(|t| **t == TokenKind::Newline).count();
        assert_eq!(newlines, 1);
        assert!(!toks.contains(&TokenKind::Indent));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("0x1F")[0], TokenKind::Int(31));
        assert_eq!(kinds("1_000")[0], TokenKind::Int(1000));
        assert_eq!(kinds("2.5e3")[0], TokenKind::Float(2500.0));
        assert_eq!(kinds(".5")[0], TokenKind::Float(0.5));
    }

    #[test]
    fn test_string_escapes_and_raw() {
        assert_eq!(kinds(r#""a\nb""#)[0], TokenKind::Str("a\nb".into()));
        assert_eq!(kinds(r#"r"a\nb""#)[0], TokenKind::Str("a\\nb".into()));
        assert_eq!(kinds("'''x\ny'''")[0], TokenKind::Str("x\ny".into()));
    }

    #[test]
    fn test_operator_longest_match() {
        assert_eq!(kinds("a **= 2")[1], TokenKind::Op("**="));
        assert_eq!(kinds("a // 2")[1], TokenKind::Op("//"));
    }

    #[test]
    fn test_errors_have_locations() {
        let err = tokenize("x = 'open").unwrap_err();
        assert_eq!(err.location.line, 1);
        assert!(tokenize("f'{x}'").is_err());
        assert!(tokenize("x = (1, 2").is_err());
        assert!(tokenize("x = 1)").is_err());
        assert!(tokenize("x = $").is_err());
    }

    #[test]
    fn test_bad_dedent() {
        let src = "if x:\n        y = 1\n    z = 2\n";
        assert!(tokenize(src).is_err());
    }
}
