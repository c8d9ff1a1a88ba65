/// Single-token-lookahead lexer over document text.
///
/// Raw scanning is stateless: [`scan`] reads exactly one token at an offset.
/// [`Lexer`] layers comment swallowing and one token of lookahead on top, and
/// lets the parser jump past sub-grammars it scans itself (script bodies,
/// literal blocks) with [`Lexer::override_index`].
use crate::core::parser::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    Newline,
    LineComment,
    BlockCommentStart,
    BlockCommentEnd,
    DoubleQuote,
    SingleQuote,
    Backtick,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    DoubleLBracket,
    DoubleRBracket,
    Comma,
    Colon,
    At,
    Hash,
    Pipe,
    Arrow,
    Call,
    Eval,
    Mode,
    Use,
    Match,
    Number,
    Text,
    Eof,
}

impl TokenKind {
    pub fn is_keyword(self) -> bool {
        matches!(
            self,
            TokenKind::Call | TokenKind::Eval | TokenKind::Mode | TokenKind::Use | TokenKind::Match
        )
    }

    pub fn is_trivia(self) -> bool {
        matches!(self, TokenKind::Whitespace | TokenKind::Newline)
    }
}

/// A token with its source span. For escapes, `text` is the decoded
/// character while the span covers the backslash too.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl Token {
    fn new(kind: TokenKind, start: usize, end: usize, text: impl Into<String>) -> Self {
        Self {
            kind,
            start,
            end,
            text: text.into(),
        }
    }
}

/// Fixed punctuation and keywords, longest first.
const FIXED: &[(&str, TokenKind)] = &[
    ("match", TokenKind::Match),
    ("call", TokenKind::Call),
    ("eval", TokenKind::Eval),
    ("mode", TokenKind::Mode),
    ("use", TokenKind::Use),
    ("\r\n", TokenKind::Newline),
    ("[[", TokenKind::DoubleLBracket),
    ("]]", TokenKind::DoubleRBracket),
    ("->", TokenKind::Arrow),
    ("//", TokenKind::LineComment),
    ("/*", TokenKind::BlockCommentStart),
    ("*/", TokenKind::BlockCommentEnd),
    ("\n", TokenKind::Newline),
    ("\"", TokenKind::DoubleQuote),
    ("'", TokenKind::SingleQuote),
    ("`", TokenKind::Backtick),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("{", TokenKind::LBrace),
    ("}", TokenKind::RBrace),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
    (",", TokenKind::Comma),
    (":", TokenKind::Colon),
    ("@", TokenKind::At),
    ("#", TokenKind::Hash),
    ("|", TokenKind::Pipe),
];

/// Decode the character after a backslash, if it is a recognized escape.
fn decode_escape(c: char) -> Option<char> {
    match c {
        '\\' | '/' | '[' | '{' | '"' | '\'' | '`' | '(' | ')' | '}' | ',' => Some(c),
        'n' => Some('\n'),
        't' => Some('\t'),
        'r' => Some('\r'),
        _ => None,
    }
}

/// Scan one raw token starting at `offset`. Comments are returned as marker
/// tokens; [`Lexer`] is responsible for swallowing them.
pub fn scan(source: &str, offset: usize) -> Token {
    let rest = match source.get(offset..) {
        Some(rest) if !rest.is_empty() => rest,
        _ => return Token::new(TokenKind::Eof, source.len(), source.len(), ""),
    };

    if let Some(after) = rest.strip_prefix('\\') {
        // Visual newline: backslash + line break reads as a single space.
        if after.starts_with("\r\n") {
            return Token::new(TokenKind::Whitespace, offset, offset + 3, " ");
        }
        if after.starts_with('\n') {
            return Token::new(TokenKind::Whitespace, offset, offset + 2, " ");
        }
        if let Some(next) = after.chars().next() {
            if let Some(decoded) = decode_escape(next) {
                let end = offset + 1 + next.len_utf8();
                return Token::new(TokenKind::Text, offset, end, decoded.to_string());
            }
        }
        return Token::new(TokenKind::Text, offset, offset + 1, "\\");
    }

    for (literal, kind) in FIXED {
        if rest.starts_with(literal) {
            return Token::new(*kind, offset, offset + literal.len(), *literal);
        }
    }

    let bytes = rest.as_bytes();
    if bytes[0] == b' ' || bytes[0] == b'\t' {
        let len = bytes
            .iter()
            .take_while(|b| **b == b' ' || **b == b'\t')
            .count();
        return Token::new(TokenKind::Whitespace, offset, offset + len, &rest[..len]);
    }

    if bytes[0].is_ascii_digit() {
        let mut len = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
        if bytes.get(len) == Some(&b'.')
            && bytes.get(len + 1).is_some_and(|b| b.is_ascii_digit())
        {
            len += 1 + bytes[len + 1..]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count();
        }
        return Token::new(TokenKind::Number, offset, offset + len, &rest[..len]);
    }

    let c = rest.chars().next().unwrap_or('\0');
    Token::new(TokenKind::Text, offset, offset + c.len_utf8(), c.to_string())
}

/// Token stream with comment swallowing and one token of lookahead.
pub struct Lexer<'a> {
    source: &'a str,
    index: usize,
    peeked: Option<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            index: 0,
            peeked: None,
        }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    /// Offset of the next unconsumed source character.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Jump to `index`, discarding any lookahead.
    pub fn override_index(&mut self, index: usize) {
        self.index = index.min(self.source.len());
        self.peeked = None;
    }

    pub fn peek(&mut self) -> Result<Token, ParseError> {
        if let Some(token) = &self.peeked {
            return Ok(token.clone());
        }
        let token = self.read(self.index)?;
        self.peeked = Some(token.clone());
        Ok(token)
    }

    pub fn next(&mut self) -> Result<Token, ParseError> {
        let token = match self.peeked.take() {
            Some(token) => token,
            None => self.read(self.index)?,
        };
        self.index = token.end;
        Ok(token)
    }

    /// Read the next non-comment token at or after `offset`.
    fn read(&self, mut offset: usize) -> Result<Token, ParseError> {
        loop {
            let token = scan(self.source, offset);
            match token.kind {
                TokenKind::LineComment => {
                    // Up to, not including, the line break.
                    offset = self.source[token.end..]
                        .find('\n')
                        .map(|i| {
                            let at = token.end + i;
                            if at > 0 && self.source.as_bytes()[at - 1] == b'\r' {
                                at - 1
                            } else {
                                at
                            }
                        })
                        .unwrap_or(self.source.len());
                    if offset < token.end {
                        offset = token.end;
                    }
                }
                TokenKind::BlockCommentStart => {
                    let close = self.source[token.end..].find("*/").ok_or_else(|| {
                        ParseError::Syntax {
                            offset: token.start,
                            message: "unterminated block comment".to_string(),
                        }
                    })?;
                    let end = token.end + close + 2;
                    return Ok(Token::new(TokenKind::Whitespace, end, end, " "));
                }
                _ => return Ok(token),
            }
        }
    }
}
