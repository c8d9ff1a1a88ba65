/// Recursive-descent parser from document text to [`Document`].
///
/// Grammar sketch:
///
/// ```text
/// document  := (text | '[[' verbatim ']]' | '{' block '}')*
/// block     := ('#' | '|')* (ident ':')? ( 'eval'? '@' reference | replacements )
///            | 'mode' ident ':' rules | 'use' ident
/// entry     := choice number?
/// choice    := '(' document ')' | '[' script ']' | '{' block '}' | 'call' ident
/// reference := ident (':' (indices '->' choice | choice) (',' ...)*)?
/// ```
use std::collections::BTreeMap;
use thiserror::Error;

use crate::core::diagnostics::line_column;
use crate::core::lexer::{Lexer, Token, TokenKind};
use crate::core::scan;
use crate::schema::ast::{
    Ast, AstNode, Choice, ChoiceFork, Document, FunctionCallRef, ModeDeclaration, ModeRule,
    Reference, ScriptBlock, Weighted, WeightedChoice,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("script syntax error at offset {offset}: {message}")]
    ScriptSyntax { offset: usize, message: String },
    #[error("branch index {index} is mapped more than once (offset {offset})")]
    DuplicateBranchIndex { index: usize, offset: usize },
}

impl ParseError {
    pub fn offset(&self) -> usize {
        match self {
            ParseError::Syntax { offset, .. }
            | ParseError::ScriptSyntax { offset, .. }
            | ParseError::DuplicateBranchIndex { offset, .. } => *offset,
        }
    }

    /// One-based line and column of the error within `source`.
    pub fn line_column(&self, source: &str) -> (usize, usize) {
        line_column(source, self.offset())
    }
}

fn syntax(offset: usize, message: impl Into<String>) -> ParseError {
    ParseError::Syntax {
        offset,
        message: message.into(),
    }
}

/// Parse a complete document.
pub fn parse(source: &str) -> Result<Document, ParseError> {
    let mut parser = Parser::new(source);
    let nodes = parser.parse_sequence(Terminator::Eof, 0)?;
    Ok(Document {
        nodes,
        modes: parser.modes,
        mode_switches: parser.mode_switches,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminator {
    Eof,
    Paren,
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    modes: Vec<ModeDeclaration>,
    mode_switches: Vec<String>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            lexer: Lexer::new(source),
            modes: Vec::new(),
            mode_switches: Vec::new(),
        }
    }

    fn source(&self) -> &'a str {
        self.lexer.source()
    }

    /// Parse nodes until the terminator. For `Paren`, the closing `)` is left
    /// for the caller; `open` is the offset of the matching `(`.
    fn parse_sequence(&mut self, terminator: Terminator, open: usize) -> Result<Ast, ParseError> {
        let mut nodes = Vec::new();
        let mut text = String::new();
        let mut depth = 0usize;

        loop {
            let token = self.lexer.peek()?;
            match token.kind {
                TokenKind::Eof => {
                    if terminator == Terminator::Paren {
                        return Err(syntax(open, "unterminated '(': no matching ')'"));
                    }
                    break;
                }
                TokenKind::RParen if terminator == Terminator::Paren => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    text.push(')');
                    self.lexer.next()?;
                }
                TokenKind::LParen if terminator == Terminator::Paren => {
                    depth += 1;
                    text.push('(');
                    self.lexer.next()?;
                }
                TokenKind::LBrace => {
                    flush_text(&mut text, &mut nodes);
                    self.lexer.next()?;
                    if let Some(node) = self.parse_block(token.start)? {
                        nodes.push(node);
                    }
                }
                TokenKind::DoubleLBracket => {
                    self.lexer.next()?;
                    text.push_str(&self.parse_literal_block(token.start)?);
                }
                TokenKind::RBrace => {
                    return Err(syntax(token.start, "unexpected '}' without a matching '{'"));
                }
                _ => {
                    self.lexer.next()?;
                    text.push_str(&token.text);
                }
            }
        }

        flush_text(&mut text, &mut nodes);
        Ok(nodes)
    }

    /// Copy raw source verbatim up to the matching `]]`; `\]]` is a literal `]]`.
    fn parse_literal_block(&mut self, open: usize) -> Result<String, ParseError> {
        let source = self.source();
        let start = self.lexer.index();
        let mut out = String::new();
        let mut i = start;
        while i < source.len() {
            let rest = &source[i..];
            if rest.starts_with("\\]]") {
                out.push_str("]]");
                i += 3;
            } else if rest.starts_with("]]") {
                self.lexer.override_index(i + 2);
                return Ok(out);
            } else {
                let c = rest.chars().next().unwrap_or('\0');
                out.push(c);
                i += c.len_utf8().max(1);
            }
        }
        Err(syntax(open, "unterminated '[[': no matching ']]'"))
    }

    /// Parse the inside of `{ ... }`; the `{` at `open` is already consumed.
    ///
    /// Returns `None` for legacy mode syntax, which produces no node.
    fn parse_block(&mut self, open: usize) -> Result<Option<AstNode>, ParseError> {
        self.skip_trivia()?;

        let mut is_silent = false;
        let mut is_set = false;
        loop {
            let token = self.lexer.peek()?;
            match token.kind {
                TokenKind::Hash => is_silent = true,
                TokenKind::Pipe => is_set = true,
                _ => break,
            }
            self.lexer.next()?;
            self.skip_trivia()?;
        }

        if !is_silent && !is_set {
            let token = self.lexer.peek()?;
            if token.kind == TokenKind::Mode && self.keyword_followed_by_space()? {
                self.parse_mode(open)?;
                return Ok(None);
            }
            if token.kind == TokenKind::Use && self.keyword_followed_by_space()? {
                self.lexer.next()?;
                self.skip_trivia()?;
                let name = self.parse_identifier()?;
                self.expect_close(open)?;
                self.mode_switches.push(name);
                return Ok(None);
            }
        }

        let identifier = self.parse_prefix_identifier(open)?;
        self.skip_trivia()?;

        let token = self.lexer.peek()?;
        let re_execute = token.kind == TokenKind::Eval && self.eval_starts_reference()?;
        if re_execute {
            self.lexer.next()?;
            self.skip_trivia()?;
        }

        let token = self.lexer.peek()?;
        let node = if token.kind == TokenKind::At {
            if is_set {
                return Err(syntax(token.start, "'|' cannot be applied to a reference"));
            }
            self.lexer.next()?;
            let reference = self.parse_reference(open, identifier, is_silent, re_execute)?;
            AstNode::Reference(reference)
        } else if re_execute {
            return Err(syntax(token.start, "expected '@' after 'eval'"));
        } else {
            let choices = self.parse_replacements(open)?;
            let span = open..self.lexer.index();
            let fork = ChoiceFork::new(identifier, is_silent, is_set, choices, span)
                .map_err(|e| syntax(open, e.to_string()))?;
            AstNode::Fork(fork)
        };

        Ok(Some(node))
    }

    /// Parse an optional `identifier:` prefix, restoring the position when the
    /// tokens turn out to be something else.
    fn parse_prefix_identifier(&mut self, open: usize) -> Result<Option<String>, ParseError> {
        let token = self.lexer.peek()?;
        if !is_identifier_token(&token) {
            return Ok(None);
        }
        if token.kind == TokenKind::Call && self.keyword_followed_by_space()? {
            return Ok(None);
        }
        if token.kind == TokenKind::Eval && self.eval_starts_reference()? {
            return Ok(None);
        }

        let saved = self.lexer.index();
        let identifier = self.parse_identifier()?;
        self.skip_whitespace()?;
        let token = self.lexer.peek()?;
        if token.kind == TokenKind::Colon {
            self.lexer.next()?;
            return Ok(Some(identifier));
        }
        if token.kind == TokenKind::Eof {
            return Err(syntax(open, "unterminated '{': no matching '}'"));
        }
        self.lexer.override_index(saved);
        Err(syntax(token.start, format!("expected ':' after identifier '{identifier}'")))
    }

    /// True when the peeked keyword is followed by whitespace (so it is the
    /// keyword, not the start of a longer identifier).
    fn keyword_followed_by_space(&mut self) -> Result<bool, ParseError> {
        let token = self.lexer.peek()?;
        let next = crate::core::lexer::scan(self.source(), token.end);
        Ok(next.kind.is_trivia())
    }

    /// True when the peeked `eval` keyword is followed by `@` (after optional
    /// whitespace).
    fn eval_starts_reference(&mut self) -> Result<bool, ParseError> {
        let saved = self.lexer.index();
        self.lexer.next()?;
        self.skip_trivia()?;
        let follows = self.lexer.peek()?.kind == TokenKind::At;
        self.lexer.override_index(saved);
        Ok(follows)
    }

    fn parse_identifier(&mut self) -> Result<String, ParseError> {
        let mut identifier = String::new();
        loop {
            let token = self.lexer.peek()?;
            if !is_identifier_token(&token) {
                break;
            }
            identifier.push_str(&token.text);
            self.lexer.next()?;
        }
        if identifier.is_empty() {
            let token = self.lexer.peek()?;
            return Err(syntax(token.start, "expected an identifier"));
        }
        Ok(identifier)
    }

    /// Comma-separated weighted entries up to (but not including) `}`.
    fn parse_replacements(&mut self, open: usize) -> Result<Vec<WeightedChoice>, ParseError> {
        let mut choices = Vec::new();
        loop {
            self.skip_trivia()?;
            let token = self.lexer.peek()?;
            if token.kind == TokenKind::RBrace && !choices.is_empty() {
                break;
            }
            if token.kind == TokenKind::Eof {
                return Err(syntax(open, "unterminated '{': no matching '}'"));
            }
            let choice = self.parse_choice()?;
            self.skip_trivia()?;
            let token = self.lexer.peek()?;
            let weight = if token.kind == TokenKind::Number {
                self.lexer.next()?;
                let weight: f64 = token
                    .text
                    .parse()
                    .map_err(|_| syntax(token.start, format!("invalid weight '{}'", token.text)))?;
                Some(weight)
            } else {
                None
            };
            choices.push(Weighted::new(choice, weight));

            self.skip_trivia()?;
            let token = self.lexer.peek()?;
            match token.kind {
                TokenKind::Comma => {
                    self.lexer.next()?;
                }
                TokenKind::RBrace => break,
                TokenKind::Eof => return Err(syntax(open, "unterminated '{': no matching '}'")),
                _ => {
                    return Err(syntax(
                        token.start,
                        format!("expected ',' or '}}', found '{}'", token.text),
                    ))
                }
            }
        }
        self.lexer.next()?;
        Ok(choices)
    }

    fn parse_choice(&mut self) -> Result<Choice, ParseError> {
        let token = self.lexer.peek()?;
        match token.kind {
            TokenKind::LParen => {
                self.lexer.next()?;
                let ast = self.parse_sequence(Terminator::Paren, token.start)?;
                self.lexer.next()?;
                Ok(Choice::Ast(ast))
            }
            TokenKind::LBracket => {
                self.lexer.next()?;
                self.parse_script(token.start, token.end)
            }
            TokenKind::DoubleLBracket => {
                // A script whose body itself starts with `[`.
                self.lexer.next()?;
                self.parse_script(token.start, token.start + 1)
            }
            TokenKind::LBrace => {
                self.lexer.next()?;
                let node = self.parse_block(token.start)?.ok_or_else(|| {
                    syntax(token.start, "mode declarations cannot be used as a choice")
                })?;
                Ok(Choice::Ast(vec![node]))
            }
            TokenKind::Call if self.keyword_followed_by_space()? => {
                self.lexer.next()?;
                self.skip_whitespace()?;
                let name = self.parse_identifier()?;
                Ok(Choice::Call(FunctionCallRef {
                    name,
                    span: token.start..self.lexer.index(),
                }))
            }
            _ => Err(syntax(
                token.start,
                format!(
                    "expected '(', '[', '{{' or 'call', found '{}'",
                    display_text(&token)
                ),
            )),
        }
    }

    fn parse_script(&mut self, open: usize, body_start: usize) -> Result<Choice, ParseError> {
        let close = scan::find_script_end(self.source(), body_start, open)?;
        let source = self.source()[body_start..close].to_string();
        self.lexer.override_index(close + 1);
        Ok(Choice::Script(ScriptBlock {
            source,
            span: open..close + 1,
        }))
    }

    /// Parse a back-reference body after `@`.
    fn parse_reference(
        &mut self,
        open: usize,
        identifier: Option<String>,
        is_silent: bool,
        re_execute: bool,
    ) -> Result<Reference, ParseError> {
        self.skip_whitespace()?;
        let referred_identifier = self.parse_identifier()?;
        let mut index_map = BTreeMap::new();
        let mut fallback: Option<Box<Choice>> = None;

        self.skip_trivia()?;
        let token = self.lexer.peek()?;
        if token.kind == TokenKind::Colon {
            self.lexer.next()?;
            let mut groups = 0usize;
            loop {
                self.skip_trivia()?;
                let token = self.lexer.peek()?;
                if token.kind == TokenKind::RBrace {
                    if groups == 0 {
                        return Err(syntax(token.start, "expected a mapping after ':'"));
                    }
                    break;
                }
                if token.kind == TokenKind::Eof {
                    return Err(syntax(open, "unterminated '{': no matching '}'"));
                }
                if fallback.is_some() {
                    return Err(syntax(token.start, "the fallback must be the last entry"));
                }

                if token.kind == TokenKind::Number {
                    let indices = self.parse_index_list()?;
                    self.skip_trivia()?;
                    let choice = self.parse_choice()?;
                    for (index, offset) in indices {
                        if index_map.contains_key(&index) {
                            return Err(ParseError::DuplicateBranchIndex { index, offset });
                        }
                        index_map.insert(index, choice.clone());
                    }
                } else {
                    fallback = Some(Box::new(self.parse_choice()?));
                }
                groups += 1;

                self.skip_trivia()?;
                let token = self.lexer.peek()?;
                match token.kind {
                    TokenKind::Comma => {
                        self.lexer.next()?;
                    }
                    TokenKind::RBrace => break,
                    TokenKind::Eof => {
                        return Err(syntax(open, "unterminated '{': no matching '}'"))
                    }
                    _ => {
                        return Err(syntax(
                            token.start,
                            format!("expected ',' or '}}', found '{}'", display_text(&token)),
                        ))
                    }
                }
            }
        }

        self.expect_close(open)?;
        Ok(Reference {
            referred_identifier,
            identifier,
            is_silent,
            index_map,
            fallback,
            re_execute,
            span: open..self.lexer.index(),
        })
    }

    /// `0, 1, 2 ->`: one or more indices sharing one arrow.
    fn parse_index_list(&mut self) -> Result<Vec<(usize, usize)>, ParseError> {
        let mut indices = Vec::new();
        loop {
            let token = self.lexer.next()?;
            if token.kind != TokenKind::Number {
                return Err(syntax(token.start, "expected a branch index"));
            }
            let index: usize = token.text.parse().map_err(|_| {
                syntax(
                    token.start,
                    format!("branch index must be a non-negative integer, found '{}'", token.text),
                )
            })?;
            indices.push((index, token.start));

            self.skip_trivia()?;
            let token = self.lexer.peek()?;
            match token.kind {
                TokenKind::Arrow => {
                    self.lexer.next()?;
                    return Ok(indices);
                }
                TokenKind::Comma => {
                    self.lexer.next()?;
                    self.skip_trivia()?;
                }
                _ => {
                    return Err(syntax(
                        token.start,
                        format!("expected ',' or '->', found '{}'", display_text(&token)),
                    ))
                }
            }
        }
    }

    /// Legacy `mode Name: match "a" -> "b", ...`. Kept for compatibility.
    fn parse_mode(&mut self, open: usize) -> Result<(), ParseError> {
        self.lexer.next()?;
        self.skip_trivia()?;
        let name = self.parse_identifier()?;
        self.skip_trivia()?;
        let token = self.lexer.next()?;
        if token.kind != TokenKind::Colon {
            return Err(syntax(token.start, "expected ':' after mode name"));
        }

        let mut rules = Vec::new();
        loop {
            self.skip_trivia()?;
            let token = self.lexer.peek()?;
            if token.kind == TokenKind::RBrace {
                break;
            }
            if token.kind == TokenKind::Match {
                self.lexer.next()?;
                self.skip_trivia()?;
            }
            let matcher = self.parse_quoted()?;
            self.skip_trivia()?;
            let token = self.lexer.next()?;
            if token.kind != TokenKind::Arrow {
                return Err(syntax(token.start, "expected '->' in mode rule"));
            }
            self.skip_trivia()?;
            let token = self.lexer.peek()?;
            let replacement = if is_quote(token.kind) {
                Choice::text(self.parse_quoted()?)
            } else {
                self.parse_choice()?
            };
            rules.push(ModeRule {
                matcher,
                replacement,
            });

            self.skip_trivia()?;
            let token = self.lexer.peek()?;
            match token.kind {
                TokenKind::Comma => {
                    self.lexer.next()?;
                }
                TokenKind::RBrace => break,
                TokenKind::Eof => return Err(syntax(open, "unterminated '{': no matching '}'")),
                _ => return Err(syntax(token.start, "expected ',' or '}' in mode rules")),
            }
        }
        self.expect_close(open)?;
        self.modes.push(ModeDeclaration {
            name,
            rules,
            span: open..self.lexer.index(),
        });
        Ok(())
    }

    fn parse_quoted(&mut self) -> Result<String, ParseError> {
        let token = self.lexer.peek()?;
        if !is_quote(token.kind) {
            return Err(syntax(token.start, "expected a quoted literal"));
        }
        let close = scan::find_quote_end(self.source(), token.start)?;
        let body = scan::unescape(&self.source()[token.end..close]);
        self.lexer.override_index(close + 1);
        Ok(body)
    }

    fn expect_close(&mut self, open: usize) -> Result<(), ParseError> {
        self.skip_trivia()?;
        let token = self.lexer.next()?;
        match token.kind {
            TokenKind::RBrace => Ok(()),
            TokenKind::Eof => Err(syntax(open, "unterminated '{': no matching '}'")),
            _ => Err(syntax(
                token.start,
                format!("expected '}}', found '{}'", display_text(&token)),
            )),
        }
    }

    fn skip_whitespace(&mut self) -> Result<(), ParseError> {
        while self.lexer.peek()?.kind == TokenKind::Whitespace {
            self.lexer.next()?;
        }
        Ok(())
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        while self.lexer.peek()?.kind.is_trivia() {
            self.lexer.next()?;
        }
        Ok(())
    }
}

fn flush_text(text: &mut String, nodes: &mut Ast) {
    if text.is_empty() {
        return;
    }
    // Adjacent literals (around a literal block) merge into one node.
    if let Some(AstNode::Text(previous)) = nodes.last_mut() {
        previous.push_str(text);
        text.clear();
        return;
    }
    nodes.push(AstNode::Text(std::mem::take(text)));
}

fn is_quote(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::DoubleQuote | TokenKind::SingleQuote | TokenKind::Backtick
    )
}

fn is_identifier_token(token: &Token) -> bool {
    match token.kind {
        TokenKind::Number => true,
        kind if kind.is_keyword() => true,
        TokenKind::Text => token
            .text
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-'),
        _ => false,
    }
}

fn display_text(token: &Token) -> &str {
    match token.kind {
        TokenKind::Eof => "end of input",
        TokenKind::Newline => "line break",
        _ => &token.text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(source: &str) -> Ast {
        parse(source).unwrap().nodes
    }

    fn fork(node: &AstNode) -> &ChoiceFork {
        match node {
            AstNode::Fork(f) => f,
            other => panic!("expected fork, got {other:?}"),
        }
    }

    fn reference(node: &AstNode) -> &Reference {
        match node {
            AstNode::Reference(r) => r,
            other => panic!("expected reference, got {other:?}"),
        }
    }

    #[test]
    fn parse_literal_only() {
        assert_eq!(
            nodes("Hello, world."),
            vec![AstNode::Text("Hello, world.".to_string())]
        );
    }

    #[test]
    fn parse_empty_document() {
        assert!(nodes("").is_empty());
    }

    #[test]
    fn parse_anonymous_fork() {
        let ast = nodes("pick {(a), (b)} now");
        assert_eq!(ast.len(), 3);
        let f = fork(&ast[1]);
        assert_eq!(f.identifier, None);
        assert_eq!(f.weights.len(), 2);
        assert_eq!(f.weights[0].value, Choice::text("a"));
        assert_eq!(f.weights[0].weight, Some(50.0));
    }

    #[test]
    fn parse_named_silent_set_fork() {
        let ast = nodes("{#|Deck: (ace), (king), (queen),}");
        let f = fork(&ast[0]);
        assert_eq!(f.identifier.as_deref(), Some("Deck"));
        assert!(f.is_silent);
        assert!(f.is_set);
        assert_eq!(f.weights.len(), 3);
    }

    #[test]
    fn parse_weights_and_normalization() {
        let ast = nodes("{(a) 70, (b), (c)}");
        let f = fork(&ast[0]);
        assert_eq!(f.weights[0].weight, Some(70.0));
        assert_eq!(f.weights[1].weight, Some(15.0));
        assert_eq!(f.weights[2].weight, Some(15.0));
    }

    #[test]
    fn weights_over_hundred_is_error() {
        let err = parse("x {(a) 80, (b) 30}").unwrap_err();
        assert_eq!(err.offset(), 2);
    }

    #[test]
    fn parse_nested_forks() {
        let ast = nodes("{(a), (b {(c), (d)}), {(e), (f)}}");
        let f = fork(&ast[0]);
        match &f.weights[1].value {
            Choice::Ast(inner) => {
                assert_eq!(inner[0], AstNode::Text("b ".to_string()));
                assert!(matches!(inner[1], AstNode::Fork(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &f.weights[2].value {
            Choice::Ast(inner) => assert!(matches!(inner[0], AstNode::Fork(_))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn balanced_parens_inside_choice() {
        let ast = nodes("{(a (quiet) voice)}");
        let f = fork(&ast[0]);
        assert_eq!(f.weights[0].value, Choice::text("a (quiet) voice"));
    }

    #[test]
    fn commas_inside_choice_are_text() {
        let ast = nodes("{(one, two)}");
        assert_eq!(fork(&ast[0]).weights[0].value, Choice::text("one, two"));
    }

    #[test]
    fn parse_script_choice() {
        let ast = nodes(r#"{["a]" + `b`]}"#);
        match &fork(&ast[0]).weights[0].value {
            Choice::Script(block) => assert_eq!(block.source, r#""a]" + `b`"#),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn script_starting_with_bracket() {
        let ast = nodes("{[[1, 2].len()]}");
        match &fork(&ast[0]).weights[0].value {
            Choice::Script(block) => assert_eq!(block.source, "[1, 2].len()"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_call_choice() {
        let ast = nodes("{call greet}");
        match &fork(&ast[0]).weights[0].value {
            Choice::Call(call) => assert_eq!(call.name, "greet"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn identifier_starting_with_keyword() {
        let ast = nodes("{caller: (a)} {evaluation: (b)} {user: (c)}");
        assert_eq!(fork(&ast[0]).identifier.as_deref(), Some("caller"));
        assert_eq!(fork(&ast[2]).identifier.as_deref(), Some("evaluation"));
        assert_eq!(fork(&ast[4]).identifier.as_deref(), Some("user"));
    }

    #[test]
    fn parse_copy_reference() {
        let ast = nodes("{Name: (Alice), (Bob)} {@Name}");
        let r = reference(&ast[2]);
        assert_eq!(r.referred_identifier, "Name");
        assert!(r.is_copy());
        assert!(!r.re_execute);
    }

    #[test]
    fn parse_mapped_reference_with_fallback() {
        let ast = nodes("{@Name: 0 -> (She), 1, 2 -> (He), (they)}");
        let r = reference(&ast[0]);
        assert_eq!(r.index_map.len(), 3);
        assert_eq!(r.index_map[&0], Choice::text("She"));
        assert_eq!(r.index_map[&2], Choice::text("He"));
        assert_eq!(r.fallback.as_deref(), Some(&Choice::text("they")));
    }

    #[test]
    fn parse_re_execute_reference() {
        let ast = nodes("{#eval @Deck}");
        let r = reference(&ast[0]);
        assert!(r.re_execute);
        assert!(r.is_silent);
        assert_eq!(r.referred_identifier, "Deck");
    }

    #[test]
    fn parse_named_reference() {
        let ast = nodes("{Pronoun: @Name: 0 -> (she), (he)}");
        let r = reference(&ast[0]);
        assert_eq!(r.identifier.as_deref(), Some("Pronoun"));
    }

    #[test]
    fn duplicate_branch_index_is_error() {
        let err = parse("{@Name: 0 -> (a), 1 -> (b), 0 -> (c)}").unwrap_err();
        assert_eq!(
            err,
            ParseError::DuplicateBranchIndex {
                index: 0,
                offset: 28
            }
        );
    }

    #[test]
    fn fallback_must_be_last() {
        assert!(parse("{@Name: (x), 0 -> (a)}").is_err());
    }

    #[test]
    fn fractional_branch_index_is_error() {
        assert!(parse("{@Name: 1.5 -> (a)}").is_err());
    }

    #[test]
    fn literal_block_is_verbatim() {
        let ast = nodes("a [[{(not a fork)} \\]] done]] b");
        assert_eq!(
            ast,
            vec![AstNode::Text("a {(not a fork)} ]] done b".to_string())]
        );
    }

    #[test]
    fn escaped_brace_is_text() {
        assert_eq!(nodes("\\{x\\}"), vec![AstNode::Text("{x}".to_string())]);
    }

    #[test]
    fn comments_are_dropped() {
        let ast = nodes("a // note {(x)}\nb /* {(y)} */c");
        assert_eq!(ast, vec![AstNode::Text("a \nb  c".to_string())]);
    }

    #[test]
    fn unterminated_fork_reports_open_offset() {
        let err = parse("abc {(a), (b)").unwrap_err();
        assert_eq!(err.offset(), 4);
    }

    #[test]
    fn unterminated_paren_reports_open_offset() {
        let err = parse("{(a, (b)").unwrap_err();
        assert_eq!(err.offset(), 1);
    }

    #[test]
    fn unterminated_script_reports_open_offset() {
        let err = parse("{[1 + 2}").unwrap_err();
        assert!(matches!(err, ParseError::ScriptSyntax { offset: 1, .. }));
    }

    #[test]
    fn unterminated_literal_block_reports_open_offset() {
        let err = parse("ab [[never").unwrap_err();
        assert_eq!(err.offset(), 3);
    }

    #[test]
    fn stray_close_brace_is_error() {
        let err = parse("oops }").unwrap_err();
        assert_eq!(err.offset(), 5);
    }

    #[test]
    fn missing_colon_is_error() {
        assert!(parse("{Name (a)}").is_err());
    }

    #[test]
    fn empty_fork_is_error() {
        assert!(parse("{}").is_err());
    }

    #[test]
    fn legacy_mode_is_collected() {
        let doc = parse("{mode Loud: match \"a\" -> \"A\", \"b\" -> (B)}{use Loud}text").unwrap();
        assert_eq!(doc.modes.len(), 1);
        assert_eq!(doc.modes[0].name, "Loud");
        assert_eq!(doc.modes[0].rules.len(), 2);
        assert_eq!(doc.mode_switches, vec!["Loud".to_string()]);
        assert_eq!(doc.nodes, vec![AstNode::Text("text".to_string())]);
    }

    #[test]
    fn visual_newline_reads_as_space() {
        assert_eq!(nodes("a\\\nb"), vec![AstNode::Text("a b".to_string())]);
    }

    #[test]
    fn error_line_column() {
        let source = "line one\nline {two";
        let err = parse(source).unwrap_err();
        assert_eq!(err.line_column(source), (2, 6));
    }
}
