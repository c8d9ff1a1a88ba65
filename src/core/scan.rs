/// Balance scanning for script bodies and quoted literals.
///
/// Brackets that occur inside strings, comments, or regex literals must not
/// end a script block, so the scanner tracks those sub-states the way a
/// script lexer would.
use crate::core::parser::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    Quoted(u8),
    Template,
    LineComment,
    BlockComment,
    Regex { in_class: bool },
}

/// Bytes after which a `/` starts a regex literal rather than a division.
const REGEX_PRECEDERS: &[u8] = b"(,=:[!&|?{};+-*%<>~^";

/// Find the `]` closing a script block whose body starts at `body_start`.
///
/// `open` is the offset of the opening `[`, reported if no terminator exists.
pub fn find_script_end(source: &str, body_start: usize, open: usize) -> Result<usize, ParseError> {
    let bytes = source.as_bytes();
    let mut state = State::Code;
    let mut depth = 1usize;
    let mut last_significant: Option<u8> = None;
    let mut quote_start = body_start;
    let mut i = body_start;

    while i < bytes.len() {
        let b = bytes[i];
        let was_code = state == State::Code;
        match state {
            State::Code => match b {
                b'"' | b'\'' => {
                    state = State::Quoted(b);
                    quote_start = i;
                }
                b'`' => {
                    state = State::Template;
                    quote_start = i;
                }
                b'/' if bytes.get(i + 1) == Some(&b'/') => {
                    state = State::LineComment;
                    i += 1;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    state = State::BlockComment;
                    quote_start = i;
                    i += 1;
                }
                b'/' if last_significant.map_or(true, |p| REGEX_PRECEDERS.contains(&p)) => {
                    state = State::Regex { in_class: false };
                    quote_start = i;
                }
                b'[' => depth += 1,
                b']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(i);
                    }
                }
                _ => {}
            },
            State::Quoted(quote) => match b {
                b'\\' => i += 1,
                b'\n' => return Err(unterminated(quote_start, "string literal")),
                _ if b == quote => {
                    state = State::Code;
                    last_significant = Some(quote);
                }
                _ => {}
            },
            State::Template => match b {
                b'\\' => i += 1,
                b'`' => {
                    state = State::Code;
                    last_significant = Some(b'`');
                }
                _ => {}
            },
            State::LineComment => {
                if b == b'\n' {
                    state = State::Code;
                }
            }
            State::BlockComment => {
                if b == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    state = State::Code;
                    i += 1;
                }
            }
            State::Regex { in_class } => match b {
                b'\\' => i += 1,
                b'\n' => return Err(unterminated(quote_start, "regex literal")),
                b'[' => state = State::Regex { in_class: true },
                b']' if in_class => state = State::Regex { in_class: false },
                b'/' if !in_class => {
                    state = State::Code;
                    last_significant = Some(b'/');
                }
                _ => {}
            },
        }

        if was_code && state == State::Code && !b.is_ascii_whitespace() {
            last_significant = Some(b);
        }
        i += 1;
    }

    match state {
        State::Quoted(_) | State::Template => Err(unterminated(quote_start, "string literal")),
        State::BlockComment => Err(unterminated(quote_start, "block comment")),
        State::Regex { .. } => Err(unterminated(quote_start, "regex literal")),
        State::Code | State::LineComment => Err(ParseError::ScriptSyntax {
            offset: open,
            message: "unterminated script block: no matching ']'".to_string(),
        }),
    }
}

/// Find the closing quote of a quoted literal opened at `quote_offset`.
///
/// Double and single quotes may not span a line break; backticks may.
pub fn find_quote_end(source: &str, quote_offset: usize) -> Result<usize, ParseError> {
    let bytes = source.as_bytes();
    let quote = bytes[quote_offset];
    let mut i = quote_offset + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'\n' if quote != b'`' => {
                return Err(unterminated(quote_offset, "quoted literal"));
            }
            b if b == quote => return Ok(i),
            _ => {}
        }
        i += 1;
    }
    Err(unterminated(quote_offset, "quoted literal"))
}

/// Decode backslash escapes inside a quoted literal body.
pub fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn unterminated(offset: usize, what: &str) -> ParseError {
    ParseError::ScriptSyntax {
        offset,
        message: format!("unterminated {what}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn end_of(script: &str) -> Result<usize, ParseError> {
        // Body starts right after the leading `[`.
        find_script_end(script, 1, 0)
    }

    #[test]
    fn simple_block() {
        assert_eq!(end_of("[1 + 2] tail").unwrap(), 6);
    }

    #[test]
    fn nested_brackets() {
        let src = "[let a = [1, [2]]; a] tail";
        assert_eq!(end_of(src).unwrap(), src.find("] tail").unwrap());
    }

    #[test]
    fn brackets_inside_strings_are_ignored() {
        let src = r#"["]", ']', `]`] tail"#;
        assert_eq!(end_of(src).unwrap(), src.find("] tail").unwrap());
    }

    #[test]
    fn brackets_inside_comments_are_ignored() {
        let src = "[1 // ]\n /* ] */ + 2] tail";
        assert_eq!(end_of(src).unwrap(), src.find("] tail").unwrap());
    }

    #[test]
    fn regex_literal_is_skipped() {
        let src = "[x.match(/[\\]]+/)] tail";
        assert_eq!(end_of(src).unwrap(), src.find("] tail").unwrap());
    }

    #[test]
    fn division_is_not_regex() {
        let src = "[a / b / c] tail";
        assert_eq!(end_of(src).unwrap(), src.find("] tail").unwrap());
    }

    #[test]
    fn escaped_quote_inside_string() {
        let src = r#"["a\"]"] tail"#;
        assert_eq!(end_of(src).unwrap(), src.find("] tail").unwrap());
    }

    #[test]
    fn string_spanning_line_end_is_error() {
        let err = end_of("[\"abc\n\"]").unwrap_err();
        assert!(matches!(err, ParseError::ScriptSyntax { offset: 1, .. }));
    }

    #[test]
    fn template_may_span_lines() {
        let src = "[`a\n]`] tail";
        assert_eq!(end_of(src).unwrap(), src.find("] tail").unwrap());
    }

    #[test]
    fn missing_terminator_reports_open_offset() {
        let err = find_script_end("xx[1 + 2", 3, 2).unwrap_err();
        assert_eq!(err.offset(), 2);
    }

    #[test]
    fn quote_end_found() {
        assert_eq!(find_quote_end(r#""a\"b" rest"#, 0).unwrap(), 5);
    }

    #[test]
    fn quote_spanning_line_is_error() {
        assert!(find_quote_end("\"abc\ndef\"", 0).is_err());
    }

    #[test]
    fn unescape_decodes() {
        assert_eq!(unescape(r#"a\"b\nc"#), "a\"b\nc");
    }
}
