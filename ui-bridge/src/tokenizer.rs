//! Lexical tokenizer backing `/ddb/tokenize`.
//!
//! Used for syntax highlighting only, so it never fails: when the SQL tokenizer stops
//! on malformed input (an unterminated string or comment) the tokens before the error
//! are kept and the rest of the input becomes one token classified by its first
//! characters.

use sqlparser::{
    dialect::DuckDbDialect,
    keywords::Keyword,
    tokenizer::{Location, Token, TokenWithSpan, Tokenizer, Whitespace},
};
use wire::{TokenKind, TokenizeResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SqlToken {
    /// Byte offset of the first character of the token.
    pub offset: usize,
    pub kind: TokenKind,
}

pub fn tokenize(sql: &str) -> Vec<SqlToken> {
    let dialect = DuckDbDialect {};
    let mut spanned = Vec::new();
    let failed = Tokenizer::new(&dialect, sql)
        .tokenize_with_location_into_buf(&mut spanned)
        .is_err();

    let mut cursor = Cursor::new(sql);
    let mut tokens = Vec::with_capacity(spanned.len());
    for TokenWithSpan { token, span } in &spanned {
        let offset = cursor.offset_of(span.start);
        if let Some(kind) = classify(token) {
            tokens.push(SqlToken { offset, kind });
        }
    }

    if failed {
        let resume = spanned
            .last()
            .map(|last| cursor.offset_of(last.span.end))
            .unwrap_or(0);
        let rest = &sql[resume..];
        let trimmed = rest.trim_start();
        if !trimmed.is_empty() {
            tokens.push(SqlToken {
                offset: resume + (rest.len() - trimmed.len()),
                kind: classify_remainder(trimmed),
            });
        }
    }
    tokens
}

pub fn tokenize_result(sql: &str) -> TokenizeResult {
    let tokens = tokenize(sql);
    let mut result = TokenizeResult {
        offsets: Vec::with_capacity(tokens.len()),
        types: Vec::with_capacity(tokens.len()),
    };
    for token in tokens {
        result.offsets.push(token.offset as u64);
        result.types.push(token.kind);
    }
    result
}

/// Tokenizes a raw request body. Offsets always index into `body`, also when it is not
/// valid UTF-8: each invalid sequence is read as one replacement character and tokens
/// are mapped back onto the original bytes.
pub fn tokenize_bytes(body: &[u8]) -> TokenizeResult {
    if let Ok(sql) = std::str::from_utf8(body) {
        return tokenize_result(sql);
    }

    let mut text = String::with_capacity(body.len());
    let mut segments = Vec::new();
    let mut raw = 0;
    for chunk in body.utf8_chunks() {
        segments.push(Segment {
            text_start: text.len(),
            raw_start: raw,
            valid_len: chunk.valid().len(),
        });
        text.push_str(chunk.valid());
        raw += chunk.valid().len();
        if !chunk.invalid().is_empty() {
            text.push(char::REPLACEMENT_CHARACTER);
            raw += chunk.invalid().len();
        }
    }

    let mut result = tokenize_result(&text);
    for offset in &mut result.offsets {
        *offset = raw_offset(&segments, *offset as usize) as u64;
    }
    result
}

fn classify(token: &Token) -> Option<TokenKind> {
    let kind = match token {
        Token::EOF => return None,
        Token::Whitespace(Whitespace::SingleLineComment { .. } | Whitespace::MultiLineComment(_)) => {
            TokenKind::Comment
        }
        Token::Whitespace(_) => return None,
        Token::Word(word) if word.quote_style.is_none() && word.keyword != Keyword::NoKeyword => {
            TokenKind::Keyword
        }
        Token::Word(_) | Token::Placeholder(_) => TokenKind::Identifier,
        Token::Number(..) => TokenKind::NumericConstant,
        Token::SingleQuotedString(_)
        | Token::DoubleQuotedString(_)
        | Token::DollarQuotedString(_)
        | Token::NationalStringLiteral(_)
        | Token::EscapedStringLiteral(_)
        | Token::HexStringLiteral(_)
        | Token::SingleQuotedByteStringLiteral(_)
        | Token::DoubleQuotedByteStringLiteral(_) => TokenKind::StringConstant,
        _ => TokenKind::Operator,
    };
    Some(kind)
}

fn classify_remainder(rest: &str) -> TokenKind {
    let mut chars = rest.chars();
    match (chars.next(), chars.next()) {
        (Some('/'), Some('*')) | (Some('-'), Some('-')) => TokenKind::Comment,
        (Some('\'' | '$'), _) => TokenKind::StringConstant,
        (Some('e' | 'E' | 'x' | 'X' | 'b' | 'B' | 'n' | 'N'), Some('\'')) => {
            TokenKind::StringConstant
        }
        (Some('"'), _) => TokenKind::Identifier,
        _ => TokenKind::Operator,
    }
}

/// Walks the source forward converting the tokenizer's 1-based line/column (counted in
/// chars) into byte offsets. Locations must be requested in ascending order.
struct Cursor<'a> {
    source: &'a str,
    byte: usize,
    line: u64,
    column: u64,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            byte: 0,
            line: 1,
            column: 1,
        }
    }

    fn offset_of(&mut self, target: Location) -> usize {
        while (self.line, self.column) < (target.line, target.column) {
            let Some(ch) = self.source[self.byte..].chars().next() else {
                break;
            };
            self.byte += ch.len_utf8();
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.byte
    }
}

struct Segment {
    text_start: usize,
    raw_start: usize,
    valid_len: usize,
}

fn raw_offset(segments: &[Segment], offset: usize) -> usize {
    let index = segments
        .partition_point(|segment| segment.text_start <= offset)
        .saturating_sub(1);
    let Some(segment) = segments.get(index) else {
        return offset;
    };
    // past the valid run means the replacement character, which starts the invalid run
    segment.raw_start + (offset - segment.text_start).min(segment.valid_len)
}
