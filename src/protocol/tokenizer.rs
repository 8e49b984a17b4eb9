//! Character-Level Tokenizer
//!
//! A Mealy-style state machine over single bytes. It consumes from a
//! [`Source`] one peeked byte at a time and yields typed tokens:
//!
//! - `IDENTIFIER`: a maximal run of printable bytes
//! - `STRING`: quoted by `'` or `"`, with backslash escapes
//! - `EOL`: `\n` or `\r\n`
//! - `COMMENT`: `#` to end of line (the line ending is left for the next token)
//! - `ARRAY`: `*<decimal>` header carrying the element count
//! - `BIN_STRING`: `$<decimal>\r\n<exactly size bytes>\r\n`
//!
//! ## State machine
//!
//! ```text
//!                        '$' ┌──────────────┐  CR/LF  ┌─────────────────┐
//!                       ┌───>│ READING_SIZE │────────>│ BIN_STRING_SEP  │
//!                       │    └──────────────┘         └────────┬────────┘
//!                       │       │ '*' + CR/LF: yield ARRAY     │ LF
//! ┌───────────────────┐ │       ▼                              ▼
//! │ WAITING_FOR_TOKEN │─┤   ┌─────────────┐  size met  ┌──────────────┐
//! └───────────────────┘ │   │ READING_BIN │───────────>│ WAITING_EOBS │
//!      ▲     ▲          │   └─────────────┘            └──────────────┘
//!      │     │          │ quote                     LF: yield BIN_STRING
//!      │     │          ▼
//!      │     │   ┌────────────────┐ closing quote ┌───────────────────────┐
//!      │     │   │ READING_STRING │──────────────>│ WAITING_SPACE_FOR_EOS │
//!      │     │   └────────────────┘ yield STRING  └───────────────────────┘
//!      │     │        │ '\' ▲
//!      │     │        ▼     │
//!      │     │      ┌───────┐
//!      │     │      │ SCAPE │
//!      │     │      └───────┘
//!      │     └── printable: READING_IDENTIFIER, '#': READING_COMMENT
//!      └──────── CR: WAITING_EOL (a CR not followed by LF is fatal)
//! ```
//!
//! Lexical oddities preserved on purpose: multiple `\r` are tolerated
//! before the `\n` on both BIN_STRING delimiters, and a `"` inside a
//! `'`-quoted string is stored escaped as `\"`.
//!
//! Every tokenization error is fatal for the connection (see
//! [`ReadError::Tokenization`]); the per-token size cap bounds memory
//! taken by a single client.

use crate::error::ReadError;
use crate::protocol::source::Source;
use crate::stats::IoData;
use std::fmt;
use tokio::io::AsyncRead;

const CARRY_RETURN: u8 = b'\r';
const LINE_FEED: u8 = b'\n';
const DOUBLE_QUOTE: u8 = b'"';
const SINGLE_QUOTE: u8 = b'\'';
const SPACE: u8 = b' ';
const TAB: u8 = b'\t';
const NUMBER_SIGN: u8 = b'#';
const DOLLAR: u8 = b'$';
const ASTERISK: u8 = b'*';
const DEL: u8 = 127;
const SCAPE: u8 = b'\\';

const SIZE_RADIX: usize = 10;

/// The kind of a lexed token.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Comment,
    Identifier,
    Str,
    #[default]
    Eol,
    Array,
    BinString,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Comment => "COMMENT",
            TokenKind::Identifier => "IDENTIFIER",
            TokenKind::Str => "STRING",
            TokenKind::Eol => "EOL",
            TokenKind::Array => "ARRAY",
            TokenKind::BinString => "BIN_STRING",
        };
        f.write_str(name)
    }
}

/// One lexed token.
///
/// `size` is the payload length for identifiers and strings, the declared
/// byte count for binary strings, and the element count for array headers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Token {
    kind: TokenKind,
    data: Vec<u8>,
    delimiter: u8,
    size: usize,
}

impl Token {
    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// The payload as text. Invalid UTF-8 is replaced, never rejected;
    /// binary payloads should go through [`Token::data`] instead.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn append(&mut self, ch: u8) {
        self.data.push(ch);
        if matches!(self.kind, TokenKind::Identifier | TokenKind::Str) {
            self.size += 1;
        }
    }

    fn increase_size(&mut self, digit: u8) {
        self.size = self.size * SIZE_RADIX + (digit - b'0') as usize;
    }

    fn reached_declared_size(&self) -> bool {
        self.data.len() == self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitingForToken,
    ReadingIdentifier,
    ReadingString,
    WaitingSpaceForEos,
    WaitingEol,
    ReadingComment,
    ReadingSize,
    ReadingBinStringSeparator,
    WaitingEobs,
    ReadingBinString,
    Scape,
}

fn real_printable(ch: u8) -> bool {
    ch > SPACE && ch < DEL
}

fn ascii_digit(ch: u8) -> bool {
    ch.is_ascii_digit()
}

/// The byte-to-token state machine.
#[derive(Debug)]
pub struct Tokenizer<R> {
    src: Source<R>,
    state: State,
    token: Token,
    lines: u64,
    max_token_size: usize,
}

impl<R: AsyncRead + Unpin> Tokenizer<R> {
    pub fn new(src: Source<R>, max_token_size: usize) -> Self {
        Self {
            src,
            state: State::WaitingForToken,
            token: Token::default(),
            lines: 0,
            max_token_size,
        }
    }

    /// Lexes the next token.
    ///
    /// Any error other than [`ReadError::Parsing`] leaves the tokenizer in
    /// an undefined state; the caller is expected to drop the connection.
    pub async fn next(&mut self) -> Result<Token, ReadError> {
        loop {
            let ch = self.src.peek().await?;
            match self.state {
                State::WaitingForToken => match ch {
                    DOLLAR => {
                        self.begin(TokenKind::BinString);
                        self.consume();
                        self.state = State::ReadingSize;
                    }
                    ASTERISK => {
                        self.begin(TokenKind::Array);
                        self.consume();
                        self.state = State::ReadingSize;
                    }
                    NUMBER_SIGN => {
                        self.begin(TokenKind::Comment);
                        self.consume();
                        self.state = State::ReadingComment;
                    }
                    SPACE | TAB => {
                        // Whitespace between tokens is elided.
                        self.consume();
                    }
                    CARRY_RETURN => {
                        self.begin(TokenKind::Eol);
                        self.consume();
                        self.state = State::WaitingEol;
                    }
                    LINE_FEED => {
                        self.begin(TokenKind::Eol);
                        self.consume();
                        self.state = State::WaitingForToken;
                        return Ok(self.yield_token());
                    }
                    SINGLE_QUOTE | DOUBLE_QUOTE => {
                        self.begin(TokenKind::Str);
                        self.token.delimiter = ch;
                        self.consume();
                        self.state = State::ReadingString;
                    }
                    _ => {
                        if real_printable(ch) {
                            self.begin(TokenKind::Identifier);
                            self.token.append(ch);
                            self.consume();
                            self.state = State::ReadingIdentifier;
                        } else {
                            return Err(self.illegal_char(ch));
                        }
                    }
                },
                State::ReadingIdentifier => match ch {
                    CARRY_RETURN | LINE_FEED | SPACE | TAB => {
                        self.state = State::WaitingForToken;
                        return Ok(self.yield_token());
                    }
                    DOUBLE_QUOTE | SINGLE_QUOTE => {
                        return Err(ReadError::Tokenization("Unexpected quote".to_string()));
                    }
                    _ => {
                        if real_printable(ch) {
                            if self.reached_size_limit() {
                                return Err(self.token_too_big());
                            }
                            self.token.append(ch);
                            self.consume();
                        } else {
                            return Err(self.illegal_char(ch));
                        }
                    }
                },
                State::ReadingString => match ch {
                    CARRY_RETURN | LINE_FEED => {
                        return Err(ReadError::Tokenization(
                            "Unexpected end of line".to_string(),
                        ));
                    }
                    SCAPE => {
                        if self.reached_size_limit() {
                            return Err(self.token_too_big());
                        }
                        self.token.append(ch);
                        self.consume();
                        self.state = State::Scape;
                    }
                    _ if ch == self.token.delimiter => {
                        self.consume();
                        self.state = State::WaitingSpaceForEos;
                        return Ok(self.yield_token());
                    }
                    _ => {
                        // A double quote inside a single-quoted string is
                        // stored escaped so re-encoding stays unambiguous.
                        if ch == DOUBLE_QUOTE {
                            self.token.append(SCAPE);
                        }
                        if self.reached_size_limit() {
                            return Err(self.token_too_big());
                        }
                        self.token.append(ch);
                        self.consume();
                    }
                },
                State::WaitingSpaceForEos => {
                    if ch == LINE_FEED || ch == CARRY_RETURN || ch == SPACE {
                        // Not consumed: the separator is the next token's
                        // problem.
                        self.state = State::WaitingForToken;
                    } else {
                        return Err(ReadError::Tokenization(format!(
                            "Unexpected '{}' next to closing quote",
                            ch as char
                        )));
                    }
                }
                State::WaitingEol => {
                    if ch != LINE_FEED {
                        return Err(ReadError::Tokenization(
                            "Missing line feed after carriage return".to_string(),
                        ));
                    }
                    self.consume();
                    self.state = State::WaitingForToken;
                    return Ok(self.yield_token());
                }
                State::ReadingComment => {
                    if ch == CARRY_RETURN || ch == LINE_FEED {
                        self.state = State::WaitingForToken;
                        return Ok(self.yield_token());
                    }
                    self.consume();
                }
                State::ReadingSize => {
                    if ascii_digit(ch) {
                        self.token.increase_size(ch);
                        self.consume();
                    } else if ch == CARRY_RETURN || ch == LINE_FEED {
                        if self.token.is(TokenKind::Array) {
                            self.state = State::WaitingForToken;
                            return Ok(self.yield_token());
                        }
                        if self.reached_size_limit() {
                            return Err(self.token_too_big());
                        }
                        self.state = State::ReadingBinStringSeparator;
                    } else {
                        return Err(self.illegal_char(ch));
                    }
                }
                State::ReadingBinStringSeparator => {
                    if ch == CARRY_RETURN {
                        // Any number of CRs before the LF is tolerated, so
                        // "$3\r\r\r\nfoo\r\n" lexes the same as "$3\r\nfoo\r\n".
                        self.consume();
                    } else if ch == LINE_FEED {
                        self.consume();
                        self.state = State::ReadingBinString;
                        self.lines += 1;
                    } else {
                        return Err(self.illegal_char(ch));
                    }
                }
                State::WaitingEobs => {
                    if ch == CARRY_RETURN {
                        // Same CR tolerance as the opening separator.
                        self.consume();
                    } else if ch == LINE_FEED {
                        self.consume();
                        self.state = State::WaitingForToken;
                        self.lines += 1;
                        return Ok(self.yield_token());
                    } else {
                        return Err(self.illegal_char(ch));
                    }
                }
                State::ReadingBinString => {
                    if self.token.reached_declared_size() {
                        self.state = State::WaitingEobs;
                        continue;
                    }
                    self.token.append(ch);
                    self.consume();
                }
                State::Scape => {
                    if self.reached_size_limit() {
                        return Err(self.token_too_big());
                    }
                    self.token.append(ch);
                    self.consume();
                    self.state = State::ReadingString;
                }
            }
        }
    }

    /// Drains the I/O accounting accumulated since the last call.
    pub fn take_io(&mut self) -> IoData {
        self.src.take_io()
    }

    pub fn reads(&self) -> u64 {
        self.src.reads()
    }

    pub fn bytes_in(&self) -> u64 {
        self.src.bytes_in()
    }

    /// Lines consumed so far, for log context.
    pub fn lines(&self) -> u64 {
        self.lines
    }

    fn begin(&mut self, kind: TokenKind) {
        self.token = Token {
            kind,
            ..Token::default()
        };
    }

    fn consume(&mut self) {
        self.src.rm();
    }

    fn yield_token(&mut self) -> Token {
        if self.token.is(TokenKind::Eol) {
            self.lines += 1;
        }
        std::mem::take(&mut self.token)
    }

    fn reached_size_limit(&self) -> bool {
        self.token.size() >= self.max_token_size
    }

    fn illegal_char(&self, ch: u8) -> ReadError {
        ReadError::Tokenization(format!("Illegal char {ch}"))
    }

    fn token_too_big(&self) -> ReadError {
        ReadError::Tokenization(format!(
            "Token is too big (max size allowed is {} bytes)",
            self.max_token_size
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer(input: &[u8]) -> Tokenizer<&[u8]> {
        Tokenizer::new(Source::new(input, 8), 128)
    }

    async fn collect(input: &[u8]) -> Vec<Token> {
        let mut t = tokenizer(input);
        let mut tokens = Vec::new();
        loop {
            match t.next().await {
                Ok(token) => tokens.push(token),
                Err(ReadError::Eof) => return tokens,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    }

    #[tokio::test]
    async fn test_basic_line_tokenization() {
        let tokens = collect(b"GET F398BC5672A51D8D \n").await;
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].kind(), TokenKind::Identifier);
        assert_eq!(tokens[0].text(), "GET");
        assert_eq!(tokens[0].size(), 3);
        assert_eq!(tokens[1].text(), "F398BC5672A51D8D");
        assert_eq!(tokens[2].kind(), TokenKind::Eol);
    }

    #[tokio::test]
    async fn test_wire_form_tokenization() {
        let tokens = collect(b"\t  *\n*2\r\n$3\r\nGET\r\n$16\nF398BC5672A51D8D\r\n\n").await;
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Array,
                TokenKind::Eol,
                TokenKind::Array,
                TokenKind::Eol,
                TokenKind::BinString,
                TokenKind::BinString,
                TokenKind::Eol,
            ]
        );
        assert_eq!(tokens[0].size(), 0);
        assert_eq!(tokens[2].size(), 2);
        assert_eq!(tokens[4].text(), "GET");
        assert_eq!(tokens[5].text(), "F398BC5672A51D8D");
    }

    #[tokio::test]
    async fn test_single_byte_stream() {
        let mut t = tokenizer(b"x");
        let token = t.next().await.unwrap();
        assert_eq!(token.kind(), TokenKind::Identifier);
        assert_eq!(token.text(), "x");
        assert_eq!(token.size(), 1);
        assert!(matches!(t.next().await, Err(ReadError::Eof)));
    }

    #[tokio::test]
    async fn test_quoted_strings() {
        let tokens = collect(b"'hello world' \"double\" \n").await;
        assert_eq!(tokens[0].kind(), TokenKind::Str);
        assert_eq!(tokens[0].text(), "hello world");
        assert_eq!(tokens[1].text(), "double");
    }

    #[tokio::test]
    async fn test_string_escape_keeps_backslash() {
        let tokens = collect(b"'a\\'b' \n").await;
        assert_eq!(tokens[0].data(), b"a\\'b");
    }

    #[tokio::test]
    async fn test_double_quote_in_single_quoted_string_is_escaped() {
        let tokens = collect(b"'say \"hi\"' \n").await;
        assert_eq!(tokens[0].data(), b"say \\\"hi\\\"");
    }

    #[tokio::test]
    async fn test_comment_runs_to_end_of_line() {
        let tokens = collect(b"# a comment\nGET\n").await;
        assert_eq!(tokens[0].kind(), TokenKind::Comment);
        assert_eq!(tokens[1].kind(), TokenKind::Eol);
        assert_eq!(tokens[2].text(), "GET");
    }

    #[tokio::test]
    async fn test_cr_without_lf_is_fatal() {
        let mut t = tokenizer(b"\rGET\n");
        let err = t.next().await.unwrap_err();
        assert!(matches!(err, ReadError::Tokenization(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_quote_inside_identifier_is_fatal() {
        let mut t = tokenizer(b"GE'T\n");
        let err = t.next().await.unwrap_err();
        assert!(matches!(err, ReadError::Tokenization(_)));
    }

    #[tokio::test]
    async fn test_illegal_char_is_fatal() {
        let mut t = tokenizer(b"\x01\n");
        assert!(matches!(
            t.next().await,
            Err(ReadError::Tokenization(_))
        ));
    }

    #[tokio::test]
    async fn test_token_too_big() {
        let input = vec![b'a'; 256];
        let mut t = tokenizer(&input);
        let err = t.next().await.unwrap_err();
        assert!(err.to_string().contains("too big"));
    }

    #[tokio::test]
    async fn test_bin_string_tolerates_extra_carriage_returns() {
        let tokens = collect(b"$3\r\r\r\nfoo\r\r\n\n").await;
        assert_eq!(tokens[0].kind(), TokenKind::BinString);
        assert_eq!(tokens[0].text(), "foo");
    }

    #[tokio::test]
    async fn test_empty_bin_string() {
        let tokens = collect(b"$0\r\n\r\n\n").await;
        assert_eq!(tokens[0].kind(), TokenKind::BinString);
        assert_eq!(tokens[0].data(), b"");
    }

    #[tokio::test]
    async fn test_bin_string_payload_is_binary_safe() {
        // A quote and a hash inside the payload are plain data.
        let tokens = collect(b"$5\r\na\"#'b\r\n\n").await;
        assert_eq!(tokens[0].data(), b"a\"#'b");
    }

    #[tokio::test]
    async fn test_line_counter() {
        let mut t = tokenizer(b"GET a\nGET b\n");
        while !matches!(t.next().await, Err(ReadError::Eof)) {}
        assert_eq!(t.lines(), 2);
    }
}
