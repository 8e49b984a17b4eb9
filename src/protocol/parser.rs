//! Token-Level Command Parser
//!
//! A second state machine layered over the tokenizer. Tokens arrive one at
//! a time and fold into commands:
//!
//! - `INIT`: comments and line endings are eaten; an identifier or string
//!   opens a line-form command; an `ARRAY` header opens a wire-form command
//!   whose arity is the declared element count.
//! - `READING_COMMAND`: identifiers and strings append arguments until an
//!   `EOL` finalizes the command.
//! - `READING_ARRAY`: exactly `size` binary strings are collected (line
//!   endings between elements are tolerated), then the command finalizes.
//!
//! Errors at this layer are recoverable: the parser resets to `INIT`,
//! drops any partial arguments, and the connection keeps reading. Errors
//! from the tokenizer below pass through untouched and stay fatal.

use crate::command::{Command, CommandCode};
use crate::error::ReadError;
use crate::protocol::source::Source;
use crate::protocol::tokenizer::{Token, TokenKind, Tokenizer};
use crate::stats::IoData;
use bytes::Bytes;
use tokio::io::AsyncRead;

/// Hard cap on a single token's payload (4 KiB).
pub const MAX_TOKEN_SIZE: usize = 1024 * 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    ReadingCommand,
    ReadingArray,
}

/// The token-to-command state machine.
#[derive(Debug)]
pub struct Parser<R> {
    tokenizer: Tokenizer<R>,
    state: State,
    args: Vec<Token>,
    expected_args: usize,
}

impl<R: AsyncRead + Unpin> Parser<R> {
    pub fn new(src: Source<R>) -> Self {
        Self {
            tokenizer: Tokenizer::new(src, MAX_TOKEN_SIZE),
            state: State::Init,
            args: Vec::new(),
            expected_args: 0,
        }
    }

    /// Parses the next full command from the stream.
    pub async fn next(&mut self) -> Result<Command, ReadError> {
        loop {
            let token = self.tokenizer.next().await?;

            match self.state {
                State::Init => match token.kind() {
                    TokenKind::Eol | TokenKind::Comment => {}
                    TokenKind::BinString => {
                        return Err(self.recover("binary string outside of an array"));
                    }
                    TokenKind::Str | TokenKind::Identifier => {
                        self.args.push(token);
                        self.state = State::ReadingCommand;
                    }
                    TokenKind::Array => {
                        self.state = State::ReadingArray;
                        self.expected_args = token.size();
                    }
                },
                State::ReadingCommand => match token.kind() {
                    TokenKind::Eol => {
                        self.state = State::Init;
                        return self.parse_args();
                    }
                    TokenKind::Str | TokenKind::Identifier => {
                        self.args.push(token);
                    }
                    TokenKind::Comment => {}
                    TokenKind::BinString => {
                        return Err(self.recover("binary string outside of an array"));
                    }
                    TokenKind::Array => {
                        return Err(
                            self.recover("unexpected array in the middle of a command line")
                        );
                    }
                },
                State::ReadingArray => match token.kind() {
                    TokenKind::Eol => {}
                    TokenKind::BinString => {
                        self.args.push(token);
                        if self.args.len() == self.expected_args {
                            self.state = State::Init;
                            return self.parse_args();
                        }
                    }
                    TokenKind::Array => {
                        return Err(self.recover("array inside an array"));
                    }
                    kind => {
                        return Err(self
                            .recover(&format!("unexpected token {kind} while reading an array")));
                    }
                },
            }
        }
    }

    /// Lexes a single raw token, bypassing command assembly.
    ///
    /// Used by the replica bootstrap, which must read the bare array header
    /// that prefixes the initial dataset.
    pub async fn next_token(&mut self) -> Result<Token, ReadError> {
        self.tokenizer.next().await
    }

    /// Drains the I/O accounting accumulated since the last call.
    pub fn take_io(&mut self) -> IoData {
        self.tokenizer.take_io()
    }

    pub fn reads(&self) -> u64 {
        self.tokenizer.reads()
    }

    pub fn bytes_in(&self) -> u64 {
        self.tokenizer.bytes_in()
    }

    /// Builds a parsing error and resets to a clean state so the
    /// connection can keep going.
    fn recover(&mut self, message: &str) -> ReadError {
        self.args.clear();
        self.state = State::Init;
        ReadError::Parsing(message.to_string())
    }

    fn parse_args(&mut self) -> Result<Command, ReadError> {
        let args = std::mem::take(&mut self.args);
        Self::build_command(&args)
    }

    fn build_command(args: &[Token]) -> Result<Command, ReadError> {
        let name = args[0].text();
        let code = CommandCode::lookup(&name)
            .ok_or_else(|| ReadError::Parsing(format!("invalid command \"{name}\"")))?;

        let nparams = args.len() - 1;

        match code {
            CommandCode::Set => {
                if nparams < 2 {
                    return Err(ReadError::Parsing(
                        "too few args, expected at least 2".to_string(),
                    ));
                }
                if nparams > 4 {
                    return Err(ReadError::Parsing(format!(
                        "unknown args, expected max 4 given {nparams}"
                    )));
                }

                let key = args[1].text();
                let value = Bytes::copy_from_slice(args[2].data());
                let mut expiration = 0;

                if nparams > 2 {
                    let keyword = args[3].text();
                    if !keyword.eq_ignore_ascii_case("EXP") {
                        return Err(ReadError::Parsing(format!(
                            "unknown argument \"{keyword}\""
                        )));
                    }
                    let Some(raw) = args.get(4) else {
                        return Err(ReadError::Parsing(
                            "expected a value after EXP".to_string(),
                        ));
                    };
                    expiration = raw.text().parse().map_err(|_| {
                        ReadError::Parsing(format!("invalid expiration \"{}\"", raw.text()))
                    })?;
                }

                Ok(Command::set(key, value, expiration))
            }
            CommandCode::Get | CommandCode::Rm => {
                if nparams < 1 {
                    return Err(ReadError::Parsing(
                        "too few args, expected at least 1".to_string(),
                    ));
                }
                if nparams > 1 {
                    return Err(ReadError::Parsing(format!(
                        "unknown args, expected max 1 given {nparams}"
                    )));
                }
                Ok(Command::keyed(code, args[1].text()))
            }
            CommandCode::Rmall
            | CommandCode::Stats
            | CommandCode::List
            | CommandCode::Ping
            | CommandCode::Sync
            | CommandCode::Exit => {
                if nparams > 0 {
                    return Err(ReadError::Parsing(format!(
                        "unknown args, expected 0 but {nparams} was given"
                    )));
                }
                Ok(Command::bare(code))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser(input: &[u8]) -> Parser<&[u8]> {
        Parser::new(Source::new(input, 128))
    }

    #[tokio::test]
    async fn test_line_form_get() {
        let mut p = parser(b"GET key0\n");
        let cmd = p.next().await.unwrap();
        assert_eq!(cmd.code(), CommandCode::Get);
        assert_eq!(cmd.key(), "key0");
    }

    #[tokio::test]
    async fn test_line_form_set_with_expiration() {
        let mut p = parser(b"SET key0 'F398BC5672A51D8D' EXP 360\r\n");
        let cmd = p.next().await.unwrap();
        assert_eq!(cmd.code(), CommandCode::Set);
        assert_eq!(cmd.key(), "key0");
        assert_eq!(cmd.value(), &b"F398BC5672A51D8D"[..]);
        assert_eq!(cmd.expiration(), 360);
    }

    #[tokio::test]
    async fn test_array_form_get() {
        let mut p = parser(b"*2\r\n$3\r\nGET\r\n$13\r\nA4B5F8E68751D\r\n");
        let cmd = p.next().await.unwrap();
        assert_eq!(cmd.code(), CommandCode::Get);
        assert_eq!(cmd.key(), "A4B5F8E68751D");
    }

    #[tokio::test]
    async fn test_array_form_set_with_expiration() {
        let mut p =
            parser(b"*5\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n$3\r\nEXP\r\n$2\r\n42\r\n");
        let cmd = p.next().await.unwrap();
        assert_eq!(cmd.code(), CommandCode::Set);
        assert_eq!(cmd.key(), "foo");
        assert_eq!(cmd.value(), &b"bar"[..]);
        assert_eq!(cmd.expiration(), 42);
    }

    #[tokio::test]
    async fn test_command_lookup_is_case_insensitive() {
        let mut p = parser(b"ping\nPiNg\n");
        assert_eq!(p.next().await.unwrap().code(), CommandCode::Ping);
        assert_eq!(p.next().await.unwrap().code(), CommandCode::Ping);
    }

    #[tokio::test]
    async fn test_unknown_command_is_recoverable() {
        let mut p = parser(b"FROB x\nPING\n");
        let err = p.next().await.unwrap_err();
        assert!(matches!(err, ReadError::Parsing(_)));
        assert!(!err.is_fatal());

        // The connection keeps going after the bad line.
        assert_eq!(p.next().await.unwrap().code(), CommandCode::Ping);
    }

    #[tokio::test]
    async fn test_set_arity_is_enforced() {
        let mut p = parser(b"SET onlykey\nSET k v EXP 1 extra\nPING\n");
        assert!(matches!(p.next().await, Err(ReadError::Parsing(_))));
        assert!(matches!(p.next().await, Err(ReadError::Parsing(_))));
        assert_eq!(p.next().await.unwrap().code(), CommandCode::Ping);
    }

    #[tokio::test]
    async fn test_set_rejects_unknown_keyword() {
        let mut p = parser(b"SET k v TTL 5\n");
        let err = p.next().await.unwrap_err();
        assert!(err.to_string().contains("unknown argument"));
    }

    #[tokio::test]
    async fn test_set_rejects_non_numeric_expiration() {
        let mut p = parser(b"SET k v EXP soon\n");
        let err = p.next().await.unwrap_err();
        assert!(err.to_string().contains("invalid expiration"));
    }

    #[tokio::test]
    async fn test_set_rejects_negative_expiration() {
        let mut p = parser(b"SET k v EXP -5\n");
        assert!(matches!(p.next().await, Err(ReadError::Parsing(_))));
    }

    #[tokio::test]
    async fn test_bin_string_at_top_level_is_an_error() {
        let mut p = parser(b"$3\r\nGET\r\nPING\n");
        assert!(matches!(p.next().await, Err(ReadError::Parsing(_))));
        assert_eq!(p.next().await.unwrap().code(), CommandCode::Ping);
    }

    #[tokio::test]
    async fn test_array_in_the_middle_of_a_line_is_an_error() {
        let mut p = parser(b"GET *2\r\n");
        assert!(matches!(p.next().await, Err(ReadError::Parsing(_))));
    }

    #[tokio::test]
    async fn test_comments_are_skipped() {
        let mut p = parser(b"# warm up\nPING # trailing\n");
        assert_eq!(p.next().await.unwrap().code(), CommandCode::Ping);
    }

    #[tokio::test]
    async fn test_eols_tolerated_between_array_elements() {
        let mut p = parser(b"*2\r\n\n$3\r\nGET\r\n\n$1\r\nk\r\n");
        let cmd = p.next().await.unwrap();
        assert_eq!(cmd.code(), CommandCode::Get);
        assert_eq!(cmd.key(), "k");
    }

    #[tokio::test]
    async fn test_wire_round_trip() {
        // Encoding a SET as wire pieces and re-parsing yields an equal command.
        let original = Command::set("key0".to_string(), Bytes::from_static(b"payload"), 360);
        let mut encoded = format!("*{}\r\n", original.to_pieces().len()).into_bytes();
        for piece in original.to_pieces() {
            encoded.extend_from_slice(format!("${}\r\n", piece.len()).as_bytes());
            encoded.extend_from_slice(&piece);
            encoded.extend_from_slice(b"\r\n");
        }

        let mut p = parser(&encoded);
        let parsed = p.next().await.unwrap();
        assert_eq!(parsed, original);
    }

    #[tokio::test]
    async fn test_eof_before_any_command() {
        let mut p = parser(b"");
        assert!(matches!(p.next().await, Err(ReadError::Eof)));
    }
}
