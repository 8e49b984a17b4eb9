//! Commands and Their Classification
//!
//! A [`Command`] is the parsed form of one client request. The
//! [`CommandCode`] carries the classification the event loop keys off:
//!
//! - **write**: `SET`, `RM`, `RMALL`. Mutate the keyspace, dirty the
//!   snapshot state, and get mirrored to every replica.
//! - **read**: `GET`, `LIST`.
//! - **control**: `PING`, `STATS`, `EXIT`.
//! - `SYNC` is its own thing: it turns the issuing connection into a
//!   replica.
//!
//! Read and control commands are the only ones a read replica accepts
//! from its clients.

use bytes::Bytes;
use std::fmt;

/// The nine command verbs the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    Set,
    Get,
    Rm,
    Rmall,
    Stats,
    List,
    Ping,
    Sync,
    Exit,
}

impl CommandCode {
    pub const ALL: [CommandCode; 9] = [
        CommandCode::Set,
        CommandCode::Get,
        CommandCode::Rm,
        CommandCode::Rmall,
        CommandCode::Stats,
        CommandCode::List,
        CommandCode::Ping,
        CommandCode::Sync,
        CommandCode::Exit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandCode::Set => "SET",
            CommandCode::Get => "GET",
            CommandCode::Rm => "RM",
            CommandCode::Rmall => "RMALL",
            CommandCode::Stats => "STATS",
            CommandCode::List => "LIST",
            CommandCode::Ping => "PING",
            CommandCode::Sync => "SYNC",
            CommandCode::Exit => "EXIT",
        }
    }

    /// Case-insensitive verb lookup.
    pub fn lookup(name: &str) -> Option<CommandCode> {
        Self::ALL
            .into_iter()
            .find(|code| name.eq_ignore_ascii_case(code.as_str()))
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed request: a verb plus whatever arguments it takes.
///
/// The unused fields stay at their empty defaults; a `PING` carries an
/// empty key, an empty value, and a zero expiration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    code: CommandCode,
    key: String,
    value: Bytes,
    expiration: u64,
}

impl Command {
    pub fn new(code: CommandCode, key: String, value: Bytes, expiration: u64) -> Self {
        Self {
            code,
            key,
            value,
            expiration,
        }
    }

    /// A SET with its key, value, and expiration (0 = permanent).
    pub fn set(key: String, value: Bytes, expiration: u64) -> Self {
        Self::new(CommandCode::Set, key, value, expiration)
    }

    /// A single-key command (GET, RM).
    pub fn keyed(code: CommandCode, key: String) -> Self {
        Self::new(code, key, Bytes::new(), 0)
    }

    /// An argument-less command.
    pub fn bare(code: CommandCode) -> Self {
        Self::new(code, String::new(), Bytes::new(), 0)
    }

    pub fn code(&self) -> CommandCode {
        self.code
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn expiration(&self) -> u64 {
        self.expiration
    }

    pub fn has_expiration(&self) -> bool {
        self.expiration != 0
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self.code,
            CommandCode::Set | CommandCode::Rm | CommandCode::Rmall
        )
    }

    pub fn is_read(&self) -> bool {
        matches!(self.code, CommandCode::Get | CommandCode::List)
    }

    pub fn is_control(&self) -> bool {
        matches!(
            self.code,
            CommandCode::Ping | CommandCode::Stats | CommandCode::Exit
        )
    }

    /// Read replicas reject everything else coming from their own clients.
    pub fn can_run_on_replica(&self) -> bool {
        self.is_read() || self.is_control()
    }

    /// True for EXIT: the reader stops after handing this command over.
    pub fn is_final(&self) -> bool {
        self.code == CommandCode::Exit
    }

    /// Encodes the command as array-form pieces for replica broadcast.
    ///
    /// Only write commands are ever broadcast; asking for pieces of any
    /// other verb is a programming error.
    pub fn to_pieces(&self) -> Vec<Bytes> {
        let mut pieces = vec![Bytes::from_static(self.code.as_str().as_bytes())];
        match self.code {
            CommandCode::Rm => {
                pieces.push(Bytes::copy_from_slice(self.key.as_bytes()));
            }
            CommandCode::Set => {
                pieces.push(Bytes::copy_from_slice(self.key.as_bytes()));
                pieces.push(self.value.clone());
                if self.has_expiration() {
                    pieces.push(Bytes::from_static(b"EXP"));
                    pieces.push(Bytes::from(self.expiration.to_string()));
                }
            }
            CommandCode::Rmall => {}
            code => {
                debug_assert!(false, "no wire encoding for {code}");
            }
        }
        pieces
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(CommandCode::lookup("set"), Some(CommandCode::Set));
        assert_eq!(CommandCode::lookup("RmAlL"), Some(CommandCode::Rmall));
        assert_eq!(CommandCode::lookup("NOPE"), None);
    }

    #[test]
    fn test_classification() {
        assert!(Command::bare(CommandCode::Rmall).is_write());
        assert!(Command::keyed(CommandCode::Get, "k".into()).is_read());
        assert!(Command::bare(CommandCode::Ping).is_control());
        assert!(!Command::bare(CommandCode::Sync).is_write());
        assert!(!Command::bare(CommandCode::Sync).can_run_on_replica());
        assert!(Command::bare(CommandCode::Stats).can_run_on_replica());
        assert!(!Command::set("k".into(), Bytes::new(), 0).can_run_on_replica());
    }

    #[test]
    fn test_exit_is_final() {
        assert!(Command::bare(CommandCode::Exit).is_final());
        assert!(!Command::bare(CommandCode::Ping).is_final());
    }

    #[test]
    fn test_set_pieces_include_expiration_only_when_present() {
        let permanent = Command::set("k".into(), Bytes::from_static(b"v"), 0);
        assert_eq!(permanent.to_pieces(), vec!["SET", "k", "v"]);

        let transient = Command::set("k".into(), Bytes::from_static(b"v"), 60);
        assert_eq!(transient.to_pieces(), vec!["SET", "k", "v", "EXP", "60"]);
    }

    #[test]
    fn test_rm_and_rmall_pieces() {
        assert_eq!(
            Command::keyed(CommandCode::Rm, "gone".into()).to_pieces(),
            vec!["RM", "gone"]
        );
        assert_eq!(Command::bare(CommandCode::Rmall).to_pieces(), vec!["RMALL"]);
    }
}
