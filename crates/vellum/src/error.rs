//! Error handling
//!
//! Errors in Vellum fall into a small, closed set of kinds fixed by the
//! component contracts, so they are modeled as one concrete enum rather
//! than trait objects. Errors are always boxed on return: `Result<T>` must
//! stay small because it flows through the tight token-production loops.
//!
//! End of input is not an error. Streams signal it by returning
//! `Ok(None)`; it only becomes an [Error::UnterminatedAbsorption] when the
//! input runs out in the middle of an absorption protocol.

use crate::token::Position;
use vellum_stdext::color::Colorize;

/// Result type used throughout Vellum.
pub type Result<T> = std::result::Result<T, Box<Error>>;

/// An error raised while producing tokens.
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// A control sequence name was not found anywhere in the scope chain.
    ///
    /// This error is recoverable: the triggering token is restored to the
    /// front of the input, so the caller may retry after performing a
    /// side-effecting operation (e.g. the control sequence is about to be
    /// defined by a not-yet-executed command later in the same chunk).
    NoSuchControlSequence { name: String, pos: Position },

    /// The input was exhausted in the middle of an absorption protocol:
    /// an unterminated group, delimited argument, conditional text, etc.
    ///
    /// Fatal to the current top-level command.
    UnterminatedAbsorption { doing: &'static str, pos: Position },

    /// A token of unexpected shape appeared where the active absorption
    /// protocol requires a specific shape (e.g. a character where only a
    /// control sequence is legal as a definition target).
    ///
    /// Fatal to the current top-level command.
    MalformedToken {
        expected: &'static str,
        found: String,
        pos: Position,
    },

    /// The character source produced a character with the invalid
    /// category code.
    InvalidCharacter { c: char, pos: Position },

    /// An end-of-group token appeared with no group to end.
    NoScopeToEnd { pos: Position },
}

impl Error {
    pub fn no_such_control_sequence<N: Into<String>>(name: N, pos: Position) -> Box<Error> {
        Box::new(Error::NoSuchControlSequence {
            name: name.into(),
            pos,
        })
    }

    pub fn unterminated_absorption(doing: &'static str, pos: Position) -> Box<Error> {
        Box::new(Error::UnterminatedAbsorption { doing, pos })
    }

    pub fn malformed_token<F: Into<String>>(
        expected: &'static str,
        found: F,
        pos: Position,
    ) -> Box<Error> {
        Box::new(Error::MalformedToken {
            expected,
            found: found.into(),
            pos,
        })
    }

    pub fn invalid_character(c: char, pos: Position) -> Box<Error> {
        Box::new(Error::InvalidCharacter { c, pos })
    }

    pub fn no_scope_to_end(pos: Position) -> Box<Error> {
        Box::new(Error::NoScopeToEnd { pos })
    }

    /// Whether the caller may retry the same input after an intervening
    /// side effect.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NoSuchControlSequence { .. })
    }

    /// The source position the error is attached to.
    pub fn pos(&self) -> Position {
        match self {
            Error::NoSuchControlSequence { pos, .. }
            | Error::UnterminatedAbsorption { pos, .. }
            | Error::MalformedToken { pos, .. }
            | Error::InvalidCharacter { pos, .. }
            | Error::NoScopeToEnd { pos } => *pos,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pos = self.pos();
        write!(f, "{}: ", format!["{}:{}", pos.line, pos.column].bold())?;
        match self {
            Error::NoSuchControlSequence { name, .. } => {
                write![f, "undefined control sequence \\{}", name.bright_red()]
            }
            Error::UnterminatedAbsorption { doing, .. } => {
                write![f, "unexpected end of input while {doing}"]
            }
            Error::MalformedToken {
                expected, found, ..
            } => {
                write![f, "expected {expected} but found {}", found.bright_red()]
            }
            Error::InvalidCharacter { c, .. } => {
                write![f, "invalid character {c:?} in the input"]
            }
            Error::NoScopeToEnd { .. } => {
                write![f, "there is no group to end"]
            }
        }
    }
}

impl std::error::Error for Error {}
