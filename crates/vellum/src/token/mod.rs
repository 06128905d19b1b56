//! Lexical tokens, category codes and source positions.

mod catcode;
pub mod lexer;
pub mod source;
pub use catcode::CatCode;
use std::num;
use vellum_stdext::collections::interner;

/// String type used to represent control sequence names in Vellum.
///
/// The implementation of this type is opaque so that it can be performance
/// optimized without worrying about downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CsName(num::NonZeroU32);

impl interner::Key for CsName {
    fn try_from_usize(index: usize) -> Option<Self> {
        <num::NonZeroU32 as interner::Key>::try_from_usize(index).map(CsName)
    }

    fn into_usize(self) -> usize {
        <num::NonZeroU32 as interner::Key>::into_usize(self.0)
    }
}

/// String interner for control sequence names.
pub type CsNameInterner = interner::Interner<CsName>;

/// The source position of a token.
///
/// Positions are attached to every token, preserved across copies, and
/// used only for diagnostics, never for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Position {
    /// Identity of the buffer the token came from.
    pub buffer: u32,
    /// Line within the buffer, starting at 1.
    pub line: u32,
    /// Column within the line, starting at 1.
    pub column: u32,
    /// Character offset within the buffer, starting at 0.
    pub offset: u32,
    /// Number of source characters the token covers. A trio escape covers
    /// 3 characters; a control sequence covers the escape character and
    /// its whole name.
    pub len: u32,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The value of a lexical token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LexValue {
    /// A character together with the category code it was read under.
    Char(char, CatCode),
    /// A control sequence name.
    ControlSequence(CsName),
}

/// A lexical token: a character-category pair or a control sequence name,
/// together with its source position.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LexToken {
    value: LexValue,
    pos: Position,
}

impl LexToken {
    pub fn new(value: LexValue, pos: Position) -> LexToken {
        LexToken { value, pos }
    }

    #[inline]
    pub fn value(&self) -> LexValue {
        self.value
    }

    #[inline]
    pub fn pos(&self) -> Position {
        self.pos
    }
}

impl PartialEq for LexToken {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for LexToken {}
