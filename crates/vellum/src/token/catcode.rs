//! Category codes and operations on them.
use CatCode::*;

/// Enum representing the 16 category codes.
///
/// Every character read from the input is classified with a category code,
/// and the category (not the character itself) drives the lexer. The
/// category table is owned by external engine state and is mutable at run
/// time, which is why the lexer only ever looks a bounded number of
/// characters ahead.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CatCode {
    /// Marks the beginning of a control sequence.
    /// Example: `\`.
    ///
    /// This category code is never seen outside of the lexer.
    Escape = 0,
    /// Begins a new group.
    /// Example: `{`.
    BeginGroup = 1,
    /// Ends an existing group.
    /// Example: `}`.
    EndGroup = 2,
    /// Starts or ends math mode.
    /// Example: `$`.
    MathShift = 3,
    /// Used in typesetting tables to align cells.
    /// Example: `&`.
    AlignmentTab = 4,
    /// Marks a new line in the input.
    /// Example: `\n`.
    ///
    /// This category code is never seen outside of the lexer.
    EndOfLine = 5,
    /// Marks the beginning of a macro parameter number.
    /// Example: `#`.
    Parameter = 6,
    /// Puts the following character or group in a superscript.
    /// Example: `^`.
    ///
    /// Two consecutive identical superscript characters begin a trio
    /// escape; see the lexer documentation.
    Superscript = 7,
    /// Puts the following character or group in a subscript.
    /// Example: `_`.
    Subscript = 8,
    /// A character that is silently dropped by the lexer.
    /// Example: ASCII null (0).
    ///
    /// This category code is never seen outside of the lexer.
    Ignored = 9,
    /// Whitespace.
    /// Example: ` `.
    Space = 10,
    /// A character that can be used in a multi-character control sequence
    /// name.
    /// Examples: `[a-zA-Z]`.
    Letter = 11,
    /// A character that cannot be used in a control sequence name.
    /// Example: `@`.
    #[default]
    Other = 12,
    /// A single character that behaves like a control sequence.
    /// Example: `~`.
    Active = 13,
    /// Marks the beginning of a comment.
    /// All characters until the next [EndOfLine] are discarded.
    /// Example: `%`.
    ///
    /// This category code is never seen outside of the lexer.
    Comment = 14,
    /// An invalid character: the lexer returns an error when one appears
    /// in the input.
    /// Example: ASCII delete (127).
    ///
    /// This category code is never seen outside of the lexer.
    Invalid = 15,
}

impl std::fmt::Display for CatCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} ({})", self, *self as u8)
    }
}

impl CatCode {
    /// Default category codes for all ASCII characters.
    ///
    /// To find the category code for an ASCII character, convert it to an
    /// integer and use it as an index into the array. Characters outside
    /// the array default to [Other].
    ///
    /// These are the classic plain defaults: backslash is the escape
    /// character, braces delimit groups, `#`, `$`, `%`, `&`, `^`, `_` and
    /// `~` have their usual special meanings, and letters are exactly
    /// `[a-zA-Z]`.
    pub const PLAIN_DEFAULTS: [CatCode; 128] = [
        Ignored, // ASCII null
        Other, Other, Other, Other, Other, Other, Other, Other,
        Space, // horizontal tab
        EndOfLine, // line feed
        Other, Other,
        EndOfLine, // carriage return
        Other, Other, Other, Other, Other, Other, Other, Other,
        Other, Other, Other, Other, Other, Other, Other, Other,
        Other, Other,
        Space, // space
        Other, Other,
        Parameter, // #
        MathShift, // $
        Comment, // %
        AlignmentTab, // &
        Other, Other, Other, Other, Other, Other, Other, Other,
        Other, Other, Other, Other, Other, Other, Other, Other,
        Other, Other, Other, Other, Other, Other, Other, Other,
        Other,
        Other, // @
        Letter, // A..Z follow
        Letter, Letter, Letter, Letter, Letter, Letter, Letter, Letter,
        Letter, Letter, Letter, Letter, Letter, Letter, Letter, Letter,
        Letter, Letter, Letter, Letter, Letter, Letter, Letter, Letter,
        Letter, Other,
        Escape, // \\
        Other,
        Superscript, // ^
        Subscript, // _
        Other,
        Letter, // a..z follow
        Letter, Letter, Letter, Letter, Letter, Letter, Letter, Letter,
        Letter, Letter, Letter, Letter, Letter, Letter, Letter, Letter,
        Letter, Letter, Letter, Letter, Letter, Letter, Letter, Letter,
        Letter,
        BeginGroup, // {
        Other,
        EndGroup, // }
        Active, // ~
        Invalid, // ASCII delete
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_defaults_layout() {
        let t = CatCode::PLAIN_DEFAULTS;
        assert_eq!(t.len(), 128);
        assert_eq!(t['\\' as usize], Escape);
        assert_eq!(t['{' as usize], BeginGroup);
        assert_eq!(t['}' as usize], EndGroup);
        assert_eq!(t['$' as usize], MathShift);
        assert_eq!(t['&' as usize], AlignmentTab);
        assert_eq!(t['\n' as usize], EndOfLine);
        assert_eq!(t['#' as usize], Parameter);
        assert_eq!(t['^' as usize], Superscript);
        assert_eq!(t['_' as usize], Subscript);
        assert_eq!(t[' ' as usize], Space);
        assert_eq!(t['a' as usize], Letter);
        assert_eq!(t['Z' as usize], Letter);
        assert_eq!(t['@' as usize], Other);
        assert_eq!(t['~' as usize], Active);
        assert_eq!(t['%' as usize], Comment);
        assert_eq!(t[0], Ignored);
        assert_eq!(t[127], Invalid);
    }
}
