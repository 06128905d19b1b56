//! The lexer, which reads streams of characters and outputs lexical
//! tokens.
//!
//! The lexer is "just in time": it only produces the next token when that
//! token is requested. In general it is an error to request many tokens
//! and process them as a batch, because lexing is controlled by category
//! codes which can change dynamically at runtime based on the results of
//! the lexer. Consider this snippet, assuming default category codes:
//! ```tex
//! \change_catcode_of_A_to_whitespace AB
//! ```
//! If tokenized as a batch the lexer returns a control sequence
//! `\change_...` and two letter tokens A and B. However the control
//! sequence itself changes A into a whitespace character, which must then
//! be trimmed like all whitespace after a control sequence. The correct
//! result is the control sequence followed by the single letter B.
//!
//! # Trio escapes
//!
//! Two consecutive identical superscript-category characters begin a
//! three-character escape: `^^c` denotes the character whose code is
//! `ord(c) + 64` if `ord(c) < 64`, and `ord(c) - 64` otherwise. The
//! decoded character replaces the trio and its category is looked up
//! fresh; decoding is not applied recursively to the result. A trio whose
//! data character is missing or has the end-of-line category is left
//! undecoded.

use crate::error;
use crate::token::source::CharacterSource;
use crate::token::CatCode;
use crate::token::CsNameInterner;
use crate::token::LexToken;
use crate::token::LexValue;
use crate::token::Position;

/// Trait through which the lexer looks up category codes.
///
/// The category table is owned by external engine state and mutable at
/// any time by executed commands, so the lexer consults it through this
/// capability rather than holding a copy.
pub trait CatCodeFn {
    fn cat_code(&self, c: char) -> CatCode;
}

impl CatCodeFn for std::collections::HashMap<char, CatCode> {
    fn cat_code(&self, c: char) -> CatCode {
        self.get(&c).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
enum State {
    LineStart,
    MidLine,
    SkippingBlanks,
}

/// The Vellum lexer.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Lexer {
    source: CharacterSource,
    state: State,
    // Control sequence names are read into a shared buffer to avoid
    // allocating for each one.
    #[cfg_attr(feature = "serde", serde(skip))]
    name_buffer: String,
}

impl Default for Lexer {
    fn default() -> Self {
        Lexer {
            source: CharacterSource::new(),
            state: State::LineStart,
            name_buffer: Default::default(),
        }
    }
}

impl Lexer {
    pub fn new() -> Lexer {
        Default::default()
    }

    /// Access the underlying character source, e.g. to insert a buffer.
    pub fn source_mut(&mut self) -> &mut CharacterSource {
        &mut self.source
    }

    /// Produce the next lexical token, or `Ok(None)` at end of input.
    pub fn next<F: CatCodeFn>(
        &mut self,
        cat_code_fn: &F,
        interner: &mut CsNameInterner,
    ) -> error::Result<Option<LexToken>> {
        loop {
            let (c, cat, pos) = match self.read_char(cat_code_fn) {
                None => return Ok(None),
                Some(read) => read,
            };
            match cat {
                CatCode::Comment => {
                    self.skip_comment(cat_code_fn);
                    self.state = State::LineStart;
                }
                CatCode::Escape => {
                    return Ok(Some(self.read_control_sequence(cat_code_fn, interner, pos)?));
                }
                CatCode::BeginGroup
                | CatCode::EndGroup
                | CatCode::MathShift
                | CatCode::AlignmentTab
                | CatCode::Parameter
                | CatCode::Superscript
                | CatCode::Subscript
                | CatCode::Letter
                | CatCode::Other
                | CatCode::Active => {
                    self.state = State::MidLine;
                    return Ok(Some(LexToken::new(LexValue::Char(c, cat), pos)));
                }
                CatCode::Space => match self.state {
                    State::LineStart | State::SkippingBlanks => {}
                    State::MidLine => {
                        self.state = State::SkippingBlanks;
                        return Ok(Some(LexToken::new(LexValue::Char(' ', CatCode::Space), pos)));
                    }
                },
                CatCode::EndOfLine => {
                    let state = self.state;
                    self.state = State::LineStart;
                    match state {
                        State::LineStart => {
                            let par = interner.get_or_intern("par");
                            return Ok(Some(LexToken::new(LexValue::ControlSequence(par), pos)));
                        }
                        State::MidLine => {
                            return Ok(Some(LexToken::new(
                                LexValue::Char(' ', CatCode::Space),
                                pos,
                            )));
                        }
                        State::SkippingBlanks => {}
                    }
                }
                CatCode::Ignored => {}
                CatCode::Invalid => return Err(error::Error::invalid_character(c, pos)),
            }
        }
    }

    /// Consume one character, decoding a trio escape if one applies.
    fn read_char<F: CatCodeFn>(&mut self, cat_code_fn: &F) -> Option<(char, CatCode, Position)> {
        let (c, mut pos) = self.source.advance(1)?;
        if pos.offset == 0 {
            // Beginning of a buffer, including one inserted mid-stream.
            self.state = State::LineStart;
        }
        let cat = cat_code_fn.cat_code(c);
        if cat == CatCode::Superscript {
            if let Some(decoded) = self.peek_trio_data(c, 1, cat_code_fn) {
                self.source.advance(2);
                pos.len = 3;
                return Some((decoded, cat_code_fn.cat_code(decoded), pos));
            }
        }
        Some((c, cat, pos))
    }

    /// Peek the next character without consuming, decoding a trio escape
    /// if one applies. The second element of the result is the number of
    /// source characters the peeked character covers (1 or 3).
    fn peek_char<F: CatCodeFn>(&self, cat_code_fn: &F) -> Option<(char, CatCode, u32)> {
        let c = self.source.peek(1)?;
        let cat = cat_code_fn.cat_code(c);
        if cat == CatCode::Superscript {
            if let Some(decoded) = self.peek_trio_data(c, 2, cat_code_fn) {
                return Some((decoded, cat_code_fn.cat_code(decoded), 3));
            }
        }
        Some((c, cat, 1))
    }

    /// Check whether a trio escape starts at the superscript character
    /// `first`, whose repeat would be at peek position `repeat_at`, and
    /// return the decoded data character if so.
    fn peek_trio_data<F: CatCodeFn>(
        &self,
        first: char,
        repeat_at: usize,
        cat_code_fn: &F,
    ) -> Option<char> {
        if self.source.peek(repeat_at) != Some(first) {
            return None;
        }
        let data = self.source.peek(repeat_at + 1)?;
        if cat_code_fn.cat_code(data) == CatCode::EndOfLine {
            return None;
        }
        let u = data as u32;
        let decoded = if u >= 64 { u - 64 } else { u + 64 };
        char::from_u32(decoded)
    }

    fn read_control_sequence<F: CatCodeFn>(
        &mut self,
        cat_code_fn: &F,
        interner: &mut CsNameInterner,
        mut pos: Position,
    ) -> error::Result<LexToken> {
        let (first, first_cat, first_pos) = match self.read_char(cat_code_fn) {
            None => {
                return Err(error::Error::unterminated_absorption(
                    "reading a control sequence name",
                    pos,
                ))
            }
            Some(read) => read,
        };
        self.name_buffer.clear();
        self.name_buffer.push(first);
        let mut len = 1 + first_pos.len;
        if first_cat == CatCode::Letter {
            while let Some((c, CatCode::Letter, raw_len)) = self.peek_char(cat_code_fn) {
                self.consume_peeked(raw_len);
                self.name_buffer.push(c);
                len += raw_len;
            }
            self.state = State::SkippingBlanks;
        } else if first_cat == CatCode::Space {
            self.state = State::SkippingBlanks;
        } else {
            self.state = State::MidLine;
        }
        pos.len = len;
        let name = interner.get_or_intern(&self.name_buffer);
        Ok(LexToken::new(LexValue::ControlSequence(name), pos))
    }

    fn consume_peeked(&mut self, raw_len: u32) {
        match raw_len {
            3 => {
                self.source.advance(2);
                self.source.advance(1);
            }
            _ => {
                self.source.advance(1);
            }
        }
    }

    fn skip_comment<F: CatCodeFn>(&mut self, cat_code_fn: &F) {
        while let Some((c, _)) = self.source.advance(1) {
            if cat_code_fn.cat_code(c) == CatCode::EndOfLine {
                break;
            }
        }
    }
}
