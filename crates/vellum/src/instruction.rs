//! Instruction tokens and the normalizer that produces them.
//!
//! Every lexical token maps to exactly one canonical instruction token.
//! Instruction values form a closed tagged union: structural character
//! opcodes carry the character they were read from, control-sequence
//! calls start life as unresolved placeholders, and resolution and
//! expansion replace placeholders with resolved opcodes (macro calls,
//! primitives, parameter references) or terminal payload-bearing opcodes
//! (packaged definitions, balanced text, box material).
//!
//! Instructions are immutable once constructed. When a stored instruction
//! is reused (e.g. a primitive's canonical token, or a macro replacement
//! token) it is copied, never aliased, and the copy is re-stamped with the
//! position and invoking name of the call site so diagnostics point at
//! the use, not the definition.

use crate::error;
use crate::router::AliasTarget;
use crate::router::BoxKind;
use crate::router::FontId;
use crate::router::IntParameter;
use crate::router::Primitive;
use crate::router::ShorthandKind;
use crate::router::TokenListParameter;
use crate::texmacro::MacroDefinition;
use crate::token::lexer::CatCodeFn;
use crate::token::lexer::Lexer;
use crate::token::CatCode;
use crate::token::CsName;
use crate::token::CsNameInterner;
use crate::token::LexValue;
use crate::token::Position;
use std::rc::Rc;

/// The value of an instruction token.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// `{`-class character.
    BeginGroup(char),
    /// `}`-class character.
    EndGroup(char),
    MathShift(char),
    AlignmentTab(char),
    /// `#`-class character, used for macro parameters.
    Parameter(char),
    Superscript(char),
    Subscript(char),
    Space(char),
    Letter(char),
    Other(char),
    /// An active character. Active characters pass through the expander
    /// as terminal tokens.
    Active(char),

    /// An unresolved control sequence call. The resolver replaces these
    /// with the resolved opcode in a single atomic step.
    ControlSequence(CsName),

    /// A call of a user-defined macro.
    MacroCall(Rc<MacroDefinition>),
    /// A primitive operation.
    Primitive(Primitive),
    /// A reference to a settable integer parameter.
    IntParameter(IntParameter),
    /// A reference to a settable token-list parameter.
    TokenListParameter(TokenListParameter),
    /// A command that enables a font.
    Font(FontId),

    /// A macro definition packaged by the expander, to be executed by the
    /// downstream command executor.
    MacroDefinition(Rc<MacroDefinition>),
    /// An alias assignment packaged by the expander.
    LetAssignment {
        alias: CsName,
        target: AliasTarget,
        global: bool,
    },
    /// A shorthand definition (e.g. `\chardef`) packaged by the expander.
    /// The code value is parsed by the downstream executor.
    ShorthandDefinition {
        kind: ShorthandKind,
        name: CsName,
        global: bool,
    },
    /// A font definition packaged by the expander. The downstream
    /// executor allocates the font identifier.
    FontDefinition { name: CsName },

    /// A balanced token sequence captured as one opaque unit.
    BalancedText(Rc<Vec<Instruction>>),
    /// The material built by the external executor for a box group.
    Material(BoxKind, Rc<Vec<Instruction>>),
}

impl Value {
    /// Build the instruction value for a character read under the
    /// provided category code.
    pub fn new(c: char, cat_code: CatCode) -> Value {
        match cat_code {
            CatCode::BeginGroup => Value::BeginGroup(c),
            CatCode::EndGroup => Value::EndGroup(c),
            CatCode::MathShift => Value::MathShift(c),
            CatCode::AlignmentTab => Value::AlignmentTab(c),
            CatCode::Parameter => Value::Parameter(c),
            CatCode::Superscript => Value::Superscript(c),
            CatCode::Subscript => Value::Subscript(c),
            CatCode::Space => Value::Space(c),
            CatCode::Letter => Value::Letter(c),
            CatCode::Other => Value::Other(c),
            CatCode::Active => Value::Active(c),
            _ => panic!("category code {cat_code} cannot appear in a token"),
        }
    }

    /// The character this value carries, if it is a character opcode.
    pub fn char(&self) -> Option<char> {
        match self {
            Value::BeginGroup(c)
            | Value::EndGroup(c)
            | Value::MathShift(c)
            | Value::AlignmentTab(c)
            | Value::Parameter(c)
            | Value::Superscript(c)
            | Value::Subscript(c)
            | Value::Space(c)
            | Value::Letter(c)
            | Value::Other(c)
            | Value::Active(c) => Some(*c),
            _ => None,
        }
    }

    /// The category code this value carries, if it is a character opcode.
    pub fn cat_code(&self) -> Option<CatCode> {
        match self {
            Value::BeginGroup(_) => Some(CatCode::BeginGroup),
            Value::EndGroup(_) => Some(CatCode::EndGroup),
            Value::MathShift(_) => Some(CatCode::MathShift),
            Value::AlignmentTab(_) => Some(CatCode::AlignmentTab),
            Value::Parameter(_) => Some(CatCode::Parameter),
            Value::Superscript(_) => Some(CatCode::Superscript),
            Value::Subscript(_) => Some(CatCode::Subscript),
            Value::Space(_) => Some(CatCode::Space),
            Value::Letter(_) => Some(CatCode::Letter),
            Value::Other(_) => Some(CatCode::Other),
            Value::Active(_) => Some(CatCode::Active),
            _ => None,
        }
    }

    /// Copy this value with its character replaced, leaving the category
    /// unchanged. Non-character values are returned as-is.
    pub fn with_char(&self, c: char) -> Value {
        match self.cat_code() {
            Some(cat) => Value::new(c, cat),
            None => self.clone(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (BeginGroup(a), BeginGroup(b))
            | (EndGroup(a), EndGroup(b))
            | (MathShift(a), MathShift(b))
            | (AlignmentTab(a), AlignmentTab(b))
            | (Parameter(a), Parameter(b))
            | (Superscript(a), Superscript(b))
            | (Subscript(a), Subscript(b))
            | (Space(a), Space(b))
            | (Letter(a), Letter(b))
            | (Other(a), Other(b))
            | (Active(a), Active(b)) => a == b,
            (ControlSequence(a), ControlSequence(b)) => a == b,
            (MacroCall(a), MacroCall(b)) => Rc::ptr_eq(a, b),
            (Primitive(a), Primitive(b)) => a == b,
            (IntParameter(a), IntParameter(b)) => a == b,
            (TokenListParameter(a), TokenListParameter(b)) => a == b,
            (Font(a), Font(b)) => a == b,
            (MacroDefinition(a), MacroDefinition(b)) => Rc::ptr_eq(a, b),
            (
                LetAssignment {
                    alias: a1,
                    target: t1,
                    global: g1,
                },
                LetAssignment {
                    alias: a2,
                    target: t2,
                    global: g2,
                },
            ) => a1 == a2 && t1 == t2 && g1 == g2,
            (
                ShorthandDefinition {
                    kind: k1,
                    name: n1,
                    global: g1,
                },
                ShorthandDefinition {
                    kind: k2,
                    name: n2,
                    global: g2,
                },
            ) => k1 == k2 && n1 == n2 && g1 == g2,
            (FontDefinition { name: a }, FontDefinition { name: b }) => a == b,
            (BalancedText(a), BalancedText(b)) => Rc::ptr_eq(a, b),
            (Material(k1, a), Material(k2, b)) => k1 == k2 && Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Value {}

/// An instruction token.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction {
    value: Value,
    pos: Position,
    invoked_as: Option<CsName>,
}

impl Instruction {
    pub fn new(value: Value, pos: Position) -> Instruction {
        Instruction {
            value,
            pos,
            invoked_as: None,
        }
    }

    /// Build an instruction produced by resolving the provided name.
    pub fn resolved(value: Value, pos: Position, invoked_as: CsName) -> Instruction {
        Instruction {
            value,
            pos,
            invoked_as: Some(invoked_as),
        }
    }

    /// Build an instruction carrying over an optional invoking name.
    pub fn with_origin(value: Value, pos: Position, invoked_as: Option<CsName>) -> Instruction {
        Instruction {
            value,
            pos,
            invoked_as,
        }
    }

    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[inline]
    pub fn pos(&self) -> Position {
        self.pos
    }

    /// The control sequence name this instruction was resolved from, if
    /// any.
    #[inline]
    pub fn invoked_as(&self) -> Option<CsName> {
        self.invoked_as
    }

    /// Copy this instruction with a new position and invoking name.
    pub fn restamped(&self, pos: Position, invoked_as: Option<CsName>) -> Instruction {
        Instruction {
            value: self.value.clone(),
            pos,
            invoked_as,
        }
    }

    pub fn char(&self) -> Option<char> {
        self.value.char()
    }

    pub fn cat_code(&self) -> Option<CatCode> {
        self.value.cat_code()
    }

    /// Render the token for use in an error message.
    pub fn describe(&self, interner: &CsNameInterner) -> String {
        match &self.value {
            Value::ControlSequence(name) => match interner.resolve(*name) {
                Some(s) => format!["the control sequence \\{s}"],
                None => "a control sequence".into(),
            },
            value => match (value.char(), value.cat_code()) {
                (Some(c), Some(cat)) => {
                    format!["the character {c:?} with category {cat}"]
                }
                _ => format!["a {} token", describe_kind(value)],
            },
        }
    }
}

fn describe_kind(value: &Value) -> &'static str {
    match value {
        Value::MacroCall(_) => "macro call",
        Value::Primitive(_) => "primitive",
        Value::IntParameter(_) => "integer parameter",
        Value::TokenListParameter(_) => "token list parameter",
        Value::Font(_) => "font",
        Value::MacroDefinition(_) => "macro definition",
        Value::LetAssignment { .. } => "alias assignment",
        Value::ShorthandDefinition { .. } => "shorthand definition",
        Value::FontDefinition { .. } => "font definition",
        Value::BalancedText(_) => "balanced text",
        Value::Material(..) => "box material",
        _ => "character",
    }
}

impl PartialEq for Instruction {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Instruction {}

/// The instruction normalizer.
///
/// Pulls lexical tokens from the lexer and maps each one to its canonical
/// instruction token. Control-sequence lex tokens become unresolved
/// placeholder instructions pending resolution. The normalizer also
/// provides a push-back queue: previously produced instructions can be
/// re-inserted at the front of the stream, supporting
/// lookahead-then-undo.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Normalizer {
    lexer: Lexer,
    pushback: Vec<Instruction>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Normalizer {
            lexer: Lexer::new(),
            pushback: Vec::new(),
        }
    }
}

impl Normalizer {
    pub fn new() -> Normalizer {
        Default::default()
    }

    /// Insert a new character buffer; it is drained before the current
    /// one resumes.
    pub fn insert_source(&mut self, text: &str) {
        self.lexer.source_mut().insert(text);
    }

    /// Produce the next instruction, or `Ok(None)` at end of input.
    pub fn next<F: CatCodeFn>(
        &mut self,
        cat_code_fn: &F,
        interner: &mut CsNameInterner,
    ) -> error::Result<Option<Instruction>> {
        if let Some(instruction) = self.pushback.pop() {
            return Ok(Some(instruction));
        }
        let lex_token = match self.lexer.next(cat_code_fn, interner)? {
            None => return Ok(None),
            Some(t) => t,
        };
        let value = match lex_token.value() {
            LexValue::Char(c, cat) => Value::new(c, cat),
            LexValue::ControlSequence(name) => Value::ControlSequence(name),
        };
        Ok(Some(Instruction::new(value, lex_token.pos())))
    }

    /// Re-insert an instruction at the front of the stream. The most
    /// recently pushed instruction is produced first.
    pub fn push_back(&mut self, instruction: Instruction) {
        self.pushback.push(instruction);
    }
}

enum PendingWhitespace {
    NotStarted,
    None,
    Space,
}

impl PendingWhitespace {
    fn start(&mut self) {
        *self = PendingWhitespace::None;
    }

    fn add_space(&mut self) {
        *self = match self {
            PendingWhitespace::NotStarted => PendingWhitespace::NotStarted,
            _ => PendingWhitespace::Space,
        }
    }
}

impl std::fmt::Display for PendingWhitespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PendingWhitespace::NotStarted | PendingWhitespace::None => Ok(()),
            PendingWhitespace::Space => write!(f, " "),
        }
    }
}

/// Write a collection of instructions to a string.
///
/// The output is source-like: control sequences are rendered with a
/// backslash prefix and whitespace is collapsed. This is intended for
/// debugging output and test failure messages, not for faithful
/// round-tripping.
pub fn write_instructions<'a, T>(instructions: T, interner: &CsNameInterner) -> String
where
    T: IntoIterator<Item = &'a Instruction>,
{
    let mut out = String::new();
    let mut pending = PendingWhitespace::NotStarted;
    for instruction in instructions {
        match instruction.value() {
            Value::Space(_) => pending.add_space(),
            Value::ControlSequence(name) => {
                out.push_str(&format![
                    "{pending}\\{}",
                    interner.resolve(*name).unwrap_or("?")
                ]);
                pending.start();
            }
            value => match value.char() {
                Some(c) => {
                    out.push_str(&format!["{pending}{c}"]);
                    pending.start();
                }
                None => {
                    let name = match instruction.invoked_as() {
                        Some(name) => interner.resolve(name).unwrap_or("?").to_string(),
                        None => describe_kind(value).replace(' ', "-"),
                    };
                    out.push_str(&format!["{pending}\\{name}"]);
                    pending.start();
                }
            },
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::CatCode;
    use std::collections::HashMap;

    fn plain_map() -> HashMap<char, CatCode> {
        CatCode::PLAIN_DEFAULTS
            .iter()
            .enumerate()
            .map(|(a, b)| (char::from_u32(a.try_into().unwrap()).unwrap(), *b))
            .collect()
    }

    #[test]
    fn normalizes_lex_tokens() {
        let mut normalizer = Normalizer::new();
        normalizer.insert_source(r"\foo a1{");
        let map = plain_map();
        let mut interner: CsNameInterner = Default::default();
        let foo = interner.get_or_intern("foo");
        let mut values = Vec::new();
        while let Some(i) = normalizer.next(&map, &mut interner).unwrap() {
            values.push(i.value().clone());
        }
        assert_eq!(
            values,
            vec![
                Value::ControlSequence(foo),
                Value::Letter('a'),
                Value::Other('1'),
                Value::BeginGroup('{'),
            ]
        );
    }

    #[test]
    fn push_back_is_lifo() {
        let mut normalizer = Normalizer::new();
        normalizer.insert_source("c");
        let map = plain_map();
        let mut interner: CsNameInterner = Default::default();
        let a = Instruction::new(Value::Letter('a'), Default::default());
        let b = Instruction::new(Value::Letter('b'), Default::default());
        normalizer.push_back(a.clone());
        normalizer.push_back(b.clone());
        let got: Vec<Instruction> = std::iter::from_fn(|| {
            normalizer.next(&map, &mut interner).unwrap()
        })
        .collect();
        assert_eq!(got.len(), 3);
        assert_eq!(got[0], b);
        assert_eq!(got[1], a);
        assert_eq!(got[2].value(), &Value::Letter('c'));
    }

    #[test]
    fn write_instructions_output() {
        let mut interner: CsNameInterner = Default::default();
        let hi = interner.get_or_intern("hi");
        let instructions = vec![
            Instruction::new(Value::Space(' '), Default::default()),
            Instruction::new(Value::Letter('a'), Default::default()),
            Instruction::new(Value::Space(' '), Default::default()),
            Instruction::new(Value::Space(' '), Default::default()),
            Instruction::new(Value::ControlSequence(hi), Default::default()),
            Instruction::new(Value::Other('!'), Default::default()),
        ];
        assert_eq!(write_instructions(&instructions, &interner), r"a \hi!");
    }
}
