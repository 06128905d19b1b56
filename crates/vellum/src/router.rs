//! The scoped control-sequence symbol table and its route indirection.
//!
//! Names are never bound directly to definitions. Instead each name maps
//! to a [RouteHandle], a small `{kind, id}` pair, and per-kind payload
//! tables map ids to the actual definitions. A handle, once created, is
//! never mutated: redefining a name allocates a fresh handle and rebinds
//! the name, so an alias that captured the old handle keeps pointing at
//! the old definition. Aliasing is by value at bind time, not live
//! indirection through the name.
//!
//! Bindings are scoped. The scope chain is stored in an arena of scope
//! records ([ChainMap]); a scope is pushed on group entry and popped on
//! group exit, with exactly one pop per push enforced by the caller.

use crate::error;
use crate::instruction::Instruction;
use crate::instruction::Value;
use crate::texmacro::DefinitionKind;
use crate::texmacro::MacroDefinition;
use crate::texmacro::Prefixes;
use crate::texmacro::Replacement;
use crate::token::CatCode;
use crate::token::CsName;
use crate::token::CsNameInterner;
use crate::token::Position;
use std::rc::Rc;
use vellum_stdext::collections::chainmap::ChainMap;

/// The kind of definition a route leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RouteKind {
    Macro,
    CharacterAlias,
    Parameter,
    Primitive,
    Font,
}

/// An indirect route from a name to a definition.
///
/// Handles are immutable: the payload a handle points at never changes
/// for the lifetime of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RouteHandle {
    pub kind: RouteKind,
    pub id: u32,
}

/// A primitive operation of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Primitive {
    /// `\def`
    Def,
    /// `\gdef`: like `\def` with the global prefix implied.
    Gdef,
    /// `\edef`: the replacement text is expanded while absorbed.
    Edef,
    /// `\let`
    Let,
    /// `\csname`
    Csname,
    /// `\endcsname`
    Endcsname,
    /// `\string`
    String,
    /// `\expandafter`
    Expandafter,
    /// `\uppercase`
    Uppercase,
    /// `\lowercase`
    Lowercase,
    /// The `\if...` family.
    Conditional(Condition),
    /// `\else`
    Else,
    /// `\or`
    Or,
    /// `\fi`
    Fi,
    /// The box-opening primitives.
    Box(BoxKind),
    /// `\chardef`
    Chardef,
    /// `\font`
    Font,
    /// `\relax`: passes through as a terminal token.
    Relax,
    /// `\par`: passes through as a terminal token.
    Par,
    /// `\global`
    Global,
    /// `\long`
    Long,
    /// `\outer`
    Outer,
}

/// A condition evaluated by a `\if...` primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Condition {
    IfTrue,
    IfFalse,
    IfNum,
    IfOdd,
    IfCase,
}

/// The kind of box a box-opening primitive builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BoxKind {
    /// `\hbox`
    Horizontal,
    /// `\vbox`
    Vertical,
    /// `\vtop`
    VerticalTop,
}

/// A settable integer parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IntParameter {
    EscapeChar,
    EndLineChar,
    Tolerance,
}

/// A settable token-list parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TokenListParameter {
    EveryPar,
}

/// Identifier of a font.
///
/// Only the identifier is recorded here; the font's mutable state lives
/// in a registry owned by the embedding engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FontId(pub u32);

/// The kind of a shorthand definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ShorthandKind {
    /// `\chardef`: the code is a character code.
    Character,
}

/// The target of a `\let`-style alias assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AliasTarget {
    ControlSequence(CsName),
    Character(char, CatCode),
}

impl Primitive {
    /// The canonical control-sequence name of the primitive.
    pub fn canonical_name(&self) -> &'static str {
        match self {
            Primitive::Def => "def",
            Primitive::Gdef => "gdef",
            Primitive::Edef => "edef",
            Primitive::Let => "let",
            Primitive::Csname => "csname",
            Primitive::Endcsname => "endcsname",
            Primitive::String => "string",
            Primitive::Expandafter => "expandafter",
            Primitive::Uppercase => "uppercase",
            Primitive::Lowercase => "lowercase",
            Primitive::Conditional(Condition::IfTrue) => "iftrue",
            Primitive::Conditional(Condition::IfFalse) => "iffalse",
            Primitive::Conditional(Condition::IfNum) => "ifnum",
            Primitive::Conditional(Condition::IfOdd) => "ifodd",
            Primitive::Conditional(Condition::IfCase) => "ifcase",
            Primitive::Else => "else",
            Primitive::Or => "or",
            Primitive::Fi => "fi",
            Primitive::Box(BoxKind::Horizontal) => "hbox",
            Primitive::Box(BoxKind::Vertical) => "vbox",
            Primitive::Box(BoxKind::VerticalTop) => "vtop",
            Primitive::Chardef => "chardef",
            Primitive::Font => "font",
            Primitive::Relax => "relax",
            Primitive::Par => "par",
            Primitive::Global => "global",
            Primitive::Long => "long",
            Primitive::Outer => "outer",
        }
    }

    /// All primitives, in registration order.
    pub const ALL: [Primitive; 28] = [
        Primitive::Def,
        Primitive::Gdef,
        Primitive::Edef,
        Primitive::Let,
        Primitive::Csname,
        Primitive::Endcsname,
        Primitive::String,
        Primitive::Expandafter,
        Primitive::Uppercase,
        Primitive::Lowercase,
        Primitive::Conditional(Condition::IfTrue),
        Primitive::Conditional(Condition::IfFalse),
        Primitive::Conditional(Condition::IfNum),
        Primitive::Conditional(Condition::IfOdd),
        Primitive::Conditional(Condition::IfCase),
        Primitive::Else,
        Primitive::Or,
        Primitive::Fi,
        Primitive::Box(BoxKind::Horizontal),
        Primitive::Box(BoxKind::Vertical),
        Primitive::Box(BoxKind::VerticalTop),
        Primitive::Chardef,
        Primitive::Font,
        Primitive::Relax,
        Primitive::Par,
        Primitive::Global,
        Primitive::Long,
        Primitive::Outer,
    ];
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
enum ParameterPayload {
    Int(IntParameter),
    TokenList(TokenListParameter),
}

/// Error returned when the target of an alias assignment is undefined.
#[derive(Debug, PartialEq, Eq)]
pub struct InvalidAlias;

impl std::fmt::Display for InvalidAlias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid alias: the control sequence to alias is undefined"
        )
    }
}

impl std::error::Error for InvalidAlias {}

/// Error returned when a shorthand definition's code has no valid
/// character.
#[derive(Debug, PartialEq, Eq)]
pub struct InvalidShorthandCode(pub i32);

/// The scoped symbol table.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Router {
    names: ChainMap<CsName, RouteHandle>,
    macros: Vec<Rc<MacroDefinition>>,
    character_aliases: Vec<(char, CatCode)>,
    primitives: Vec<Primitive>,
    parameters: Vec<ParameterPayload>,
    fonts: Vec<FontId>,
}

impl Router {
    /// Create a router whose root scope is pre-populated with every
    /// primitive and every settable parameter under its canonical name.
    pub fn new(interner: &mut CsNameInterner) -> Router {
        let mut router = Router {
            names: Default::default(),
            macros: Vec::new(),
            character_aliases: Vec::new(),
            primitives: Vec::new(),
            parameters: Vec::new(),
            fonts: Vec::new(),
        };
        for primitive in Primitive::ALL {
            let name = interner.get_or_intern(primitive.canonical_name());
            let id = router.primitives.len() as u32;
            router.primitives.push(primitive);
            router.names.insert(
                name,
                RouteHandle {
                    kind: RouteKind::Primitive,
                    id,
                },
            );
        }
        let int_parameters = [
            (IntParameter::EscapeChar, "escapechar"),
            (IntParameter::EndLineChar, "endlinechar"),
            (IntParameter::Tolerance, "tolerance"),
        ];
        for (parameter, canonical_name) in int_parameters {
            let name = interner.get_or_intern(canonical_name);
            router.bind_parameter(name, ParameterPayload::Int(parameter));
        }
        let name = interner.get_or_intern("everypar");
        router.bind_parameter(name, ParameterPayload::TokenList(TokenListParameter::EveryPar));
        router
    }

    fn bind_parameter(&mut self, name: CsName, payload: ParameterPayload) {
        let id = self.parameters.len() as u32;
        self.parameters.push(payload);
        self.names.insert(
            name,
            RouteHandle {
                kind: RouteKind::Parameter,
                id,
            },
        );
    }

    /// Resolve a name to its route handle, searching the current scope
    /// and then the enclosing-scope chain.
    pub fn resolve(&self, name: CsName) -> Option<RouteHandle> {
        self.names.get(&name).copied()
    }

    /// Resolve a name to a copy of its definition's instruction token,
    /// re-stamped with the queried name and the provided position.
    ///
    /// The re-stamping guarantees diagnostics reflect the call site, not
    /// the definition site.
    pub fn resolve_to_token(&self, name: CsName, pos: Position) -> Option<Instruction> {
        let handle = self.resolve(name)?;
        let id = handle.id as usize;
        let value = match handle.kind {
            RouteKind::Macro => Value::MacroCall(self.macros[id].clone()),
            RouteKind::CharacterAlias => {
                let (c, cat) = self.character_aliases[id];
                Value::new(c, cat)
            }
            RouteKind::Primitive => Value::Primitive(self.primitives[id]),
            RouteKind::Parameter => match self.parameters[id] {
                ParameterPayload::Int(p) => Value::IntParameter(p),
                ParameterPayload::TokenList(p) => Value::TokenListParameter(p),
            },
            RouteKind::Font => Value::Font(self.fonts[id]),
        };
        Some(Instruction::resolved(value, pos, name))
    }

    /// Resolve a name to a primitive, if that is what it leads to.
    ///
    /// This is used while scanning conditional text, where if-family
    /// primitives must be recognized through any aliases without
    /// consuming definitions.
    pub fn resolve_primitive(&self, name: CsName) -> Option<Primitive> {
        let handle = self.resolve(name)?;
        match handle.kind {
            RouteKind::Primitive => Some(self.primitives[handle.id as usize]),
            _ => None,
        }
    }

    /// Allocate a fresh macro route and bind the name to it in the
    /// current scope (or the root scope for a global definition),
    /// shadowing, never mutating, any enclosing binding.
    pub fn define_macro(&mut self, name: CsName, definition: Rc<MacroDefinition>, global: bool) {
        let id = self.macros.len() as u32;
        self.macros.push(definition);
        self.bind(
            name,
            RouteHandle {
                kind: RouteKind::Macro,
                id,
            },
            global,
        );
    }

    /// Bind `alias` per the target's shape: for a control-sequence
    /// target, to the handle that name resolves to right now (value at
    /// bind time); for a character target, to a fresh route holding a
    /// frozen copy of the character-category pair.
    pub fn define_alias(
        &mut self,
        alias: CsName,
        target: AliasTarget,
        global: bool,
    ) -> Result<(), InvalidAlias> {
        let handle = match target {
            AliasTarget::ControlSequence(target_name) => {
                match self.resolve(target_name) {
                    None => return Err(InvalidAlias),
                    Some(handle) => handle,
                }
            }
            AliasTarget::Character(c, cat) => {
                let id = self.character_aliases.len() as u32;
                self.character_aliases.push((c, cat));
                RouteHandle {
                    kind: RouteKind::CharacterAlias,
                    id,
                }
            }
        };
        self.bind(alias, handle, global);
        Ok(())
    }

    /// Allocate a font route recording only the font identifier.
    pub fn define_font(&mut self, name: CsName, font: FontId, global: bool) {
        let id = self.fonts.len() as u32;
        self.fonts.push(font);
        self.bind(
            name,
            RouteHandle {
                kind: RouteKind::Font,
                id,
            },
            global,
        );
    }

    /// The number of fonts defined so far.
    pub fn font_count(&self) -> u32 {
        self.fonts.len() as u32
    }

    /// Synthesize a trivial single-instruction macro for a shorthand
    /// definition and bind it like a macro definition.
    pub fn shorthand_define(
        &mut self,
        name: CsName,
        kind: ShorthandKind,
        code: i32,
        global: bool,
    ) -> Result<(), InvalidShorthandCode> {
        let instruction = match kind {
            ShorthandKind::Character => {
                let c = u32::try_from(code)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or(InvalidShorthandCode(code))?;
                Instruction::new(Value::Other(c), Position::default())
            }
        };
        let definition = MacroDefinition::new(
            name,
            Vec::new(),
            Vec::new(),
            vec![Replacement::Tokens(vec![instruction])],
            Prefixes {
                global,
                ..Default::default()
            },
            DefinitionKind::Synthesized,
        );
        self.define_macro(name, Rc::new(definition), global);
        Ok(())
    }

    fn bind(&mut self, name: CsName, handle: RouteHandle, global: bool) {
        if global {
            self.names.insert_global(name, handle);
        } else {
            self.names.insert(name, handle);
        }
    }

    /// Push a scope. Called on group entry.
    pub fn begin_scope(&mut self) {
        self.names.begin_scope();
    }

    /// Pop the innermost scope, discarding its bindings. Called on group
    /// exit; the caller guarantees exactly one pop per push.
    pub fn end_scope(&mut self, pos: Position) -> error::Result<()> {
        self.names
            .end_scope()
            .map_err(|_| error::Error::no_scope_to_end(pos))
    }

    /// The number of open scopes, including the root scope.
    pub fn scope_depth(&self) -> usize {
        self.names.depth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texmacro::DefinitionKind;

    fn empty_macro(name: CsName) -> Rc<MacroDefinition> {
        Rc::new(MacroDefinition::new(
            name,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Default::default(),
            DefinitionKind::Standard,
        ))
    }

    #[test]
    fn root_scope_has_primitives_and_parameters() {
        let mut interner: CsNameInterner = Default::default();
        let router = Router::new(&mut interner);
        let def = interner.get("def").unwrap();
        assert_eq!(router.resolve_primitive(def), Some(Primitive::Def));
        let escapechar = interner.get("escapechar").unwrap();
        assert_eq!(
            router.resolve(escapechar).map(|h| h.kind),
            Some(RouteKind::Parameter)
        );
    }

    #[test]
    fn resolution_fails_for_unknown_name() {
        let mut interner: CsNameInterner = Default::default();
        let router = Router::new(&mut interner);
        let unknown = interner.get_or_intern("unknown");
        assert_eq!(router.resolve(unknown), None);
    }

    #[test]
    fn definitions_shadow_and_are_discarded_on_scope_exit() {
        let mut interner: CsNameInterner = Default::default();
        let mut router = Router::new(&mut interner);
        let a = interner.get_or_intern("a");
        router.define_macro(a, empty_macro(a), false);
        let outer_handle = router.resolve(a).unwrap();
        router.begin_scope();
        router.define_macro(a, empty_macro(a), false);
        assert_ne!(router.resolve(a).unwrap(), outer_handle);
        router.end_scope(Default::default()).unwrap();
        assert_eq!(router.resolve(a).unwrap(), outer_handle);
    }

    #[test]
    fn global_definition_survives_scope_exit() {
        let mut interner: CsNameInterner = Default::default();
        let mut router = Router::new(&mut interner);
        let a = interner.get_or_intern("a");
        router.begin_scope();
        router.define_macro(a, empty_macro(a), true);
        let handle = router.resolve(a).unwrap();
        router.end_scope(Default::default()).unwrap();
        assert_eq!(router.resolve(a), Some(handle));
    }

    #[test]
    fn alias_captures_handle_at_bind_time() {
        let mut interner: CsNameInterner = Default::default();
        let mut router = Router::new(&mut interner);
        let a = interner.get_or_intern("a");
        let b = interner.get_or_intern("b");
        router.define_macro(a, empty_macro(a), false);
        let original = router.resolve(a).unwrap();
        router
            .define_alias(b, AliasTarget::ControlSequence(a), false)
            .unwrap();
        // Redefinition rebinds the name to a fresh handle; the alias
        // keeps the old one.
        router.define_macro(a, empty_macro(a), false);
        assert_ne!(router.resolve(a).unwrap(), original);
        assert_eq!(router.resolve(b).unwrap(), original);
    }

    #[test]
    fn alias_of_undefined_name_is_an_error() {
        let mut interner: CsNameInterner = Default::default();
        let mut router = Router::new(&mut interner);
        let a = interner.get_or_intern("a");
        let b = interner.get_or_intern("b");
        assert_eq!(
            router.define_alias(b, AliasTarget::ControlSequence(a), false),
            Err(InvalidAlias)
        );
    }

    #[test]
    fn character_alias_freezes_the_pair() {
        let mut interner: CsNameInterner = Default::default();
        let mut router = Router::new(&mut interner);
        let b = interner.get_or_intern("b");
        router
            .define_alias(b, AliasTarget::Character('x', CatCode::Letter), false)
            .unwrap();
        let token = router.resolve_to_token(b, Default::default()).unwrap();
        assert_eq!(token.value(), &Value::Letter('x'));
        assert_eq!(token.invoked_as(), Some(b));
    }

    #[test]
    fn end_scope_at_root_is_an_error() {
        let mut interner: CsNameInterner = Default::default();
        let mut router = Router::new(&mut interner);
        assert!(router.end_scope(Default::default()).is_err());
    }

    #[test]
    fn shorthand_definition_synthesizes_a_macro() {
        let mut interner: CsNameInterner = Default::default();
        let mut router = Router::new(&mut interner);
        let x = interner.get_or_intern("x");
        router
            .shorthand_define(x, ShorthandKind::Character, 65, false)
            .unwrap();
        let token = router.resolve_to_token(x, Default::default()).unwrap();
        match token.value() {
            Value::MacroCall(def) => {
                assert_eq!(def.kind(), DefinitionKind::Synthesized);
                match &def.replacement()[0] {
                    Replacement::Tokens(tokens) => {
                        assert_eq!(tokens[0].char(), Some('A'));
                    }
                    _ => panic!("expected literal replacement"),
                }
            }
            _ => panic!("expected a macro call"),
        }
    }

    #[test]
    fn shorthand_definition_rejects_invalid_code() {
        let mut interner: CsNameInterner = Default::default();
        let mut router = Router::new(&mut interner);
        let x = interner.get_or_intern("x");
        assert_eq!(
            router.shorthand_define(x, ShorthandKind::Character, -1, false),
            Err(InvalidShorthandCode(-1))
        );
    }
}
