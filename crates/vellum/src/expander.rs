//! The expander: the engine that turns the resolved instruction stream
//! into the final, expansion-complete stream.
//!
//! The expander owns the whole input pipeline (character source → lexer →
//! normalizer → resolver), the scoped symbol table, and a stack of
//! context modes. Its [next](Expander::next) operation pulls one resolved
//! instruction and dispatches on its opcode: macro calls absorb their
//! arguments and reinsert the substituted replacement for reprocessing,
//! definition primitives absorb and package definitions for the
//! downstream executor, conditionals select a branch, and everything else
//! passes through as a terminal token. Downstream consumers can push
//! tokens back to the front of the stream for lookahead-then-undo.
//!
//! # Failure discipline
//!
//! Every absorption sub-protocol is wrapped so that if it fails partway,
//! the originally pulled token is pushed back unconsumed and the failure
//! re-raised. The surrounding consumer may retry the same input after
//! executing an intervening, order-dependent side effect, e.g. defining a
//! macro whose invocation appears later in the same lookahead window.
//!
//! The context-mode stack obeys a balance invariant: every absorption
//! sub-protocol leaves the stack exactly as it found it, on every exit
//! path including failure. This is enforced structurally by
//! [with_mode](Expander::with_mode) rather than at each call site.

use crate::conditional;
use crate::conditional::Outcome;
use crate::error;
use crate::instruction::Instruction;
use crate::instruction::Value;
use crate::resolver::Resolver;
use crate::router::AliasTarget;
use crate::router::BoxKind;
use crate::router::Condition;
use crate::router::Primitive;
use crate::router::Router;
use crate::router::ShorthandKind;
use crate::script;
use crate::texmacro::DefinitionKind;
use crate::texmacro::MacroDefinition;
use crate::texmacro::Parameter;
use crate::texmacro::Prefixes;
use crate::texmacro::Replacement;
use crate::token::lexer::CatCodeFn;
use crate::token::CatCode;
use crate::token::CsName;
use crate::token::CsNameInterner;
use crate::token::Position;
use std::rc::Rc;
use vellum_stdext::algorithms::substringsearch::Matcher;

/// Implementations of this trait provide the external engine state the
/// expander consults: the category-code table, the case-mapping tables,
/// the escape character, the condition-predicate evaluator and the
/// command executor for box groups.
///
/// Injecting these as explicit capabilities (instead of ambient global
/// state) is what makes the engine testable with deterministic fixtures.
/// The trait has no required methods; the defaults give classic plain
/// behavior.
pub trait VellumState: Sized {
    /// The category code for the provided character.
    ///
    /// The default implementation returns the plain category codes.
    fn cat_code(&self, c: char) -> CatCode {
        CatCode::PLAIN_DEFAULTS
            .get(c as usize)
            .copied()
            .unwrap_or_default()
    }

    /// The upper-case mapping for the provided character, or `None` if
    /// the character has no mapping (in which case case conversion leaves
    /// it unchanged).
    fn upper_case(&self, c: char) -> Option<char> {
        if c.is_ascii_alphabetic() {
            Some(c.to_ascii_uppercase())
        } else {
            None
        }
    }

    /// The lower-case mapping for the provided character, or `None` if
    /// the character has no mapping.
    fn lower_case(&self, c: char) -> Option<char> {
        if c.is_ascii_alphabetic() {
            Some(c.to_ascii_lowercase())
        } else {
            None
        }
    }

    /// The current escape character, used when `\string` renders a
    /// control sequence. `None` means the escape character is disabled
    /// and no prefix is produced.
    fn escape_char(&self) -> Option<char> {
        Some('\\')
    }

    /// Hook that evaluates a condition for the `\if...` family.
    ///
    /// The default implementation is the built-in evaluator, which reads
    /// any operands (e.g. the numbers compared by `\ifnum`) from the
    /// expander's own stream.
    fn evaluate_condition(
        expander: &mut Expander<Self>,
        condition: Condition,
        pos: Position,
    ) -> error::Result<Outcome> {
        conditional::evaluate(expander, condition, pos)
    }

    /// Hook that runs the external command executor for a box group.
    ///
    /// Invoked after the box's opening group delimiter has been consumed
    /// and a new scope pushed. The implementation must consume the
    /// matching end-group token and return the material it built.
    fn execute_box_group(
        expander: &mut Expander<Self>,
        kind: BoxKind,
    ) -> error::Result<Vec<Instruction>> {
        _ = kind;
        script::run_group(expander)
    }
}

impl VellumState for () {}

/// A context mode. The top of the mode stack gates which special
/// token-absorption behavior is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The downstream parser expects the next token to open a balanced
    /// group, which is captured as one opaque unit.
    AwaitingBalancedText,
    /// Like [Mode::AwaitingBalancedText], but a token-variable reference
    /// (a parameter) is also acceptable and is emitted as-is.
    AwaitingBalancedTextOrTokenVariable,
    /// A macro's arguments are being absorbed; expansion is suspended.
    AbsorbingArguments,
    /// A definition's target, parameter text or body is being absorbed.
    AbsorbingDefinition,
    /// Conditional text is being scanned for branch selection.
    AbsorbingConditionalText,
    /// A box-opening primitive is waiting for its group-open token.
    AwaitingBoxStart(BoxKind),
}

struct StateCatCodes<'a, S>(&'a S);

impl<'a, S: VellumState> CatCodeFn for StateCatCodes<'a, S> {
    fn cat_code(&self, c: char) -> CatCode {
        self.0.cat_code(c)
    }
}

/// The expansion engine.
pub struct Expander<S> {
    state: S,
    interner: CsNameInterner,
    router: Router,
    resolver: Resolver,
    // Push-front queue layered over the resolver. The last element is
    // the next token.
    front: Vec<Instruction>,
    modes: Vec<Mode>,
}

impl<S: VellumState> Expander<S> {
    pub fn new(state: S) -> Expander<S> {
        let mut interner = CsNameInterner::default();
        let router = Router::new(&mut interner);
        Expander {
            state,
            interner,
            router,
            resolver: Resolver::new(),
            front: Vec::new(),
            modes: Vec::new(),
        }
    }

    /// Insert source text. The new buffer is drained before the current
    /// one resumes, supporting nested inclusion.
    pub fn push_source(&mut self, text: &str) {
        self.resolver.insert_source(text);
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    pub fn cs_name_interner(&self) -> &CsNameInterner {
        &self.interner
    }

    /// Intern a control sequence name.
    pub fn intern(&mut self, name: &str) -> CsName {
        self.interner.get_or_intern(name)
    }

    /// Push a scope. Called by the executor on group entry.
    pub fn begin_group(&mut self) {
        self.router.begin_scope();
    }

    /// Pop a scope. Called by the executor on group exit.
    pub fn end_group(&mut self, pos: Position) -> error::Result<()> {
        self.router.end_scope(pos)
    }

    /// Push a token back to the front of the input stream.
    pub fn push_front(&mut self, instruction: Instruction) {
        self.front.push(instruction);
    }

    pub(crate) fn push_front_all(&mut self, instructions: Vec<Instruction>) {
        self.front.extend(instructions.into_iter().rev());
    }

    /// Tell the expander the downstream parser expects balanced text
    /// next.
    pub fn await_balanced_text(&mut self) {
        self.modes.push(Mode::AwaitingBalancedText);
    }

    /// Tell the expander the downstream parser expects balanced text or
    /// a token-variable reference next.
    pub fn await_balanced_text_or_token_variable(&mut self) {
        self.modes.push(Mode::AwaitingBalancedTextOrTokenVariable);
    }

    /// The number of context modes currently on the stack.
    pub fn mode_depth(&self) -> usize {
        self.modes.len()
    }

    /// Run an absorption sub-protocol under the provided mode. The mode
    /// is popped on every exit path, which enforces the balance
    /// invariant structurally.
    pub(crate) fn with_mode<T>(
        &mut self,
        mode: Mode,
        f: impl FnOnce(&mut Self) -> error::Result<T>,
    ) -> error::Result<T> {
        self.modes.push(mode);
        let result = f(self);
        self.modes.pop();
        result
    }

    /// Pull the next token without resolution or expansion.
    pub fn next_raw(&mut self) -> error::Result<Option<Instruction>> {
        if let Some(instruction) = self.front.pop() {
            return Ok(Some(instruction));
        }
        self.resolver
            .next_raw(&StateCatCodes(&self.state), &mut self.interner)
    }

    pub(crate) fn next_raw_or_err(
        &mut self,
        doing: &'static str,
        pos: Position,
    ) -> error::Result<Instruction> {
        match self.next_raw()? {
            None => Err(error::Error::unterminated_absorption(doing, pos)),
            Some(instruction) => Ok(instruction),
        }
    }

    /// Pull the next token, resolving a control-sequence placeholder in
    /// the same atomic step. On failure the placeholder is restored to
    /// the front of the input.
    pub(crate) fn next_resolved(&mut self) -> error::Result<Option<Instruction>> {
        if let Some(instruction) = self.front.pop() {
            if let Value::ControlSequence(name) = instruction.value() {
                let name = *name;
                return match self.router.resolve_to_token(name, instruction.pos()) {
                    Some(resolved) => Ok(Some(resolved)),
                    None => {
                        let display = self.interner.resolve(name).unwrap_or("?").to_string();
                        let pos = instruction.pos();
                        self.front.push(instruction);
                        Err(error::Error::no_such_control_sequence(display, pos))
                    }
                };
            }
            return Ok(Some(instruction));
        }
        self.resolver
            .next(&StateCatCodes(&self.state), &mut self.interner, &self.router)
    }

    fn next_resolved_or_err(
        &mut self,
        doing: &'static str,
        pos: Position,
    ) -> error::Result<Instruction> {
        match self.next_resolved()? {
            None => Err(error::Error::unterminated_absorption(doing, pos)),
            Some(instruction) => Ok(instruction),
        }
    }

    /// Pull the next token with expansion active: expandable tokens are
    /// expanded in place and the first unexpandable token is returned in
    /// its original (unresolved) form.
    pub(crate) fn next_expanding(&mut self) -> error::Result<Option<Instruction>> {
        loop {
            let token = match self.next_raw()? {
                None => return Ok(None),
                Some(t) => t,
            };
            let resolved = match token.value() {
                Value::ControlSequence(name) => {
                    let name = *name;
                    match self.router.resolve_to_token(name, token.pos()) {
                        Some(resolved) => resolved,
                        None => {
                            let display =
                                self.interner.resolve(name).unwrap_or("?").to_string();
                            let pos = token.pos();
                            self.front.push(token);
                            return Err(error::Error::no_such_control_sequence(display, pos));
                        }
                    }
                }
                // Already-resolved tokens can reappear from the front
                // queue after push-back.
                Value::MacroCall(_) | Value::Primitive(_) => token.clone(),
                _ => return Ok(Some(token)),
            };
            match resolved.value() {
                Value::MacroCall(definition) => {
                    let definition = definition.clone();
                    if let Err(err) = self.invoke_macro(&resolved, &definition) {
                        self.push_front(token);
                        return Err(err);
                    }
                }
                Value::Primitive(primitive) if is_expandable(*primitive) => {
                    let primitive = *primitive;
                    if let Err(err) = self.dispatch_primitive(&resolved, primitive) {
                        self.push_front(token);
                        return Err(err);
                    }
                }
                _ => return Ok(Some(token)),
            }
        }
    }

    /// Pull the next non-space terminal with expansion active. Used by
    /// protocols that await a specific token shape (e.g. a group-open)
    /// that may be produced by expansion.
    fn next_terminal_skipping_spaces(
        &mut self,
        doing: &'static str,
        pos: Position,
    ) -> error::Result<Instruction> {
        loop {
            let token = self.next_resolved_or_err(doing, pos)?;
            match token.value() {
                Value::Space(_) => continue,
                Value::MacroCall(definition) => {
                    let definition = definition.clone();
                    if let Err(err) = self.invoke_macro(&token, &definition) {
                        self.push_front(token);
                        return Err(err);
                    }
                }
                Value::Primitive(primitive) if is_expandable(*primitive) => {
                    let primitive = *primitive;
                    if let Err(err) = self.dispatch_primitive(&token, primitive) {
                        self.push_front(token);
                        return Err(err);
                    }
                }
                _ => return Ok(token),
            }
        }
    }

    /// Expand the next token exactly once.
    ///
    /// If the next token is a macro call or an expandable primitive, its
    /// single-step expansion is performed and the result pushed to the
    /// front of the input; otherwise nothing is consumed. Returns whether
    /// an expansion happened.
    pub fn expand_once(&mut self) -> error::Result<bool> {
        let token = match self.next_raw()? {
            None => return Ok(false),
            Some(t) => t,
        };
        let resolved = match token.value() {
            Value::ControlSequence(name) => {
                let name = *name;
                match self.router.resolve_to_token(name, token.pos()) {
                    Some(resolved) => resolved,
                    None => {
                        let display = self.interner.resolve(name).unwrap_or("?").to_string();
                        let pos = token.pos();
                        self.front.push(token);
                        return Err(error::Error::no_such_control_sequence(display, pos));
                    }
                }
            }
            Value::MacroCall(_) | Value::Primitive(_) => token.clone(),
            _ => {
                self.push_front(token);
                return Ok(false);
            }
        };
        match resolved.value() {
            Value::MacroCall(definition) => {
                let definition = definition.clone();
                match self.invoke_macro(&resolved, &definition) {
                    Ok(()) => Ok(true),
                    Err(err) => {
                        self.push_front(token);
                        Err(err)
                    }
                }
            }
            Value::Primitive(primitive) if is_expandable(*primitive) => {
                let primitive = *primitive;
                match self.dispatch_primitive(&resolved, primitive) {
                    Ok(_) => Ok(true),
                    Err(err) => {
                        self.push_front(token);
                        Err(err)
                    }
                }
            }
            _ => {
                self.push_front(token);
                Ok(false)
            }
        }
    }

    /// Produce the next fully expanded terminal token, or `Ok(None)` at
    /// end of input.
    pub fn next(&mut self) -> error::Result<Option<Instruction>> {
        loop {
            let instruction = match self.next_resolved()? {
                None => return Ok(None),
                Some(i) => i,
            };
            if let Some(mode) = self.modes.last().copied() {
                if matches!(
                    mode,
                    Mode::AwaitingBalancedText | Mode::AwaitingBalancedTextOrTokenVariable
                ) {
                    match instruction.value() {
                        Value::Space(_) => continue,
                        Value::BeginGroup(_) => {
                            let pos = instruction.pos();
                            match self.capture_balanced_text("reading balanced text", pos) {
                                Ok(text) => {
                                    self.modes.pop();
                                    return Ok(Some(Instruction::new(
                                        Value::BalancedText(Rc::new(text)),
                                        pos,
                                    )));
                                }
                                Err(err) => {
                                    self.push_front(instruction);
                                    return Err(err);
                                }
                            }
                        }
                        Value::IntParameter(_) | Value::TokenListParameter(_)
                            if mode == Mode::AwaitingBalancedTextOrTokenVariable =>
                        {
                            self.modes.pop();
                            return Ok(Some(instruction));
                        }
                        // Expandable material is expanded below and
                        // reconsidered on the next iteration.
                        Value::MacroCall(_) | Value::Primitive(_) => {}
                        _ => {
                            let found = instruction.describe(&self.interner);
                            let pos = instruction.pos();
                            self.push_front(instruction);
                            return Err(error::Error::malformed_token(
                                "balanced text",
                                found,
                                pos,
                            ));
                        }
                    }
                }
            }
            match instruction.value() {
                Value::MacroCall(definition) => {
                    let definition = definition.clone();
                    if let Err(err) = self.invoke_macro(&instruction, &definition) {
                        self.push_front(instruction);
                        return Err(err);
                    }
                }
                Value::Primitive(primitive) => {
                    let primitive = *primitive;
                    match self.dispatch_primitive(&instruction, primitive) {
                        Ok(Some(terminal)) => return Ok(Some(terminal)),
                        Ok(None) => {}
                        Err(err) => {
                            self.push_front(instruction);
                            return Err(err);
                        }
                    }
                }
                _ => return Ok(Some(instruction)),
            }
        }
    }

    /// Dispatch a primitive. Returns `Ok(Some(_))` when the primitive
    /// produced a terminal token for the downstream consumer, `Ok(None)`
    /// when it reinserted material for reprocessing.
    fn dispatch_primitive(
        &mut self,
        instruction: &Instruction,
        primitive: Primitive,
    ) -> error::Result<Option<Instruction>> {
        match primitive {
            Primitive::Def => self
                .absorb_definition(instruction, Prefixes::default(), DefinitionKind::Standard)
                .map(Some),
            Primitive::Gdef => self
                .absorb_definition(
                    instruction,
                    Prefixes {
                        global: true,
                        ..Default::default()
                    },
                    DefinitionKind::Standard,
                )
                .map(Some),
            Primitive::Edef => self
                .absorb_definition(instruction, Prefixes::default(), DefinitionKind::Expanded)
                .map(Some),
            Primitive::Global | Primitive::Long | Primitive::Outer => {
                self.absorb_prefixed_definition(instruction, primitive).map(Some)
            }
            Primitive::Let => self.absorb_let(instruction, false).map(Some),
            Primitive::Chardef => self
                .absorb_shorthand(instruction, ShorthandKind::Character, false)
                .map(Some),
            Primitive::Font => self.absorb_font(instruction).map(Some),
            Primitive::Csname => {
                self.absorb_csname(instruction)?;
                Ok(None)
            }
            Primitive::Endcsname => Err(error::Error::malformed_token(
                "a `\\csname` in progress",
                instruction.describe(&self.interner),
                instruction.pos(),
            )),
            Primitive::String => {
                self.stringify(instruction)?;
                Ok(None)
            }
            Primitive::Expandafter => {
                self.expand_after(instruction)?;
                Ok(None)
            }
            Primitive::Uppercase => {
                self.case_convert(instruction, true)?;
                Ok(None)
            }
            Primitive::Lowercase => {
                self.case_convert(instruction, false)?;
                Ok(None)
            }
            Primitive::Conditional(condition) => {
                conditional::expand_conditional(self, instruction, condition)?;
                Ok(None)
            }
            Primitive::Else | Primitive::Or | Primitive::Fi => {
                Err(error::Error::malformed_token(
                    "a conditional in progress",
                    instruction.describe(&self.interner),
                    instruction.pos(),
                ))
            }
            Primitive::Box(kind) => self.absorb_box(instruction, kind).map(Some),
            Primitive::Relax | Primitive::Par => Ok(Some(instruction.clone())),
        }
    }

    /// Invoke a macro: absorb its arguments and push the substituted
    /// replacement text to the front of the input for reprocessing.
    fn invoke_macro(
        &mut self,
        instruction: &Instruction,
        definition: &MacroDefinition,
    ) -> error::Result<()> {
        let pos = instruction.pos();
        self.with_mode(Mode::AbsorbingArguments, |s| {
            for expected in definition.prefix() {
                let got = s.next_raw_or_err("matching the parameter text of a macro", pos)?;
                if got.value() != expected.value() {
                    let found = got.describe(&s.interner);
                    let got_pos = got.pos();
                    return Err(error::Error::malformed_token(
                        "the macro's parameter text",
                        found,
                        got_pos,
                    ));
                }
            }
            let mut arguments: Vec<Vec<Instruction>> =
                Vec::with_capacity(definition.parameters().len());
            for parameter in definition.parameters() {
                let argument = match parameter {
                    Parameter::Undelimited => s.absorb_undelimited_argument(pos)?,
                    Parameter::Delimited(matcher) => s.absorb_delimited_argument(matcher, pos)?,
                };
                arguments.push(argument);
            }
            let replacement =
                definition.perform_replacement(&arguments, pos, instruction.invoked_as());
            s.push_front_all(replacement);
            Ok(())
        })
    }

    fn absorb_undelimited_argument(
        &mut self,
        call_pos: Position,
    ) -> error::Result<Vec<Instruction>> {
        loop {
            let token = self.next_raw_or_err("reading an undelimited macro argument", call_pos)?;
            return match token.value() {
                Value::Space(_) => continue,
                Value::BeginGroup(_) => {
                    self.capture_balanced_text("reading an undelimited macro argument", token.pos())
                }
                Value::EndGroup(_) => {
                    let found = token.describe(&self.interner);
                    let pos = token.pos();
                    Err(error::Error::malformed_token(
                        "a macro argument",
                        found,
                        pos,
                    ))
                }
                _ => Ok(vec![token]),
            };
        }
    }

    fn absorb_delimited_argument(
        &mut self,
        matcher: &Matcher<Value>,
        call_pos: Position,
    ) -> error::Result<Vec<Instruction>> {
        let mut search = matcher.start();
        let mut depth: i32 = 0;
        // A delimiter ending in a begin-group token (the `#{` form)
        // matches with that token still open, so the match lands at
        // depth 1 rather than 0.
        let closing_depth = match matcher.substring().last() {
            Some(Value::BeginGroup(_)) => 1,
            _ => 0,
        };
        let mut result = Vec::new();
        loop {
            let token = self.next_raw_or_err("reading a delimited macro argument", call_pos)?;
            match token.value() {
                Value::BeginGroup(_) => depth += 1,
                Value::EndGroup(_) => depth -= 1,
                _ => (),
            }
            let matched = search.next(token.value());
            result.push(token);
            if depth == closing_depth && matched {
                result.truncate(result.len() - matcher.substring().len());
                if should_trim_outer_braces(&result) {
                    result.pop();
                    result.remove(0);
                }
                return Ok(result);
            }
        }
    }

    /// Capture tokens up to the group-close matching an already-consumed
    /// group-open, excluding both delimiters. Nesting is tracked with
    /// signed depth deltas; the capture is verbatim, with expansion
    /// suspended.
    pub(crate) fn capture_balanced_text(
        &mut self,
        doing: &'static str,
        start: Position,
    ) -> error::Result<Vec<Instruction>> {
        let mut result = Vec::new();
        let mut depth: usize = 0;
        loop {
            let token = self.next_raw_or_err(doing, start)?;
            match token.value() {
                Value::BeginGroup(_) => {
                    depth += 1;
                    result.push(token);
                }
                Value::EndGroup(_) => {
                    if depth == 0 {
                        return Ok(result);
                    }
                    depth -= 1;
                    result.push(token);
                }
                _ => result.push(token),
            }
        }
    }

    fn absorb_definition(
        &mut self,
        instruction: &Instruction,
        prefixes: Prefixes,
        kind: DefinitionKind,
    ) -> error::Result<Instruction> {
        let pos = instruction.pos();
        let invoked_as = instruction.invoked_as();
        self.with_mode(Mode::AbsorbingDefinition, |s| {
            let name = s.absorb_definition_target(pos)?;
            let (prefix, raw_parameters, replacement_end) = s.absorb_parameter_text(pos)?;
            let parameters: Vec<Parameter> = raw_parameters
                .into_iter()
                .map(|raw| match raw {
                    RawParameter::Undelimited => Parameter::Undelimited,
                    RawParameter::Delimited(tokens) => {
                        let values = tokens.iter().map(|t| t.value().clone()).collect();
                        Parameter::Delimited(
                            Matcher::new(values)
                                .expect("delimiter sequences are non-empty by construction"),
                        )
                    }
                })
                .collect();
            let replacement = s.absorb_replacement_text(
                pos,
                parameters.len(),
                replacement_end,
                kind == DefinitionKind::Expanded,
            )?;
            let definition =
                MacroDefinition::new(name, prefix, parameters, replacement, prefixes, kind);
            Ok(Instruction::with_origin(
                Value::MacroDefinition(Rc::new(definition)),
                pos,
                invoked_as,
            ))
        })
    }

    fn absorb_definition_target(&mut self, pos: Position) -> error::Result<CsName> {
        loop {
            let token = self.next_raw_or_err("reading the target of a definition", pos)?;
            return match token.value() {
                Value::Space(_) => continue,
                Value::ControlSequence(name) => Ok(*name),
                _ => {
                    let found = token.describe(&self.interner);
                    let token_pos = token.pos();
                    Err(error::Error::malformed_token(
                        "a control sequence to define",
                        found,
                        token_pos,
                    ))
                }
            };
        }
    }

    /// Absorb the parameter text of a definition, up to (not including)
    /// the first group-open token.
    fn absorb_parameter_text(
        &mut self,
        pos: Position,
    ) -> error::Result<(Vec<Instruction>, Vec<RawParameter>, Option<Instruction>)> {
        let mut prefix = Vec::new();
        let mut parameters: Vec<RawParameter> = Vec::new();
        loop {
            let token =
                self.next_raw_or_err("reading the parameter text of a definition", pos)?;
            match token.value() {
                Value::BeginGroup(_) => {
                    return Ok((prefix, parameters, None));
                }
                Value::EndGroup(_) => {
                    let found = token.describe(&self.interner);
                    let token_pos = token.pos();
                    return Err(error::Error::malformed_token(
                        "the parameter text of a definition",
                        found,
                        token_pos,
                    ));
                }
                Value::Parameter(_) => {
                    let parameter_token =
                        self.next_raw_or_err("reading a parameter number", pos)?;
                    match parameter_token.value() {
                        Value::BeginGroup(_) => {
                            // The parameter text ends at `#{`; the brace
                            // both delimits the last parameter and opens
                            // the replacement text.
                            match parameters.last_mut() {
                                None => prefix.push(parameter_token.clone()),
                                Some(parameter) => parameter.push(parameter_token.clone()),
                            }
                            return Ok((prefix, parameters, Some(parameter_token)));
                        }
                        Value::ControlSequence(_) => {
                            let found = parameter_token.describe(&self.interner);
                            let token_pos = parameter_token.pos();
                            return Err(error::Error::malformed_token(
                                "a parameter number",
                                found,
                                token_pos,
                            ));
                        }
                        value => {
                            let index = value.char().and_then(char_to_parameter_index);
                            match index {
                                Some(index) if index == parameters.len() => {
                                    parameters.push(RawParameter::Undelimited);
                                }
                                _ => {
                                    let found = parameter_token.describe(&self.interner);
                                    let token_pos = parameter_token.pos();
                                    return Err(error::Error::malformed_token(
                                        "the next parameter number",
                                        found,
                                        token_pos,
                                    ));
                                }
                            }
                        }
                    }
                }
                _ => match parameters.last_mut() {
                    None => prefix.push(token),
                    Some(parameter) => parameter.push(token),
                },
            }
        }
    }

    /// Absorb the balanced replacement text of a definition. With
    /// `expand` set (for `\edef`) expandable tokens are expanded while
    /// being absorbed.
    fn absorb_replacement_text(
        &mut self,
        pos: Position,
        num_parameters: usize,
        mut replacement_end: Option<Instruction>,
        expand: bool,
    ) -> error::Result<Vec<Replacement>> {
        let mut result: Vec<Replacement> = Vec::new();
        let mut depth = 0usize;
        fn push(result: &mut Vec<Replacement>, token: Instruction) {
            match result.last_mut() {
                Some(Replacement::Tokens(tokens)) => tokens.push(token),
                _ => result.push(Replacement::Tokens(vec![token])),
            }
        }
        loop {
            let token = if expand {
                match self.next_expanding()? {
                    None => {
                        return Err(error::Error::unterminated_absorption(
                            "reading the replacement text of a definition",
                            pos,
                        ))
                    }
                    Some(t) => t,
                }
            } else {
                self.next_raw_or_err("reading the replacement text of a definition", pos)?
            };
            match token.value() {
                Value::BeginGroup(_) => {
                    depth += 1;
                    push(&mut result, token);
                }
                Value::EndGroup(_) => {
                    if depth == 0 {
                        if let Some(end) = replacement_end.take() {
                            push(&mut result, end);
                        }
                        return Ok(result);
                    }
                    depth -= 1;
                    push(&mut result, token);
                }
                Value::Parameter(_) => {
                    let parameter_token =
                        self.next_raw_or_err("reading a parameter number", pos)?;
                    match parameter_token.value() {
                        // A doubled parameter token stands for a single
                        // literal one, as in nested definitions.
                        Value::Parameter(_) => push(&mut result, parameter_token),
                        value => {
                            let index = value.char().and_then(char_to_parameter_index);
                            match index {
                                Some(index) if index < num_parameters => {
                                    result.push(Replacement::Parameter(index));
                                }
                                _ => {
                                    let found = parameter_token.describe(&self.interner);
                                    let token_pos = parameter_token.pos();
                                    return Err(error::Error::malformed_token(
                                        "a parameter number no larger than the parameter count",
                                        found,
                                        token_pos,
                                    ));
                                }
                            }
                        }
                    }
                }
                _ => push(&mut result, token),
            }
        }
    }

    fn absorb_prefixed_definition(
        &mut self,
        instruction: &Instruction,
        first: Primitive,
    ) -> error::Result<Instruction> {
        let pos = instruction.pos();
        let mut prefixes = Prefixes::default();
        apply_prefix(&mut prefixes, first);
        loop {
            let token = self.next_resolved_or_err("reading a definition after a prefix", pos)?;
            match token.value() {
                Value::Space(_) => continue,
                Value::Primitive(primitive) => match primitive {
                    Primitive::Global | Primitive::Long | Primitive::Outer => {
                        apply_prefix(&mut prefixes, *primitive);
                    }
                    Primitive::Def => {
                        return self.absorb_definition(&token, prefixes, DefinitionKind::Standard)
                    }
                    Primitive::Gdef => {
                        prefixes.global = true;
                        return self.absorb_definition(&token, prefixes, DefinitionKind::Standard);
                    }
                    Primitive::Edef => {
                        return self.absorb_definition(&token, prefixes, DefinitionKind::Expanded)
                    }
                    Primitive::Let => return self.absorb_let(&token, prefixes.global),
                    Primitive::Chardef => {
                        return self.absorb_shorthand(
                            &token,
                            ShorthandKind::Character,
                            prefixes.global,
                        )
                    }
                    _ => {
                        let found = token.describe(&self.interner);
                        let token_pos = token.pos();
                        return Err(error::Error::malformed_token(
                            "a definition after a prefix",
                            found,
                            token_pos,
                        ));
                    }
                },
                _ => {
                    let found = token.describe(&self.interner);
                    let token_pos = token.pos();
                    return Err(error::Error::malformed_token(
                        "a definition after a prefix",
                        found,
                        token_pos,
                    ));
                }
            }
        }
    }

    fn absorb_let(
        &mut self,
        instruction: &Instruction,
        global: bool,
    ) -> error::Result<Instruction> {
        let pos = instruction.pos();
        let invoked_as = instruction.invoked_as();
        self.with_mode(Mode::AbsorbingDefinition, |s| {
            let alias = s.absorb_definition_target(pos)?;
            let first = s.next_raw_or_err("reading the target of an alias assignment", pos)?;
            let target_token = match first.value() {
                Value::Other('=') => {
                    let second =
                        s.next_raw_or_err("reading the target of an alias assignment", pos)?;
                    match second.value() {
                        Value::Space(_) => {
                            s.next_raw_or_err("reading the target of an alias assignment", pos)?
                        }
                        _ => second,
                    }
                }
                _ => first,
            };
            let target = match target_token.value() {
                Value::ControlSequence(name) => AliasTarget::ControlSequence(*name),
                value => match (value.char(), value.cat_code()) {
                    (Some(c), Some(cat)) => AliasTarget::Character(c, cat),
                    _ => {
                        let found = target_token.describe(&s.interner);
                        let token_pos = target_token.pos();
                        return Err(error::Error::malformed_token(
                            "a control sequence or character to alias",
                            found,
                            token_pos,
                        ));
                    }
                },
            };
            Ok(Instruction::with_origin(
                Value::LetAssignment {
                    alias,
                    target,
                    global,
                },
                pos,
                invoked_as,
            ))
        })
    }

    fn absorb_shorthand(
        &mut self,
        instruction: &Instruction,
        kind: ShorthandKind,
        global: bool,
    ) -> error::Result<Instruction> {
        let pos = instruction.pos();
        let invoked_as = instruction.invoked_as();
        self.with_mode(Mode::AbsorbingDefinition, |s| {
            let name = s.absorb_definition_target(pos)?;
            Ok(Instruction::with_origin(
                Value::ShorthandDefinition { kind, name, global },
                pos,
                invoked_as,
            ))
        })
    }

    fn absorb_font(&mut self, instruction: &Instruction) -> error::Result<Instruction> {
        let pos = instruction.pos();
        let invoked_as = instruction.invoked_as();
        self.with_mode(Mode::AbsorbingDefinition, |s| {
            let name = s.absorb_definition_target(pos)?;
            Ok(Instruction::with_origin(
                Value::FontDefinition { name },
                pos,
                invoked_as,
            ))
        })
    }

    /// Absorb `\csname ... \endcsname` with expansion active,
    /// concatenate the literal character values into a name, and push a
    /// control-sequence call for that name to the front of the input.
    fn absorb_csname(&mut self, instruction: &Instruction) -> error::Result<()> {
        let pos = instruction.pos();
        let mut name = String::new();
        loop {
            let token = match self.next_expanding()? {
                None => {
                    return Err(error::Error::unterminated_absorption(
                        "reading a `\\csname` name",
                        pos,
                    ))
                }
                Some(t) => t,
            };
            match token.value() {
                Value::ControlSequence(cs) => {
                    match self.router.resolve_primitive(*cs) {
                        Some(Primitive::Endcsname) => break,
                        _ => {
                            let found = token.describe(&self.interner);
                            let token_pos = token.pos();
                            self.push_front(token);
                            return Err(error::Error::malformed_token(
                                "a character in a `\\csname` name",
                                found,
                                token_pos,
                            ));
                        }
                    }
                }
                Value::Primitive(Primitive::Endcsname) => break,
                value => match value.char() {
                    Some(c) => name.push(c),
                    None => {
                        let found = token.describe(&self.interner);
                        let token_pos = token.pos();
                        self.push_front(token);
                        return Err(error::Error::malformed_token(
                            "a character in a `\\csname` name",
                            found,
                            token_pos,
                        ));
                    }
                },
            }
        }
        let cs = self.interner.get_or_intern(&name);
        self.push_front(Instruction::new(Value::ControlSequence(cs), pos));
        Ok(())
    }

    /// Absorb one unexpanded token and push its printable representation
    /// back as literal-category character tokens.
    fn stringify(&mut self, instruction: &Instruction) -> error::Result<()> {
        let pos = instruction.pos();
        let token = self.next_raw_or_err("reading the operand of `\\string`", pos)?;
        let mut chars: Vec<char> = Vec::new();
        let named = match token.value() {
            Value::ControlSequence(name) => Some(*name),
            _ => match token.value().char() {
                Some(_) => None,
                // A pre-resolved token still prints as the name it was
                // invoked under.
                None => token.invoked_as(),
            },
        };
        match (named, token.value().char()) {
            (Some(name), _) => {
                if let Some(escape) = self.state.escape_char() {
                    chars.push(escape);
                }
                chars.extend(self.interner.resolve(name).unwrap_or("").chars());
            }
            (None, Some(c)) => chars.push(c),
            (None, None) => {
                let found = token.describe(&self.interner);
                let token_pos = token.pos();
                self.push_front(token);
                return Err(error::Error::malformed_token(
                    "a token `\\string` can print",
                    found,
                    token_pos,
                ));
            }
        }
        for c in chars.into_iter().rev() {
            let value = match c {
                ' ' => Value::Space(' '),
                _ => Value::Other(c),
            };
            self.front.push(Instruction::new(value, pos));
        }
        Ok(())
    }

    /// Absorb one raw token, perform exactly one resolve-and-expand
    /// cycle on the token following it, and reinsert the saved token
    /// before the cycle's results.
    fn expand_after(&mut self, instruction: &Instruction) -> error::Result<()> {
        let pos = instruction.pos();
        let saved = self.next_raw_or_err("reading the operand of `\\expandafter`", pos)?;
        let following =
            self.next_raw_or_err("reading the token after `\\expandafter`", pos)?;
        self.push_front(following);
        self.expand_once()?;
        self.push_front(saved);
        Ok(())
    }

    /// Absorb a balanced group and apply the case mapping to every
    /// character token's character value, leaving categories unchanged.
    /// The transformed tokens are reinserted for reprocessing, so control
    /// sequences inside the group are expanded only afterwards.
    fn case_convert(&mut self, instruction: &Instruction, upper: bool) -> error::Result<()> {
        let pos = instruction.pos();
        let opener =
            self.next_terminal_skipping_spaces("reading the operand of case conversion", pos)?;
        match opener.value() {
            Value::BeginGroup(_) => (),
            _ => {
                let found = opener.describe(&self.interner);
                let token_pos = opener.pos();
                self.push_front(opener);
                return Err(error::Error::malformed_token(
                    "a balanced group",
                    found,
                    token_pos,
                ));
            }
        }
        let mut text = self.capture_balanced_text("reading the operand of case conversion", pos)?;
        for token in text.iter_mut() {
            if let Some(c) = token.value().char() {
                let mapped = match upper {
                    true => self.state.upper_case(c),
                    false => self.state.lower_case(c),
                };
                if let Some(m) = mapped {
                    *token =
                        Instruction::with_origin(token.value().with_char(m), token.pos(), token.invoked_as());
                }
            }
        }
        self.push_front_all(text);
        Ok(())
    }

    /// Absorb a box group: await the group-open, push a scope, run the
    /// external executor until the matching group-close, and package the
    /// returned material into one terminal token.
    fn absorb_box(
        &mut self,
        instruction: &Instruction,
        kind: BoxKind,
    ) -> error::Result<Instruction> {
        let pos = instruction.pos();
        let invoked_as = instruction.invoked_as();
        self.with_mode(Mode::AwaitingBoxStart(kind), |s| {
            let token = s.next_terminal_skipping_spaces("reading the start of a box", pos)?;
            match token.value() {
                Value::BeginGroup(_) => Ok(()),
                _ => {
                    let found = token.describe(&s.interner);
                    let token_pos = token.pos();
                    s.push_front(token);
                    Err(error::Error::malformed_token(
                        "the opening delimiter of a box group",
                        found,
                        token_pos,
                    ))
                }
            }
        })?;
        self.router.begin_scope();
        let result = S::execute_box_group(self, kind);
        // Exactly one pop for the push above, on both exit paths.
        let scope_result = self.router.end_scope(pos);
        let list = result?;
        scope_result?;
        Ok(Instruction::with_origin(
            Value::Material(kind, Rc::new(list)),
            pos,
            invoked_as,
        ))
    }
}

enum RawParameter {
    Undelimited,
    Delimited(Vec<Instruction>),
}

impl RawParameter {
    fn push(&mut self, token: Instruction) {
        match self {
            RawParameter::Undelimited => {
                *self = RawParameter::Delimited(vec![token]);
            }
            RawParameter::Delimited(tokens) => {
                tokens.push(token);
            }
        }
    }
}

fn apply_prefix(prefixes: &mut Prefixes, primitive: Primitive) {
    match primitive {
        Primitive::Global => prefixes.global = true,
        Primitive::Long => prefixes.long = true,
        Primitive::Outer => prefixes.outer = true,
        _ => (),
    }
}

fn is_expandable(primitive: Primitive) -> bool {
    matches!(
        primitive,
        Primitive::Csname
            | Primitive::String
            | Primitive::Expandafter
            | Primitive::Uppercase
            | Primitive::Lowercase
            | Primitive::Conditional(_)
    )
}

fn char_to_parameter_index(c: char) -> Option<usize> {
    match c {
        '1'..='9' => Some(c as usize - '1' as usize),
        _ => None,
    }
}

/// Whether a delimited argument is wrapped in exactly one matching pair
/// of group delimiters, in which case that one pair is stripped.
fn should_trim_outer_braces(list: &[Instruction]) -> bool {
    if list.len() < 2 {
        return false;
    }
    if !matches!(list[0].value(), Value::BeginGroup(_)) {
        return false;
    }
    let mut depth = 0i32;
    for (i, token) in list.iter().enumerate() {
        match token.value() {
            Value::BeginGroup(_) => depth += 1,
            Value::EndGroup(_) => {
                depth -= 1;
                if depth == 0 {
                    return i == list.len() - 1;
                }
            }
            _ => (),
        }
    }
    false
}
