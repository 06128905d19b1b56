//! The reference command executor.
//!
//! Grammar-level parsing of the expanded instruction stream into semantic
//! commands belongs to the embedding engine, outside this crate's core.
//! This module provides the reference executor used at that boundary: it
//! pulls expanded instructions, executes the definition-bearing terminals
//! against the router, balances scopes at group delimiters, and collects
//! every other terminal as output. It drives the unit tests, and its
//! [run_group] function is the default executor for box groups.

use crate::conditional;
use crate::error;
use crate::expander::Expander;
use crate::expander::VellumState;
use crate::instruction::Instruction;
use crate::instruction::Value;
use crate::router::AliasTarget;
use crate::router::FontId;
use crate::token::Position;

/// Run the executor until the input is exhausted, returning the
/// collected output.
///
/// With `allow_undefined` set, an undefined control sequence is not an
/// error: the restored token is pulled raw and collected as a terminal.
/// This supports processing document fragments whose command set is
/// defined elsewhere.
pub fn run<S: VellumState>(
    expander: &mut Expander<S>,
    allow_undefined: bool,
) -> error::Result<Vec<Instruction>> {
    let mut output = Vec::new();
    loop {
        match expander.next() {
            Ok(None) => return Ok(output),
            Ok(Some(token)) => execute(expander, token, &mut output)?,
            Err(err) if allow_undefined && err.is_recoverable() => {
                // The failed token was restored to the front of the
                // input; absorb it as a terminal.
                if let Some(token) = expander.next_raw()? {
                    output.push(token);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Run the executor until the group-close matching an already-consumed
/// group-open, consuming the group-close. Used for box groups.
pub fn run_group<S: VellumState>(expander: &mut Expander<S>) -> error::Result<Vec<Instruction>> {
    let mut output = Vec::new();
    let mut depth: usize = 0;
    loop {
        let token = match expander.next()? {
            None => {
                return Err(error::Error::unterminated_absorption(
                    "running a box group",
                    Position::default(),
                ))
            }
            Some(t) => t,
        };
        match token.value() {
            Value::BeginGroup(_) => {
                depth += 1;
                expander.begin_group();
            }
            Value::EndGroup(_) if depth == 0 => return Ok(output),
            Value::EndGroup(_) => {
                depth -= 1;
                expander.end_group(token.pos())?;
            }
            _ => execute(expander, token, &mut output)?,
        }
    }
}

/// Execute one terminal instruction.
fn execute<S: VellumState>(
    expander: &mut Expander<S>,
    token: Instruction,
    output: &mut Vec<Instruction>,
) -> error::Result<()> {
    match token.value() {
        Value::MacroDefinition(definition) => {
            let definition = definition.clone();
            let global = definition.prefixes().global;
            expander
                .router_mut()
                .define_macro(definition.name(), definition, global);
        }
        Value::LetAssignment {
            alias,
            target,
            global,
        } => {
            let (alias, target, global) = (*alias, *target, *global);
            if expander
                .router_mut()
                .define_alias(alias, target, global)
                .is_err()
            {
                let name = match target {
                    AliasTarget::ControlSequence(name) => expander
                        .cs_name_interner()
                        .resolve(name)
                        .unwrap_or("?")
                        .to_string(),
                    AliasTarget::Character(..) => unreachable!("character aliases cannot fail"),
                };
                return Err(error::Error::no_such_control_sequence(name, token.pos()));
            }
        }
        Value::ShorthandDefinition { kind, name, global } => {
            let (kind, name, global) = (*kind, *name, *global);
            conditional::scan_optional_equals(expander)?;
            let code = conditional::scan_integer(expander, token.pos())?;
            if expander
                .router_mut()
                .shorthand_define(name, kind, code, global)
                .is_err()
            {
                return Err(error::Error::malformed_token(
                    "a valid character code",
                    code.to_string(),
                    token.pos(),
                ));
            }
        }
        Value::FontDefinition { name } => {
            let name = *name;
            let font = FontId(expander.router().font_count());
            expander.router_mut().define_font(name, font, false);
        }
        Value::BeginGroup(_) => expander.begin_group(),
        Value::EndGroup(_) => expander.end_group(token.pos())?,
        _ => output.push(token),
    }
    Ok(())
}
