//! Conditional evaluation and branch selection.
//!
//! The `\if...` primitives are expanded in two steps. First the condition
//! is evaluated, through the [VellumState::evaluate_condition] hook, to a
//! boolean or an integer case index. Then the whole conditional is
//! scanned up to its matching `\fi`, tracking a nesting counter that
//! increments on any if-family primitive and decrements on `\fi`; at
//! nesting depth one, `\else` and `\or` each advance a branch counter.
//! Tokens are kept exactly while the branch counter equals the selected
//! branch (true → 0, false → 1, case → the case index), and the kept
//! tokens are reinserted at the front of the input for reprocessing.
//!
//! The scan recognizes if/else/or/fi through the router, so aliases of
//! these primitives participate, but it does not invoke macros or other
//! expandables: the kept tokens are the original unresolved ones, which
//! matters when a branch defines a macro that the same branch then calls.

use crate::error;
use crate::expander::Expander;
use crate::expander::Mode;
use crate::expander::VellumState;
use crate::instruction::Instruction;
use crate::instruction::Value;
use crate::router::Condition;
use crate::router::Primitive;
use crate::token::Position;

/// The outcome of evaluating a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A boolean condition: selects the first branch when true, the
    /// branch after `\else` when false.
    Boolean(bool),
    /// A switch condition: selects the branch with the given index.
    Case(i32),
}

/// The built-in condition evaluator.
///
/// Operands (the numbers compared by `\ifnum`, tested by `\ifodd`, or
/// switched on by `\ifcase`) are read from the expander's stream with
/// expansion active.
pub fn evaluate<S: VellumState>(
    expander: &mut Expander<S>,
    condition: Condition,
    pos: Position,
) -> error::Result<Outcome> {
    match condition {
        Condition::IfTrue => Ok(Outcome::Boolean(true)),
        Condition::IfFalse => Ok(Outcome::Boolean(false)),
        Condition::IfOdd => {
            let n = scan_integer(expander, pos)?;
            Ok(Outcome::Boolean(n % 2 != 0))
        }
        Condition::IfNum => {
            let a = scan_integer(expander, pos)?;
            let relation = scan_relation(expander, pos)?;
            let b = scan_integer(expander, pos)?;
            Ok(Outcome::Boolean(match relation {
                '<' => a < b,
                '=' => a == b,
                _ => a > b,
            }))
        }
        Condition::IfCase => Ok(Outcome::Case(scan_integer(expander, pos)?)),
    }
}

/// Expand a conditional: evaluate it, scan to the matching `\fi`, and
/// reinsert the selected branch's tokens.
pub(crate) fn expand_conditional<S: VellumState>(
    expander: &mut Expander<S>,
    instruction: &Instruction,
    condition: Condition,
) -> error::Result<()> {
    let pos = instruction.pos();
    let outcome = S::evaluate_condition(expander, condition, pos)?;
    let selected = match outcome {
        Outcome::Boolean(true) => 0,
        Outcome::Boolean(false) => 1,
        Outcome::Case(index) => index,
    };
    expander.with_mode(Mode::AbsorbingConditionalText, |expander| {
        let mut kept = Vec::new();
        let mut nesting: i32 = 1;
        let mut branch: i32 = 0;
        loop {
            let token = expander.next_raw_or_err("reading conditional text", pos)?;
            let primitive = match token.value() {
                Value::ControlSequence(name) => expander.router().resolve_primitive(*name),
                Value::Primitive(primitive) => Some(*primitive),
                _ => None,
            };
            match primitive {
                Some(Primitive::Conditional(_)) => {
                    nesting += 1;
                    if branch == selected {
                        kept.push(token);
                    }
                }
                Some(Primitive::Fi) => {
                    nesting -= 1;
                    if nesting == 0 {
                        break;
                    }
                    if branch == selected {
                        kept.push(token);
                    }
                }
                Some(Primitive::Else) if nesting == 1 => branch += 1,
                Some(Primitive::Or) if nesting == 1 => branch += 1,
                _ => {
                    if branch == selected {
                        kept.push(token);
                    }
                }
            }
        }
        expander.push_front_all(kept);
        Ok(())
    })
}

/// Scan a signed decimal integer constant, with expansion active.
///
/// Leading spaces are skipped, a run of `+`/`-` signs is accepted, and a
/// single space after the digits is consumed as the number's terminator.
/// The token that ends the number otherwise stays in the stream.
pub(crate) fn scan_integer<S: VellumState>(
    expander: &mut Expander<S>,
    pos: Position,
) -> error::Result<i32> {
    let mut sign: i64 = 1;
    let mut value: i64 = 0;
    let mut digits_seen = false;
    loop {
        let token = match expander.next_expanding()? {
            None => {
                if digits_seen {
                    break;
                }
                return Err(error::Error::unterminated_absorption("reading a number", pos));
            }
            Some(t) => t,
        };
        match token.value() {
            Value::Space(_) => {
                if digits_seen {
                    // The terminating space is consumed.
                    break;
                }
            }
            Value::Other('+') if !digits_seen => (),
            Value::Other('-') if !digits_seen => sign = -sign,
            value_ => match value_.char().filter(char::is_ascii_digit) {
                Some(digit) => {
                    digits_seen = true;
                    value = value
                        .saturating_mul(10)
                        .saturating_add(digit as i64 - '0' as i64);
                }
                None => {
                    if digits_seen {
                        expander.push_front(token);
                        break;
                    }
                    let found = token.describe(expander.cs_name_interner());
                    let token_pos = token.pos();
                    expander.push_front(token);
                    return Err(error::Error::malformed_token("a number", found, token_pos));
                }
            },
        }
    }
    Ok((sign * value).clamp(i32::MIN as i64, i32::MAX as i64) as i32)
}

/// Scan a relation character (`<`, `=` or `>`), skipping spaces.
fn scan_relation<S: VellumState>(
    expander: &mut Expander<S>,
    pos: Position,
) -> error::Result<char> {
    loop {
        let token = match expander.next_expanding()? {
            None => {
                return Err(error::Error::unterminated_absorption(
                    "reading a relation",
                    pos,
                ))
            }
            Some(t) => t,
        };
        return match token.value() {
            Value::Space(_) => continue,
            Value::Other(c @ ('<' | '=' | '>')) => Ok(*c),
            _ => {
                let found = token.describe(expander.cs_name_interner());
                let token_pos = token.pos();
                expander.push_front(token);
                Err(error::Error::malformed_token(
                    "a relation (`<`, `=` or `>`)",
                    found,
                    token_pos,
                ))
            }
        };
    }
}

/// Scan an optional `=`, skipping spaces, leaving anything else in the
/// stream.
pub(crate) fn scan_optional_equals<S: VellumState>(
    expander: &mut Expander<S>,
) -> error::Result<()> {
    loop {
        let token = match expander.next_expanding()? {
            None => return Ok(()),
            Some(t) => t,
        };
        return match token.value() {
            Value::Space(_) => continue,
            Value::Other('=') => Ok(()),
            _ => {
                expander.push_front(token);
                Ok(())
            }
        };
    }
}
