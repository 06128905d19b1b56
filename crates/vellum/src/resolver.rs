//! The resolver, which turns unresolved control-sequence placeholders
//! into resolved instructions in a single atomic step.
//!
//! Resolution and the pull from the normalizer happen in the same call.
//! This atomicity matters: one-step-lookahead expansion (`\expandafter`)
//! must see "resolve and expand" as one operation, never as two separate
//! round trips.
//!
//! On resolution failure the original placeholder is pushed back
//! unchanged onto the normalizer and the failure is propagated. A caller
//! may retry after performing a side-effecting operation defined later in
//! the same input chunk (e.g. the control sequence is about to be defined
//! by a not-yet-executed command).

use crate::error;
use crate::instruction::Instruction;
use crate::instruction::Normalizer;
use crate::instruction::Value;
use crate::router::Router;
use crate::token::lexer::CatCodeFn;
use crate::token::CsNameInterner;

/// The resolver. A stateless coordinator layered over the normalizer.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Resolver {
    normalizer: Normalizer,
}

impl Default for Resolver {
    fn default() -> Self {
        Resolver {
            normalizer: Normalizer::new(),
        }
    }
}

impl Resolver {
    pub fn new() -> Resolver {
        Default::default()
    }

    /// Insert a new character buffer into the underlying source.
    pub fn insert_source(&mut self, text: &str) {
        self.normalizer.insert_source(text);
    }

    /// Re-insert an instruction at the front of the stream.
    pub fn push_back(&mut self, instruction: Instruction) {
        self.normalizer.push_back(instruction);
    }

    /// Pull the next instruction without resolving placeholders.
    pub fn next_raw<F: CatCodeFn>(
        &mut self,
        cat_code_fn: &F,
        interner: &mut CsNameInterner,
    ) -> error::Result<Option<Instruction>> {
        self.normalizer.next(cat_code_fn, interner)
    }

    /// Pull the next instruction, resolving a control-sequence
    /// placeholder through the router in the same step.
    pub fn next<F: CatCodeFn>(
        &mut self,
        cat_code_fn: &F,
        interner: &mut CsNameInterner,
        router: &Router,
    ) -> error::Result<Option<Instruction>> {
        let instruction = match self.normalizer.next(cat_code_fn, interner)? {
            None => return Ok(None),
            Some(i) => i,
        };
        match instruction.value() {
            Value::ControlSequence(name) => {
                let name = *name;
                match router.resolve_to_token(name, instruction.pos()) {
                    Some(resolved) => Ok(Some(resolved)),
                    None => {
                        let display = interner.resolve(name).unwrap_or("?").to_string();
                        let pos = instruction.pos();
                        self.normalizer.push_back(instruction);
                        Err(error::Error::no_such_control_sequence(display, pos))
                    }
                }
            }
            _ => Ok(Some(instruction)),
        }
    }
}
