//! User-defined macros.

use crate::instruction::Instruction;
use crate::instruction::Value;
use crate::token::CsName;
use crate::token::Position;
use vellum_stdext::algorithms::substringsearch::Matcher;

/// A user-defined macro.
///
/// Macro definitions are owned by the router's payload table behind an
/// `Rc` and referenced, not copied, until expansion time.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MacroDefinition {
    name: CsName,
    prefix: Vec<Instruction>,
    parameters: Vec<Parameter>,
    replacement: Vec<Replacement>,
    prefixes: Prefixes,
    kind: DefinitionKind,
}

/// A formal parameter slot.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Parameter {
    /// Takes exactly one token, or one balanced group.
    Undelimited,
    /// Accumulates tokens until the delimiter sequence appears.
    Delimited(Matcher<Value>),
}

/// A token run or parameter slot in a replacement text.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Replacement {
    /// A run of literal tokens.
    Tokens(Vec<Instruction>),
    /// A parameter. The index must be less than the number of parameters
    /// in the macro.
    Parameter(usize),
}

/// Prefix flags absorbed before a definition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Prefixes {
    pub global: bool,
    pub long: bool,
    pub outer: bool,
}

/// How a macro definition came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DefinitionKind {
    /// `\def` or `\gdef`: the replacement text was absorbed verbatim.
    Standard,
    /// `\edef`: the replacement text was expanded while being absorbed.
    Expanded,
    /// Synthesized by a shorthand definition such as `\chardef`.
    Synthesized,
}

impl MacroDefinition {
    pub fn new(
        name: CsName,
        prefix: Vec<Instruction>,
        parameters: Vec<Parameter>,
        replacement: Vec<Replacement>,
        prefixes: Prefixes,
        kind: DefinitionKind,
    ) -> MacroDefinition {
        MacroDefinition {
            name,
            prefix,
            parameters,
            replacement,
            prefixes,
            kind,
        }
    }

    /// The name the macro was defined under.
    pub fn name(&self) -> CsName {
        self.name
    }

    /// Literal tokens that must follow the macro name before the first
    /// argument.
    pub fn prefix(&self) -> &[Instruction] {
        &self.prefix
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn replacement(&self) -> &[Replacement] {
        &self.replacement
    }

    pub fn prefixes(&self) -> Prefixes {
        self.prefixes
    }

    pub fn kind(&self) -> DefinitionKind {
        self.kind
    }

    /// Substitute the provided arguments into the replacement text.
    ///
    /// Replacement tokens are copied and re-stamped with the position and
    /// invoking name of the call site, so diagnostics for tokens that came
    /// out of a macro point at the invocation. Argument tokens already
    /// carry their call-site positions and are inserted as they are.
    pub fn perform_replacement(
        &self,
        arguments: &[Vec<Instruction>],
        pos: Position,
        invoked_as: Option<CsName>,
    ) -> Vec<Instruction> {
        let mut output_size = 0;
        for replacement in &self.replacement {
            output_size += match replacement {
                Replacement::Tokens(tokens) => tokens.len(),
                Replacement::Parameter(i) => arguments[*i].len(),
            };
        }
        let mut result = Vec::with_capacity(output_size);
        for replacement in &self.replacement {
            match replacement {
                Replacement::Tokens(tokens) => {
                    result.extend(tokens.iter().map(|t| t.restamped(pos, invoked_as)));
                }
                Replacement::Parameter(i) => {
                    result.extend(arguments[*i].iter().cloned());
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::CsNameInterner;

    fn letter(c: char) -> Instruction {
        Instruction::new(Value::Letter(c), Default::default())
    }

    #[test]
    fn replacement_interleaves_tokens_and_arguments() {
        let mut interner: CsNameInterner = Default::default();
        let name = interner.get_or_intern("m");
        let def = MacroDefinition::new(
            name,
            vec![],
            vec![Parameter::Undelimited, Parameter::Undelimited],
            vec![
                Replacement::Parameter(1),
                Replacement::Tokens(vec![letter('-')]),
                Replacement::Parameter(0),
            ],
            Default::default(),
            DefinitionKind::Standard,
        );
        let args = vec![vec![letter('a')], vec![letter('b'), letter('c')]];
        let out = def.perform_replacement(&args, Default::default(), Some(name));
        let values: Vec<char> = out.iter().map(|i| i.char().unwrap()).collect();
        assert_eq!(values, vec!['b', 'c', '-', 'a']);
    }

    #[test]
    fn replacement_tokens_are_restamped() {
        let mut interner: CsNameInterner = Default::default();
        let name = interner.get_or_intern("m");
        let def = MacroDefinition::new(
            name,
            vec![],
            vec![],
            vec![Replacement::Tokens(vec![letter('x')])],
            Default::default(),
            DefinitionKind::Standard,
        );
        let call_site = Position {
            buffer: 7,
            line: 3,
            column: 1,
            offset: 20,
            len: 2,
        };
        let out = def.perform_replacement(&[], call_site, Some(name));
        assert_eq!(out[0].pos(), call_site);
        assert_eq!(out[0].invoked_as(), Some(name));
    }
}
