//! # Vellum: a macro-driven typesetting language front end.
//!
//! This crate implements the front end of a TeX-style typesetting
//! language: source text is turned into a stream of resolved,
//! expansion-complete instruction tokens for a downstream parser and
//! layout engine. The pipeline, leaves first:
//!
//! - [token::source::CharacterSource] — a stack of character buffers
//!   with bounded lookahead and mid-stream insertion.
//! - [token::lexer::Lexer] — the category-code-driven tokenizer, with
//!   trio-escape decoding.
//! - [instruction::Normalizer] — maps lexical tokens to canonical
//!   instruction tokens and provides a push-back queue.
//! - [router::Router] — the scoped control-sequence symbol table, with
//!   route-handle indirection.
//! - [resolver::Resolver] — resolves control-sequence placeholders in a
//!   single atomic step.
//! - [expander::Expander] — the engine: macro invocation, conditionals,
//!   aliasing, case conversion, balanced-text capture and box-group
//!   orchestration.
//!
//! The whole pipeline is single-threaded and pull-based: every stage
//! produces a token only in response to a demand from the stage above.
//!
//! Grammar-level parsing, the box/glue layout model and document
//! serialization are outside this crate; they consume the expander's
//! output through the interfaces in [expander] and [script].

extern crate vellum_stdext;

pub mod conditional;
pub mod error;
pub mod expander;
pub mod instruction;
pub mod resolver;
pub mod router;
pub mod script;
pub mod texmacro;
pub mod token;

/// Module that re-exports all of the crate's traits.
///
/// This is useful for getting all of the traits in scope in a Rust
/// module:
/// ```
/// use vellum::traits::*;
/// ```
pub mod traits {
    pub use super::expander::VellumState;
    pub use super::token::lexer::CatCodeFn;
}
