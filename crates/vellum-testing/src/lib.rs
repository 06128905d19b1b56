/*!
Vellum unit testing library

This is a crate for writing unit tests for code that uses Vellum.
It is used extensively in the Vellum core crate itself, so the unit tests
there are good examples of what this crate can do.

## Basic setup

Each unit test works with a specific state type implementing
[`VellumState`]. If the test doesn't need anything special, the [`State`]
type defined here can be used directly; it provides fixture knobs for the
category-code table, the case-mapping tables and the escape character,
which is how tests inject deterministic lookups instead of relying on
ambient defaults.

## Test types

### Expansion equality tests

Run using [`run_expansion_equality_test`].
These verify that two different source snippets produce the same output
through the reference executor. For example:

```tex
\def\HelloWorld{Hola Mundo}\HelloWorld - \HelloWorld
```

and

```tex
Hola Mundo - Hola Mundo
```

produce the same output. The second input is usually a constant: these
tests verify that a non-trivial expression evaluates to a specific
constant output. They do _not_ verify that the resulting engine state is
the same in both cases — it usually isn't.

### Failure tests

Run using [`run_failure_test`].
These verify that a specific source snippet fails to execute.

## The test suite macro

All test types can be run with the functions above, but the preferred way
to write a suite is the [`test_suite`] macro, which removes boilerplate
and makes it easy to add cases.
*/

use std::collections::HashMap;

use vellum::error;
use vellum::expander::Expander;
use vellum::instruction::write_instructions;
use vellum::instruction::Instruction;
use vellum::instruction::Value;
use vellum::script;
use vellum::token::CatCode;
use vellum::token::CsNameInterner;
use vellum::traits::*;

/// Simple state type for unit tests.
///
/// All lookups the engine consults are explicit fields here, so a test
/// can pin them to fixtures.
pub struct State {
    cat_code_overrides: HashMap<char, CatCode>,
    upper_case: CaseMapping,
    lower_case: CaseMapping,
    escape_char: Option<char>,
}

enum CaseMapping {
    AsciiDefaults,
    Table(HashMap<char, char>),
}

impl Default for State {
    fn default() -> Self {
        State {
            cat_code_overrides: HashMap::new(),
            upper_case: CaseMapping::AsciiDefaults,
            lower_case: CaseMapping::AsciiDefaults,
            escape_char: Some('\\'),
        }
    }
}

impl State {
    /// Override the category code of a character.
    pub fn set_cat_code(&mut self, c: char, cat_code: CatCode) {
        self.cat_code_overrides.insert(c, cat_code);
    }

    /// Replace the case-mapping tables entirely. Characters absent from
    /// a table have no mapping.
    pub fn set_case_mappings(&mut self, upper: HashMap<char, char>, lower: HashMap<char, char>) {
        self.upper_case = CaseMapping::Table(upper);
        self.lower_case = CaseMapping::Table(lower);
    }

    /// Set the escape character, or disable it with `None`.
    pub fn set_escape_char(&mut self, c: Option<char>) {
        self.escape_char = c;
    }
}

impl VellumState for State {
    fn cat_code(&self, c: char) -> CatCode {
        match self.cat_code_overrides.get(&c) {
            Some(cat_code) => *cat_code,
            None => CatCode::PLAIN_DEFAULTS
                .get(c as usize)
                .copied()
                .unwrap_or_default(),
        }
    }

    fn upper_case(&self, c: char) -> Option<char> {
        match &self.upper_case {
            CaseMapping::AsciiDefaults => {
                c.is_ascii_alphabetic().then(|| c.to_ascii_uppercase())
            }
            CaseMapping::Table(table) => table.get(&c).copied(),
        }
    }

    fn lower_case(&self, c: char) -> Option<char> {
        match &self.lower_case {
            CaseMapping::AsciiDefaults => {
                c.is_ascii_alphabetic().then(|| c.to_ascii_lowercase())
            }
            CaseMapping::Table(table) => table.get(&c).copied(),
        }
    }

    fn escape_char(&self) -> Option<char> {
        self.escape_char
    }
}

/// An option for how to run a test.
pub enum TestOption<'a, S> {
    /// Whether undefined control sequences are collected as terminals
    /// rather than failing the run. Defaults to true.
    AllowUndefinedCommands(bool),
    /// Initialize the state before the engine is built. Use this to pin
    /// category codes, case mappings or the escape character.
    CustomStateInitialization(&'a dyn Fn(&mut S)),
    /// Same as [TestOption::CustomStateInitialization] but with a boxed
    /// closure.
    CustomStateInitializationDyn(Box<dyn Fn(&mut S)>),
}

/// Resolved view of a list of [TestOption]s.
pub struct ResolvedOptions<'a, S> {
    allow_undefined_commands: bool,
    custom_state_initialization: &'a dyn Fn(&mut S),
}

impl<'a, S> ResolvedOptions<'a, S> {
    pub fn new(options: &'a [TestOption<'a, S>]) -> Self {
        let mut resolved = Self {
            allow_undefined_commands: true,
            custom_state_initialization: &|_| {},
        };
        for option in options {
            match option {
                TestOption::AllowUndefinedCommands(b) => {
                    resolved.allow_undefined_commands = *b;
                }
                TestOption::CustomStateInitialization(f) => {
                    resolved.custom_state_initialization = f;
                }
                TestOption::CustomStateInitializationDyn(f) => {
                    resolved.custom_state_initialization = &**f;
                }
            }
        }
        resolved
    }
}

/// Build an expander with the provided options applied to a default
/// state.
pub fn initialize_expander<S: Default + VellumState>(
    options: &ResolvedOptions<S>,
) -> Expander<S> {
    let mut state = S::default();
    (options.custom_state_initialization)(&mut state);
    Expander::new(state)
}

/// Execute source code through the reference executor.
pub fn execute_source_code<S: Default + VellumState>(
    expander: &mut Expander<S>,
    source: &str,
    options: &ResolvedOptions<S>,
) -> error::Result<Vec<Instruction>> {
    expander.push_source(source);
    script::run(expander, options.allow_undefined_commands)
}

fn tokens_equal(
    lhs: &Instruction,
    lhs_interner: &CsNameInterner,
    rhs: &Instruction,
    rhs_interner: &CsNameInterner,
) -> bool {
    match (lhs.value(), rhs.value()) {
        (Value::ControlSequence(a), Value::ControlSequence(b)) => {
            lhs_interner.resolve(*a) == rhs_interner.resolve(*b)
        }
        (a, b) => a == b,
    }
}

/// Run an expansion equality test.
///
/// The two provided inputs must produce the same output through the
/// reference executor.
pub fn run_expansion_equality_test<S: Default + VellumState>(
    lhs: &str,
    rhs: &str,
    options: &[TestOption<S>],
) {
    let options = ResolvedOptions::new(options);

    let mut expander_1 = initialize_expander(&options);
    let output_1 = match execute_source_code(&mut expander_1, lhs, &options) {
        Ok(output) => output,
        Err(err) => panic!("failed to execute the left-hand input: {err}"),
    };
    let mut expander_2 = initialize_expander(&options);
    let output_2 = match execute_source_code(&mut expander_2, rhs, &options) {
        Ok(output) => output,
        Err(err) => panic!("failed to execute the right-hand input: {err}"),
    };

    let equal = output_1.len() == output_2.len()
        && output_1.iter().zip(output_2.iter()).all(|(a, b)| {
            tokens_equal(
                a,
                expander_1.cs_name_interner(),
                b,
                expander_2.cs_name_interner(),
            )
        });
    if !equal {
        println!("Output is different:");
        println!("------[lhs]------");
        println!(
            "'{}'",
            write_instructions(&output_1, expander_1.cs_name_interner())
        );
        println!("------[rhs]------");
        println!(
            "'{}'",
            write_instructions(&output_2, expander_2.cs_name_interner())
        );
        println!("-----------------");
        panic!("expansion equality test failed");
    }
}

/// Run a failure test.
///
/// The test passes if execution of the provided input fails.
pub fn run_failure_test<S: Default + VellumState>(input: &str, options: &[TestOption<S>]) {
    let options = ResolvedOptions::new(options);

    let mut expander = initialize_expander(&options);
    if let Ok(output) = execute_source_code(&mut expander, input, &options) {
        println!("Execution succeeded:");
        println!(
            "'{}'",
            write_instructions(&output, expander.cs_name_interner())
        );
        panic!("failure test did not pass: execution was successful");
    }
}

/// Macro to generate a suite of unit tests.
///
/// The general use of this macro looks like this:
/// ```
/// # use vellum_testing::*;
/// test_suite![
///     state(State),
///     options(),
///     expansion_equality_tests(
///         (case_1, r"\def\a{x}\a", "x"),
///         (case_2, r"\def\a{x}\a\a", "xx"),
///     ),
///     failure_tests(
///         (case_3, r"\def"),
///     ),
/// ];
/// ```
///
/// The arguments are:
///
/// - `state(State)`: the state type to use. May be omitted, in which
///   case it defaults to the type named `State` in the current scope.
///
/// - `options(option_1, ..., option_n)`: a list of [TestOption] values
///   passed to the runners. May be omitted, in which case no options are
///   passed.
///
/// - `expansion_equality_tests(cases...)`: each case is
///   `(name, lhs, rhs)` and is fed to [run_expansion_equality_test].
///
/// - `failure_tests(cases...)`: each case is `(name, input)` and is fed
///   to [run_failure_test].
#[macro_export]
macro_rules! test_suite {
    ( state($state: ty), options $options: tt, expansion_equality_tests ( $( ($name: ident, $lhs: expr, $rhs: expr $(,)? ) ),* $(,)? ) $(,)? ) => (
        $(
            #[test]
            fn $name() {
                let lhs = $lhs;
                let rhs = $rhs;
                let options = vec! $options;
                $crate::run_expansion_equality_test::<$state>(&lhs, &rhs, &options);
            }
        )*
    );
    ( state($state: ty), options $options: tt, failure_tests ( $( ($name: ident, $input: expr $(,)? ) ),* $(,)? ) $(,)? ) => (
        $(
            #[test]
            fn $name() {
                let input = $input;
                let options = vec! $options;
                $crate::run_failure_test::<$state>(&input, &options);
            }
        )*
    );
    ( state($state: ty), options $options: tt, $test_kind: ident $test_cases: tt $(,)? ) => (
        compile_error!("test_suite! only accepts the keywords `state`, `options`, `expansion_equality_tests` and `failure_tests`");
    );
    ( state($state: ty), options $options: tt, $( $test_kind: ident $test_cases: tt ),+ $(,)? ) => (
        $(
            $crate::test_suite![state($state), options $options, $test_kind $test_cases,];
        )+
    );
    ( options $options: tt, $( $test_kind: ident $test_cases: tt ),+ $(,)? ) => (
        $crate::test_suite![state(State), options $options, $( $test_kind $test_cases, )+ ];
    );
    ( $( $test_kind: ident $test_cases: tt ),+ $(,)? ) => (
        $crate::test_suite![options (), $( $test_kind $test_cases, )+ ];
    );
}
