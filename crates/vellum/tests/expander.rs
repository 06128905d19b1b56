mod tests {
    use vellum::expander::Expander;
    use vellum::instruction::{Instruction, Value};
    use vellum::router::BoxKind;
    use vellum::script;
    use vellum_testing::*;

    mod def {
        use super::*;

        test_suite![
            expansion_equality_tests(
                (def_parsed_successfully, r"\def\A{abc}", ""),
                (output_is_correct, r"\def\A{abc}\A", "abc"),
                (output_twice, r"\def\A{abc}\A\A", "abcabc"),
                (parse_one_parameter, r"\def\A#1{a-#1-b}", ""),
                (one_undelimited_parameter, r"\def\A#1{a-#1-b}\A1", "a-1-b"),
                (
                    one_undelimited_parameter_multiple_times,
                    r"\def\A#1{#1 #1 #1}\A1",
                    "1 1 1"
                ),
                (
                    one_undelimited_parameter_multiple_tokens,
                    r"\def\A#1{a-#1-b}\A{123}",
                    "a-123-b"
                ),
                (two_undelimited_parameters, r"\def\A#1#2{#2-#1}\A56", "6-5"),
                (
                    two_undelimited_parameters_multiple_token_inputs,
                    r"\def\A#1#2{#2-#1}\A{abc}{xyz}",
                    "xyz-abc"
                ),
                (consume_prefix_correctly, r"\def\A fgh{567}\A fghi", "567i"),
                (
                    one_undelimited_parameter_with_prefix,
                    r"\def\A abc#1{y#1z}\A abcdefg",
                    "ydzefg"
                ),
                (one_delimited_parameter, r"\def\A #1xxx{y#1z}\A abcxxx", "yabcz"),
                (one_delimited_parameter_empty, r"\def\A #1xxx{y#1z}\A xxx", "yz"),
                (
                    one_delimited_parameter_with_scope,
                    r"\def\A #1xxx{#1}\A abc{123xxx}xxx",
                    "abc{123xxx}"
                ),
                (
                    one_delimited_parameter_with_prefix,
                    r"\def\A a#1c{x#1y}\A abcdef",
                    "xbydef"
                ),
                (
                    two_delimited_parameters_with_prefix,
                    r"\def\A a#1c#2e{x#2y#1z}\A abcdef",
                    "xdybzf"
                ),
                (
                    one_delimited_parameter_grouped_value,
                    r"\def\A #1c{x#1y}\A {Hello}c",
                    "xHelloy"
                ),
                (
                    grouped_value_with_trailing_tokens_is_not_stripped,
                    r"\def\A #1c{x#1y}\A {He}{llo}c",
                    "x{He}{llo}y"
                ),
                (
                    parameter_brace_special_case,
                    r"\def\A #{Mint says }\A{hello}",
                    "Mint says {hello}"
                ),
                (
                    empty_macro_consumes_only_its_own_token,
                    r"\def\A{}a\A b",
                    "ab"
                ),
                (
                    grouping,
                    r"\def\A{Hello}\A{\def\A{World}\A}\A",
                    "HelloWorldHello"
                ),
                (
                    grouping_global,
                    r"\def\A{Hello}\A{\global\def\A{World}\A}\A",
                    "HelloWorldWorld"
                ),
                (gdef, r"\def\A{Hello}\A{\gdef\A{World}\A}\A", "HelloWorldWorld"),
                (
                    gdef_global,
                    r"\def\A{Hello}\A{\global\gdef\A{World}\A}\A",
                    "HelloWorldWorld"
                ),
                (
                    edef_expands_at_definition_time,
                    r"\def\A{x}\edef\B{\A y}\def\A{z}\B",
                    "xy"
                ),
                (
                    delimiter_that_is_a_control_sequence,
                    r"\def\a#1\b{Hello '#1'}\def\b{World}\a\b",
                    "Hello ''"
                ),
                (
                    texbook_exercise_20_1,
                    r"\def\mustnt{I must not talk in class.}%
                      \def\five{\mustnt\mustnt\mustnt\mustnt\mustnt}%
                      \def\twenty{\five\five\five\five}%
                      \def\punishment{\twenty\twenty\twenty\twenty\twenty}%
                      \punishment",
                    "I must not talk in class.".repeat(100)
                ),
                (
                    texbook_exercise_20_2,
                    r"\def\a{\b}%
                      \def\b{A\def\a{B\def\a{C\def\a{\b}}}}%
                      \def\puzzle{\a\a\a\a\a}%
                      \puzzle",
                    "ABCAB"
                ),
                (
                    texbook_exercise_20_3_part_1,
                    "\\def\\row#1{(#1_1,\\ldots,#1_n)}\\row{\\bf x}",
                    "(\\bf x_1,\\ldots,\\bf x_n)"
                ),
                (
                    texbook_exercise_20_3_part_2,
                    "\\def\\row#1{(#1_1,\\ldots,#1_n)}\\row{{\\bf x}}",
                    "({\\bf x}_1,\\ldots,{\\bf x}_n)"
                ),
                (
                    texbook_exercise_20_4_part_1,
                    r#"\def\mustnt#1#2{I must not #1 in #2.}%
                       \def\five#1#2{\mustnt{#1}{#2}\mustnt{#1}{#2}\mustnt{#1}{#2}\mustnt{#1}{#2}\mustnt{#1}{#2}}%
                       \def\twenty#1#2{\five{#1}{#2}\five{#1}{#2}\five{#1}{#2}\five{#1}{#2}}%
                       \def\punishment#1#2{\twenty{#1}{#2}\twenty{#1}{#2}\twenty{#1}{#2}\twenty{#1}{#2}\twenty{#1}{#2}}%
                       \punishment{run}{the halls}"#,
                    "I must not run in the halls.".repeat(100)
                ),
                (
                    texbook_exercise_20_5,
                    r"\def\a#1{\def\b##1{##1#1}}\a!\b{Hello}",
                    "Hello!"
                ),
                (
                    texbook_exercise_20_5_example_below,
                    r"\def\a#1#{\mybox to #1}\a3pt{x}",
                    r"\mybox to 3pt{x}"
                ),
                (
                    texbook_exercise_20_6,
                    r"\def\b#1{And #1, World!}\def\a#{\b}\a{Hello}",
                    "And Hello, World!"
                ),
            ),
            failure_tests(
                (end_of_input_scanning_target, r"\def"),
                (end_of_input_scanning_parameter_text, r"\def\A"),
                (end_of_input_scanning_replacement, r"\def\A{"),
                (end_of_input_scanning_nested_replacement, r"\def\A{{}"),
                (end_of_input_reading_parameter_number, r"\def\A#"),
                (end_of_input_scanning_argument, r"\def\A#1{} \A"),
                (
                    end_of_input_reading_value_for_parameter,
                    r"\def\A#1{} \A{this {is parameter 1 but it never ends}"
                ),
                (end_of_input_reading_prefix, r"\def\A abc{} \A ab"),
                (
                    end_of_input_reading_delimiter,
                    r"\def\A #1abc{} \A {first parameter}ab"
                ),
                (unexpected_token_target, r"\def a"),
                (unexpected_token_parameter_text, r"\def\A }"),
                (unexpected_token_parameter_number, r"\def\A #a}"),
                (unexpected_parameter_number_in_parameter_text, r"\def\A #2{}"),
                (unexpected_parameter_token_in_replacement, r"\def\A #1{#a}"),
                (unexpected_parameter_number_in_replacement, r"\def\A {#2}"),
                (unexpected_token_in_prefix, r"\def\A abc{d} \A abd"),
                (edef_of_undefined_name_fails, r"\edef\A{\undefined}"),
            ),
        ];
    }

    mod alias {
        use super::*;

        test_suite![
            expansion_equality_tests(
                (let_for_macro, r"\def\A{abc}\let\B\A\B", "abc"),
                (let_for_macro_equals, r"\def\A{abc}\let\B=\A\B", "abc"),
                (
                    local,
                    r"\def\A{a}\def\B{b}\let\C=\A{\let\C=\B \C}\C",
                    "ba"
                ),
                (
                    global,
                    r"\def\A{a}\def\B{b}\let\C=\A{\global\let\C=\B \C}\C",
                    "bb"
                ),
                (let_to_character, r"\let\B=bY\B", "Yb"),
                (
                    alias_is_bound_at_definition_time,
                    r"\def\A{a}\let\B\A\def\A{b}\B\A",
                    "ab"
                ),
                (
                    alias_unaffected_by_inner_redefinition,
                    r"\def\A{a}\let\B\A{\def\A{b}\B}\A",
                    "aa"
                ),
                (let_of_primitive, r"\let\x\relax\x", r"\relax"),
                (
                    let_of_fi_recognized_in_conditionals,
                    r"\let\endif\fi\iftrue a\endif b",
                    "ab"
                ),
            ),
            failure_tests(
                (let_unknown_cs_name, r"\let \B=\A"),
                (let_end_of_input, r"\let\B"),
                (let_target_not_a_control_sequence, r"\let a\A"),
            ),
        ];
    }

    mod conditional {
        use super::*;

        test_suite![
            expansion_equality_tests(
                (iftrue_base_case, r"\iftrue a\else b\fi c", "ac"),
                (iftrue_no_else, r"\iftrue a\fi c", "ac"),
                (
                    iftrue_skip_nested_ifs,
                    r"\iftrue a\else b\iftrue \else c\fi d\fi e",
                    "ae"
                ),
                (iffalse_base_case, r"\iffalse a\else b\fi c", "bc"),
                (iffalse_no_else, r"\iffalse a\fi c", "c"),
                (
                    iffalse_skip_nested_ifs,
                    r"\iffalse \iftrue a\else b\fi c\else d\fi e",
                    "de"
                ),
                (
                    iffalse_and_iftrue_1,
                    r"\iffalse a\else b\iftrue c\else d\fi e\fi f",
                    "bcef"
                ),
                (
                    iffalse_and_iftrue_2,
                    r"\iftrue a\iffalse b\else c\fi d\else e\fi f",
                    "acdf"
                ),
                (
                    inner_fi_does_not_end_outer_conditional,
                    r"\iftrue\iftrue X\fi\else Y\fi",
                    "X"
                ),
                (
                    branch_can_define_and_call_a_macro,
                    r"\iftrue\def\zz{q}\zz\fi",
                    "q"
                ),
                (ifnum_less_than_true, r"\ifnum 4<5a\else b\fi c", "ac"),
                (ifnum_less_than_false, r"\ifnum 5<4a\else b\fi c", "bc"),
                (ifnum_equal_true, r"\ifnum 4=4a\else b\fi c", "ac"),
                (ifnum_equal_false, r"\ifnum 5=4a\else b\fi c", "bc"),
                (ifnum_greater_than_true, r"\ifnum 5>4a\else b\fi c", "ac"),
                (ifnum_greater_than_false, r"\ifnum 4>5a\else b\fi c", "bc"),
                (ifnum_negative_operand, r"\ifnum -5<4a\else b\fi c", "ac"),
                (
                    ifnum_operand_from_macro,
                    r"\def\n{4}\ifnum \n<5a\else b\fi c",
                    "ac"
                ),
                (ifodd_odd, r"\ifodd 3a\else b\fi c", "ac"),
                (ifodd_even, r"\ifodd 4a\else b\fi c", "bc"),
                (ifcase_zero_no_ors, r"\ifcase 0 a\else b\fi c", "ac"),
                (ifcase_zero_one_or, r"\ifcase 0 a\or b\else c\fi d", "ad"),
                (ifcase_one, r"\ifcase 1 a\or b\else c\fi d", "bd"),
                (
                    ifcase_one_more_cases,
                    r"\ifcase 1 a\or b\or c\else d\fi e",
                    "be"
                ),
                (ifcase_else_no_ors, r"\ifcase 1 a\else b\fi c", "bc"),
                (ifcase_else_one_or, r"\ifcase 2 a\or b\else c\fi d", "cd"),
                (ifcase_no_matching_case, r"\ifcase 3 a\or b\or c\fi d", "d"),
                (
                    ifcase_nested,
                    r"\ifcase 1 a\or b\ifcase 1 c\or d\or e\else f\fi g\or h\fi i",
                    "bdgi"
                ),
            ),
            failure_tests(
                (iftrue_end_of_input, r"\iftrue a\else b"),
                (iffalse_end_of_input, r"\iffalse a"),
                (else_not_expected, r"a\else"),
                (fi_not_expected, r"a\fi"),
                (or_not_expected, r"a\or"),
                (ifnum_missing_relation, r"\ifnum 4a\fi"),
                (ifnum_missing_operand, r"\ifnum <4a\fi"),
            ),
        ];
    }

    mod expansion {
        use super::*;

        static PREFIX: &str = r"\let\xa\expandafter\def\mk#1#2{\def#1##1\notes##2\end{##1\notes##2#2\end}}\mk\a a\mk\b b\mk\c c\mk\d d\def\notes#1\end{#1}";
        static POSTFIX: &str = r"\notes\end";

        macro_rules! expandafter_test {
            ( $( ( $name: ident, $lhs: expr, $rhs: expr ) ),* $(,)? ) => {
                test_suite![
                    expansion_equality_tests(
                        $(
                            ( $name, format!("{}{}{}", PREFIX, $lhs, POSTFIX), $rhs ),
                        )*
                    ),
                ];
            };
        }

        expandafter_test![
            (texbook_p374_3, r"\xa\a\b", "ba"),
            (texbook_p374_4, r"\xa\xa\xa\a\xa\b\c", "cba"),
            (
                texbook_p374_5,
                r"\xa\xa\xa\xa\xa\xa\xa\a\xa\xa\xa\b\xa\c\d",
                "dcba"
            ),
            (permutation_abcd, r"\a\b\c\d", "abcd"),
            (permutation_abdc, r"\a\b\xa\c\d", "abdc"),
            (permutation_acbd, r"\a\xa\b\c\d", "acbd"),
            (permutation_bacd, r"\xa\a\b\c\d", "bacd"),
            (permutation_cabd, r"\xa\a\xa\b\c\d", "cabd"),
        ];

        test_suite![
            expansion_equality_tests(
                (expandafter_to_empty, r"\def\B{}\expandafter\A\B", r"\A"),
                (expandafter_to_tokens, r"\def\B{XY}\expandafter\A\B", r"\A XY"),
                (expandafter_over_nonexpandable, r"\expandafter ab", "ab"),
                (csname_simple, r"\def\foo{X}\csname foo\endcsname", "X"),
                (csname_primitive, r"\csname relax\endcsname", r"\relax"),
                (csname_undefined_is_replayed, r"\csname nope\endcsname", r"\nope"),
                (
                    csname_expands_its_contents,
                    r"\def\x{oo}\def\foo{Y}\csname f\x\endcsname",
                    "Y"
                ),
                (
                    csname_tokens_past_endcsname_are_replayed_after,
                    r"\def\x{oo\endcsname Z}\def\foo{Y}\csname f\x",
                    "YZ"
                ),
            ),
            failure_tests(
                (expandafter_missing_first_token, r"\expandafter"),
                (expandafter_missing_second_token, r"\expandafter\a"),
                (csname_unterminated, r"\csname abc"),
                (csname_with_unexpandable_command, r"\csname a\def\endcsname"),
                (endcsname_with_no_csname, r"\endcsname"),
            ),
        ];
    }

    mod casing {
        use super::*;
        use std::collections::HashMap;

        test_suite![
            expansion_equality_tests(
                (uppercase_ascii, r"\uppercase{ab}", "AB"),
                (lowercase_ascii, r"\lowercase{AB}", "ab"),
                (unmapped_characters_unchanged, r"\uppercase{a1b}", "A1B"),
                (nested_groups_are_mapped, r"\uppercase{a{b}c}", "A{B}C"),
                (
                    lowercase_then_reprocessed,
                    r"\def\A{x}\lowercase{\A B}",
                    "xb"
                ),
            ),
            failure_tests(
                (uppercase_requires_group, r"\uppercase a"),
                (uppercase_unterminated, r"\uppercase{ab"),
            ),
        ];

        test_suite![
            state(State),
            options(TestOption::CustomStateInitializationDyn(Box::new(
                |state: &mut State| {
                    let upper: HashMap<char, char> =
                        [('a', 'A'), ('b', 'B'), ('c', 'C')].into_iter().collect();
                    state.set_case_mappings(upper, HashMap::new());
                }
            ))),
            expansion_equality_tests(
                // The mapping applies to the captured literal tokens
                // only; the embedded call expands afterwards and its
                // output is unaffected.
                (
                    mapping_applies_before_expansion,
                    r"\def\foo{d}\uppercase{ab\foo c}",
                    "ABdC"
                ),
                (partial_mapping_table, r"\uppercase{adc}", "AdC"),
            ),
        ];
    }

    mod shorthand {
        use super::*;

        test_suite![
            expansion_equality_tests(
                (chardef_basic, r"\chardef\x=49 \x", "1"),
                (chardef_without_equals, r"\chardef\x 49 \x", "1"),
                (
                    chardef_is_scoped,
                    r"\chardef\x=49 {\chardef\x=50 \x}\x",
                    "21"
                ),
                (global_chardef, r"{\global\chardef\x=49 }\x", "1"),
            ),
            failure_tests(
                (chardef_missing_code, r"\chardef\x="),
                (chardef_invalid_code, r"\chardef\x=-1 "),
                (chardef_target_not_a_control_sequence, r"\chardef x=49 "),
            ),
        ];
    }

    mod engine {
        use super::*;
        use vellum::router::RouteKind;

        fn run_to_end(expander: &mut Expander<State>) -> Vec<Instruction> {
            script::run(expander, true).unwrap()
        }

        #[test]
        fn hbox_packages_material() {
            let mut expander = Expander::new(State::default());
            expander.push_source(r"\hbox{ab}");
            let output = run_to_end(&mut expander);
            assert_eq!(output.len(), 1);
            match output[0].value() {
                Value::Material(BoxKind::Horizontal, list) => {
                    let chars: Vec<char> = list.iter().filter_map(|i| i.char()).collect();
                    assert_eq!(chars, vec!['a', 'b']);
                }
                other => panic!("expected box material, got {other:?}"),
            }
        }

        #[test]
        fn box_group_opens_and_closes_a_scope() {
            let mut expander = Expander::new(State::default());
            expander.push_source(r"\def\A{x}\vbox{\def\A{y}\A}\A");
            let output = run_to_end(&mut expander);
            assert_eq!(output.len(), 2);
            match output[0].value() {
                Value::Material(BoxKind::Vertical, list) => {
                    assert_eq!(list[0].char(), Some('y'));
                }
                other => panic!("expected box material, got {other:?}"),
            }
            assert_eq!(output[1].char(), Some('x'));
        }

        #[test]
        fn vtop_kind_is_preserved() {
            let mut expander = Expander::new(State::default());
            expander.push_source(r"\vtop{}");
            let output = run_to_end(&mut expander);
            assert!(matches!(
                output[0].value(),
                Value::Material(BoxKind::VerticalTop, _)
            ));
        }

        #[test]
        fn box_requires_a_group() {
            let mut expander = Expander::new(State::default());
            expander.push_source(r"\hbox a");
            assert!(script::run(&mut expander, true).is_err());
            // The mode stack is balanced on the failure path.
            assert_eq!(expander.mode_depth(), 0);
        }

        #[test]
        fn end_group_without_group_fails() {
            let mut expander = Expander::new(State::default());
            expander.push_source(r"a}");
            let err = script::run(&mut expander, true).unwrap_err();
            assert!(matches!(*err, vellum::error::Error::NoScopeToEnd { .. }));
        }

        #[test]
        fn string_of_control_sequence() {
            let mut expander = Expander::new(State::default());
            expander.push_source(r"\string\foo");
            let output = run_to_end(&mut expander);
            let values: Vec<&Value> = output.iter().map(|i| i.value()).collect();
            assert_eq!(
                values,
                vec![
                    &Value::Other('\\'),
                    &Value::Other('f'),
                    &Value::Other('o'),
                    &Value::Other('o'),
                ]
            );
        }

        #[test]
        fn string_with_escape_char_disabled() {
            let mut state = State::default();
            state.set_escape_char(None);
            let mut expander = Expander::new(state);
            expander.push_source(r"\string\ab");
            let output = run_to_end(&mut expander);
            let chars: Vec<char> = output.iter().filter_map(|i| i.char()).collect();
            assert_eq!(chars, vec!['a', 'b']);
        }

        #[test]
        fn string_of_character_token() {
            let mut expander = Expander::new(State::default());
            expander.push_source(r"\string a");
            let output = run_to_end(&mut expander);
            assert_eq!(output.len(), 1);
            assert_eq!(output[0].value(), &Value::Other('a'));
        }

        #[test]
        fn font_definition_allocates_identifiers() {
            let mut expander = Expander::new(State::default());
            expander.push_source(r"\font\first\font\second\first\second");
            let output = run_to_end(&mut expander);
            assert_eq!(output.len(), 2);
            assert_eq!(output[0].value(), &Value::Font(vellum::router::FontId(0)));
            assert_eq!(output[1].value(), &Value::Font(vellum::router::FontId(1)));
        }

        #[test]
        fn awaited_balanced_text_is_captured_as_one_unit() {
            let mut expander = Expander::new(State::default());
            expander.push_source("{ab}c");
            expander.await_balanced_text();
            let token = expander.next().unwrap().unwrap();
            match token.value() {
                Value::BalancedText(text) => {
                    let chars: Vec<char> = text.iter().filter_map(|i| i.char()).collect();
                    assert_eq!(chars, vec!['a', 'b']);
                }
                other => panic!("expected balanced text, got {other:?}"),
            }
            assert_eq!(expander.mode_depth(), 0);
            let next = expander.next().unwrap().unwrap();
            assert_eq!(next.char(), Some('c'));
        }

        #[test]
        fn awaited_token_variable_is_emitted_as_is() {
            let mut expander = Expander::new(State::default());
            expander.push_source(r"\everypar");
            expander.await_balanced_text_or_token_variable();
            let token = expander.next().unwrap().unwrap();
            assert!(matches!(token.value(), Value::TokenListParameter(_)));
            assert_eq!(expander.mode_depth(), 0);
        }

        #[test]
        fn token_variable_rejected_when_only_balanced_text_expected() {
            let mut expander = Expander::new(State::default());
            expander.push_source(r"\everypar");
            expander.await_balanced_text();
            let err = expander.next().unwrap_err();
            assert!(matches!(
                *err,
                vellum::error::Error::MalformedToken { .. }
            ));
        }

        #[test]
        fn inserted_source_is_drained_first() {
            let mut expander = Expander::new(State::default());
            expander.push_source("ad");
            let first = expander.next().unwrap().unwrap();
            assert_eq!(first.char(), Some('a'));
            expander.push_source("bc");
            let chars: Vec<char> = std::iter::from_fn(|| expander.next().unwrap())
                .filter_map(|i| i.char())
                .collect();
            assert_eq!(chars, vec!['b', 'c', 'd']);
        }

        #[test]
        fn failed_resolution_restores_the_token_and_can_be_retried() {
            let mut expander = Expander::new(State::default());
            expander.push_source(r"\later x");
            let err = expander.next().unwrap_err();
            assert!(err.is_recoverable());
            // Define the control sequence, then retry the same input.
            let later = expander.intern("later");
            expander
                .router_mut()
                .define_alias(
                    later,
                    vellum::router::AliasTarget::Character('z', vellum::token::CatCode::Letter),
                    false,
                )
                .unwrap();
            let token = expander.next().unwrap().unwrap();
            assert_eq!(token.char(), Some('z'));
            let handle = expander.router().resolve(later).unwrap();
            assert_eq!(handle.kind, RouteKind::CharacterAlias);
        }

        #[test]
        fn mode_stack_balanced_after_macro_argument_failure() {
            let mut expander = Expander::new(State::default());
            expander.push_source(r"\def\A#1{#1}\A");
            assert!(script::run(&mut expander, true).is_err());
            assert_eq!(expander.mode_depth(), 0);
        }
    }
}
