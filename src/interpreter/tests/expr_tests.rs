//! Tests for the expression evaluator

use super::helpers::eval_str;
use crate::interpreter::env::Env;
use crate::interpreter::errors::RuntimeError;
use crate::interpreter::value::{Scalar, REDACTED};

fn env_with(pairs: &[(&str, &str)]) -> Env {
    let mut env = Env::new();
    for (name, value) in pairs {
        env.bind(name, *value);
    }
    env
}

#[test]
fn numeric_addition_over_stored_text() {
    // Round trip: "3" read from the environment, added to "4", is numeric.
    let env = env_with(&[("a", "3"), ("b", "4")]);
    let value = eval_str("a + b", &env).unwrap();
    assert_eq!(value.render(), "7");
}

#[test]
fn addition_falls_back_to_concatenation() {
    let env = env_with(&[("a", "3"), ("s", "a")]);
    assert_eq!(eval_str("a + s", &env).unwrap().render(), "3a");
    assert_eq!(
        eval_str("\"count: \" + a", &env).unwrap().render(),
        "count: 3"
    );
}

#[test]
fn precedence_and_parentheses() {
    let env = Env::new();
    assert_eq!(eval_str("1 + 2 * 3", &env).unwrap().render(), "7");
    assert_eq!(eval_str("(1 + 2) * 3", &env).unwrap().render(), "9");
    assert_eq!(eval_str("10 / 4", &env).unwrap().render(), "2.5");
    assert_eq!(eval_str("7 % 3", &env).unwrap().render(), "1");
}

#[test]
fn unary_operators() {
    let env = env_with(&[("n", "5")]);
    assert_eq!(eval_str("-n", &env).unwrap().render(), "-5");
    assert_eq!(eval_str("not \"true\"", &env).unwrap().render(), "false");
    assert_eq!(eval_str("!\"\"", &env).unwrap().render(), "true");
}

#[test]
fn subtraction_requires_numbers() {
    let env = env_with(&[("s", "abc")]);
    assert!(matches!(
        eval_str("s - 1", &env),
        Err(RuntimeError::Eval { .. })
    ));
}

#[test]
fn division_and_modulo_by_zero() {
    let env = Env::new();
    assert_eq!(eval_str("1 / 0", &env), Err(RuntimeError::DivideByZero));
    assert_eq!(eval_str("1 % 0", &env), Err(RuntimeError::ModuloByZero));
}

#[test]
fn equality_tries_numbers_first() {
    let env = env_with(&[("a", "03"), ("s", "abc")]);
    assert_eq!(eval_str("a == 3", &env).unwrap().render(), "true");
    assert_eq!(eval_str("a != 3", &env).unwrap().render(), "false");
    assert_eq!(eval_str("s == \"abc\"", &env).unwrap().render(), "true");
}

#[test]
fn comparison_numeric_and_lexicographic() {
    let env = env_with(&[("n", "9"), ("m", "10")]);
    // numeric: 9 < 10
    assert_eq!(eval_str("n < m", &env).unwrap().render(), "true");
    // lexicographic fallback: "b" > "ab"
    assert_eq!(eval_str("\"b\" > \"ab\"", &env).unwrap().render(), "true");
}

#[test]
fn boolean_operators_use_truthiness() {
    let env = env_with(&[("yes", "true"), ("no", "false"), ("n", "0")]);
    assert_eq!(eval_str("yes and no", &env).unwrap().render(), "false");
    assert_eq!(eval_str("yes or no", &env).unwrap().render(), "true");
    assert_eq!(eval_str("n or \"x\"", &env).unwrap().render(), "true");
}

#[test]
fn unknown_glyph_is_an_error() {
    let env = Env::new();
    assert!(matches!(
        eval_str("missing", &env),
        Err(RuntimeError::UnknownGlyph { name, .. }) if name == "missing"
    ));
}

#[test]
fn veiled_reads_taint_the_result() {
    let mut env = Env::new();
    env.bind_veiled("secret", "doom");
    let value = eval_str("secret", &env).unwrap();
    assert!(value.tainted);
    assert_eq!(value.render_redacted(), REDACTED);

    // Taint propagates through operators.
    let derived = eval_str("\"prefix \" + secret", &env).unwrap();
    assert!(derived.tainted);
    assert_eq!(derived.render_redacted(), REDACTED);
}

#[test]
fn now_is_a_recent_timestamp() {
    let value = eval_str("Now", &Env::new()).unwrap();
    match value.scalar {
        Scalar::Int(ts) => assert!(ts > 1_577_836_800, "timestamp too old: {ts}"),
        other => panic!("expected integer timestamp, got {other:?}"),
    }
}

#[test]
fn empty_expression_is_empty_text() {
    assert_eq!(eval_str("", &Env::new()).unwrap().render(), "");
}
