//! End-to-end tests: compile source text and run it on the interpreter.

use rill_vm::{Trap, Vm};
use std::sync::Arc;

fn try_run(source: &str, input: &str) -> Result<(i64, String), Trap> {
    let program = rill_parse::compile(Arc::from(source), None).expect("program should compile");
    let mut vm = Vm::new(input.as_bytes(), Vec::new());
    let exit = vm.run(&program)?;
    let output = String::from_utf8(vm.into_output()).expect("output should be utf-8");
    Ok((exit, output))
}

fn run(source: &str, input: &str) -> (i64, String) {
    try_run(source, input).expect("program should not trap")
}

const IS_PRIME: &str = "
fn is_prime(n) {
    if n < 2 {
        return 0;
    }
    if n == 2 {
        return 1;
    }
    let i = 2;
    while i < n {
        if n % i == 0 {
            return 0;
        }
        i = i + 1;
    }
    return 1;
}
let x = 0;
in x;
out is_prime(x);
";

fn is_prime(n: &str) -> String {
    run(IS_PRIME, n).1
}

#[test]
fn numbers_below_two_are_not_prime() {
    assert_eq!(is_prime("-5"), "0\n");
    assert_eq!(is_prime("0"), "0\n");
    assert_eq!(is_prime("1"), "0\n");
}

#[test]
fn two_is_prime() {
    assert_eq!(is_prime("2"), "1\n");
}

#[test]
fn even_numbers_above_two_are_not_prime() {
    assert_eq!(is_prime("4"), "0\n");
    assert_eq!(is_prime("100"), "0\n");
}

#[test]
fn primes_are_reported_prime() {
    assert_eq!(is_prime("7"), "1\n");
    assert_eq!(is_prime("97"), "1\n");
}

#[test]
fn composites_are_reported_composite() {
    assert_eq!(is_prime("9"), "0\n");
    assert_eq!(is_prime("15"), "0\n");
}

#[test]
fn is_prime_is_pure() {
    let source = "
        fn is_prime(n) {
            if n < 2 { return 0; }
            if n == 2 { return 1; }
            let i = 2;
            while i < n {
                if n % i == 0 { return 0; }
                i = i + 1;
            }
            return 1;
        }
        let x = 0;
        in x;
        out is_prime(x);
        out is_prime(x);
    ";
    assert_eq!(run(source, "97").1, "1\n1\n");
}

// The actual benchmark: ~3e8 trial divisions, so not part of the default
// test run.
#[test]
#[ignore = "runs the full O(n) benchmark input"]
fn prime_benchmark_prints_one() {
    let source = std::fs::read_to_string(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../benchmarks/prime.rill"
    ))
    .expect("benchmark program should exist");
    let (exit, output) = run(&source, "");
    assert_eq!(output, "1\n");
    assert_eq!(exit, 0);
}

#[test]
fn recursive_fibonacci() {
    let source = "
        fn fib(n) {
            if n < 2 { return n; }
            return fib(n - 1) + fib(n - 2);
        }
        out fib(20);
    ";
    assert_eq!(run(source, "").1, "6765\n");
}

#[test]
fn ackermann() {
    let source = "
        fn ack(m, n) {
            if m == 0 { return n + 1; }
            if n == 0 { return ack(m - 1, 1); }
            return ack(m - 1, ack(m, n - 1));
        }
        out ack(2, 3);
    ";
    assert_eq!(run(source, "").1, "9\n");
}

#[test]
fn calls_work_before_the_definition() {
    let source = "
        out double(21);
        fn double(n) { return n * 2; }
    ";
    assert_eq!(run(source, "").1, "42\n");
}

#[test]
fn functions_fall_through_to_return_zero() {
    let source = "
        fn noisy() { out 7; }
        out noisy();
    ";
    assert_eq!(run(source, "").1, "7\n0\n");
}

#[test]
fn block_scoped_shadowing() {
    let source = "
        let x = 1;
        {
            let x = 2;
            out x;
        }
        out x;
    ";
    assert_eq!(run(source, "").1, "2\n1\n");
}

#[test]
fn while_loop_accumulates() {
    let source = "
        let total = 0;
        let i = 1;
        while i <= 10 {
            total = total + i;
            i = i + 1;
        }
        out total;
    ";
    assert_eq!(run(source, "").1, "55\n");
}

#[test]
fn else_if_chain_selects_the_right_arm() {
    let source = "
        let x = 0;
        in x;
        if x < 0 { out 0 - 1; } else if x == 0 { out 0; } else { out 1; }
    ";
    assert_eq!(run(source, "-3").1, "-1\n");
    assert_eq!(run(source, "0").1, "0\n");
    assert_eq!(run(source, "12").1, "1\n");
}

#[test]
fn unary_operators() {
    let source = "
        let x = 5;
        out -x;
        out !x;
        out !0;
    ";
    assert_eq!(run(source, "").1, "-5\n0\n1\n");
}

#[test]
fn wide_constants_survive_the_round_trip() {
    let source = "
        let n = 314606869;
        out n;
        out n % 1000;
    ";
    assert_eq!(run(source, "").1, "314606869\n869\n");
}

#[test]
fn programs_exit_zero_by_default() {
    assert_eq!(run("out 1;", "").0, 0);
}

#[test]
fn division_by_zero_traps() {
    let source = "
        let x = 0;
        in x;
        out 10 / x;
    ";
    assert!(matches!(try_run(source, "0"), Err(Trap::DivisionByZero)));
    assert_eq!(run(source, "5").1, "2\n");
}

#[test]
fn remainder_matches_division() {
    let source = "
        let n = 0;
        let d = 0;
        in n;
        in d;
        out (n / d) * d + n % d;
    ";
    assert_eq!(run(source, "17 5").1, "17\n");
    assert_eq!(run(source, "-17 5").1, "-17\n");
}

#[test]
fn missing_input_traps() {
    let source = "
        let x = 0;
        in x;
        out x;
    ";
    assert!(matches!(try_run(source, ""), Err(Trap::Input)));
    assert!(matches!(try_run(source, "oops"), Err(Trap::Input)));
}
