//! End-to-end scenarios, source through execution, driven entirely
//! through the library's public API (no process spawning).

use std::io::Cursor;

use pvm::error::{CompileError, Error, RuntimeError};
use pvm::vm::VmOptions;

fn run(source: &str) -> Result<String, Error> {
    let stdin = Cursor::new(Vec::new());
    let mut stdout = Vec::new();
    pvm::compile_and_run(source, false, stdin, &mut stdout, VmOptions::default())?;
    Ok(String::from_utf8(stdout).unwrap())
}

#[test]
fn scenario_1_assignment_and_print_round_trips_through_the_container() {
    let program = pvm::compile_source("x = 10; y = 20; print(x + y);", false).unwrap();
    let bytes = pvm::serialize(&program);
    let loaded = pvm::load(&bytes).unwrap();
    assert_eq!(loaded.code, program.code);
    assert_eq!(loaded.constants.len(), program.constants.len());
    assert_eq!(loaded.symbols.len(), program.symbols.len());

    let stdin = Cursor::new(Vec::new());
    let mut stdout = Vec::new();
    pvm::execute(&loaded, stdin, &mut stdout, VmOptions::default()).unwrap();
    assert_eq!(String::from_utf8(stdout).unwrap(), "30\n");
}

#[test]
fn scenario_2_while_loop_counts_up() {
    assert_eq!(
        run("i = 0; while (i < 3) { print(i); i = i + 1; }").unwrap(),
        "0\n1\n2\n"
    );
}

#[test]
fn scenario_3_if_else_uses_distinct_string_constants() {
    let program =
        pvm::compile_source(r#"x = 5; if (x > 0) { print("pos"); } else { print("neg"); }"#, false)
            .unwrap();
    let strings: Vec<String> = program
        .constants
        .iter()
        .filter_map(|c| match c {
            pvm::pool::Constant::String(s) => Some(s.clone()),
            _ => None,
        })
        .collect();
    assert!(strings.contains(&"pos".to_string()));
    assert!(strings.contains(&"neg".to_string()));

    assert_eq!(
        run(r#"x = 5; if (x > 0) { print("pos"); } else { print("neg"); }"#).unwrap(),
        "pos\n"
    );
}

#[test]
fn scenario_4_division_by_zero_is_a_runtime_arithmetic_error_exit_3() {
    match run("print(1 / 0);") {
        Err(Error::Runtime(RuntimeError::ArithmeticError { .. })) => {}
        other => panic!("expected a runtime ArithmeticError, got {other:?}"),
    }
    assert_eq!(
        Error::Runtime(RuntimeError::ArithmeticError {
            pc: 0,
            message: String::new()
        })
        .exit_code(),
        3
    );
}

#[test]
fn scenario_5_undefined_variable_is_a_compile_time_name_error_exit_1() {
    match run("print(a);") {
        Err(Error::Compile(CompileError::NameError { name, .. })) => assert_eq!(name, "a"),
        other => panic!("expected a compile-time NameError, got {other:?}"),
    }
    assert_eq!(
        Error::Compile(CompileError::NameError {
            name: "a".into(),
            line: 0,
            column: 0
        })
        .exit_code(),
        1
    );
}

#[test]
fn scenario_6_string_plus_int_is_a_compile_time_type_error_when_provable() {
    match run(r#"print("a" + 1);"#) {
        Err(Error::Compile(CompileError::TypeError { .. })) => {}
        other => panic!("expected a compile-time TypeError, got {other:?}"),
    }
}

#[test]
fn scenario_6_string_plus_int_via_variables_is_a_runtime_type_error() {
    match run(r#"a = "a"; b = 1; print(a + b);"#) {
        Err(Error::Runtime(RuntimeError::TypeError { .. })) => {}
        other => panic!("expected a runtime TypeError, got {other:?}"),
    }
}

#[test]
fn determinism_for_input_free_programs() {
    let first = run("x = 1; while (x < 5) { print(x); x = x + 1; }").unwrap();
    let second = run("x = 1; while (x < 5) { print(x); x = x + 1; }").unwrap();
    assert_eq!(first, second);
}

#[test]
fn input_builtin_reads_a_line_and_echoes_it() {
    let stdin = Cursor::new(b"hello\n".to_vec());
    let mut stdout = Vec::new();
    pvm::compile_and_run(
        "name = input(); print(name);",
        false,
        stdin,
        &mut stdout,
        VmOptions::default(),
    )
    .unwrap();
    assert_eq!(String::from_utf8(stdout).unwrap(), "hello\n");
}
