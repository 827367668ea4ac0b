use pretty_assertions::assert_eq;

use shovel::{
    checker::TypeError,
    linker::{LinkError, Mode},
    load,
    tools::HostTools,
    value::{Value, ValueType},
    vm::{run, RunOptions, RunResult},
    LoadError,
};

fn run_source(source: &str) -> (RunResult<shovel::vm::NoStats>, String) {
    let program = load(source).unwrap_or_else(|e| panic!("`{source}` did not load: {e}"));
    let mut output = Vec::new();
    let result = run(&program, &mut HostTools::default(), &mut output, RunOptions::new(100_000, 10_000_000))
        .unwrap_or_else(|e| panic!("`{source}` failed: {e}"));
    (result, String::from_utf8(output).unwrap())
}

fn printed(source: &str) -> String {
    run_source(source).1
}

#[test]
fn branch_selection() {
    assert_eq!(printed("1 if 1 else 2 end ."), "1\n");
    assert_eq!(printed("0 if 1 else 2 end ."), "2\n");
}

#[test]
fn divergent_branches_are_rejected() {
    assert!(matches!(load("1 if 1 else end"), Err(LoadError::Type(TypeError::ShapeMismatch { .. }))));
    assert!(matches!(load("1 if 1 else \"a\" end"), Err(LoadError::Type(TypeError::ShapeMismatch { .. }))));
    assert!(matches!(load("0 while dup do 1 + 1 end"), Err(LoadError::Type(TypeError::ShapeMismatch { .. }))));
}

#[test]
fn division_by_zero_yields_zero() {
    assert_eq!(run_source("5 0 /").0.stack, vec![Value::Int(0)]);
    assert_eq!(run_source("5 0 %").0.stack, vec![Value::Int(0)]);
}

#[test]
fn call_and_return_are_symmetric() {
    let (result, _) = run_source("proc double int in int do dup + end 21 double");
    assert_eq!(result.stack, vec![Value::Int(42)]);
    assert!(result.call_stack.is_empty());
}

#[test]
fn text_addition_puts_the_top_first() {
    assert_eq!(run_source("\"a\" \"b\" +").0.stack, vec![Value::Text("ba".to_string())]);
}

#[test]
fn every_opener_is_linked() {
    let source = "
        proc classify int in string do
            dup 0 < if drop \"negative\" ret end
            0 = if \"zero\" else \"positive\" end
        end
        0 until dup 3 >= do
            dup classify . 1 +
        end
        drop
    ";
    let program = load(source).unwrap();
    for instruction in &program.instructions {
        if instruction.is_opener() {
            assert!(instruction.next.is_some(), "{instruction:?}");
        }
        if let Mode::Do(_, start) = instruction.mode {
            assert!(program.instructions[start].is_opener());
        }
    }
    assert_eq!(printed(source), "zero\npositive\npositive\n");
}

#[test]
fn load_errors_come_from_every_stage() {
    assert!(matches!(load("\"open"), Err(LoadError::Parse(_))));
    assert_eq!(load("1 if 2"), Err(LoadError::Link(LinkError::Unclosed { opener: "if".to_string(), index: 1 })));
    assert_eq!(
        load("1 \"a\" -"),
        Err(LoadError::Type(TypeError::Mismatch {
            op: shovel::ops::Op::Subtract,
            index: 2,
            expected: "int int",
            found: vec![ValueType::Int, ValueType::String],
        }))
    );
    assert!(load("1 \"a\" -").unwrap_err().to_string().starts_with("Type error"));
}

#[test]
fn well_typed_programs_run_cleanly() {
    // A few programs touching every category; none of them may fault at run time.
    let programs = [
        "1 2 + 3 * 4 - 5 / 6 % ++ -- ~ 7 & 8 | 9 ^ .",
        "\"a\" \"b\" < \"c\" \"c\" = && 0 || ! .",
        "1 \"a\" 'p' 2 2swap drop drop 2dup drop drop over drop swap drop drop",
        "3 \"n\" store \"n\" load \"n\" load * .",
        "'dir' \"/file\" concat tostring token relative tostring \"x\" + .",
        "proc pick int int int in int do 1 2 iret end 1 2 3 pick .",
        "proc first int int in int do 1 dret end 1 2 first .",
        "10 while dup do 1 - end drop",
        "5 unless 0 else 1 end . exit \"unreachable\" .",
    ];
    for source in programs {
        run_source(source);
    }
}

#[test]
fn file_chores() {
    let dir = tempfile::tempdir().unwrap();
    let d = dir.path().display();
    std::fs::write(dir.path().join("notes.txt"), "remember").unwrap();

    let source = format!(
        "
        proc backup path in int do
            dup \".bak\" concat copy drop
        end

        '{d}/backups' mkdir drop
        '{d}/notes.txt' backup .
        '{d}/notes.txt.bak' readfile drop .
        '{d}' lsf .
        0 '{d}' getf .
        0 '{d}' getd .
        "
    );
    assert_eq!(printed(&source), "1\nremember\n2\nnotes.txt\nbackups\n");
}
