use pretty_assertions::assert_eq;

use super::*;
use crate::parser::parse_program;

fn link_str(source: &str) -> Result<Program, LinkError> {
    link(parse_program(source).unwrap())
}

fn nexts(source: &str) -> Vec<Option<usize>> {
    link_str(source).unwrap().instructions.iter().map(|i| i.next).collect()
}

#[test]
fn test_empty() {
    assert!(link_str("").unwrap().is_empty());
}

#[test]
fn test_if_end() {
    // 0  1  2 3
    // 1 if 2 end
    assert_eq!(nexts("1 if 2 end"), vec![None, Some(4), None, None]);
}

#[test]
fn test_if_else_end() {
    // 0  1  2  3   4  5
    // 1 if 2 else 3 end
    let program = link_str("1 if 2 else 3 end").unwrap();
    assert_eq!(program.instructions.iter().map(|i| i.next).collect::<Vec<_>>(), vec![None, Some(4), None, Some(6), None, None]);
    assert_eq!(program.instructions[5].mode, Mode::End(EndKind::Block));
}

#[test]
fn test_while_loop() {
    // 0     1   2  3 4  5
    // while dup do 1 - end
    let program = link_str("while dup do 1 - end").unwrap();
    let i = &program.instructions;
    assert_eq!(i[0].next, Some(3));
    assert_eq!(i[2].mode, Mode::Do(LoopKind::While, 0));
    assert_eq!(i[2].next, Some(6));
    assert_eq!(i[5].mode, Mode::End(EndKind::Loop(0)));
    assert_eq!(i[5].next, Some(0));
}

#[test]
fn test_until_loop() {
    let program = link_str("until dup do 1 + end").unwrap();
    assert_eq!(program.instructions[2].mode, Mode::Do(LoopKind::Until, 0));
}

#[test]
fn test_nested_blocks() {
    // 0  1  2  3  4   5   6   7
    // 1 if 0 if 2 end end  .
    assert_eq!(nexts("1 if 0 if 2 end end ."), vec![None, Some(7), None, Some(6), None, None, None, None]);
}

#[test]
fn test_proc() {
    let program = link_str("proc double int in int do dup + end 21 double").unwrap();
    let proc = program.procedure("double").unwrap();
    assert_eq!(proc.start, 1);
    assert_eq!(proc.end, 3);
    assert_eq!(program.instructions[0].next, Some(4));
    assert_eq!(program.instructions[3].mode, Mode::End(EndKind::Proc));
}

#[test]
fn test_every_opener_resolved() {
    let program = link_str("proc f int in int do dup 0 > if 1 - else 1 + end end while 1 do 0 unless 1 end end").unwrap();
    for instruction in &program.instructions {
        if instruction.is_opener() {
            assert!(instruction.next.is_some(), "{instruction:?}");
        }
    }
}

#[test]
fn test_errors() {
    assert_eq!(link_str("end"), Err(LinkError::UnmatchedCloser { closer: Op::End, index: 0 }));
    assert_eq!(link_str("1 else"), Err(LinkError::UnmatchedCloser { closer: Op::Else, index: 1 }));
    assert_eq!(link_str("1 if 1 if"), Err(LinkError::Unclosed { opener: "if".to_string(), index: 3 }));
    assert!(matches!(link_str("while 1 else end"), Err(LinkError::MismatchedOpener { closer: Op::Else, index: 2, opener_index: 0, .. })));
    assert!(matches!(link_str("1 if 1 do end"), Err(LinkError::MismatchedOpener { closer: Op::Do, index: 3, .. })));
    assert!(matches!(link_str("while 1 end"), Err(LinkError::MismatchedOpener { closer: Op::End, index: 2, .. })));
    assert!(matches!(link_str("proc f in do proc g in do end end"), Err(LinkError::NestedProc { index: 1, .. })));
    assert!(matches!(link_str("proc f in do end proc f in do end"), Err(LinkError::DuplicateProc { index: 2, .. })));
}
