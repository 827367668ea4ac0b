//! Splits shovel source text into [`Token`]s.
//!
//! Words are separated by whitespace. `"..."` is a string literal (with `\n`, `\t`, `\\`
//! and `\"` escapes), `'...'` is a path literal, and `//` starts a comment that runs to
//! the end of the line. A procedure header `proc name <inputs> in <outputs> do` is folded
//! into a single [`Token::Proc`].
use std::{iter::Peekable, str::CharIndices};

use smallvec::SmallVec;
use thiserror::Error;

use crate::{ops::Op, token::{ProcSignature, Token}, value::ValueType};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParserError {
    #[error("Unknown word `{word}` at line {line}.")]
    UnknownWord { word: String, line: usize },
    #[error("Unterminated string literal starting at line {line}.")]
    UnterminatedString { line: usize },
    #[error("Unterminated path literal starting at line {line}.")]
    UnterminatedPath { line: usize },
    #[error("Unknown escape sequence `\\{escape}` at line {line}.")]
    UnknownEscape { escape: char, line: usize },
    #[error("Invalid procedure name `{name}` at line {line}.")]
    InvalidProcName { name: String, line: usize },
    #[error("Unknown type `{name}` in the header of procedure `{proc}`.")]
    UnknownType { name: String, proc: String },
    #[error("Procedure header starting at line {line} is not terminated by `do`.")]
    UnterminatedProcHeader { line: usize },
    #[error("Procedure header of `{proc}` at line {line} has no `in` between inputs and outputs.")]
    MissingIn { proc: String, line: usize },
}

/// A word or literal as it appears in the source, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Lexeme {
    Word(String),
    Text(String),
    Path(String),
}

struct Scanner<'a> {
    chars: Peekable<CharIndices<'a>>,
    line: usize,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Scanner { chars: source.char_indices().peekable(), line: 1 }
    }

    fn bump(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.bump() {
            if c == '\n' {
                break;
            }
        }
    }

    fn next_lexeme(&mut self) -> Result<Option<(Lexeme, usize)>, ParserError> {
        loop {
            match self.chars.peek().map(|&(_, c)| c) {
                None => return Ok(None),
                Some(c) if c.is_whitespace() => {
                    self.bump();
                    continue;
                }
                _ => {}
            }
            let line = self.line;
            let lexeme = match self.chars.peek().map(|&(_, c)| c) {
                Some('"') => {
                    self.bump();
                    Lexeme::Text(self.quoted(line)?)
                }
                Some('\'') => {
                    self.bump();
                    let mut path = String::new();
                    loop {
                        match self.bump() {
                            None => return Err(ParserError::UnterminatedPath { line }),
                            Some('\'') => break,
                            Some(c) => path.push(c),
                        }
                    }
                    Lexeme::Path(path)
                }
                _ => {
                    let mut word = String::new();
                    while let Some(&(_, c)) = self.chars.peek() {
                        if c.is_whitespace() {
                            break;
                        }
                        word.push(c);
                        self.bump();
                    }
                    if word.starts_with("//") {
                        self.skip_line();
                        continue;
                    }
                    Lexeme::Word(word)
                }
            };
            return Ok(Some((lexeme, line)));
        }
    }

    fn quoted(&mut self, line: usize) -> Result<String, ParserError> {
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(ParserError::UnterminatedString { line }),
                Some('"') => return Ok(text),
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    Some(other) => return Err(ParserError::UnknownEscape { escape: other, line: self.line }),
                    None => return Err(ParserError::UnterminatedString { line }),
                },
                Some(c) => text.push(c),
            }
        }
    }
}

/// Checks `^[a-z](_?[a-z0-9]+)*$`.
pub fn is_valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    match bytes.first() {
        Some(b) if b.is_ascii_lowercase() => {}
        _ => return false,
    }
    let mut previous_underscore = false;
    for &b in &bytes[1..] {
        if b == b'_' {
            if previous_underscore {
                return false;
            }
            previous_underscore = true;
        } else if b.is_ascii_lowercase() || b.is_ascii_digit() {
            previous_underscore = false;
        } else {
            return false;
        }
    }
    !previous_underscore
}

pub fn parse_word(word: &str, line: usize) -> Result<Token, ParserError> {
    if let Some(op) = Op::by_word(word) {
        return Ok(Token::Op(op));
    }
    if let Ok(n) = word.parse::<i64>() {
        return Ok(Token::Number(n));
    }
    if is_valid_name(word) {
        return Ok(Token::Identifier(word.to_string()));
    }
    Err(ParserError::UnknownWord { word: word.to_string(), line })
}

fn parse_proc_header(scanner: &mut Scanner, line: usize) -> Result<Token, ParserError> {
    let name = match scanner.next_lexeme()? {
        Some((Lexeme::Word(name), _)) if is_valid_name(&name) && Op::by_word(&name).is_none() => name,
        Some((Lexeme::Word(name), _)) | Some((Lexeme::Text(name), _)) | Some((Lexeme::Path(name), _)) => {
            return Err(ParserError::InvalidProcName { name, line });
        }
        None => return Err(ParserError::UnterminatedProcHeader { line }),
    };

    let mut inputs = SmallVec::new();
    let mut outputs = SmallVec::new();
    let mut seen_in = false;
    loop {
        let word = match scanner.next_lexeme()? {
            Some((Lexeme::Word(word), _)) => word,
            Some(_) | None => return Err(ParserError::UnterminatedProcHeader { line }),
        };
        match word.as_str() {
            "do" if !seen_in => return Err(ParserError::MissingIn { proc: name, line }),
            "do" => break,
            "in" if !seen_in => seen_in = true,
            other => {
                let t = ValueType::from_name(other)
                    .ok_or_else(|| ParserError::UnknownType { name: other.to_string(), proc: name.clone() })?;
                if seen_in {
                    outputs.push(t);
                } else {
                    inputs.push(t);
                }
            }
        }
    }

    Ok(Token::Proc(ProcSignature { name, inputs, outputs }))
}

pub fn parse_program(source: &str) -> Result<Vec<Token>, ParserError> {
    let mut scanner = Scanner::new(source);
    let mut tokens = Vec::new();
    while let Some((lexeme, line)) = scanner.next_lexeme()? {
        let token = match lexeme {
            Lexeme::Text(s) => Token::Text(s),
            Lexeme::Path(p) => Token::Path(p),
            Lexeme::Word(w) if w == "proc" => parse_proc_header(&mut scanner, line)?,
            Lexeme::Word(w) => parse_word(&w, line)?,
        };
        tokens.push(token);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use smallvec::smallvec;

    use super::*;
    use crate::token::TokenKind;

    #[test]
    fn test_words_and_literals() {
        let tokens = parse_program("1 -2 \"a b\" 'dir/x' + dup foo_bar").unwrap();
        assert_eq!(tokens, vec![
            Token::Number(1),
            Token::Number(-2),
            Token::Text("a b".to_string()),
            Token::Path("dir/x".to_string()),
            Token::Op(Op::Add),
            Token::Op(Op::Dup),
            Token::Identifier("foo_bar".to_string()),
        ]);
    }

    #[test]
    fn test_comments_and_escapes() {
        let tokens = parse_program("// nothing here\n\"a\\n\\\"b\\\"\" . // trailing\n2dup").unwrap();
        assert_eq!(tokens, vec![Token::Text("a\n\"b\"".to_string()), Token::Op(Op::Print), Token::Op(Op::Dup2)]);
    }

    #[test]
    fn test_long_comment_runs() {
        let source = "// note\n".repeat(20_000) + "1 . // done\n" + &"//\n".repeat(20_000);
        assert_eq!(parse_program(&source).unwrap(), vec![Token::Number(1), Token::Op(Op::Print)]);
        assert_eq!(parse_program(&"// only comments\n".repeat(50_000)).unwrap(), vec![]);
    }

    #[test]
    fn test_proc_header() {
        let tokens = parse_program("proc double int in int do dup + end").unwrap();
        assert_eq!(tokens[0], Token::Proc(ProcSignature {
            name: "double".to_string(),
            inputs: smallvec![ValueType::Int],
            outputs: smallvec![ValueType::Int],
        }));
        assert_eq!(tokens[1..].to_vec(), vec![Token::Op(Op::Dup), Token::Op(Op::Add), Token::Op(Op::End)]);

        let tokens = parse_program("proc noop in do end").unwrap();
        assert!(matches!(&tokens[0], Token::Proc(sig) if sig.inputs.is_empty() && sig.outputs.is_empty()));
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse_program("\"abc"), Err(ParserError::UnterminatedString { line: 1 }));
        assert_eq!(parse_program("\n'abc"), Err(ParserError::UnterminatedPath { line: 2 }));
        assert_eq!(parse_program("Foo"), Err(ParserError::UnknownWord { word: "Foo".to_string(), line: 1 }));
        assert!(matches!(parse_program("proc Bad in do end"), Err(ParserError::InvalidProcName { .. })));
        assert!(matches!(parse_program("proc f float in do end"), Err(ParserError::UnknownType { .. })));
        assert!(matches!(parse_program("proc f int in int"), Err(ParserError::UnterminatedProcHeader { .. })));
        assert_eq!(
            parse_program("\nproc f int do end"),
            Err(ParserError::MissingIn { proc: "f".to_string(), line: 2 })
        );
    }

    #[test]
    fn test_token_kinds() {
        let tokens = parse_program("7 \"s\" 'p' dup + 2dup 2swap <= foo proc f in do end").unwrap();
        let kinds: Vec<TokenKind> = tokens.iter().map(Token::kind).collect();
        assert_eq!(kinds, vec![
            TokenKind::Number,
            TokenKind::String,
            TokenKind::Path,
            TokenKind::Keyword,
            TokenKind::Symbol,
            TokenKind::Keyword,
            TokenKind::Keyword,
            TokenKind::Symbol,
            TokenKind::Identifier,
            TokenKind::Keyword,
            TokenKind::Keyword,
        ]);
        assert_eq!(Op::Dup2.kind(), TokenKind::Keyword);
        assert_eq!(Op::Swap2.kind(), TokenKind::Keyword);
        assert_eq!(Op::Print.kind(), TokenKind::Symbol);
        assert_eq!(Op::NotEqual.kind(), TokenKind::Symbol);
    }

    #[test]
    fn test_names() {
        assert!(is_valid_name("a"));
        assert!(is_valid_name("get_value2"));
        assert!(!is_valid_name("_a"));
        assert!(!is_valid_name("a__b"));
        assert!(!is_valid_name("a_"));
        assert!(!is_valid_name("2a"));
        assert!(!is_valid_name("aB"));
    }
}
