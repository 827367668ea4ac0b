use std::fmt;

use crate::token::TokenKind;

/// Every built-in word of shovel.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Op {
    Print,

    ToString,
    ToPath,
    Absolute,
    Relative,
    Concat,

    Store,
    Load,

    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Increment,
    Decrement,

    Dup,
    Drop,
    Swap,
    Over,
    Dup2,
    Swap2,

    If,
    Unless,
    Else,
    While,
    Until,
    Do,
    End,
    Ret,
    DropRet,
    KeepRet,
    Exit,

    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,

    BitNot,
    BitAnd,
    BitOr,
    BitXor,

    And,
    Or,
    Not,

    Download,
    ReadFile,
    Move,
    Copy,
    Exist,
    Touch,
    Mkdir,
    Rm,
    Unzip,
    Lsf,
    Lsd,
    Getf,
    Getd,
}

/// Groups of ops that share an execution handler.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Category {
    Print,
    Conversion,
    Memory,
    Arithmetic,
    Stack,
    Branch,
    Logical,
    Bitwise,
    Boolean,
    Tool,
}

impl Op {
    pub const ALL: [Op; 58] = [
        Op::Print,
        Op::ToString, Op::ToPath, Op::Absolute, Op::Relative, Op::Concat,
        Op::Store, Op::Load,
        Op::Add, Op::Subtract, Op::Multiply, Op::Divide, Op::Modulo, Op::Increment, Op::Decrement,
        Op::Dup, Op::Drop, Op::Swap, Op::Over, Op::Dup2, Op::Swap2,
        Op::If, Op::Unless, Op::Else, Op::While, Op::Until, Op::Do, Op::End, Op::Ret, Op::DropRet, Op::KeepRet, Op::Exit,
        Op::Equal, Op::NotEqual, Op::Less, Op::Greater, Op::LessEqual, Op::GreaterEqual,
        Op::BitNot, Op::BitAnd, Op::BitOr, Op::BitXor,
        Op::And, Op::Or, Op::Not,
        Op::Download, Op::ReadFile, Op::Move, Op::Copy, Op::Exist, Op::Touch, Op::Mkdir, Op::Rm,
        Op::Unzip, Op::Lsf, Op::Lsd, Op::Getf, Op::Getd,
    ];

    /// The word used for this op in source code.
    pub fn word(&self) -> &'static str {
        match self {
            Op::Print => ".",
            Op::ToString => "tostring",
            Op::ToPath => "token",
            Op::Absolute => "absolute",
            Op::Relative => "relative",
            Op::Concat => "concat",
            Op::Store => "store",
            Op::Load => "load",
            Op::Add => "+",
            Op::Subtract => "-",
            Op::Multiply => "*",
            Op::Divide => "/",
            Op::Modulo => "%",
            Op::Increment => "++",
            Op::Decrement => "--",
            Op::Dup => "dup",
            Op::Drop => "drop",
            Op::Swap => "swap",
            Op::Over => "over",
            Op::Dup2 => "2dup",
            Op::Swap2 => "2swap",
            Op::If => "if",
            Op::Unless => "unless",
            Op::Else => "else",
            Op::While => "while",
            Op::Until => "until",
            Op::Do => "do",
            Op::End => "end",
            Op::Ret => "ret",
            Op::DropRet => "dret",
            Op::KeepRet => "iret",
            Op::Exit => "exit",
            Op::Equal => "=",
            Op::NotEqual => "!=",
            Op::Less => "<",
            Op::Greater => ">",
            Op::LessEqual => "<=",
            Op::GreaterEqual => ">=",
            Op::BitNot => "~",
            Op::BitAnd => "&",
            Op::BitOr => "|",
            Op::BitXor => "^",
            Op::And => "&&",
            Op::Or => "||",
            Op::Not => "!",
            Op::Download => "download",
            Op::ReadFile => "readfile",
            Op::Move => "move",
            Op::Copy => "copy",
            Op::Exist => "exist",
            Op::Touch => "touch",
            Op::Mkdir => "mkdir",
            Op::Rm => "rm",
            Op::Unzip => "unzip",
            Op::Lsf => "lsf",
            Op::Lsd => "lsd",
            Op::Getf => "getf",
            Op::Getd => "getd",
        }
    }

    pub fn by_word(word: &str) -> Option<Op> {
        Op::ALL.iter().copied().find(|op| op.word() == word)
    }

    pub fn category(&self) -> Category {
        match self {
            Op::Print => Category::Print,
            Op::ToString | Op::ToPath | Op::Absolute | Op::Relative | Op::Concat => Category::Conversion,
            Op::Store | Op::Load => Category::Memory,
            Op::Add | Op::Subtract | Op::Multiply | Op::Divide | Op::Modulo | Op::Increment | Op::Decrement => Category::Arithmetic,
            Op::Dup | Op::Drop | Op::Swap | Op::Over | Op::Dup2 | Op::Swap2 => Category::Stack,
            Op::If | Op::Unless | Op::Else | Op::While | Op::Until | Op::Do | Op::End
            | Op::Ret | Op::DropRet | Op::KeepRet | Op::Exit => Category::Branch,
            Op::Equal | Op::NotEqual | Op::Less | Op::Greater | Op::LessEqual | Op::GreaterEqual => Category::Logical,
            Op::BitNot | Op::BitAnd | Op::BitOr | Op::BitXor => Category::Bitwise,
            Op::And | Op::Or | Op::Not => Category::Boolean,
            Op::Download | Op::ReadFile | Op::Move | Op::Copy | Op::Exist | Op::Touch | Op::Mkdir
            | Op::Rm | Op::Unzip | Op::Lsf | Op::Lsd | Op::Getf | Op::Getd => Category::Tool,
        }
    }

    /// Whether the op is spelled with letters (a keyword) or punctuation (a symbol).
    pub fn kind(&self) -> TokenKind {
        // `2dup` and `2swap` start with a digit but are still keywords.
        if self.word().chars().any(|c| c.is_ascii_alphabetic()) {
            TokenKind::Keyword
        } else {
            TokenKind::Symbol
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.word())
    }
}
