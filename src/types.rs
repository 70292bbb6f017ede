use serde::{Deserialize, Serialize};
use std::fmt;

/// Lexical unit kinds produced by the front end.
///
/// The engine never tokenizes source itself; it receives token bodies inside
/// a [`Program`] and interprets them. `Illegal` and `Eof` are the front end's
/// sentinels and are skipped or treated as stream end respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    // Meta / control
    Illegal,
    Eof,
    Newline,
    Dot,

    // Identifiers & literals
    Ident,
    Str,
    Num,

    // Unit declarations (consumed by the front end; EndRite doubles as a
    // statement stop token inside malformed bodies)
    Rite,
    EndRite,

    // Binding / output / return
    Let,
    Be,
    Fleeting,
    Veiled,
    Utter,
    Inscribe,
    Answer,
    With,
    Using,

    // Control flow
    If,
    Then,
    Else,
    End,
    While,
    EndWhile,

    // Failure handling
    Raise,
    Curse,
    Ward,
    Mend,
    EndWard,

    // Invocation & orchestration
    Invoke,
    Litany,
    EndLitany,
    Chorus,
    EndChorus,

    // Ownership scope
    Sanctum,
    EndSanctum,
    Tether,
    Untether,

    // Service dispatch
    Shrine,
    EndShrine,
    At,
    Route,
    Get,
    Post,
    Put,
    Delete,
    To,

    // Pauses, kernel state updates, time
    Rest,
    For,
    Seconds,
    Forge,
    EndForge,
    By,
    Lower,
    Now,

    // Punctuation / operators
    Colon,
    Comma,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Not,
    Bang,
}

/// Source position carried on every token for error reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The unified lexical unit handed over by the front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    #[serde(default)]
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, line: u32, column: u32) -> Self {
        Token {
            kind,
            lexeme: lexeme.into(),
            span: Span { line, column },
        }
    }

    /// Case-insensitive lexeme comparison, used for glue words that the
    /// front end may emit as plain identifiers.
    pub fn word_is(&self, word: &str) -> bool {
        self.lexeme.eq_ignore_ascii_case(word)
    }
}

/// A named, parameterized, invocable block of statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub name: String,

    /// Declared parameter names, in order. Invocation binds the first one.
    #[serde(default)]
    pub params: Vec<String>,

    /// Emit frame-entry/exit trace events when this unit runs.
    #[serde(default)]
    pub ephemeral: bool,

    /// Invocation passphrase. `Some` means the unit is sealed and every
    /// invocation must supply a matching phrase.
    #[serde(default)]
    pub sealed: Option<String>,

    /// Raw token body, terminated statements separated by newlines/dots.
    pub body: Vec<Token>,
}

/// A parsed program: the set of named units built by the front end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub units: Vec<Unit>,
}

/// Name of the unit executed by [`crate::run_program`].
pub const ENTRY_UNIT: &str = "MAIN";

impl Program {
    /// Look up a unit by name.
    pub fn unit(&self, name: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.name == name)
    }

    /// Deserialize a program from the JSON interchange form used by
    /// out-of-process front ends.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Serialize this program to the JSON interchange form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
