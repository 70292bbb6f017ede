//! Test helpers
//!
//! The engine consumes token streams from an out-of-scope front end, so the
//! tests carry a miniature lexer of their own - cases read as source snippets
//! instead of hand-built token vectors.

use std::sync::Arc;

use crate::config::Config;
use crate::interpreter::env::Env;
use crate::interpreter::errors::RuntimeResult;
use crate::interpreter::statements::{compile_body, Flow};
use crate::interpreter::value::Value;
use crate::interpreter::Interp;
use crate::types::{Program, Token, TokenKind, Unit};

fn keyword(word: &str) -> Option<TokenKind> {
    use TokenKind::*;
    Some(match word.to_ascii_lowercase().as_str() {
        "rite" => Rite,
        "endrite" => EndRite,
        "let" => Let,
        "be" => Be,
        "fleeting" => Fleeting,
        "veiled" => Veiled,
        "utter" => Utter,
        "inscribe" => Inscribe,
        "answer" => Answer,
        "with" => With,
        "using" => Using,
        "if" => If,
        "then" => Then,
        "else" => Else,
        "end" => End,
        "while" => While,
        "endwhile" => EndWhile,
        "raise" => Raise,
        "curse" => Curse,
        "ward" => Ward,
        "mend" => Mend,
        "endward" => EndWard,
        "invoke" => Invoke,
        "litany" => Litany,
        "endlitany" => EndLitany,
        "chorus" => Chorus,
        "endchorus" => EndChorus,
        "sanctum" => Sanctum,
        "endsanctum" => EndSanctum,
        "tether" => Tether,
        "untether" => Untether,
        "shrine" => Shrine,
        "endshrine" => EndShrine,
        "at" => At,
        "route" => Route,
        "get" => Get,
        "post" => Post,
        "put" => Put,
        "delete" => Delete,
        "to" => To,
        "rest" => Rest,
        "for" => For,
        "seconds" => Seconds,
        "forge" => Forge,
        "endforge" => EndForge,
        "by" => By,
        "lower" => Lower,
        "now" => Now,
        "and" => And,
        "or" => Or,
        "not" => Not,
        _ => return None,
    })
}

/// Tokenize a source snippet the way the front end would.
pub(crate) fn lex(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    let mut line = 1u32;
    let mut column = 1u32;

    macro_rules! push {
        ($kind:expr, $lexeme:expr) => {
            tokens.push(Token::new($kind, $lexeme, line, column))
        };
    }

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                push!(TokenKind::Newline, "\n");
                i += 1;
                line += 1;
                column = 1;
                continue;
            }
            ' ' | '\t' | '\r' => {
                i += 1;
                column += 1;
                continue;
            }
            '"' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != '"' {
                    end += 1;
                }
                let lexeme: String = chars[start..end].iter().collect();
                push!(TokenKind::Str, lexeme);
                column += (end + 1 - i) as u32;
                i = end + 1;
                continue;
            }
            '0'..='9' => {
                let start = i;
                let mut end = i;
                while end < chars.len() && chars[end].is_ascii_digit() {
                    end += 1;
                }
                if end + 1 < chars.len() && chars[end] == '.' && chars[end + 1].is_ascii_digit() {
                    end += 1;
                    while end < chars.len() && chars[end].is_ascii_digit() {
                        end += 1;
                    }
                }
                let lexeme: String = chars[start..end].iter().collect();
                push!(TokenKind::Num, lexeme);
                column += (end - start) as u32;
                i = end;
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                let mut end = i;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
                {
                    end += 1;
                }
                let lexeme: String = chars[start..end].iter().collect();
                match keyword(&lexeme) {
                    Some(kind) => push!(kind, lexeme),
                    None => push!(TokenKind::Ident, lexeme),
                }
                column += (end - start) as u32;
                i = end;
                continue;
            }
            _ => {}
        }

        let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
        let (kind, width) = match two.as_str() {
            "==" => (TokenKind::EqEq, 2),
            "!=" => (TokenKind::NotEq, 2),
            "<=" => (TokenKind::LtEq, 2),
            ">=" => (TokenKind::GtEq, 2),
            _ => match c {
                '.' => (TokenKind::Dot, 1),
                ':' => (TokenKind::Colon, 1),
                ',' => (TokenKind::Comma, 1),
                '(' => (TokenKind::LParen, 1),
                ')' => (TokenKind::RParen, 1),
                '+' => (TokenKind::Plus, 1),
                '-' => (TokenKind::Minus, 1),
                '*' => (TokenKind::Star, 1),
                '/' => (TokenKind::Slash, 1),
                '%' => (TokenKind::Percent, 1),
                '!' => (TokenKind::Bang, 1),
                '<' => (TokenKind::Lt, 1),
                '>' => (TokenKind::Gt, 1),
                _ => (TokenKind::Illegal, 1),
            },
        };
        let lexeme: String = chars[i..i + width].iter().collect();
        push!(kind, lexeme);
        column += width as u32;
        i += width;
    }

    tokens
}

pub(crate) fn unit(name: &str, body: &str) -> Unit {
    Unit {
        name: name.to_string(),
        params: Vec::new(),
        ephemeral: false,
        sealed: None,
        body: lex(body),
    }
}

pub(crate) fn unit_with_params(name: &str, params: &[&str], body: &str) -> Unit {
    Unit {
        params: params.iter().map(|p| p.to_string()).collect(),
        ..unit(name, body)
    }
}

pub(crate) fn sealed_unit(name: &str, phrase: &str, body: &str) -> Unit {
    Unit {
        sealed: Some(phrase.to_string()),
        ..unit(name, body)
    }
}

pub(crate) fn program(units: Vec<Unit>) -> Program {
    Program { units }
}

pub(crate) fn interp(units: Vec<Unit>) -> Interp {
    Interp::with_config(program(units), Config::default())
}

/// Run the MAIN unit of a program built from `units`. Returns the
/// interpreter (for shrine/ledger inspection), the result, and MAIN's
/// environment.
pub(crate) fn run_main(units: Vec<Unit>) -> (Interp, RuntimeResult<Option<Value>>, Env) {
    let mut interp = interp(units);
    let mut env = Env::new();
    let prog = Arc::clone(&interp.program);
    let main = prog.unit("MAIN").expect("program has a MAIN unit");
    let result = interp.run_unit(main, &mut env);
    (interp, result, env)
}

/// Compile and execute a bare statement body against an empty environment.
pub(crate) fn run_body(body: &str) -> (Interp, RuntimeResult<Flow>, Env) {
    run_body_with(body, Config::default())
}

pub(crate) fn run_body_with(body: &str, config: Config) -> (Interp, RuntimeResult<Flow>, Env) {
    let mut interp = Interp::with_config(Program::default(), config);
    let mut env = Env::new();
    let result =
        compile_body(&lex(body)).and_then(|stmts| interp.exec_frame(&stmts, &mut env));
    (interp, result, env)
}

/// Evaluate an expression snippet against an environment.
pub(crate) fn eval_str(expr: &str, env: &Env) -> RuntimeResult<Value> {
    let mut interp = Interp::with_config(Program::default(), Config::default());
    crate::interpreter::expressions::eval_value(&mut interp, &lex(expr), env)
}
