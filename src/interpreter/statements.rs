//! Statement compilation and execution
//!
//! A unit body arrives as a flat token sequence. Before interpretation each
//! body is pre-scanned once into a small statement tree - nested block
//! boundaries (If/End, While/EndWhile, Ward/EndWard, ...) are matched during
//! the scan, expressions stay as token slices for the evaluator. Unrecognized
//! leading tokens are skipped so newer front ends keep working against older
//! engines.
//!
//! Execution walks the tree. Each frame owns a fleeting-name set; every name
//! bound `Fleeting` in the frame is scrubbed from the environment on every
//! exit path - normal fall-through, Answer, or error.

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use super::env::Env;
use super::errors::{RuntimeError, RuntimeResult};
use super::expressions::{eval_bool, eval_value};
use super::value::{format_number, Value};
use super::{orchestrate, sanctum, Interp};
use crate::service;
use crate::types::{Span, Token, TokenKind};

/* ===================== Statement tree ===================== */

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Stmt {
    Bind {
        name: String,
        fleeting: bool,
        veiled: bool,
        expr: Vec<Token>,
    },
    Utter {
        expr: Vec<Token>,
    },
    Inscribe {
        expr: Vec<Token>,
    },
    Answer {
        expr: Vec<Token>,
    },
    If {
        cond: Vec<Token>,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
    },
    While {
        cond: Vec<Token>,
        body: Vec<Stmt>,
    },
    RaiseCurse {
        name: String,
    },
    Ward {
        name: String,
        body: Vec<Stmt>,
        mend: Option<Vec<Stmt>>,
    },
    Invoke(InvokeCall),
    Litany {
        calls: Vec<InvokeCall>,
    },
    Chorus {
        calls: Vec<InvokeCall>,
    },
    Sanctum {
        body: Vec<Stmt>,
    },
    Tether {
        name: String,
    },
    Untether {
        name: String,
    },
    Shrine(ShrineDecl),
    Rest {
        duration: Vec<Token>,
    },
    Forge {
        ops: Vec<ForgeOp>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InvokeCall {
    pub target: String,
    pub arg: Option<InvokeArg>,
    pub passphrase: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum InvokeArg {
    /// A string literal argument.
    Literal(String),
    /// An explicit glyph reference; carries the veil across the boundary.
    Glyph(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ShrineDecl {
    pub addr: String,
    pub passphrase: Option<String>,
    pub routes: Vec<RouteDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RouteDecl {
    pub method: String,
    pub path: String,
    pub handler: RouteHandler,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RouteHandler {
    /// Route to a named unit; its answered value becomes the response body.
    Rite(String),
    /// Route to an inline expression evaluated per request.
    Inline(Vec<Token>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ForgeOp {
    Raise { name: String, amount: Vec<Token> },
    Lower { name: String, amount: Vec<Token> },
}

/// Result of executing a frame: fall-through, or an early Answer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Flow {
    Normal,
    Answered(Value),
}

/* ===================== Compilation (one-pass pre-scan) ===================== */

/// Pre-scan a token body into a statement tree.
pub(crate) fn compile_body(tokens: &[Token]) -> RuntimeResult<Vec<Stmt>> {
    let mut stmts = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        match tokens[i].kind {
            TokenKind::Newline => i += 1,
            TokenKind::Eof => break,
            TokenKind::Let => stmts.push(compile_let(tokens, &mut i)?),
            TokenKind::Utter => stmts.push(compile_render(tokens, &mut i, false)?),
            TokenKind::Inscribe => stmts.push(compile_render(tokens, &mut i, true)?),
            TokenKind::Answer => stmts.push(compile_answer(tokens, &mut i)),
            TokenKind::If => stmts.push(compile_if(tokens, &mut i)?),
            TokenKind::While => stmts.push(compile_while(tokens, &mut i)?),
            TokenKind::Raise => stmts.push(compile_raise(tokens, &mut i)?),
            TokenKind::Ward => stmts.push(compile_ward(tokens, &mut i)?),
            TokenKind::Invoke => {
                let call = parse_invoke_call(tokens, &mut i)?;
                skip_to_terminator(tokens, &mut i);
                stmts.push(Stmt::Invoke(call));
            }
            TokenKind::Litany => stmts.push(compile_invoke_block(
                tokens,
                &mut i,
                TokenKind::EndLitany,
                "Litany",
            )?),
            TokenKind::Chorus => stmts.push(compile_invoke_block(
                tokens,
                &mut i,
                TokenKind::EndChorus,
                "Chorus",
            )?),
            TokenKind::Sanctum => stmts.push(compile_sanctum(tokens, &mut i)?),
            TokenKind::Tether => stmts.push(compile_tether(tokens, &mut i)?),
            TokenKind::Untether => stmts.push(compile_untether(tokens, &mut i)?),
            TokenKind::Shrine => stmts.push(compile_shrine(tokens, &mut i)?),
            TokenKind::Rest => stmts.push(compile_rest(tokens, &mut i)?),
            TokenKind::Forge => stmts.push(compile_forge(tokens, &mut i)?),
            // Forward compatibility: skip tokens we do not recognize here.
            _ => i += 1,
        }
    }

    Ok(stmts)
}

fn span_at(tokens: &[Token], i: usize) -> Span {
    tokens
        .get(i.min(tokens.len().saturating_sub(1)))
        .map(|t| t.span)
        .unwrap_or_default()
}

fn is_stop(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Dot | TokenKind::Newline | TokenKind::EndRite | TokenKind::Eof
    )
}

/// Collect expression tokens up to a terminator or any extra stop kind.
fn take_expr(tokens: &[Token], i: &mut usize, extra_stops: &[TokenKind]) -> Vec<Token> {
    let start = *i;
    while *i < tokens.len() {
        let kind = tokens[*i].kind;
        if is_stop(kind) || extra_stops.contains(&kind) {
            break;
        }
        *i += 1;
    }
    tokens[start..*i].to_vec()
}

fn consume_dot(tokens: &[Token], i: &mut usize) {
    if *i < tokens.len() && tokens[*i].kind == TokenKind::Dot {
        *i += 1;
    }
}

fn skip_newlines(tokens: &[Token], i: &mut usize) {
    while *i < tokens.len() && tokens[*i].kind == TokenKind::Newline {
        *i += 1;
    }
}

fn skip_to_terminator(tokens: &[Token], i: &mut usize) {
    while *i < tokens.len() && !is_stop(tokens[*i].kind) {
        *i += 1;
    }
    consume_dot(tokens, i);
}

fn expect_ident(tokens: &[Token], i: &mut usize, what: &str) -> RuntimeResult<String> {
    match tokens.get(*i) {
        Some(tok) if tok.kind == TokenKind::Ident => {
            *i += 1;
            Ok(tok.lexeme.clone())
        }
        _ => Err(RuntimeError::syntax(
            format!("expected {what}"),
            span_at(tokens, *i),
        )),
    }
}

fn expect_str(tokens: &[Token], i: &mut usize, what: &str) -> RuntimeResult<String> {
    match tokens.get(*i) {
        Some(tok) if tok.kind == TokenKind::Str => {
            *i += 1;
            Ok(tok.lexeme.clone())
        }
        _ => Err(RuntimeError::syntax(
            format!("expected {what}"),
            span_at(tokens, *i),
        )),
    }
}

fn expect_kind(tokens: &[Token], i: &mut usize, kind: TokenKind, what: &str) -> RuntimeResult<()> {
    match tokens.get(*i) {
        Some(tok) if tok.kind == kind => {
            *i += 1;
            Ok(())
        }
        _ => Err(RuntimeError::syntax(
            format!("expected {what}"),
            span_at(tokens, *i),
        )),
    }
}

/// `Let [Fleeting] [Veiled] name Be <expr>.`
fn compile_let(tokens: &[Token], i: &mut usize) -> RuntimeResult<Stmt> {
    *i += 1; // Let

    let mut fleeting = false;
    let mut veiled = false;
    loop {
        match tokens.get(*i).map(|t| t.kind) {
            Some(TokenKind::Fleeting) => {
                fleeting = true;
                *i += 1;
            }
            Some(TokenKind::Veiled) => {
                veiled = true;
                *i += 1;
            }
            _ => break,
        }
    }

    let name = expect_ident(tokens, i, "glyph name after Let")?;

    let be_ok = matches!(tokens.get(*i), Some(tok)
        if tok.kind == TokenKind::Be || (tok.kind == TokenKind::Ident && tok.word_is("BE")));
    if !be_ok {
        return Err(RuntimeError::syntax(
            format!("expected Be after glyph {name}"),
            span_at(tokens, *i),
        ));
    }
    *i += 1;

    let expr = take_expr(tokens, i, &[]);
    consume_dot(tokens, i);

    Ok(Stmt::Bind {
        name,
        fleeting,
        veiled,
        expr,
    })
}

/// `Utter: <expr>.` and `Inscribe: <expr>.`
fn compile_render(tokens: &[Token], i: &mut usize, log: bool) -> RuntimeResult<Stmt> {
    let keyword = if log { "Inscribe" } else { "Utter" };
    *i += 1;
    expect_kind(tokens, i, TokenKind::Colon, &format!("Colon after {keyword}"))?;
    let expr = take_expr(tokens, i, &[]);
    consume_dot(tokens, i);
    Ok(if log {
        Stmt::Inscribe { expr }
    } else {
        Stmt::Utter { expr }
    })
}

/// `Answer [With] <expr>.`
fn compile_answer(tokens: &[Token], i: &mut usize) -> Stmt {
    *i += 1;
    if matches!(tokens.get(*i), Some(tok) if tok.kind == TokenKind::With) {
        *i += 1;
    }
    let expr = take_expr(tokens, i, &[]);
    consume_dot(tokens, i);
    Stmt::Answer { expr }
}

/// `If <cond> [Then]: ... [Else: ...] End.`
fn compile_if(tokens: &[Token], i: &mut usize) -> RuntimeResult<Stmt> {
    let start = span_at(tokens, *i);
    *i += 1;
    skip_newlines(tokens, i);

    let cond_start = *i;
    while *i < tokens.len()
        && !matches!(
            tokens[*i].kind,
            TokenKind::Then | TokenKind::Colon | TokenKind::Newline
        )
    {
        *i += 1;
    }
    let cond = tokens[cond_start..*i].to_vec();
    if cond.is_empty() {
        return Err(RuntimeError::syntax("expected condition after If", start));
    }

    if matches!(tokens.get(*i), Some(tok) if tok.kind == TokenKind::Then) {
        *i += 1;
    }
    expect_kind(tokens, i, TokenKind::Colon, "Colon after If condition")?;

    // Find Else (first at this depth) and the matching End.
    let mut depth = 1usize;
    let mut else_pos = None;
    let mut end_pos = None;
    let mut j = *i;
    while j < tokens.len() {
        match tokens[j].kind {
            TokenKind::If => depth += 1,
            TokenKind::Else if depth == 1 && else_pos.is_none() => else_pos = Some(j),
            TokenKind::End => {
                depth -= 1;
                if depth == 0 {
                    end_pos = Some(j);
                    break;
                }
            }
            _ => {}
        }
        j += 1;
    }
    let end_pos =
        end_pos.ok_or_else(|| RuntimeError::syntax("unmatched End for If", start))?;

    let then_end = else_pos.unwrap_or(end_pos);
    let then_body = compile_body(&tokens[*i..then_end])?;

    let else_body = match else_pos {
        Some(pos) => {
            let mut k = pos + 1;
            if k < end_pos && tokens[k].kind == TokenKind::Colon {
                k += 1;
            }
            Some(compile_body(&tokens[k..end_pos])?)
        }
        None => None,
    };

    *i = end_pos + 1;
    consume_dot(tokens, i);

    Ok(Stmt::If {
        cond,
        then_body,
        else_body,
    })
}

/// `While <cond>: ... EndWhile.`
fn compile_while(tokens: &[Token], i: &mut usize) -> RuntimeResult<Stmt> {
    let start = span_at(tokens, *i);
    *i += 1;
    skip_newlines(tokens, i);

    let cond = take_expr(tokens, i, &[TokenKind::Colon]);
    expect_kind(tokens, i, TokenKind::Colon, "Colon after While condition")?;

    let mut depth = 1usize;
    let mut end_pos = None;
    let mut j = *i;
    while j < tokens.len() {
        match tokens[j].kind {
            TokenKind::While => depth += 1,
            TokenKind::EndWhile => {
                depth -= 1;
                if depth == 0 {
                    end_pos = Some(j);
                    break;
                }
            }
            _ => {}
        }
        j += 1;
    }
    let end_pos =
        end_pos.ok_or_else(|| RuntimeError::syntax("unmatched EndWhile for While", start))?;

    let body = compile_body(&tokens[*i..end_pos])?;
    *i = end_pos + 1;
    consume_dot(tokens, i);

    Ok(Stmt::While { cond, body })
}

/// `Raise Curse "name".`
fn compile_raise(tokens: &[Token], i: &mut usize) -> RuntimeResult<Stmt> {
    *i += 1;
    expect_kind(tokens, i, TokenKind::Curse, "Curse after Raise")?;
    let name = expect_str(tokens, i, "curse name string after Curse")?;
    skip_to_terminator(tokens, i);
    Ok(Stmt::RaiseCurse { name })
}

/// `Ward "name": ... [Mend: ...] EndWard.`
///
/// Only a `Ward` token opens a region, so `Raise Curse` occurrences inside the
/// body never disturb the boundary match.
fn compile_ward(tokens: &[Token], i: &mut usize) -> RuntimeResult<Stmt> {
    let start = span_at(tokens, *i);
    *i += 1;
    let name = expect_str(tokens, i, "curse name string after Ward")?;
    if matches!(tokens.get(*i), Some(tok) if tok.kind == TokenKind::Colon) {
        *i += 1;
    }

    let mut depth = 1usize;
    let mut mend_pos = None;
    let mut end_pos = None;
    let mut j = *i;
    while j < tokens.len() {
        match tokens[j].kind {
            TokenKind::Ward => depth += 1,
            TokenKind::Mend if depth == 1 && mend_pos.is_none() => mend_pos = Some(j),
            TokenKind::EndWard => {
                depth -= 1;
                if depth == 0 {
                    end_pos = Some(j);
                    break;
                }
            }
            _ => {}
        }
        j += 1;
    }
    let end_pos =
        end_pos.ok_or_else(|| RuntimeError::syntax("unmatched EndWard for Ward", start))?;

    let body_end = mend_pos.unwrap_or(end_pos);
    let body = compile_body(&tokens[*i..body_end])?;

    let mend = match mend_pos {
        Some(pos) => {
            let mut k = pos + 1;
            if k < end_pos && tokens[k].kind == TokenKind::Colon {
                k += 1;
            }
            Some(compile_body(&tokens[k..end_pos])?)
        }
        None => None,
    };

    *i = end_pos + 1;
    consume_dot(tokens, i);

    Ok(Stmt::Ward { name, body, mend })
}

/// `Invoke Rite NAME [With <arg>] [Using "phrase"]`
///
/// Shared between the statement compiler and the expression evaluator.
pub(crate) fn parse_invoke_call(tokens: &[Token], i: &mut usize) -> RuntimeResult<InvokeCall> {
    let span = span_at(tokens, *i);
    *i += 1; // Invoke
    expect_kind(tokens, i, TokenKind::Rite, "Rite after Invoke")?;
    let target = expect_ident(tokens, i, "rite name after Rite")?;

    let mut arg = None;
    if matches!(tokens.get(*i), Some(tok) if tok.kind == TokenKind::With) {
        *i += 1;
        match tokens.get(*i) {
            Some(tok) if tok.kind == TokenKind::Str => {
                arg = Some(InvokeArg::Literal(tok.lexeme.clone()));
                *i += 1;
            }
            Some(tok) if tok.kind == TokenKind::Ident => {
                arg = Some(InvokeArg::Glyph(tok.lexeme.clone()));
                *i += 1;
            }
            _ => {
                return Err(RuntimeError::syntax(
                    "unsupported argument after With",
                    span_at(tokens, *i),
                ));
            }
        }
    }

    let mut passphrase = None;
    if matches!(tokens.get(*i), Some(tok) if tok.kind == TokenKind::Using) {
        *i += 1;
        passphrase = Some(expect_str(tokens, i, "passphrase string after Using")?);
    }

    Ok(InvokeCall {
        target,
        arg,
        passphrase,
        span,
    })
}

/// `Litany:`/`Chorus:` blocks - invocation statements only.
fn compile_invoke_block(
    tokens: &[Token],
    i: &mut usize,
    close: TokenKind,
    keyword: &str,
) -> RuntimeResult<Stmt> {
    let start = span_at(tokens, *i);
    *i += 1;
    if matches!(tokens.get(*i), Some(tok) if tok.kind == TokenKind::Colon) {
        *i += 1;
    }

    let mut calls = Vec::new();
    loop {
        skip_newlines(tokens, i);
        match tokens.get(*i) {
            Some(tok) if tok.kind == close => {
                *i += 1;
                consume_dot(tokens, i);
                break;
            }
            Some(tok) if tok.kind == TokenKind::Invoke => {
                let call = parse_invoke_call(tokens, i)?;
                consume_dot(tokens, i);
                calls.push(call);
            }
            Some(tok) => {
                return Err(RuntimeError::syntax(
                    format!(
                        "only Invoke statements are allowed inside {keyword}, got {:?}",
                        tok.kind
                    ),
                    tok.span,
                ));
            }
            None => {
                return Err(RuntimeError::syntax(
                    format!("missing End{keyword} for block"),
                    start,
                ));
            }
        }
    }

    Ok(if close == TokenKind::EndLitany {
        Stmt::Litany { calls }
    } else {
        Stmt::Chorus { calls }
    })
}

/// `Sanctum [name]: ... EndSanctum.`
fn compile_sanctum(tokens: &[Token], i: &mut usize) -> RuntimeResult<Stmt> {
    let start = span_at(tokens, *i);
    *i += 1;
    if matches!(tokens.get(*i), Some(tok) if tok.kind == TokenKind::Ident) {
        *i += 1; // optional scope name, currently informational only
    }
    expect_kind(tokens, i, TokenKind::Colon, "Colon after Sanctum header")?;

    let mut depth = 1usize;
    let mut end_pos = None;
    let mut j = *i;
    while j < tokens.len() {
        match tokens[j].kind {
            TokenKind::Sanctum => depth += 1,
            TokenKind::EndSanctum => {
                depth -= 1;
                if depth == 0 {
                    end_pos = Some(j);
                    break;
                }
            }
            _ => {}
        }
        j += 1;
    }
    let end_pos =
        end_pos.ok_or_else(|| RuntimeError::syntax("unmatched EndSanctum for Sanctum", start))?;

    let body = compile_body(&tokens[*i..end_pos])?;
    *i = end_pos + 1;
    consume_dot(tokens, i);

    Ok(Stmt::Sanctum { body })
}

/// `Tether name [With <mode>].`
fn compile_tether(tokens: &[Token], i: &mut usize) -> RuntimeResult<Stmt> {
    *i += 1;
    let name = expect_ident(tokens, i, "resource name after Tether")?;
    if matches!(tokens.get(*i), Some(tok) if tok.kind == TokenKind::With) {
        *i += 1;
        // storage mode, accepted and ignored
        if matches!(tokens.get(*i), Some(tok)
            if matches!(tok.kind, TokenKind::Str | TokenKind::Ident))
        {
            *i += 1;
        }
    }
    consume_dot(tokens, i);
    Ok(Stmt::Tether { name })
}

/// `Untether name.`
fn compile_untether(tokens: &[Token], i: &mut usize) -> RuntimeResult<Stmt> {
    *i += 1;
    let name = expect_ident(tokens, i, "resource name after Untether")?;
    consume_dot(tokens, i);
    Ok(Stmt::Untether { name })
}

/// `Shrine At <addr> [Using "phrase"]: Route ... EndShrine.`
fn compile_shrine(tokens: &[Token], i: &mut usize) -> RuntimeResult<Stmt> {
    let start = span_at(tokens, *i);
    *i += 1;
    expect_kind(tokens, i, TokenKind::At, "At after Shrine")?;

    let addr = match tokens.get(*i) {
        Some(tok) if tok.kind == TokenKind::Str => {
            *i += 1;
            tok.lexeme.clone()
        }
        Some(tok) if tok.kind == TokenKind::Colon => {
            let port = match tokens.get(*i + 1) {
                Some(num) if num.kind == TokenKind::Num => num.lexeme.clone(),
                _ => {
                    return Err(RuntimeError::syntax(
                        "expected numeric port after ':'",
                        tok.span,
                    ));
                }
            };
            *i += 2;
            format!(":{port}")
        }
        Some(tok) if tok.kind == TokenKind::Num => {
            *i += 1;
            format!(":{}", tok.lexeme)
        }
        _ => {
            return Err(RuntimeError::syntax(
                "expected port or address after At",
                span_at(tokens, *i),
            ));
        }
    };

    let mut passphrase = None;
    if matches!(tokens.get(*i), Some(tok) if tok.kind == TokenKind::Using) {
        *i += 1;
        passphrase = Some(expect_str(tokens, i, "passphrase string after Using")?);
    }

    if matches!(tokens.get(*i), Some(tok) if tok.kind == TokenKind::Colon) {
        *i += 1;
    }

    let mut routes = Vec::new();
    loop {
        skip_newlines(tokens, i);
        match tokens.get(*i) {
            Some(tok) if tok.kind == TokenKind::EndShrine => {
                *i += 1;
                consume_dot(tokens, i);
                break;
            }
            Some(tok) if tok.kind == TokenKind::Route => {
                *i += 1;
                routes.push(compile_route(tokens, i)?);
            }
            Some(tok) => {
                return Err(RuntimeError::syntax(
                    format!("expected Route or EndShrine, got {:?}", tok.kind),
                    tok.span,
                ));
            }
            None => {
                return Err(RuntimeError::syntax("missing EndShrine for Shrine", start));
            }
        }
    }

    Ok(Stmt::Shrine(ShrineDecl {
        addr,
        passphrase,
        routes,
        span: start,
    }))
}

fn compile_route(tokens: &[Token], i: &mut usize) -> RuntimeResult<RouteDecl> {
    let method = match tokens.get(*i) {
        Some(tok)
            if matches!(
                tok.kind,
                TokenKind::Get | TokenKind::Post | TokenKind::Put | TokenKind::Delete
            ) =>
        {
            *i += 1;
            tok.lexeme.to_ascii_uppercase()
        }
        _ => {
            return Err(RuntimeError::syntax(
                "expected HTTP method after Route",
                span_at(tokens, *i),
            ));
        }
    };

    let path = expect_str(tokens, i, "route path string")?;

    let to_ok = matches!(tokens.get(*i), Some(tok)
        if tok.kind == TokenKind::To || (tok.kind == TokenKind::Ident && tok.word_is("TO")));
    if !to_ok {
        return Err(RuntimeError::syntax(
            format!("expected To after Route {method} {path}"),
            span_at(tokens, *i),
        ));
    }
    *i += 1;

    let handler = match tokens.get(*i) {
        Some(tok) if tok.kind == TokenKind::Rite => {
            *i += 1;
            let name = expect_ident(tokens, i, "rite name after Rite")?;
            consume_dot(tokens, i);
            RouteHandler::Rite(name)
        }
        Some(tok) if tok.kind == TokenKind::Answer => {
            *i += 1;
            if matches!(tokens.get(*i), Some(t) if t.kind == TokenKind::With) {
                *i += 1;
            }
            let expr = take_expr(tokens, i, &[TokenKind::EndShrine]);
            consume_dot(tokens, i);
            RouteHandler::Inline(expr)
        }
        _ => {
            return Err(RuntimeError::syntax(
                "expected Rite or Answer after To",
                span_at(tokens, *i),
            ));
        }
    };

    Ok(RouteDecl {
        method,
        path,
        handler,
    })
}

/// `Rest [For] <expr> [Seconds].`
fn compile_rest(tokens: &[Token], i: &mut usize) -> RuntimeResult<Stmt> {
    let start = span_at(tokens, *i);
    *i += 1;
    if matches!(tokens.get(*i), Some(tok)
        if tok.kind == TokenKind::For || (tok.kind == TokenKind::Ident && tok.word_is("FOR")))
    {
        *i += 1;
    }

    let duration = take_expr(tokens, i, &[TokenKind::Seconds]);
    if duration.is_empty() {
        return Err(RuntimeError::syntax("expected duration after Rest", start));
    }

    if matches!(tokens.get(*i), Some(tok) if tok.kind == TokenKind::Seconds) {
        *i += 1;
    }
    consume_dot(tokens, i);

    Ok(Stmt::Rest { duration })
}

/// `Forge: Raise name [By] <expr>. / Lower name [By] <expr>. EndForge.`
fn compile_forge(tokens: &[Token], i: &mut usize) -> RuntimeResult<Stmt> {
    let start = span_at(tokens, *i);
    *i += 1;
    expect_kind(tokens, i, TokenKind::Colon, "Colon after Forge")?;

    let mut ops = Vec::new();
    loop {
        skip_newlines(tokens, i);
        match tokens.get(*i) {
            Some(tok) if tok.kind == TokenKind::EndForge => {
                *i += 1;
                consume_dot(tokens, i);
                break;
            }
            Some(tok) if matches!(tok.kind, TokenKind::Raise | TokenKind::Lower) => {
                let lower = tok.kind == TokenKind::Lower;
                *i += 1;
                let name = expect_ident(tokens, i, "glyph name in Forge")?;
                if matches!(tokens.get(*i), Some(t) if t.kind == TokenKind::By) {
                    *i += 1;
                }
                let amount = take_expr(tokens, i, &[TokenKind::EndForge]);
                if amount.is_empty() {
                    return Err(RuntimeError::syntax(
                        format!("expected amount after glyph {name}"),
                        span_at(tokens, *i),
                    ));
                }
                consume_dot(tokens, i);
                ops.push(if lower {
                    ForgeOp::Lower { name, amount }
                } else {
                    ForgeOp::Raise { name, amount }
                });
            }
            Some(tok) => {
                return Err(RuntimeError::syntax(
                    format!("unexpected {:?} in Forge", tok.kind),
                    tok.span,
                ));
            }
            None => {
                return Err(RuntimeError::syntax("missing EndForge for Forge", start));
            }
        }
    }

    Ok(Stmt::Forge { ops })
}

/* ===================== Execution ===================== */

impl Interp {
    /// Execute a statement list as one frame. Names bound `Fleeting` in this
    /// frame are scrubbed on every exit path.
    pub(crate) fn exec_frame(&mut self, stmts: &[Stmt], env: &mut Env) -> RuntimeResult<Flow> {
        let mut fleeting = HashSet::new();
        let result = self.exec_stmts(stmts, env, &mut fleeting);
        for name in &fleeting {
            env.remove(name);
        }
        result
    }

    fn exec_stmts(
        &mut self,
        stmts: &[Stmt],
        env: &mut Env,
        fleeting: &mut HashSet<String>,
    ) -> RuntimeResult<Flow> {
        for stmt in stmts {
            if let Flow::Answered(value) = self.exec_stmt(stmt, env, fleeting)? {
                return Ok(Flow::Answered(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(
        &mut self,
        stmt: &Stmt,
        env: &mut Env,
        fleeting: &mut HashSet<String>,
    ) -> RuntimeResult<Flow> {
        match stmt {
            Stmt::Bind {
                name,
                fleeting: is_fleeting,
                veiled,
                expr,
            } => {
                let value = eval_value(self, expr, env)?;
                let text = value.render();
                if *veiled {
                    env.bind_veiled(name, text);
                } else {
                    env.bind(name, text);
                }
                if *is_fleeting {
                    fleeting.insert(name.clone());
                }
                Ok(Flow::Normal)
            }

            Stmt::Utter { expr } => {
                let value = eval_value(self, expr, env)?;
                println!("{}", value.render_redacted());
                Ok(Flow::Normal)
            }

            Stmt::Inscribe { expr } => {
                let value = eval_value(self, expr, env)?;
                tracing::info!(target: "rite", "{}", value.render_redacted());
                Ok(Flow::Normal)
            }

            Stmt::Answer { expr } => {
                let value = eval_value(self, expr, env)?;
                Ok(Flow::Answered(value))
            }

            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                if eval_bool(self, cond, env)? {
                    self.exec_frame(then_body, env)
                } else if let Some(else_body) = else_body {
                    self.exec_frame(else_body, env)
                } else {
                    Ok(Flow::Normal)
                }
            }

            Stmt::While { cond, body } => {
                let limit = self.config.loop_limit;
                let mut iterations = 0usize;
                loop {
                    if iterations >= limit {
                        return Err(RuntimeError::LoopLimit { limit });
                    }
                    iterations += 1;

                    if !eval_bool(self, cond, env)? {
                        break;
                    }
                    if let Flow::Answered(value) = self.exec_frame(body, env)? {
                        return Ok(Flow::Answered(value));
                    }
                }
                Ok(Flow::Normal)
            }

            Stmt::RaiseCurse { name } => Err(RuntimeError::Curse { name: name.clone() }),

            Stmt::Ward { name, body, mend } => self.exec_ward(name, body, mend.as_deref(), env),

            Stmt::Invoke(call) => {
                // Statement form: side effects only, any answer is discarded.
                self.invoke(call, env)?;
                Ok(Flow::Normal)
            }

            Stmt::Litany { calls } => {
                orchestrate::run_litany(self, calls, env)?;
                Ok(Flow::Normal)
            }

            Stmt::Chorus { calls } => {
                orchestrate::run_chorus(self, calls, env)?;
                Ok(Flow::Normal)
            }

            Stmt::Sanctum { body } => sanctum::run_sanctum(self, body, env),

            Stmt::Tether { name } => {
                if !self.tethers.insert(name.clone()) {
                    return Err(RuntimeError::DoubleTether { name: name.clone() });
                }
                Ok(Flow::Normal)
            }

            Stmt::Untether { name } => {
                if !self.tethers.remove(name) {
                    return Err(RuntimeError::UntetherUnbound { name: name.clone() });
                }
                Ok(Flow::Normal)
            }

            Stmt::Shrine(decl) => {
                service::activate(self, decl, env)?;
                Ok(Flow::Normal)
            }

            Stmt::Rest { duration } => {
                let value = eval_value(self, duration, env)?;
                let secs = value
                    .as_f64()
                    .ok_or_else(|| RuntimeError::eval("Rest duration must be numeric"))?;
                if !secs.is_finite() || secs < 0.0 {
                    return Err(RuntimeError::eval("Rest duration must be >= 0"));
                }
                thread::sleep(Duration::from_secs_f64(secs));
                Ok(Flow::Normal)
            }

            Stmt::Forge { ops } => {
                for op in ops {
                    self.exec_forge_op(op, env)?;
                }
                Ok(Flow::Normal)
            }
        }
    }

    /// Protected region: snapshot on entry, roll back and mend on a matching
    /// curse, propagate everything else.
    fn exec_ward(
        &mut self,
        name: &str,
        body: &[Stmt],
        mend: Option<&[Stmt]>,
        env: &mut Env,
    ) -> RuntimeResult<Flow> {
        let snapshot = env.clone();
        match self.exec_frame(body, env) {
            Ok(flow) => Ok(flow),
            Err(err) if err.caught_by(name) => {
                *env = snapshot;
                match mend {
                    // Mend runs live: its bindings persist past the ward.
                    Some(mend) => self.exec_frame(mend, env),
                    None => Ok(Flow::Normal),
                }
            }
            Err(err) => Err(err),
        }
    }

    fn exec_forge_op(&mut self, op: &ForgeOp, env: &mut Env) -> RuntimeResult<()> {
        let (name, amount, sign) = match op {
            ForgeOp::Raise { name, amount } => (name, amount, 1.0),
            ForgeOp::Lower { name, amount } => (name, amount, -1.0),
        };

        let delta = eval_value(self, amount, env)?
            .as_f64()
            .ok_or_else(|| RuntimeError::eval(format!("Forge amount for {name} must be numeric")))?;

        let current = match env.get(name) {
            None => 0.0,
            Some(raw) if raw.trim().is_empty() => 0.0,
            Some(raw) => raw.trim().parse::<f64>().map_err(|_| {
                RuntimeError::eval(format!("glyph {name} does not hold a number: {raw:?}"))
            })?,
        };

        env.set(name.as_str(), format_number(current + sign * delta));
        Ok(())
    }
}
