//! Expression evaluation
//!
//! A precedence-climbing evaluator over a token slice. Precedence, lowest to
//! highest: Or, And, equality, comparison, term (+ -), factor (* / %), unary,
//! primary. Addition is numeric when both operands coerce to numbers and text
//! concatenation otherwise; reading a veiled glyph succeeds but taints the
//! result.

use chrono::Utc;

use super::env::Env;
use super::errors::{RuntimeError, RuntimeResult};
use super::statements::parse_invoke_call;
use super::value::Value;
use super::Interp;
use crate::types::{Token, TokenKind};

struct Cx<'a> {
    interp: &'a mut Interp,
    tokens: &'a [Token],
    env: &'a Env,
}

/// Evaluate an expression token slice to a value.
///
/// Callers may pass a slice with trailing control tokens (terminators,
/// newlines); evaluation stops at the first of them. An empty expression
/// evaluates to empty text.
pub(crate) fn eval_value(interp: &mut Interp, tokens: &[Token], env: &Env) -> RuntimeResult<Value> {
    let tokens = trim_expr(tokens);
    if tokens.is_empty() {
        return Ok(Value::text(""));
    }

    let mut cx = Cx {
        interp,
        tokens,
        env,
    };
    let mut i = 0;
    parse_or(&mut cx, &mut i)
}

/// Evaluate an expression as a condition. Empty conditions are false.
pub(crate) fn eval_bool(interp: &mut Interp, tokens: &[Token], env: &Env) -> RuntimeResult<bool> {
    let tokens = trim_expr(tokens);
    if tokens.is_empty() {
        return Ok(false);
    }
    Ok(eval_value(interp, tokens, env)?.truthy())
}

fn trim_expr(tokens: &[Token]) -> &[Token] {
    let end = tokens
        .iter()
        .position(|t| {
            matches!(
                t.kind,
                TokenKind::Dot
                    | TokenKind::Colon
                    | TokenKind::Newline
                    | TokenKind::EndRite
                    | TokenKind::Eof
            )
        })
        .unwrap_or(tokens.len());
    &tokens[..end]
}

fn parse_or(cx: &mut Cx, i: &mut usize) -> RuntimeResult<Value> {
    let mut left = parse_and(cx, i)?;
    while *i < cx.tokens.len() && cx.tokens[*i].kind == TokenKind::Or {
        *i += 1;
        let right = parse_and(cx, i)?;
        left = Value::bool(left.truthy() || right.truthy()).taint_from(&left, &right);
    }
    Ok(left)
}

fn parse_and(cx: &mut Cx, i: &mut usize) -> RuntimeResult<Value> {
    let mut left = parse_equality(cx, i)?;
    while *i < cx.tokens.len() && cx.tokens[*i].kind == TokenKind::And {
        *i += 1;
        let right = parse_equality(cx, i)?;
        left = Value::bool(left.truthy() && right.truthy()).taint_from(&left, &right);
    }
    Ok(left)
}

fn parse_equality(cx: &mut Cx, i: &mut usize) -> RuntimeResult<Value> {
    let mut left = parse_comparison(cx, i)?;
    while *i < cx.tokens.len()
        && matches!(cx.tokens[*i].kind, TokenKind::EqEq | TokenKind::NotEq)
    {
        let op = cx.tokens[*i].kind;
        *i += 1;
        let right = parse_comparison(cx, i)?;

        // Numeric comparison when both sides coerce, text otherwise.
        let eq = match (left.as_f64(), right.as_f64()) {
            (Some(lf), Some(rf)) => lf == rf,
            _ => left.render() == right.render(),
        };

        let out = Value::bool(if op == TokenKind::EqEq { eq } else { !eq });
        left = out.taint_from(&left, &right);
    }
    Ok(left)
}

fn parse_comparison(cx: &mut Cx, i: &mut usize) -> RuntimeResult<Value> {
    let mut left = parse_term(cx, i)?;
    while *i < cx.tokens.len()
        && matches!(
            cx.tokens[*i].kind,
            TokenKind::Lt | TokenKind::LtEq | TokenKind::Gt | TokenKind::GtEq
        )
    {
        let op = cx.tokens[*i].kind;
        *i += 1;
        let right = parse_term(cx, i)?;

        let res = match (left.as_f64(), right.as_f64()) {
            (Some(lf), Some(rf)) => match op {
                TokenKind::Lt => lf < rf,
                TokenKind::LtEq => lf <= rf,
                TokenKind::Gt => lf > rf,
                _ => lf >= rf,
            },
            _ => {
                let ls = left.render();
                let rs = right.render();
                match op {
                    TokenKind::Lt => ls < rs,
                    TokenKind::LtEq => ls <= rs,
                    TokenKind::Gt => ls > rs,
                    _ => ls >= rs,
                }
            }
        };

        left = Value::bool(res).taint_from(&left, &right);
    }
    Ok(left)
}

fn parse_term(cx: &mut Cx, i: &mut usize) -> RuntimeResult<Value> {
    let mut left = parse_factor(cx, i)?;
    while *i < cx.tokens.len()
        && matches!(cx.tokens[*i].kind, TokenKind::Plus | TokenKind::Minus)
    {
        let op = cx.tokens[*i].kind;
        *i += 1;
        let right = parse_factor(cx, i)?;

        left = match (left.as_f64(), right.as_f64()) {
            (Some(lf), Some(rf)) => {
                let out = if op == TokenKind::Plus {
                    Value::float(lf + rf)
                } else {
                    Value::float(lf - rf)
                };
                out.taint_from(&left, &right)
            }
            _ if op == TokenKind::Plus => {
                Value::text(format!("{}{}", left.render(), right.render()))
                    .taint_from(&left, &right)
            }
            _ => {
                return Err(RuntimeError::eval("cannot apply '-' to non-numeric values"));
            }
        };
    }
    Ok(left)
}

fn parse_factor(cx: &mut Cx, i: &mut usize) -> RuntimeResult<Value> {
    let mut left = parse_unary(cx, i)?;
    while *i < cx.tokens.len()
        && matches!(
            cx.tokens[*i].kind,
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent
        )
    {
        let op = cx.tokens[*i].kind;
        *i += 1;
        let right = parse_unary(cx, i)?;

        let (lf, rf) = match (left.as_f64(), right.as_f64()) {
            (Some(lf), Some(rf)) => (lf, rf),
            _ => {
                return Err(RuntimeError::eval(
                    "non-numeric value in arithmetic expression",
                ));
            }
        };

        let out = match op {
            TokenKind::Star => Value::float(lf * rf),
            TokenKind::Slash => {
                if rf == 0.0 {
                    return Err(RuntimeError::DivideByZero);
                }
                Value::float(lf / rf)
            }
            _ => {
                let ri = rf as i64;
                if ri == 0 {
                    return Err(RuntimeError::ModuloByZero);
                }
                Value::int(lf as i64 % ri)
            }
        };

        left = out.taint_from(&left, &right);
    }
    Ok(left)
}

fn parse_unary(cx: &mut Cx, i: &mut usize) -> RuntimeResult<Value> {
    let tok = current(cx, *i)?;

    if tok.kind == TokenKind::Minus {
        *i += 1;
        let val = parse_unary(cx, i)?;
        let f = val
            .as_f64()
            .ok_or_else(|| RuntimeError::eval("cannot negate non-numeric value"))?;
        return Ok(Value::float(-f).with_taint(val.tainted));
    }

    if matches!(tok.kind, TokenKind::Not | TokenKind::Bang) {
        *i += 1;
        let val = parse_unary(cx, i)?;
        let tainted = val.tainted;
        return Ok(Value::bool(!val.truthy()).with_taint(tainted));
    }

    parse_primary(cx, i)
}

fn parse_primary(cx: &mut Cx, i: &mut usize) -> RuntimeResult<Value> {
    let tok = current(cx, *i)?.clone();

    // Glue words that may leak into expression slices.
    if matches!(tok.kind, TokenKind::For | TokenKind::Seconds | TokenKind::By)
        || (tok.kind == TokenKind::Ident
            && (tok.word_is("FOR") || tok.word_is("SECONDS") || tok.word_is("BY")))
    {
        *i += 1;
        return parse_primary(cx, i);
    }

    match tok.kind {
        TokenKind::Str => {
            *i += 1;
            Ok(Value::text(tok.lexeme))
        }

        TokenKind::Num => {
            *i += 1;
            let lex = tok.lexeme.trim();
            if lex.contains(['.', 'e', 'E']) {
                let f: f64 = lex.parse().map_err(|_| {
                    RuntimeError::syntax(format!("invalid float literal {:?}", tok.lexeme), tok.span)
                })?;
                Ok(Value::float(f))
            } else {
                let n: i64 = lex.parse().map_err(|_| {
                    RuntimeError::syntax(format!("invalid int literal {:?}", tok.lexeme), tok.span)
                })?;
                Ok(Value::int(n))
            }
        }

        TokenKind::Now => {
            *i += 1;
            Ok(Value::int(Utc::now().timestamp()))
        }

        TokenKind::Ident => {
            let value = cx.env.read(&tok.lexeme).ok_or(RuntimeError::UnknownGlyph {
                name: tok.lexeme.clone(),
                span: tok.span,
            })?;
            *i += 1;
            Ok(value)
        }

        TokenKind::LParen => {
            *i += 1;
            let inner = parse_or(cx, i)?;
            if *i >= cx.tokens.len() || cx.tokens[*i].kind != TokenKind::RParen {
                return Err(RuntimeError::syntax("expected ')' in expression", tok.span));
            }
            *i += 1;
            Ok(inner)
        }

        TokenKind::Invoke => {
            let call = parse_invoke_call(cx.tokens, i)?;
            let answered = cx.interp.invoke(&call, cx.env)?;
            // An answered value arrives as plain text; taint was consumed at
            // the frame boundary.
            Ok(Value::text(answered.unwrap_or_default()))
        }

        _ => Err(RuntimeError::syntax(
            format!("unexpected {:?} in expression", tok.kind),
            tok.span,
        )),
    }
}

fn current<'t>(cx: &Cx<'t>, i: usize) -> RuntimeResult<&'t Token> {
    cx.tokens
        .get(i)
        .ok_or_else(|| RuntimeError::eval("unexpected end of expression"))
}
