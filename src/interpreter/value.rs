//! Runtime value types
//!
//! Values are tagged scalars with a secrecy bit. Environment storage is
//! canonical text; a stored string is re-classified into a scalar every time
//! it is read, so `"3"` participates in arithmetic while `"3a"` stays text.

/// Placeholder rendered wherever a tainted value would otherwise surface.
pub const REDACTED: &str = "[VEILED]";

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// A scalar plus the taint bit that secrecy rules ride on.
///
/// Taint is set when a veiled glyph is read and propagates through every
/// operator; it is consumed (as redaction) at output, return-capture, and
/// response-body boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub scalar: Scalar,
    pub tainted: bool,
}

impl Value {
    pub fn text(s: impl Into<String>) -> Value {
        Value {
            scalar: Scalar::Text(s.into()),
            tainted: false,
        }
    }

    pub fn int(i: i64) -> Value {
        Value {
            scalar: Scalar::Int(i),
            tainted: false,
        }
    }

    pub fn float(f: f64) -> Value {
        Value {
            scalar: Scalar::Float(f),
            tainted: false,
        }
    }

    pub fn bool(b: bool) -> Value {
        Value {
            scalar: Scalar::Bool(b),
            tainted: false,
        }
    }

    pub fn with_taint(mut self, tainted: bool) -> Value {
        self.tainted = tainted;
        self
    }

    /// Combine the taint of two operands onto this result.
    pub fn taint_from(mut self, a: &Value, b: &Value) -> Value {
        self.tainted = a.tainted || b.tainted;
        self
    }

    /// Classify stored text into a scalar: boolean words, then numbers
    /// (a `.`/`e`/`E` forces the float path), then text as-is.
    pub fn classify(raw: &str) -> Value {
        let s = raw.trim();
        if s.eq_ignore_ascii_case("true") {
            return Value::bool(true);
        }
        if s.eq_ignore_ascii_case("false") {
            return Value::bool(false);
        }
        if s.contains(['.', 'e', 'E']) {
            if let Ok(f) = s.parse::<f64>() {
                return Value::float(f);
            }
        } else if let Ok(n) = s.parse::<i64>() {
            return Value::int(n);
        } else if let Ok(f) = s.parse::<f64>() {
            return Value::float(f);
        }
        Value::text(raw)
    }

    /// Numeric view: ints promote, booleans are 0/1, text parses if it can.
    pub fn as_f64(&self) -> Option<f64> {
        match &self.scalar {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Scalar::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }

    /// Truthiness for boolean operators.
    pub fn truthy(&self) -> bool {
        match &self.scalar {
            Scalar::Bool(b) => *b,
            Scalar::Int(i) => *i != 0,
            Scalar::Float(f) => *f != 0.0,
            Scalar::Text(s) => {
                let t = s.trim();
                if t.eq_ignore_ascii_case("true") {
                    return true;
                }
                if t.eq_ignore_ascii_case("false") {
                    return false;
                }
                !t.is_empty()
            }
        }
    }

    /// Canonical text form, as stored in environments.
    pub fn render(&self) -> String {
        match &self.scalar {
            Scalar::Text(s) => s.clone(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        }
    }

    /// Text form for output/return/response surfaces: tainted values render
    /// as the fixed placeholder, never the underlying text.
    pub fn render_redacted(&self) -> String {
        if self.tainted {
            REDACTED.to_string()
        } else {
            self.render()
        }
    }
}

/// Format a float back to storage text, keeping whole results integral so a
/// counter raised by 1 renders `3`, not `3.0`.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < (i64::MAX as f64) {
        (n as i64).to_string()
    } else {
        n.to_string()
    }
}
