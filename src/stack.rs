//! Abstract evaluation-stack accounting
//!
//! The rewriter keeps a running model of where the logical top of the
//! operand stack sits relative to the `stack_pointer` variable in the
//! generated code. Popping an input moves the logical top below
//! `stack_pointer` without emitting anything; the buffered displacement is
//! only materialized when a handler needs the real pointer to be accurate
//! ([`Stack::flush`]) or needs to know how many values an error path must
//! discard ([`Stack::peek_offset`]).
//!
//! Sizes are C expressions. Most are the literal `"1"`, but array-valued
//! stack slots carry symbolic sizes such as `"oparg"`, so an offset is a
//! numeric count plus a bag of symbolic terms. Whether an offset is known
//! at generation time is an explicit property of the value
//! ([`StackOffset::value`]), not a parse-and-hope affair.

use crate::analyzer::StackVar;
use crate::cwriter::CWriter;

/// A stack offset as seen by a handler: either known at generation time or
/// a runtime C expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OffsetValue {
    Literal(i64),
    Symbolic(String),
}

/// Displacement of the logical stack top from `stack_pointer`, as a numeric
/// count plus signed symbolic terms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackOffset {
    numeric: i64,
    terms: Vec<(i8, String)>,
}

impl StackOffset {
    pub fn new() -> Self {
        StackOffset::default()
    }

    /// Grow the offset by `size` (a push of that many values).
    pub fn push_size(&mut self, size: &str) {
        self.add(1, size);
    }

    /// Shrink the offset by `size` (a pop of that many values).
    pub fn pop_size(&mut self, size: &str) {
        self.add(-1, size);
    }

    fn add(&mut self, sign: i64, size: &str) {
        if let Ok(n) = size.parse::<i64>() {
            self.numeric += sign * n;
            return;
        }
        // A push cancels a pending pop of the same symbolic size and vice
        // versa, so `oparg` pushed over `oparg` popped nets to zero.
        let opposite = self
            .terms
            .iter()
            .position(|(s, t)| i64::from(*s) == -sign && t == size);
        match opposite {
            Some(i) => {
                self.terms.remove(i);
            }
            None => self.terms.push((sign as i8, size.to_string())),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.numeric == 0 && self.terms.is_empty()
    }

    /// The offset as an explicit literal-or-symbolic value.
    pub fn value(&self) -> OffsetValue {
        if self.terms.is_empty() {
            OffsetValue::Literal(self.numeric)
        } else {
            OffsetValue::Symbolic(self.to_c())
        }
    }

    /// Render the offset as a C expression.
    pub fn to_c(&self) -> String {
        let mut expr = String::new();
        for (sign, term) in &self.terms {
            if expr.is_empty() {
                if *sign < 0 {
                    expr.push('-');
                }
            } else if *sign < 0 {
                expr.push_str(" - ");
            } else {
                expr.push_str(" + ");
            }
            expr.push_str(term);
        }
        if self.numeric != 0 || expr.is_empty() {
            if expr.is_empty() {
                expr.push_str(&self.numeric.to_string());
            } else if self.numeric < 0 {
                expr.push_str(&format!(" - {}", -self.numeric));
            } else {
                expr.push_str(&format!(" + {}", self.numeric));
            }
        }
        expr
    }
}

/// Live model of the abstract operand stack for one operation body.
///
/// Constructed fresh per operation by the surrounding driver; never shared
/// across operations.
#[derive(Debug, Default)]
pub struct Stack {
    top_offset: StackOffset,
}

impl Stack {
    pub fn new() -> Self {
        Stack::default()
    }

    /// Account for an input variable being popped (read without moving
    /// `stack_pointer`).
    pub fn pop(&mut self, var: &StackVar) {
        self.top_offset.pop_size(&var.size);
    }

    /// Account for an output variable being pushed.
    pub fn push(&mut self, var: &StackVar) {
        self.top_offset.push_size(&var.size);
    }

    /// Offset of the logical top relative to `stack_pointer` at this point
    /// in the body.
    pub fn peek_offset(&self) -> StackOffset {
        self.top_offset.clone()
    }

    /// Materialize any buffered displacement as a `stack_pointer`
    /// adjustment and reset the model. No output if nothing is buffered.
    pub fn flush(&mut self, out: &mut CWriter) {
        if !self.top_offset.is_zero() {
            out.start_line();
            out.emit_str(&format!("stack_pointer += {};\n", self.top_offset.to_c()));
            self.top_offset = StackOffset::new();
        }
    }
}
