//! Pseudo-instruction expansion
//!
//! The dispatch loop ([`emit_tokens`]) walks one operation body and copies
//! every token through to the writer, except identifiers registered as
//! pseudo-instructions. Those hand control to their [`ReplacementHandler`],
//! which consumes exactly its own argument tokens from the shared cursor and
//! emits the literal C replacement; the loop resumes wherever the handler
//! left the cursor.
//!
//! Five pseudo-instructions are built in:
//!
//! | Pseudo               | Expansion                                         |
//! |----------------------|---------------------------------------------------|
//! | `DEOPT_IF(c)`        | guard jumping to the owning family's deopt target |
//! | `ERROR_IF(c, label)` | conditional jump to a pop-depth cleanup label     |
//! | `DECREF_INPUTS()`    | release calls for the operation's stack inputs    |
//! | `STORE_SP()`         | flush + publish `stack_pointer` to the frame      |
//! | `CHECK_EVAL_BREAKER()` | periodic interrupt check, unless redundant      |
//!
//! The handler table is a value ([`ReplacementRegistry`]), not a hardcoded
//! match: callers needing context-specific rewrites register their own
//! handlers instead of branching inside the loop.
//!
//! Any inconsistency between the token stream and the metadata is an
//! upstream bug; expansion aborts with a [`RewriteError`] rather than emit
//! C source that compiles to the wrong thing.

use crate::analyzer::{Instruction, Uop};
use crate::cwriter::CWriter;
use crate::lexer::{Token, TokenKind};
use crate::stack::{OffsetValue, Stack};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("Body ended inside the argument list of {pseudo}")]
    UnexpectedEndOfBody { pseudo: &'static str },
    #[error("DEOPT_IF in {uop} requires an owning instruction with a family")]
    MissingFamily { uop: String },
}

/// Cursor over one operation body. Exclusively owned by the dispatch loop,
/// lent to at most one handler at a time.
pub type TokenIter<'a> = std::slice::Iter<'a, Token>;

fn next_token<'a>(
    tokens: &mut TokenIter<'a>,
    pseudo: &'static str,
) -> Result<&'a Token, RewriteError> {
    tokens
        .next()
        .ok_or(RewriteError::UnexpectedEndOfBody { pseudo })
}

/// Copy tokens through to `out` until a token of kind `end` at parenthesis
/// depth zero; the end token is consumed but not emitted. Nested parens keep
/// commas and closing parens inside the copied text from terminating the
/// copy early.
pub fn emit_to(
    out: &mut CWriter,
    tokens: &mut TokenIter<'_>,
    end: TokenKind,
    pseudo: &'static str,
) -> Result<(), RewriteError> {
    let mut parens = 0;
    for tkn in tokens {
        if tkn.kind == end && parens == 0 {
            return Ok(());
        }
        if tkn.kind == TokenKind::LParen {
            parens += 1;
        }
        if tkn.kind == TokenKind::RParen {
            parens -= 1;
        }
        out.emit_token(tkn);
    }
    Err(RewriteError::UnexpectedEndOfBody { pseudo })
}

/// Consume an empty argument list: `(`, `)`, `;`.
fn skip_empty_args(tokens: &mut TokenIter<'_>, pseudo: &'static str) -> Result<(), RewriteError> {
    next_token(tokens, pseudo)?;
    next_token(tokens, pseudo)?;
    next_token(tokens, pseudo)?;
    Ok(())
}

/// One pseudo-instruction expansion.
///
/// `tkn` is the matched identifier; `tokens` is positioned just past it, and
/// the handler must consume exactly its own argument tokens before
/// returning.
pub trait ReplacementHandler {
    fn expand(
        &self,
        out: &mut CWriter,
        tkn: &Token,
        tokens: &mut TokenIter<'_>,
        uop: &Uop,
        stack: &mut Stack,
        inst: Option<&Instruction>,
    ) -> Result<(), RewriteError>;
}

/// `DEOPT_IF(cond)` -> `DEOPT_IF(cond, FAMILY);`
///
/// The guard keyword is emitted at the source position of the invocation so
/// generated diagnostics point at the definition, and the owning family's
/// name becomes the deopt target argument.
pub struct DeoptHandler;

impl ReplacementHandler for DeoptHandler {
    fn expand(
        &self,
        out: &mut CWriter,
        tkn: &Token,
        tokens: &mut TokenIter<'_>,
        uop: &Uop,
        _stack: &mut Stack,
        inst: Option<&Instruction>,
    ) -> Result<(), RewriteError> {
        let family = inst
            .and_then(|inst| inst.family.as_ref())
            .ok_or_else(|| RewriteError::MissingFamily {
                uop: uop.name.clone(),
            })?;
        out.emit_at("DEOPT_IF", tkn);
        out.emit_token(next_token(tokens, "DEOPT_IF")?);
        emit_to(out, tokens, TokenKind::RParen, "DEOPT_IF")?;
        next_token(tokens, "DEOPT_IF")?; // semicolon
        out.emit_str(", ");
        out.emit_str(&family.name);
        out.emit_str(");\n");
        Ok(())
    }
}

/// `ERROR_IF(cond, label)` -> conditional jump to an error cleanup label.
///
/// The generated interpreter pre-declares `pop_<n>_<label>` entry points for
/// every literal pop depth, so a statically known offset selects one of
/// those. When the depth depends on runtime state there is no such label;
/// the fallback adjusts `stack_pointer` in a braced block and jumps to the
/// plain label.
pub struct ErrorIfHandler;

impl ReplacementHandler for ErrorIfHandler {
    fn expand(
        &self,
        out: &mut CWriter,
        tkn: &Token,
        tokens: &mut TokenIter<'_>,
        _uop: &Uop,
        stack: &mut Stack,
        _inst: Option<&Instruction>,
    ) -> Result<(), RewriteError> {
        out.emit_at("if ", tkn);
        out.emit_token(next_token(tokens, "ERROR_IF")?);
        emit_to(out, tokens, TokenKind::Comma, "ERROR_IF")?;
        let label = next_token(tokens, "ERROR_IF")?.text.clone();
        next_token(tokens, "ERROR_IF")?; // right paren
        next_token(tokens, "ERROR_IF")?; // semicolon
        out.emit_str(") ");
        match stack.peek_offset().value() {
            OffsetValue::Literal(offset) => {
                let pops = -offset;
                out.emit_str("goto ");
                if pops != 0 {
                    out.emit_str(&format!("pop_{pops}_"));
                }
                out.emit_str(&label);
                out.emit_str(";\n");
            }
            OffsetValue::Symbolic(expr) => {
                out.emit_str(&format!("{{ stack_pointer += {expr}; "));
                out.emit_str("goto ");
                out.emit_str(&label);
                out.emit_str("; }\n");
            }
        }
        Ok(())
    }
}

/// `DECREF_INPUTS()` -> one release per owned stack input, in declaration
/// order. Placeholder and peeked inputs own no reference and are skipped;
/// array-sized inputs release each element in a countdown loop; nullable
/// inputs get the NULL-tolerant call.
pub struct DecrefInputsHandler;

impl ReplacementHandler for DecrefInputsHandler {
    fn expand(
        &self,
        out: &mut CWriter,
        tkn: &Token,
        tokens: &mut TokenIter<'_>,
        uop: &Uop,
        _stack: &mut Stack,
        _inst: Option<&Instruction>,
    ) -> Result<(), RewriteError> {
        skip_empty_args(tokens, "DECREF_INPUTS")?;
        out.emit_at("", tkn);
        for var in &uop.inputs {
            if var.is_placeholder() || var.peek {
                continue;
            }
            if var.size != "1" {
                out.emit_str(&format!("for (int _i = {}; --_i >= 0;) {{\n", var.size));
                out.emit_str(&format!("DECREF({}[_i]);\n", var.name));
                out.emit_str("}\n");
            } else if var.condition {
                out.emit_str(&format!("XDECREF({});\n", var.name));
            } else {
                out.emit_str(&format!("DECREF({});\n", var.name));
            }
        }
        Ok(())
    }
}

/// `STORE_SP()` -> flush buffered stack adjustments, then publish the stack
/// pointer to the frame so code that may inspect or unwind it sees the
/// truth.
pub struct StoreSpHandler;

impl ReplacementHandler for StoreSpHandler {
    fn expand(
        &self,
        out: &mut CWriter,
        tkn: &Token,
        tokens: &mut TokenIter<'_>,
        _uop: &Uop,
        stack: &mut Stack,
        _inst: Option<&Instruction>,
    ) -> Result<(), RewriteError> {
        skip_empty_args(tokens, "STORE_SP")?;
        out.emit_at("", tkn);
        stack.flush(out);
        out.emit_str("frame_set_stack_pointer(frame, stack_pointer);\n");
        Ok(())
    }
}

/// `CHECK_EVAL_BREAKER()` -> periodic interrupt check at the invocation's
/// source position, suppressed when the operation already ends with one.
pub struct EvalBreakerHandler;

impl ReplacementHandler for EvalBreakerHandler {
    fn expand(
        &self,
        out: &mut CWriter,
        tkn: &Token,
        tokens: &mut TokenIter<'_>,
        uop: &Uop,
        _stack: &mut Stack,
        _inst: Option<&Instruction>,
    ) -> Result<(), RewriteError> {
        skip_empty_args(tokens, "CHECK_EVAL_BREAKER")?;
        if !uop.properties.ends_with_eval_breaker {
            out.emit_at("CHECK_EVAL_BREAKER();\n", tkn);
        }
        Ok(())
    }
}

/// Replaceable table mapping pseudo-instruction names to handlers.
///
/// [`ReplacementRegistry::new`] installs the five built-ins; callers extend
/// or override by [`ReplacementRegistry::register`], or start from
/// [`ReplacementRegistry::empty`] for a fully custom table.
pub struct ReplacementRegistry {
    handlers: HashMap<String, Box<dyn ReplacementHandler>>,
}

impl ReplacementRegistry {
    /// Registry with the five built-in pseudo-instructions.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("DEOPT_IF", Box::new(DeoptHandler));
        registry.register("ERROR_IF", Box::new(ErrorIfHandler));
        registry.register("DECREF_INPUTS", Box::new(DecrefInputsHandler));
        registry.register("STORE_SP", Box::new(StoreSpHandler));
        registry.register("CHECK_EVAL_BREAKER", Box::new(EvalBreakerHandler));
        registry
    }

    /// Registry with no handlers at all.
    pub fn empty() -> Self {
        ReplacementRegistry {
            handlers: HashMap::new(),
        }
    }

    /// Install `handler` for `name`, replacing any existing handler.
    pub fn register(&mut self, name: impl Into<String>, handler: Box<dyn ReplacementHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ReplacementHandler> {
        self.handlers.get(name).map(|h| h.as_ref())
    }
}

impl Default for ReplacementRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Expand one operation body into `out`.
///
/// The body's own bounding delimiters are stripped; an empty body emits
/// nothing, not even a line start. Unrecognized tokens are copied through
/// verbatim; registered pseudo-instructions dispatch to their handlers with
/// the shared cursor.
pub fn emit_tokens(
    out: &mut CWriter,
    uop: &Uop,
    stack: &mut Stack,
    inst: Option<&Instruction>,
    registry: &ReplacementRegistry,
) -> Result<(), RewriteError> {
    if uop.body.len() <= 2 {
        return Ok(());
    }
    let inner = &uop.body[1..uop.body.len() - 1];
    let mut tokens = inner.iter();
    out.start_line();
    while let Some(tkn) = tokens.next() {
        let handler = match tkn.kind {
            TokenKind::Identifier => registry.get(&tkn.text),
            _ => None,
        };
        match handler {
            Some(handler) => handler.expand(out, tkn, &mut tokens, uop, stack, inst)?,
            None => out.emit_token(tkn),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{Properties, StackVar};
    use crate::lexer::tokenize;

    fn uop(body: &str) -> Uop {
        Uop::new("TEST_OP", tokenize(body).unwrap())
    }

    fn expand(uop: &Uop, stack: &mut Stack, inst: Option<&Instruction>) -> String {
        let mut out = CWriter::new();
        let registry = ReplacementRegistry::new();
        emit_tokens(&mut out, uop, stack, inst, &registry).unwrap();
        out.into_output()
    }

    #[test]
    fn test_plain_tokens_copied_verbatim() {
        let uop = uop("{ res = a + b; }");
        let out = expand(&uop, &mut Stack::new(), None);
        assert_eq!(out, "res=a+b;\n");
    }

    #[test]
    fn test_empty_body_emits_nothing() {
        let uop = uop("{ }");
        let mut out = CWriter::new();
        out.emit_str("x");
        let registry = ReplacementRegistry::new();
        emit_tokens(&mut out, &uop, &mut Stack::new(), None, &registry).unwrap();
        // No output and no start-of-line signal either.
        assert_eq!(out.output(), "x");
    }

    #[test]
    fn test_deopt_expansion() {
        let uop = uop("{ DEOPT_IF(x == NULL); }");
        let inst = Instruction::with_family("BINARY_OP_ADD_INT", "BINARY_OP");
        let out = expand(&uop, &mut Stack::new(), Some(&inst));
        assert_eq!(out, "DEOPT_IF(x==NULL, BINARY_OP);\n");
    }

    #[test]
    fn test_deopt_condition_may_contain_nested_parens() {
        let uop = uop("{ DEOPT_IF(type(x, y) != cached); }");
        let inst = Instruction::with_family("CALL_TYPE", "CALL");
        let out = expand(&uop, &mut Stack::new(), Some(&inst));
        assert_eq!(out, "DEOPT_IF(type(x, y)!=cached, CALL);\n");
    }

    #[test]
    fn test_deopt_without_family_is_fatal() {
        let uop = uop("{ DEOPT_IF(x); }");
        let mut out = CWriter::new();
        let registry = ReplacementRegistry::new();
        let inst = Instruction::new("ORPHAN");
        let err = emit_tokens(&mut out, &uop, &mut Stack::new(), Some(&inst), &registry)
            .unwrap_err();
        assert!(matches!(err, RewriteError::MissingFamily { .. }));

        let err =
            emit_tokens(&mut out, &uop, &mut Stack::new(), None, &registry).unwrap_err();
        assert!(matches!(err, RewriteError::MissingFamily { .. }));
    }

    #[test]
    fn test_error_if_with_zero_offset() {
        let uop = uop("{ ERROR_IF(err < 0, error); }");
        let out = expand(&uop, &mut Stack::new(), None);
        assert_eq!(out, "if (err<0) goto error;\n");
    }

    #[test]
    fn test_error_if_with_literal_pops() {
        let uop = uop("{ ERROR_IF(err < 0, error); }");
        let mut stack = Stack::new();
        for _ in 0..3 {
            stack.pop(&StackVar::new("v", "1"));
        }
        let out = expand(&uop, &mut stack, None);
        assert_eq!(out, "if (err<0) goto pop_3_error;\n");
    }

    #[test]
    fn test_error_if_with_symbolic_offset() {
        let uop = uop("{ ERROR_IF(err < 0, error); }");
        let mut stack = Stack::new();
        stack.pop(&StackVar::new("args", "oparg"));
        let out = expand(&uop, &mut stack, None);
        assert_eq!(out, "if (err<0) { stack_pointer += -oparg; goto error; }\n");
    }

    #[test]
    fn test_decref_inputs_variants() {
        let mut uop = uop("{ DECREF_INPUTS(); }");
        uop.inputs = vec![
            StackVar::new("unused", "1"),
            StackVar::new("args", "oparg"),
            StackVar::new("maybe", "1").nullable(),
            StackVar::new("value", "1"),
            StackVar::new("top", "1").peeked(),
        ];
        let out = expand(&uop, &mut Stack::new(), None);
        assert_eq!(
            out,
            "for (int _i = oparg; --_i >= 0;) {\n    DECREF(args[_i]);\n}\n\
             XDECREF(maybe);\nDECREF(value);\n"
        );
    }

    #[test]
    fn test_decref_inputs_literal_array_size() {
        let mut uop = uop("{ DECREF_INPUTS(); }");
        uop.inputs = vec![StackVar::new("pair", "2")];
        let out = expand(&uop, &mut Stack::new(), None);
        assert_eq!(out, "for (int _i = 2; --_i >= 0;) {\n    DECREF(pair[_i]);\n}\n");
    }

    #[test]
    fn test_store_sp_flushes_then_publishes() {
        let uop = uop("{ STORE_SP(); }");
        let mut stack = Stack::new();
        stack.pop(&StackVar::new("a", "1"));
        stack.pop(&StackVar::new("b", "1"));
        let out = expand(&uop, &mut stack, None);
        assert_eq!(
            out,
            "stack_pointer += -2;\nframe_set_stack_pointer(frame, stack_pointer);\n"
        );
        // The flush consumed the buffered adjustment.
        assert!(stack.peek_offset().is_zero());
    }

    #[test]
    fn test_store_sp_with_nothing_buffered() {
        let uop = uop("{ STORE_SP(); }");
        let out = expand(&uop, &mut Stack::new(), None);
        assert_eq!(out, "frame_set_stack_pointer(frame, stack_pointer);\n");
    }

    #[test]
    fn test_eval_breaker_emitted_by_default() {
        let uop = uop("{ CHECK_EVAL_BREAKER(); }");
        let out = expand(&uop, &mut Stack::new(), None);
        assert_eq!(out, "CHECK_EVAL_BREAKER();\n");
    }

    #[test]
    fn test_eval_breaker_suppressed_when_redundant() {
        let mut uop = uop("{ CHECK_EVAL_BREAKER(); }");
        uop.properties = Properties {
            ends_with_eval_breaker: true,
            ..Properties::default()
        };
        let out = expand(&uop, &mut Stack::new(), None);
        assert_eq!(out, "");
    }

    #[test]
    fn test_eval_breaker_position_is_recorded() {
        let uop = Uop::new("TEST_OP", tokenize("{\n\n    CHECK_EVAL_BREAKER(); }").unwrap());
        let mut out = CWriter::new();
        let registry = ReplacementRegistry::new();
        emit_tokens(&mut out, &uop, &mut Stack::new(), None, &registry).unwrap();
        // The check is credited to line 3, where the invocation sat.
        assert_eq!(out.line_map(), &[(1, 3)]);
    }

    #[test]
    fn test_truncated_argument_list_is_fatal() {
        let uop = uop("{ ERROR_IF(x }");
        let mut out = CWriter::new();
        let registry = ReplacementRegistry::new();
        let err = emit_tokens(&mut out, &uop, &mut Stack::new(), None, &registry).unwrap_err();
        assert!(matches!(
            err,
            RewriteError::UnexpectedEndOfBody { pseudo: "ERROR_IF" }
        ));
    }

    #[test]
    fn test_custom_handler_replaces_builtin_table() {
        struct Nop;
        impl ReplacementHandler for Nop {
            fn expand(
                &self,
                out: &mut CWriter,
                _tkn: &Token,
                tokens: &mut TokenIter<'_>,
                _uop: &Uop,
                _stack: &mut Stack,
                _inst: Option<&Instruction>,
            ) -> Result<(), RewriteError> {
                skip_empty_args(tokens, "SPAM")?;
                out.emit_str("spam();\n");
                Ok(())
            }
        }
        let mut registry = ReplacementRegistry::empty();
        registry.register("SPAM", Box::new(Nop));

        let uop = uop("{ SPAM(); DEOPT_IF(x); }");
        let mut out = CWriter::new();
        emit_tokens(&mut out, &uop, &mut Stack::new(), None, &registry).unwrap();
        // SPAM expanded, DEOPT_IF copied through untouched (not registered).
        assert_eq!(out.output(), "spam();\nDEOPT_IF(x);\n");
    }

    #[test]
    fn test_pseudo_after_plain_statements() {
        let mut uop = uop("{ res = f(a); DECREF_INPUTS(); }");
        uop.inputs = vec![StackVar::new("a", "1")];
        let out = expand(&uop, &mut Stack::new(), None);
        assert_eq!(out, "res=f(a);\nDECREF(a);\n");
    }
}
