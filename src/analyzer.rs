//! Operation metadata consumed by the rewriter
//!
//! These records are produced by the semantic analysis pass that digests the
//! instruction-definition files; the rewriter treats them as read-only. Only
//! the fields the rewriter actually consults are modeled here: the body
//! token sequence, the declared stack inputs, the owning instruction and its
//! family, and the property flags.

use crate::lexer::Token;

/// One declared stack slot of an operation: a name, a size (a C expression,
/// usually the literal `"1"`), and the flags that control whether the
/// decref-inputs expansion may release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackVar {
    pub name: String,
    pub size: String,
    /// Conditionally present; its C value may be NULL.
    pub condition: bool,
    /// Read without being consumed; the operation does not own a reference.
    pub peek: bool,
}

impl StackVar {
    pub fn new(name: impl Into<String>, size: impl Into<String>) -> Self {
        StackVar {
            name: name.into(),
            size: size.into(),
            condition: false,
            peek: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.condition = true;
        self
    }

    pub fn peeked(mut self) -> Self {
        self.peek = true;
        self
    }

    /// Placeholder slots reserve stack space but bind no value, so there is
    /// nothing to release.
    pub fn is_placeholder(&self) -> bool {
        self.name == "unused" || self.name == "null"
    }
}

/// Boolean facts about one operation, established by analysis of its body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    pub oparg: bool,
    pub uses_co_consts: bool,
    pub uses_co_names: bool,
    pub jumps: bool,
    pub has_free: bool,
    pub uses_locals: bool,
    pub eval_breaker: bool,
    pub deopts: bool,
    pub infallible: bool,
    pub escapes: bool,
    pub pure: bool,
    pub passthrough: bool,
    /// The body's last action is already an eval-breaker check, so emitting
    /// another one would be redundant.
    pub ends_with_eval_breaker: bool,
}

/// One abstract operation (micro-op): its un-rewritten body bounded by its
/// own braces, its declared stack inputs in declaration order, and its
/// property flags.
#[derive(Debug, Clone)]
pub struct Uop {
    pub name: String,
    pub body: Vec<Token>,
    pub inputs: Vec<StackVar>,
    pub properties: Properties,
}

impl Uop {
    pub fn new(name: impl Into<String>, body: Vec<Token>) -> Self {
        Uop {
            name: name.into(),
            body,
            inputs: Vec::new(),
            properties: Properties::default(),
        }
    }
}

/// A named grouping of related instructions sharing one deopt target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Family {
    pub name: String,
}

impl Family {
    pub fn new(name: impl Into<String>) -> Self {
        Family { name: name.into() }
    }
}

/// The instruction an operation belongs to. The family is optional; it is
/// required only by the deopt-guard expansion.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub name: String,
    pub family: Option<Family>,
}

impl Instruction {
    pub fn new(name: impl Into<String>) -> Self {
        Instruction {
            name: name.into(),
            family: None,
        }
    }

    pub fn with_family(name: impl Into<String>, family: impl Into<String>) -> Self {
        Instruction {
            name: name.into(),
            family: Some(Family::new(family)),
        }
    }
}

/// Render a property record as the `|`-joined C flag expression used in the
/// generated metadata tables. `"0"` when no flag is set.
pub fn cflags(p: &Properties) -> String {
    let mut flags: Vec<&str> = Vec::new();
    if p.oparg {
        flags.push("HAS_ARG_FLAG");
    }
    if p.uses_co_consts {
        flags.push("HAS_CONST_FLAG");
    }
    if p.uses_co_names {
        flags.push("HAS_NAME_FLAG");
    }
    if p.jumps {
        flags.push("HAS_JUMP_FLAG");
    }
    if p.has_free {
        flags.push("HAS_FREE_FLAG");
    }
    if p.uses_locals {
        flags.push("HAS_LOCAL_FLAG");
    }
    if p.eval_breaker {
        flags.push("HAS_EVAL_BREAK_FLAG");
    }
    if p.deopts {
        flags.push("HAS_DEOPT_FLAG");
    }
    if !p.infallible {
        flags.push("HAS_ERROR_FLAG");
    }
    if p.escapes {
        flags.push("HAS_ESCAPES_FLAG");
    }
    if p.pure {
        flags.push("HAS_PURE_FLAG");
    }
    if p.passthrough {
        flags.push("HAS_PASSTHROUGH_FLAG");
    }
    if flags.is_empty() {
        "0".to_string()
    } else {
        flags.join(" | ")
    }
}
