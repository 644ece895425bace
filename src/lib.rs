//! Casegen - interpreter case generator core
//!
//! Expands the pseudo-instructions embedded in bytecode-handler definition
//! bodies (`DEOPT_IF`, `ERROR_IF`, `DECREF_INPUTS`, `STORE_SP`,
//! `CHECK_EVAL_BREAKER`) into the literal C statements of the generated
//! interpreter's dispatch loop.
//!
//! # Architecture
//!
//! ```text
//! definition body text
//!         │
//!         ▼
//! ┌──────────────┐   tokens   ┌───────────────────────────┐
//! │ lexer        ├───────────▶│ rewriter (dispatch loop)  │
//! └──────────────┘            │  ┌─────────────────────┐  │
//!                             │  │ ReplacementRegistry │  │
//! ┌──────────────┐  metadata  │  │  DEOPT_IF  ERROR_IF │  │
//! │ analyzer     ├───────────▶│  │  DECREF_INPUTS ...  │  │
//! └──────────────┘            │  └─────────────────────┘  │
//! ┌──────────────┐  offsets   │                           │
//! │ stack model  │◀──────────▶│                           │
//! └──────────────┘            └─────────────┬─────────────┘
//!                                           │ C source
//!                                           ▼
//!                             ┌───────────────────────────┐
//!                             │ cwriter (output sink)     │
//!                             └───────────────────────────┘
//! ```
//!
//! The crate is a library with no process boundary of its own: the
//! surrounding driver lexes and analyzes the definition files, constructs a
//! fresh [`stack::Stack`] per operation, calls [`rewriter::emit_tokens`]
//! once per body, and writes the accumulated [`cwriter::CWriter`] output to
//! the generated file behind a [`cwriter::write_header`] banner.
//!
//! # Example
//!
//! ```
//! use casegen::analyzer::{Instruction, Uop};
//! use casegen::cwriter::CWriter;
//! use casegen::lexer::tokenize;
//! use casegen::rewriter::{emit_tokens, ReplacementRegistry};
//! use casegen::stack::Stack;
//!
//! let body = tokenize("{ DEOPT_IF(left == NULL); }").unwrap();
//! let uop = Uop::new("GUARD_LEFT", body);
//! let inst = Instruction::with_family("BINARY_OP_ADD_INT", "BINARY_OP");
//!
//! let mut out = CWriter::new();
//! let mut stack = Stack::new();
//! emit_tokens(&mut out, &uop, &mut stack, Some(&inst), &ReplacementRegistry::new()).unwrap();
//!
//! assert_eq!(out.output(), "DEOPT_IF(left==NULL, BINARY_OP);\n");
//! ```

pub mod analyzer;
pub mod cwriter;
pub mod lexer;
pub mod rewriter;
pub mod stack;

pub use analyzer::{cflags, Family, Instruction, Properties, StackVar, Uop};
pub use cwriter::{root_relative_path, write_header, CWriter};
pub use lexer::{tokenize, LexError, Token, TokenKind};
pub use rewriter::{emit_tokens, ReplacementHandler, ReplacementRegistry, RewriteError};
pub use stack::{OffsetValue, Stack, StackOffset};
