//! C source writer
//!
//! [`CWriter`] is the append-only sink that every handler and the dispatch
//! loop emit into. It accumulates the generated source for a whole output
//! file (it is the only value that survives across operations) and takes
//! care of the layout concerns the emitters should not have to think about:
//!
//! - Indentation, driven by the brace depth of the emitted text
//! - Line-start bookkeeping, so emitters can ask for a fresh line without
//!   knowing whether the previous emitter finished one
//! - Token-aware spacing when copying tokens through, so `int x` does not
//!   come out as `intx` and `- -` does not fuse into `--`
//! - Positional emission ([`CWriter::emit_at`]): text credited to the source
//!   line of an input token, recorded in a line map for diagnostics
//!
//! Statements are broken after top-level semicolons and braces; semicolons
//! inside parentheses (for-loop headers) stay on their line.

use crate::lexer::{Token, TokenKind};
use std::path::Path;

/// Spaces per indentation level in the generated source.
const INDENT: usize = 4;

/// Append-only writer for generated C source.
#[derive(Debug)]
pub struct CWriter {
    output: String,
    indent_level: usize,
    paren_depth: usize,
    at_line_start: bool,
    output_line: usize,
    line_map: Vec<(usize, u32)>,
}

impl CWriter {
    pub fn new() -> Self {
        CWriter {
            output: String::new(),
            indent_level: 0,
            paren_depth: 0,
            at_line_start: true,
            output_line: 1,
            line_map: Vec::new(),
        }
    }

    /// The accumulated output so far.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Consume the writer, returning the accumulated output.
    pub fn into_output(self) -> String {
        self.output
    }

    /// Mapping from output line to the source line of each positional
    /// emission, in emission order.
    pub fn line_map(&self) -> &[(usize, u32)] {
        &self.line_map
    }

    /// Ensure subsequent output starts on a fresh line.
    pub fn start_line(&mut self) {
        if !self.at_line_start {
            self.output.push('\n');
            self.output_line += 1;
            self.at_line_start = true;
        }
    }

    /// Emit raw text. Newlines, brace depth, and paren depth in the text are
    /// tracked; indentation is inserted at each line start.
    pub fn emit_str(&mut self, text: &str) {
        for ch in text.chars() {
            self.emit_char(ch);
        }
    }

    /// Emit text attributed to the source position of `tkn`, recording the
    /// attribution in the line map.
    pub fn emit_at(&mut self, text: &str, tkn: &Token) {
        self.line_map.push((self.output_line, tkn.line));
        self.emit_str(text);
    }

    /// Emit one token, inserting spacing and line breaks appropriate for its
    /// kind.
    pub fn emit_token(&mut self, tkn: &Token) {
        match tkn.kind {
            TokenKind::Semi if self.paren_depth == 0 => {
                self.trim_trailing_space();
                self.emit_str(";\n");
            }
            TokenKind::Semi => {
                self.trim_trailing_space();
                self.emit_str("; ");
            }
            TokenKind::Comma => {
                self.trim_trailing_space();
                self.emit_str(", ");
            }
            TokenKind::LBrace => {
                if !self.at_line_start && !self.output.ends_with(' ') {
                    self.output.push(' ');
                }
                self.emit_str("{\n");
            }
            TokenKind::RBrace => {
                self.start_line();
                self.emit_str("}\n");
            }
            _ => {
                if self.needs_space_before(&tkn.text) {
                    self.output.push(' ');
                }
                self.emit_str(&tkn.text);
            }
        }
    }

    fn trim_trailing_space(&mut self) {
        while self.output.ends_with(' ') {
            self.output.pop();
        }
    }

    /// A space is required when gluing the next text directly onto the
    /// output would fuse two tokens (`int` + `x`, `-` + `-`).
    fn needs_space_before(&self, text: &str) -> bool {
        if self.at_line_start {
            return false;
        }
        let last = match self.output.chars().last() {
            Some(c) => c,
            None => return false,
        };
        let first = match text.chars().next() {
            Some(c) => c,
            None => return false,
        };
        let wordish = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '"' || c == '\'';
        let operator = |c: char| "+-*/%<>=!&|^~.?:".contains(c);
        (wordish(last) && wordish(first)) || (operator(last) && operator(first))
    }

    fn emit_char(&mut self, ch: char) {
        match ch {
            '\n' => {
                self.output.push('\n');
                self.output_line += 1;
                self.at_line_start = true;
            }
            '}' => {
                self.indent_level = self.indent_level.saturating_sub(1);
                self.write_indent_if_needed();
                self.output.push('}');
            }
            '{' => {
                self.write_indent_if_needed();
                self.output.push('{');
                self.indent_level += 1;
            }
            '(' => {
                self.write_indent_if_needed();
                self.output.push('(');
                self.paren_depth += 1;
            }
            ')' => {
                self.write_indent_if_needed();
                self.output.push(')');
                self.paren_depth = self.paren_depth.saturating_sub(1);
            }
            c => {
                if !c.is_whitespace() {
                    self.write_indent_if_needed();
                }
                self.output.push(c);
            }
        }
    }

    fn write_indent_if_needed(&mut self) {
        if self.at_line_start {
            for _ in 0..self.indent_level * INDENT {
                self.output.push(' ');
            }
            self.at_line_start = false;
        }
    }
}

impl Default for CWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Display `path` relative to `root` when it lives under it, otherwise
/// unchanged. Keeps generated-file banners stable across checkouts.
pub fn root_relative_path(path: &Path, root: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => rel.display().to_string(),
        Err(_) => path.display().to_string(),
    }
}

/// Write the "generated file, do not edit" banner that prefixes every
/// generated source file.
pub fn write_header(out: &mut CWriter, generator: &str, sources: &[String], comment: &str) {
    out.emit_str(&format!("{comment} This file is generated by {generator}\n"));
    out.emit_str(&format!("{comment} from:\n"));
    out.emit_str(&format!("{comment}   {}\n", sources.join(", ")));
    out.emit_str(&format!("{comment} Do not edit!\n"));
}
