//! Tokenizer for C-like handler bodies
//!
//! Converts the source text of one handler definition body into a flat
//! stream of [`Token`]s for the rewriter. Handles:
//! - Identifiers and keywords (no distinction; the rewriter only matches text)
//! - Numeric, string, and character literals
//! - Line (`//`) and block (`/* */`) comments, which are skipped
//! - Punctuation and multi-character operators (`->`, `==`, `--`, `>>=`, ...)
//!
//! This is deliberately not a full C lexer. It produces exactly the token
//! categories the rewriter dispatches on; preprocessing, trigraphs, and
//! keyword classification are someone else's problem.
//!
//! # Usage
//!
//! ```
//! use casegen::lexer::{tokenize, TokenKind};
//!
//! let tokens = tokenize("DEOPT_IF(x == NULL);").unwrap();
//! assert_eq!(tokens[0].kind, TokenKind::Identifier);
//! assert_eq!(tokens[0].text, "DEOPT_IF");
//! ```

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LexError {
    #[error("Unterminated string literal at line {0}")]
    UnterminatedString(u32),
    #[error("Unterminated character constant at line {0}")]
    UnterminatedChar(u32),
    #[error("Unterminated block comment at line {0}")]
    UnterminatedComment(u32),
    #[error("Unexpected character '{ch}' at line {line}")]
    UnexpectedChar { ch: char, line: u32 },
}

/// Lexical category of a token.
///
/// The rewriter only ever branches on `Identifier`, `LParen`, `RParen`,
/// `Comma`, and `Semi`; the remaining kinds exist so the writer can make
/// sensible spacing and layout decisions when copying tokens through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Identifier,
    Number,
    String,
    CharConst,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Operator,
}

/// One lexical unit: a category, its literal text, and its source position
/// (1-based line and column). Tokens are immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
    pub column: u32,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: u32, column: u32) -> Self {
        Token {
            kind,
            text: text.into(),
            line,
            column,
        }
    }
}

/// Multi-character operators, longest first so maximal munch works.
const OPERATORS: &[&str] = &[
    "<<=", ">>=", "...", "->", "++", "--", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "+=",
    "-=", "*=", "/=", "%=", "&=", "|=", "^=",
];

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    input: &'a str,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Lexer {
            chars: input.char_indices().peekable(),
            input,
            line: 1,
            column: 1,
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn next_char(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.next_char();
                }
                Some('/') => {
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    match ahead.peek().map(|(_, c)| *c) {
                        Some('/') => {
                            while let Some(c) = self.next_char() {
                                if c == '\n' {
                                    break;
                                }
                            }
                        }
                        Some('*') => {
                            let start = self.line;
                            self.next_char();
                            self.next_char();
                            let mut prev = '\0';
                            loop {
                                match self.next_char() {
                                    Some('/') if prev == '*' => break,
                                    Some(c) => prev = c,
                                    None => return Err(LexError::UnterminatedComment(start)),
                                }
                            }
                        }
                        _ => return Ok(()),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_identifier(&mut self, first: char) -> String {
        let mut text = String::new();
        text.push(first);
        while let Some(c) = self.peek_char() {
            if c.is_ascii_alphanumeric() || c == '_' {
                text.push(c);
                self.next_char();
            } else {
                break;
            }
        }
        text
    }

    fn lex_number(&mut self, first: char) -> String {
        // Good enough for C integer and float literals, including hex and
        // exponent forms; the rewriter never inspects the digits.
        let mut text = String::new();
        text.push(first);
        while let Some(c) = self.peek_char() {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
                text.push(c);
                self.next_char();
            } else if (c == '+' || c == '-') && matches!(text.chars().last(), Some('e' | 'E' | 'p' | 'P')) {
                text.push(c);
                self.next_char();
            } else {
                break;
            }
        }
        text
    }

    fn lex_quoted(&mut self, quote: char, start: u32) -> Result<String, LexError> {
        let mut text = String::new();
        text.push(quote);
        loop {
            match self.next_char() {
                Some('\\') => {
                    text.push('\\');
                    match self.next_char() {
                        Some(c) => text.push(c),
                        None if quote == '"' => return Err(LexError::UnterminatedString(start)),
                        None => return Err(LexError::UnterminatedChar(start)),
                    }
                }
                Some(c) if c == quote => {
                    text.push(c);
                    return Ok(text);
                }
                Some(c) => text.push(c),
                None if quote == '"' => return Err(LexError::UnterminatedString(start)),
                None => return Err(LexError::UnterminatedChar(start)),
            }
        }
    }

    fn try_operator(&mut self) -> Option<String> {
        let input = self.input;
        let start = match self.chars.peek() {
            Some((i, _)) => *i,
            None => return None,
        };
        let rest = &input[start..];
        for op in OPERATORS {
            if rest.starts_with(op) {
                for _ in 0..op.len() {
                    self.next_char();
                }
                return Some((*op).to_string());
            }
        }
        None
    }
}

/// Tokenize one body of C-like source.
///
/// Whitespace and comments are discarded; everything else becomes a token
/// carrying its 1-based source position.
pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        lexer.skip_trivia()?;
        let (line, column) = (lexer.line, lexer.column);
        if let Some(text) = lexer.try_operator() {
            tokens.push(Token::new(TokenKind::Operator, text, line, column));
            continue;
        }
        let c = match lexer.next_char() {
            Some(c) => c,
            None => break,
        };
        let token = match c {
            '(' => Token::new(TokenKind::LParen, "(", line, column),
            ')' => Token::new(TokenKind::RParen, ")", line, column),
            '{' => Token::new(TokenKind::LBrace, "{", line, column),
            '}' => Token::new(TokenKind::RBrace, "}", line, column),
            '[' => Token::new(TokenKind::LBracket, "[", line, column),
            ']' => Token::new(TokenKind::RBracket, "]", line, column),
            ',' => Token::new(TokenKind::Comma, ",", line, column),
            ';' => Token::new(TokenKind::Semi, ";", line, column),
            '"' => Token::new(TokenKind::String, lexer.lex_quoted('"', line)?, line, column),
            '\'' => Token::new(
                TokenKind::CharConst,
                lexer.lex_quoted('\'', line)?,
                line,
                column,
            ),
            c if c.is_ascii_digit() => {
                Token::new(TokenKind::Number, lexer.lex_number(c), line, column)
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                Token::new(TokenKind::Identifier, lexer.lex_identifier(c), line, column)
            }
            c if c.is_ascii_punctuation() => {
                Token::new(TokenKind::Operator, c.to_string(), line, column)
            }
            c => return Err(LexError::UnexpectedChar { ch: c, line }),
        };
        tokens.push(token);
    }
    Ok(tokens)
}
