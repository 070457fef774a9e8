//! Token extraction from expression text
//!
//! Tokens are read lazily, one at a time: the tokenizer always holds the
//! current token and advances on [`Tokenizer::next_token`].
//!
//! # Examples
//!
//! ```
//! use rivet::expression::tokenizer::{tokenize, TokenKind};
//!
//! let tokens = tokenize("foo123 != 'it''s'").unwrap();
//! let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
//! assert_eq!(kinds, vec![TokenKind::Keyword, TokenKind::NotEqual, TokenKind::String]);
//! assert_eq!(tokens[2].text, "it's");
//! ```

use crate::error::BuildError;
use crate::location::Location;
use std::fmt;

/// Kind of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// State before the first token was read
    BeginOfInput,
    /// No more input
    EndOfInput,
    /// A run of whitespace (only produced when whitespace is not ignored)
    Whitespace,
    /// Unsigned run of decimal digits
    Number,
    /// Single-quoted string, with `''` decoded to `'`
    String,
    /// Identifier such as `project.name` or `to-upper`
    Keyword,
    /// Any character without a dedicated kind
    Punctuation,
    Plus,
    Minus,
    Mul,
    Div,
    Mod,
    LessThan,
    GreaterThan,
    LessOrEqual,
    GreaterOrEqual,
    Equal,
    NotEqual,
    Not,
    LeftParen,
    RightParen,
    LeftCurly,
    RightCurly,
    Dollar,
    Comma,
    Dot,
    DoubleColon,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::BeginOfInput => "beginning of input",
            TokenKind::EndOfInput => "end of input",
            TokenKind::Whitespace => "whitespace",
            TokenKind::Number => "number",
            TokenKind::String => "string",
            TokenKind::Keyword => "identifier",
            TokenKind::Punctuation => "punctuation",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Mul => "'*'",
            TokenKind::Div => "'/'",
            TokenKind::Mod => "'%'",
            TokenKind::LessThan => "'<'",
            TokenKind::GreaterThan => "'>'",
            TokenKind::LessOrEqual => "'<='",
            TokenKind::GreaterOrEqual => "'>='",
            TokenKind::Equal => "'=='",
            TokenKind::NotEqual => "'!='",
            TokenKind::Not => "'!'",
            TokenKind::LeftParen => "'('",
            TokenKind::RightParen => "')'",
            TokenKind::LeftCurly => "'{'",
            TokenKind::RightCurly => "'}'",
            TokenKind::Dollar => "'$'",
            TokenKind::Comma => "','",
            TokenKind::Dot => "'.'",
            TokenKind::DoubleColon => "'::'",
        };
        write!(f, "{}", name)
    }
}

/// A single token with the byte offset where it begins
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub start: usize,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, start: usize) -> Self {
        Self { kind, text: text.into(), start }
    }
}

/// Tokenizer options
#[derive(Debug, Clone, Copy)]
pub struct TokenizerOptions {
    /// Skip whitespace runs instead of producing [`TokenKind::Whitespace`]
    pub ignore_whitespace: bool,
    /// Produce exactly one raw character per token
    pub single_char_mode: bool,
}

impl Default for TokenizerOptions {
    fn default() -> Self {
        Self { ignore_whitespace: true, single_char_mode: false }
    }
}

/// Lazy tokenizer over expression text.
#[derive(Debug)]
pub struct Tokenizer<'a> {
    source: &'a str,
    /// Byte offset of the next unread character
    position: usize,
    current: Token,
    options: TokenizerOptions,
    /// Location of offset 0, used for lexical errors
    location: Location,
}

impl<'a> Tokenizer<'a> {
    /// Start tokenizing `text`, ignoring whitespace. The first token is read
    /// immediately.
    pub fn new(text: &'a str) -> Result<Self, BuildError> {
        Self::start(text, Location::Unknown, TokenizerOptions::default())
    }

    /// Start tokenizing `text` whose first character sits at `location`.
    pub fn start(
        text: &'a str,
        location: Location,
        options: TokenizerOptions,
    ) -> Result<Self, BuildError> {
        let mut tokenizer = Self {
            source: text,
            position: 0,
            current: Token::new(TokenKind::BeginOfInput, "", 0),
            options,
            location,
        };
        tokenizer.current = tokenizer.read_token()?;
        Ok(tokenizer)
    }

    /// The current token.
    pub fn current(&self) -> &Token {
        &self.current
    }

    /// Kind of the current token.
    pub fn kind(&self) -> TokenKind {
        self.current.kind
    }

    /// The full source text.
    pub fn source(&self) -> &'a str {
        self.source
    }

    /// Advance to the next token.
    ///
    /// Fails with [`BuildError::Tokenizer`] once end of input was produced.
    pub fn next_token(&mut self) -> Result<(), BuildError> {
        if self.current.kind == TokenKind::EndOfInput {
            return Err(BuildError::Tokenizer);
        }
        self.current = self.read_token()?;
        Ok(())
    }

    /// Look at the next unread character without consuming it.
    pub fn peek_char(&self) -> Option<char> {
        self.source[self.position..].chars().next()
    }

    /// Switch single-character mode for subsequent reads.
    pub fn set_single_char_mode(&mut self, enabled: bool) {
        self.options.single_char_mode = enabled;
    }

    /// Switch whitespace skipping for subsequent reads.
    pub fn set_ignore_whitespace(&mut self, ignore: bool) {
        self.options.ignore_whitespace = ignore;
    }

    /// Location of a byte offset in the source.
    pub fn location_at(&self, offset: usize) -> Location {
        let offset = offset.min(self.source.len());
        self.location.advance(&self.source[..offset])
    }

    fn read_token(&mut self) -> Result<Token, BuildError> {
        loop {
            let start = self.position;
            let Some(c) = self.peek_char() else {
                return Ok(Token::new(TokenKind::EndOfInput, "", start));
            };

            if self.options.single_char_mode {
                self.position += c.len_utf8();
                let kind = if c.is_whitespace() { TokenKind::Whitespace } else { single_char_kind(c) };
                return Ok(Token::new(kind, c, start));
            }

            if c.is_whitespace() {
                self.position = self.scan_while(start, char::is_whitespace);
                if self.options.ignore_whitespace {
                    continue;
                }
                return Ok(Token::new(
                    TokenKind::Whitespace,
                    &self.source[start..self.position],
                    start,
                ));
            }

            if c.is_ascii_digit() {
                self.position = self.scan_while(start, |c| c.is_ascii_digit());
                return Ok(Token::new(TokenKind::Number, &self.source[start..self.position], start));
            }

            if c == '\'' {
                return self.read_string(start);
            }

            if c.is_alphabetic() || c == '_' {
                return self.read_keyword(start);
            }

            self.position += c.len_utf8();
            if let Some(next) = self.peek_char() {
                let kind = match (c, next) {
                    (':', ':') => Some(TokenKind::DoubleColon),
                    ('!', '=') => Some(TokenKind::NotEqual),
                    ('=', '=') => Some(TokenKind::Equal),
                    ('<', '=') => Some(TokenKind::LessOrEqual),
                    ('>', '=') => Some(TokenKind::GreaterOrEqual),
                    _ => None,
                };
                if let Some(kind) = kind {
                    self.position += next.len_utf8();
                    return Ok(Token::new(kind, &self.source[start..self.position], start));
                }
            }

            return Ok(Token::new(single_char_kind(c), c, start));
        }
    }

    fn read_string(&mut self, start: usize) -> Result<Token, BuildError> {
        self.position += 1;
        let mut value = String::new();

        loop {
            match self.peek_char() {
                None => {
                    return Err(self.lexical("unterminated string", start));
                }
                Some('\'') => {
                    self.position += 1;
                    if self.peek_char() == Some('\'') {
                        value.push('\'');
                        self.position += 1;
                    } else {
                        break;
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.position += c.len_utf8();
                }
            }
        }

        Ok(Token::new(TokenKind::String, value, start))
    }

    fn read_keyword(&mut self, start: usize) -> Result<Token, BuildError> {
        self.position = self.scan_while(start, |c| {
            c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '\\')
        });
        let text = &self.source[start..self.position];

        if text.ends_with('-') || text.ends_with('.') {
            return Err(self.lexical("identifier cannot end with '-' or '.'", start));
        }

        Ok(Token::new(TokenKind::Keyword, text, start))
    }

    fn scan_while(&self, start: usize, pred: impl Fn(char) -> bool) -> usize {
        self.source[start..]
            .char_indices()
            .find(|&(_, c)| !pred(c))
            .map(|(i, _)| start + i)
            .unwrap_or(self.source.len())
    }

    fn lexical(&self, message: &str, start: usize) -> BuildError {
        BuildError::Lexical {
            message: message.to_string(),
            text: self.source[start..self.position].to_string(),
            position: start,
            location: self.location_at(start),
        }
    }
}

fn single_char_kind(c: char) -> TokenKind {
    match c {
        '+' => TokenKind::Plus,
        '-' => TokenKind::Minus,
        '*' => TokenKind::Mul,
        '/' => TokenKind::Div,
        '%' => TokenKind::Mod,
        '<' => TokenKind::LessThan,
        '>' => TokenKind::GreaterThan,
        '(' => TokenKind::LeftParen,
        ')' => TokenKind::RightParen,
        '{' => TokenKind::LeftCurly,
        '}' => TokenKind::RightCurly,
        '!' => TokenKind::Not,
        '$' => TokenKind::Dollar,
        ',' => TokenKind::Comma,
        '.' => TokenKind::Dot,
        _ => TokenKind::Punctuation,
    }
}

/// Collect every token of `text`, ignoring whitespace.
pub fn tokenize(text: &str) -> Result<Vec<Token>, BuildError> {
    let mut tokenizer = Tokenizer::new(text)?;
    let mut tokens = Vec::new();

    while tokenizer.kind() != TokenKind::EndOfInput {
        tokens.push(tokenizer.current().clone());
        tokenizer.next_token()?;
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        tokenize(text).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_keyword_not_equal_string() {
        let tokens = tokenize("foo123 != 'it''s'").unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0], Token::new(TokenKind::Keyword, "foo123", 0));
        assert_eq!(tokens[1], Token::new(TokenKind::NotEqual, "!=", 7));
        assert_eq!(tokens[2], Token::new(TokenKind::String, "it's", 10));
    }

    #[test]
    fn test_empty_input() {
        let tokenizer = Tokenizer::new("").unwrap();
        assert_eq!(tokenizer.kind(), TokenKind::EndOfInput);
        assert!(tokenize("   ").unwrap().is_empty());
    }

    #[test]
    fn test_read_past_end() {
        let mut tokenizer = Tokenizer::new("a").unwrap();
        tokenizer.next_token().unwrap();
        assert_eq!(tokenizer.kind(), TokenKind::EndOfInput);

        let err = tokenizer.next_token().unwrap_err();
        assert!(matches!(err, BuildError::Tokenizer));
        assert!(!err.location().is_known());
    }

    #[test]
    fn test_two_char_operators() {
        assert_eq!(
            kinds(":: != == <= >= < > !"),
            vec![
                TokenKind::DoubleColon,
                TokenKind::NotEqual,
                TokenKind::Equal,
                TokenKind::LessOrEqual,
                TokenKind::GreaterOrEqual,
                TokenKind::LessThan,
                TokenKind::GreaterThan,
                TokenKind::Not,
            ]
        );
    }

    #[test]
    fn test_single_char_operators() {
        assert_eq!(
            kinds("+-*/%(){}$,"),
            vec![
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Mul,
                TokenKind::Div,
                TokenKind::Mod,
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftCurly,
                TokenKind::RightCurly,
                TokenKind::Dollar,
                TokenKind::Comma,
            ]
        );
    }

    #[test]
    fn test_lone_colon_and_equals_are_punctuation() {
        let tokens = tokenize(": = #").unwrap();
        assert!(tokens.iter().all(|t| t.kind == TokenKind::Punctuation));
        assert_eq!(tokens[1].text, "=");
    }

    #[test]
    fn test_function_call_tokens() {
        let tokens = tokenize("string::to-upper(project.name)").unwrap();
        let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["string", "::", "to-upper", "(", "project.name", ")"]);
    }

    #[test]
    fn test_identifier_characters() {
        let tokens = tokenize(r"_a.b-c\d 9x").unwrap();
        assert_eq!(tokens[0].text, r"_a.b-c\d");
        assert_eq!(tokens[1], Token::new(TokenKind::Number, "9", 9));
        assert_eq!(tokens[2], Token::new(TokenKind::Keyword, "x", 10));
    }

    #[test]
    fn test_identifier_ending_with_dash() {
        let err = tokenize("  abc-").unwrap_err();
        match err {
            BuildError::Lexical { text, position, .. } => {
                assert_eq!(text, "abc-");
                assert_eq!(position, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_identifier_ending_with_dot_reports_column() {
        let location = Location::new("rivet.toml", 4, 10);
        let mut tokenizer =
            Tokenizer::start("x + abc.", location, TokenizerOptions::default()).unwrap();
        tokenizer.next_token().unwrap();
        let err = tokenizer.next_token().unwrap_err();
        assert_eq!(err.location(), &Location::new("rivet.toml", 4, 14));
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("'abc").unwrap_err();
        assert!(matches!(err, BuildError::Lexical { ref message, .. } if message.contains("unterminated")));
    }

    #[test]
    fn test_string_with_only_escaped_quote() {
        let tokens = tokenize("''''").unwrap();
        assert_eq!(tokens, vec![Token::new(TokenKind::String, "'", 0)]);
    }

    #[test]
    fn test_whitespace_emitted_when_not_ignored() {
        let options = TokenizerOptions { ignore_whitespace: false, single_char_mode: false };
        let mut tokenizer = Tokenizer::start("a  \tb", Location::Unknown, options).unwrap();
        tokenizer.next_token().unwrap();
        assert_eq!(tokenizer.current(), &Token::new(TokenKind::Whitespace, "  \t", 1));
        tokenizer.next_token().unwrap();
        assert_eq!(tokenizer.current().text, "b");
    }

    #[test]
    fn test_single_char_mode() {
        let options = TokenizerOptions { ignore_whitespace: false, single_char_mode: true };
        let mut tokenizer = Tokenizer::start("ab12 ${", Location::Unknown, options).unwrap();
        let mut seen = Vec::new();
        while tokenizer.kind() != TokenKind::EndOfInput {
            seen.push((tokenizer.kind(), tokenizer.current().text.clone()));
            tokenizer.next_token().unwrap();
        }
        assert_eq!(seen.len(), 7);
        assert_eq!(seen[0], (TokenKind::Punctuation, "a".to_string()));
        assert_eq!(seen[2], (TokenKind::Punctuation, "1".to_string()));
        assert_eq!(seen[4], (TokenKind::Whitespace, " ".to_string()));
        assert_eq!(seen[5], (TokenKind::Dollar, "$".to_string()));
        assert_eq!(seen[6], (TokenKind::LeftCurly, "{".to_string()));
    }

    #[test]
    fn test_switching_modes_mid_stream() {
        let options = TokenizerOptions { ignore_whitespace: false, single_char_mode: true };
        let mut tokenizer = Tokenizer::start("x!=y", Location::Unknown, options).unwrap();
        assert_eq!(tokenizer.current().text, "x");
        tokenizer.set_single_char_mode(false);
        tokenizer.next_token().unwrap();
        assert_eq!(tokenizer.kind(), TokenKind::NotEqual);
        assert_eq!(tokenizer.peek_char(), Some('y'));
    }

    #[test]
    fn test_offsets_with_multibyte_text() {
        let tokens = tokenize("'é' + b").unwrap();
        assert_eq!(tokens[1].start, 5);
        assert_eq!(tokens[2].start, 7);
    }
}
