//! Tokenizer for the expression language.

use super::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Template(Vec<TemplateChunk>),
    Regex { source: String, flags: String },
    Ident(String),
    Punct(&'static str),
}

/// Raw piece of a template literal; `Expr` holds unparsed source and the
/// offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateChunk {
    Text(String),
    Expr(String, usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

/// Longest operators first so that `===` wins over `==`.
const PUNCTUATION: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "=>", "!", "<", ">", "+", "-",
    "*", "/", "%", "?", ":", ".", ",", "(", ")", "[", "]", "{", "}",
];

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, CompileError> {
    Lexer { source, pos: 0, tokens: Vec::new() }.run()
}

struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    tokens: Vec<Spanned>,
}

impl<'a> Lexer<'a> {
    fn run(mut self) -> Result<Vec<Spanned>, CompileError> {
        while let Some(ch) = self.peek() {
            let offset = self.pos;
            if ch.is_whitespace() {
                self.pos += ch.len_utf8();
                continue;
            }
            let token = if ch.is_ascii_digit()
                || (ch == '.' && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()))
            {
                self.number()?
            } else if ch == '\'' || ch == '"' {
                self.string(ch)?
            } else if ch == '`' {
                self.template()?
            } else if ch == '/' && self.regex_allowed() {
                self.regex()?
            } else if ch == '_' || ch == '$' || ch.is_alphabetic() {
                self.ident()
            } else {
                self.punct(ch)?
            };
            self.tokens.push(Spanned { token, offset });
        }
        Ok(self.tokens)
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    /// A `/` starts a regex literal unless it follows something that ends
    /// an operand.
    fn regex_allowed(&self) -> bool {
        match self.tokens.last().map(|t| &t.token) {
            None => true,
            Some(Token::Punct(p)) => !matches!(*p, ")" | "]" | "}"),
            Some(_) => false,
        }
    }

    fn number(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            let exponent_sign = (ch == '+' || ch == '-')
                && self.source[start..self.pos].ends_with(['e', 'E']);
            if ch.is_ascii_alphanumeric() || ch == '.' || exponent_sign {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = &self.source[start..self.pos];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| CompileError::InvalidNumber(text.to_string()))
    }

    fn escape(&mut self, start: usize) -> Result<char, CompileError> {
        let unterminated = || CompileError::Unterminated { what: "escape sequence", offset: start };
        Ok(match self.bump().ok_or_else(unterminated)? {
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            '0' => '\0',
            'u' => {
                let hex: String = (0..4).filter_map(|_| self.bump()).collect();
                u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(unterminated)?
            }
            other => other,
        })
    }

    fn string(&mut self, quote: char) -> Result<Token, CompileError> {
        let start = self.pos;
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(CompileError::Unterminated { what: "string", offset: start }),
                Some(ch) if ch == quote => return Ok(Token::Str(out)),
                Some('\\') => out.push(self.escape(start)?),
                Some(ch) => out.push(ch),
            }
        }
    }

    fn template(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        self.bump();
        let mut chunks = Vec::new();
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(CompileError::Unterminated { what: "template", offset: start }),
                Some('`') => break,
                Some('\\') => text.push(self.escape(start)?),
                Some('$') if self.peek() == Some('{') => {
                    self.bump();
                    if !text.is_empty() {
                        chunks.push(TemplateChunk::Text(std::mem::take(&mut text)));
                    }
                    let expr_start = self.pos;
                    let mut depth = 1usize;
                    let mut quote: Option<char> = None;
                    loop {
                        let ch = self.bump().ok_or(CompileError::Unterminated {
                            what: "template substitution",
                            offset: expr_start,
                        })?;
                        match (quote, ch) {
                            (Some(q), c) if c == q => quote = None,
                            (Some(_), '\\') => {
                                self.bump();
                            }
                            (Some(_), _) => {}
                            (None, '\'' | '"' | '`') => quote = Some(ch),
                            (None, '{') => depth += 1,
                            (None, '}') => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                    let inner = &self.source[expr_start..self.pos - 1];
                    chunks.push(TemplateChunk::Expr(inner.to_string(), expr_start));
                }
                Some(ch) => text.push(ch),
            }
        }
        if !text.is_empty() {
            chunks.push(TemplateChunk::Text(text));
        }
        Ok(Token::Template(chunks))
    }

    fn regex(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        self.bump();
        let mut source = String::new();
        let mut in_class = false;
        loop {
            match self.bump() {
                None | Some('\n') => {
                    return Err(CompileError::Unterminated { what: "regular expression", offset: start })
                }
                Some('\\') => {
                    source.push('\\');
                    if let Some(next) = self.bump() {
                        source.push(next);
                    }
                }
                Some('[') => {
                    in_class = true;
                    source.push('[');
                }
                Some(']') => {
                    in_class = false;
                    source.push(']');
                }
                Some('/') if !in_class => break,
                Some(ch) => source.push(ch),
            }
        }
        let mut flags = String::new();
        while let Some(ch) = self.peek().filter(char::is_ascii_alphabetic) {
            flags.push(ch);
            self.pos += 1;
        }
        Ok(Token::Regex { source, flags })
    }

    fn ident(&mut self) -> Token {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch == '_' || ch == '$' || ch.is_alphanumeric() {
                self.pos += ch.len_utf8();
            } else {
                break;
            }
        }
        Token::Ident(self.source[start..self.pos].to_string())
    }

    fn punct(&mut self, ch: char) -> Result<Token, CompileError> {
        let rest = &self.source[self.pos..];
        for p in PUNCTUATION {
            // `?.` followed by a digit is a ternary with a decimal literal.
            if *p == "?."
                && rest
                    .get(2..)
                    .is_some_and(|r| r.starts_with(|c: char| c.is_ascii_digit()))
            {
                continue;
            }
            if rest.starts_with(p) {
                self.pos += p.len();
                return Ok(Token::Punct(p));
            }
        }
        Err(CompileError::UnexpectedChar { ch, offset: self.pos })
    }
}
