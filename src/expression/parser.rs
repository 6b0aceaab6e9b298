//! Recursive-descent parser producing the expression AST.
//!
//! Identifiers are resolved while parsing: scope names become positional
//! slots, arrow-function parameters become locals, and anything else is
//! rejected so that typos fail at startup instead of per request.

use std::sync::Arc;

use super::lexer::{tokenize, Spanned, TemplateChunk, Token};
use super::value::{Pattern, Value};
use super::CompileError;

#[derive(Debug)]
pub enum Node {
    Literal(Value),
    Template(Vec<TemplatePart>),
    Slot(usize),
    Local(String),
    Tools,
    Array(Vec<Node>),
    Object(Vec<(String, Node)>),
    Member {
        object: Box<Node>,
        property: Property,
        optional: bool,
    },
    Call {
        callee: Box<Node>,
        args: Vec<Node>,
        optional: bool,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Conditional {
        test: Box<Node>,
        consequent: Box<Node>,
        alternate: Box<Node>,
    },
    Lambda(Arc<LambdaDef>),
}

#[derive(Debug)]
pub enum TemplatePart {
    Text(String),
    Expr(Node),
}

#[derive(Debug)]
pub enum Property {
    Named(String),
    Computed(Box<Node>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug)]
pub struct LambdaDef {
    pub params: Vec<String>,
    pub body: Node,
}

/// Parse `source`, resolving free identifiers against `scope_names`.
pub fn parse(source: &str, scope_names: &[&str]) -> Result<Node, CompileError> {
    parse_at(source, 0, scope_names, &[])
}

fn parse_at(
    source: &str,
    base_offset: usize,
    scope_names: &[&str],
    locals: &[String],
) -> Result<Node, CompileError> {
    let tokens = tokenize(source).map_err(|e| e.shifted(base_offset))?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        base_offset,
        scope_names,
        locals: locals.to_vec(),
    };
    let node = parser.expression()?;
    match parser.tokens.get(parser.pos) {
        None => Ok(node),
        Some(spanned) => Err(parser.unexpected(spanned, "end of expression")),
    }
}

struct Parser<'a> {
    tokens: Vec<Spanned>,
    pos: usize,
    base_offset: usize,
    scope_names: &'a [&'a str],
    locals: Vec<String>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|s| &s.token)
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Some(Token::Punct(q)) if *q == p)
    }

    fn eat(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, p: &'static str) -> Result<(), CompileError> {
        if self.eat(p) {
            return Ok(());
        }
        Err(self.unexpected_here(p))
    }

    fn offset(&self) -> usize {
        self.base_offset
            + self
                .tokens
                .get(self.pos)
                .map(|s| s.offset)
                .unwrap_or_default()
    }

    fn unexpected(&self, spanned: &Spanned, expected: &str) -> CompileError {
        CompileError::UnexpectedToken {
            found: describe(&spanned.token),
            expected: expected.to_string(),
            offset: self.base_offset + spanned.offset,
        }
    }

    fn unexpected_here(&self, expected: &str) -> CompileError {
        match self.tokens.get(self.pos) {
            Some(spanned) => self.unexpected(spanned, expected),
            None => CompileError::UnexpectedEnd { expected: expected.to_string() },
        }
    }

    fn expression(&mut self) -> Result<Node, CompileError> {
        if let Some(params) = self.arrow_params() {
            return self.lambda(params);
        }
        self.conditional()
    }

    /// Detect `x =>` or `(a, b) =>` without consuming anything.
    fn arrow_params(&self) -> Option<Vec<String>> {
        match (self.peek(), self.peek_at(1)) {
            (Some(Token::Ident(name)), Some(Token::Punct("=>"))) => return Some(vec![name.clone()]),
            (Some(Token::Punct("(")), _) => {}
            _ => return None,
        }
        let mut params = Vec::new();
        let mut i = 1;
        if matches!(self.peek_at(i), Some(Token::Punct(")"))) {
            return matches!(self.peek_at(i + 1), Some(Token::Punct("=>"))).then_some(params);
        }
        loop {
            match self.peek_at(i) {
                Some(Token::Ident(name)) => params.push(name.clone()),
                _ => return None,
            }
            match self.peek_at(i + 1) {
                Some(Token::Punct(",")) => i += 2,
                Some(Token::Punct(")")) => {
                    return matches!(self.peek_at(i + 2), Some(Token::Punct("=>"))).then_some(params);
                }
                _ => return None,
            }
        }
    }

    fn lambda(&mut self, params: Vec<String>) -> Result<Node, CompileError> {
        while !self.eat("=>") {
            self.pos += 1;
        }
        let depth = self.locals.len();
        self.locals.extend(params.iter().cloned());
        let body = self.expression();
        self.locals.truncate(depth);
        Ok(Node::Lambda(Arc::new(LambdaDef { params, body: body? })))
    }

    fn conditional(&mut self) -> Result<Node, CompileError> {
        let test = self.logical_or()?;
        if !self.eat("?") {
            return Ok(test);
        }
        let consequent = self.expression()?;
        self.expect(":")?;
        let alternate = self.expression()?;
        Ok(Node::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn logical_or(&mut self) -> Result<Node, CompileError> {
        let mut left = self.logical_and()?;
        loop {
            let op = if self.eat("||") {
                LogicalOp::Or
            } else if self.eat("??") {
                LogicalOp::Nullish
            } else {
                return Ok(left);
            };
            let right = self.logical_and()?;
            left = Node::Logical { op, left: Box::new(left), right: Box::new(right) };
        }
    }

    fn logical_and(&mut self) -> Result<Node, CompileError> {
        let mut left = self.equality()?;
        while self.eat("&&") {
            let right = self.equality()?;
            left = Node::Logical { op: LogicalOp::And, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<Node, CompileError>,
    ) -> Result<Node, CompileError> {
        let mut left = next(self)?;
        'outer: loop {
            for (symbol, op) in ops {
                if self.eat(symbol) {
                    let right = next(self)?;
                    left = Node::Binary { op: *op, left: Box::new(left), right: Box::new(right) };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn equality(&mut self) -> Result<Node, CompileError> {
        self.binary_level(
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNe),
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::Ne),
            ],
            Self::relational,
        )
    }

    fn relational(&mut self) -> Result<Node, CompileError> {
        self.binary_level(
            &[("<=", BinaryOp::Le), (">=", BinaryOp::Ge), ("<", BinaryOp::Lt), (">", BinaryOp::Gt)],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Node, CompileError> {
        self.binary_level(&[("+", BinaryOp::Add), ("-", BinaryOp::Sub)], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<Node, CompileError> {
        self.binary_level(
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Node, CompileError> {
        let op = if self.eat("!") {
            UnaryOp::Not
        } else if self.eat("-") {
            UnaryOp::Neg
        } else if self.eat("+") {
            UnaryOp::Plus
        } else {
            return self.postfix();
        };
        let operand = self.unary()?;
        Ok(Node::Unary { op, operand: Box::new(operand) })
    }

    fn postfix(&mut self) -> Result<Node, CompileError> {
        let mut node = self.primary()?;
        let mut optional = false;
        loop {
            if self.eat("?.") {
                optional = true;
                if self.eat("(") {
                    let args = self.arguments()?;
                    node = Node::Call { callee: Box::new(node), args, optional };
                } else if self.eat("[") {
                    node = self.computed_member(node, optional)?;
                } else {
                    node = self.named_member(node, optional)?;
                }
            } else if self.eat(".") {
                node = self.named_member(node, optional)?;
            } else if self.eat("[") {
                node = self.computed_member(node, optional)?;
            } else if self.eat("(") {
                let args = self.arguments()?;
                node = Node::Call { callee: Box::new(node), args, optional };
            } else {
                return Ok(node);
            }
        }
    }

    fn named_member(&mut self, object: Node, optional: bool) -> Result<Node, CompileError> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.pos += 1;
                Ok(Node::Member { object: Box::new(object), property: Property::Named(name), optional })
            }
            _ => Err(self.unexpected_here("property name")),
        }
    }

    fn computed_member(&mut self, object: Node, optional: bool) -> Result<Node, CompileError> {
        let key = self.expression()?;
        self.expect("]")?;
        Ok(Node::Member {
            object: Box::new(object),
            property: Property::Computed(Box::new(key)),
            optional,
        })
    }

    fn arguments(&mut self) -> Result<Vec<Node>, CompileError> {
        let mut args = Vec::new();
        if self.eat(")") {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(")") {
                return Ok(args);
            }
            self.expect(",")?;
        }
    }

    fn primary(&mut self) -> Result<Node, CompileError> {
        let offset = self.offset();
        let Some(spanned) = self.tokens.get(self.pos).cloned() else {
            return Err(CompileError::UnexpectedEnd { expected: "operand".to_string() });
        };
        self.pos += 1;
        match spanned.token {
            Token::Number(n) => Ok(Node::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Node::Literal(Value::String(s))),
            Token::Regex { source, flags } => Pattern::new(&source, &flags)
                .map(|p| Node::Literal(Value::Pattern(p)))
                .map_err(|e| CompileError::InvalidPattern { pattern: source, reason: e.to_string() }),
            Token::Template(chunks) => self.template(chunks),
            Token::Ident(name) => self.identifier(name, offset),
            Token::Punct("(") => {
                let inner = self.expression()?;
                self.expect(")")?;
                Ok(inner)
            }
            Token::Punct("[") => {
                let mut items = Vec::new();
                while !self.eat("]") {
                    items.push(self.expression()?);
                    if !self.is_punct("]") {
                        self.expect(",")?;
                    }
                }
                Ok(Node::Array(items))
            }
            Token::Punct("{") => self.object(),
            _ => Err(self.unexpected(&spanned, "operand")),
        }
    }

    fn identifier(&self, name: String, offset: usize) -> Result<Node, CompileError> {
        match name.as_str() {
            "true" => return Ok(Node::Literal(Value::Bool(true))),
            "false" => return Ok(Node::Literal(Value::Bool(false))),
            "null" | "undefined" => return Ok(Node::Literal(Value::Null)),
            _ => {}
        }
        if self.locals.iter().any(|local| *local == name) {
            return Ok(Node::Local(name));
        }
        if let Some(slot) = self.scope_names.iter().position(|scope| *scope == name) {
            return Ok(Node::Slot(slot));
        }
        if name == "Tools" {
            return Ok(Node::Tools);
        }
        Err(CompileError::UnknownIdentifier { name, offset })
    }

    fn object(&mut self) -> Result<Node, CompileError> {
        let mut entries = Vec::new();
        while !self.eat("}") {
            let key = match self.peek().cloned() {
                Some(Token::Ident(key)) | Some(Token::Str(key)) => key,
                Some(Token::Number(n)) => Value::Number(n).to_string(),
                _ => return Err(self.unexpected_here("object key")),
            };
            self.pos += 1;
            self.expect(":")?;
            entries.push((key, self.expression()?));
            if !self.is_punct("}") {
                self.expect(",")?;
            }
        }
        Ok(Node::Object(entries))
    }

    fn template(&self, chunks: Vec<TemplateChunk>) -> Result<Node, CompileError> {
        let mut parts = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            parts.push(match chunk {
                TemplateChunk::Text(text) => TemplatePart::Text(text),
                TemplateChunk::Expr(source, offset) => TemplatePart::Expr(parse_at(
                    &source,
                    self.base_offset + offset,
                    self.scope_names,
                    &self.locals,
                )?),
            });
        }
        Ok(Node::Template(parts))
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(n) => Value::Number(*n).to_string(),
        Token::Str(s) => format!("'{s}'"),
        Token::Template(_) => "template".to_string(),
        Token::Regex { source, flags } => format!("/{source}/{flags}"),
        Token::Ident(name) => name.clone(),
        Token::Punct(p) => (*p).to_string(),
    }
}
