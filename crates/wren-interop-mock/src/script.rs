//! Lexer and parser for the subset of Wren the mock VM understands.
//!
//! Supported at module level: `import "m" for A, B`, `var`, assignment to a
//! module variable, `[foreign] class` declarations whose bodies hold
//! constructors and `foreign` method declarations, and expression statements
//! built from literals, list literals, variables and method calls.

use rustc_hash::FxHashSet;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
#[error("Error at {near}: {message}")]
pub struct CompileError {
    pub line: i32,
    pub near: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Num(f64),
    Str(String),
    Punct(char),
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("'{name}'"),
            Token::Num(value) => format!("'{value}'"),
            Token::Str(text) => format!("'\"{text}\"'"),
            Token::Punct(c) => format!("'{c}'"),
            Token::Eof => "end of file".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    line: i32,
}

const KEYWORDS: &[&str] = &[
    "class",
    "construct",
    "false",
    "for",
    "foreign",
    "import",
    "null",
    "static",
    "true",
    "var",
];

fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

fn tokenize(source: &str) -> Result<Vec<Spanned>, CompileError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '/' => {
                chars.next();
                match chars.peek() {
                    Some('/') => {
                        while chars.next_if(|&c| c != '\n').is_some() {}
                    }
                    Some('*') => {
                        chars.next();
                        let mut previous = '\0';
                        loop {
                            match chars.next() {
                                Some('/') if previous == '*' => break,
                                Some(c) => {
                                    if c == '\n' {
                                        line += 1;
                                    }
                                    previous = c;
                                }
                                None => {
                                    return Err(CompileError {
                                        line,
                                        near: Token::Eof.describe(),
                                        message: "Unterminated block comment.".to_string(),
                                    });
                                }
                            }
                        }
                    }
                    _ => {
                        return Err(CompileError {
                            line,
                            near: "'/'".to_string(),
                            message: "Operators are not supported.".to_string(),
                        });
                    }
                }
            }
            '0'..='9' => {
                let mut text = String::new();
                while let Some(d) = chars.next_if(char::is_ascii_digit) {
                    text.push(d);
                }
                // Only a '.' followed by a digit belongs to the number.
                let mut lookahead = chars.clone();
                if lookahead.next() == Some('.') && lookahead.peek().is_some_and(char::is_ascii_digit) {
                    chars.next();
                    text.push('.');
                    while let Some(d) = chars.next_if(char::is_ascii_digit) {
                        text.push(d);
                    }
                }
                let value = text.parse().map_err(|_| CompileError {
                    line,
                    near: format!("'{text}'"),
                    message: "Invalid number literal.".to_string(),
                })?;
                tokens.push(Spanned {
                    token: Token::Num(value),
                    line,
                });
            }
            '"' => {
                chars.next();
                let start = line;
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => {
                            let escaped = match chars.next() {
                                Some('n') => '\n',
                                Some('t') => '\t',
                                Some('r') => '\r',
                                Some('0') => '\0',
                                Some(other @ ('"' | '\\' | '%')) => other,
                                other => {
                                    return Err(CompileError {
                                        line,
                                        near: other.map_or_else(|| Token::Eof.describe(), |c| format!("'{c}'")),
                                        message: "Invalid escape character.".to_string(),
                                    });
                                }
                            };
                            text.push(escaped);
                        }
                        Some(c) => {
                            if c == '\n' {
                                line += 1;
                            }
                            text.push(c);
                        }
                        None => {
                            return Err(CompileError {
                                line,
                                near: Token::Eof.describe(),
                                message: "Unterminated string.".to_string(),
                            });
                        }
                    }
                }
                tokens.push(Spanned {
                    token: Token::Str(text),
                    line: start,
                });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(c) = chars.next_if(|c| c.is_ascii_alphanumeric() || *c == '_') {
                    name.push(c);
                }
                tokens.push(Spanned {
                    token: Token::Ident(name),
                    line,
                });
            }
            '(' | ')' | '{' | '}' | '[' | ']' | ',' | '.' | '=' | '-' => {
                chars.next();
                tokens.push(Spanned {
                    token: Token::Punct(c),
                    line,
                });
            }
            other => {
                return Err(CompileError {
                    line,
                    near: format!("'{other}'"),
                    message: format!("Invalid character '{other}'."),
                });
            }
        }
    }

    tokens.push(Spanned {
        token: Token::Eof,
        line,
    });
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Expr>),
    Var {
        name: String,
        line: i32,
    },
    Call {
        receiver: Box<Expr>,
        name: String,
        args: Option<Vec<Expr>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MethodDecl {
    pub is_static: bool,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ClassDecl {
    pub name: String,
    pub is_foreign: bool,
    pub constructors: Vec<String>,
    pub methods: Vec<MethodDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StmtKind {
    Import { module: String, names: Vec<String> },
    Var { name: String, value: Expr },
    Assign { name: String, value: Expr },
    Class(ClassDecl),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Stmt {
    pub kind: StmtKind,
    pub line: i32,
}

/// Wren signature of a call: `name` for getters, `name(_,_)` otherwise.
pub(crate) fn signature(name: &str, arity: Option<usize>) -> String {
    match arity {
        None => name.to_string(),
        Some(count) => format!("{name}({})", vec!["_"; count].join(",")),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].token
    }

    fn line(&self) -> i32 {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: &str) -> CompileError {
        CompileError {
            line: self.line(),
            near: self.peek().describe(),
            message: message.to_string(),
        }
    }

    fn at_punct(&self, c: char) -> bool {
        *self.peek() == Token::Punct(c)
    }

    fn at_word(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Ident(name) if name == word)
    }

    fn expect_punct(&mut self, c: char, message: &str) -> Result<(), CompileError> {
        if !self.at_punct(c) {
            return Err(self.error(message));
        }
        self.advance();
        Ok(())
    }

    fn expect_name(&mut self, message: &str) -> Result<String, CompileError> {
        match self.peek() {
            Token::Ident(name) if !is_keyword(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(message)),
        }
    }

    fn program(&mut self) -> Result<Vec<Stmt>, CompileError> {
        let mut statements = Vec::new();
        while *self.peek() != Token::Eof {
            statements.push(self.statement()?);
        }
        Ok(statements)
    }

    fn statement(&mut self) -> Result<Stmt, CompileError> {
        let line = self.line();
        let kind = if self.at_word("import") {
            self.advance();
            let Token::Str(module) = self.peek().clone() else {
                return Err(self.error("Expect a string after 'import'."));
            };
            self.advance();
            let mut names = Vec::new();
            if self.at_word("for") {
                self.advance();
                loop {
                    names.push(self.expect_name("Expect variable name.")?);
                    if !self.at_punct(',') {
                        break;
                    }
                    self.advance();
                }
            }
            StmtKind::Import { module, names }
        } else if self.at_word("var") {
            self.advance();
            let name = self.expect_name("Expect variable name.")?;
            let value = if self.at_punct('=') {
                self.advance();
                self.expression()?
            } else {
                Expr::Null
            };
            StmtKind::Var { name, value }
        } else if self.at_word("class") {
            StmtKind::Class(self.class(false)?)
        } else if self.at_word("foreign") && matches!(self.peek_at(1), Token::Ident(word) if word == "class") {
            self.advance();
            StmtKind::Class(self.class(true)?)
        } else if matches!(self.peek(), Token::Ident(name) if !is_keyword(name))
            && *self.peek_at(1) == Token::Punct('=')
        {
            let name = self.expect_name("Expect variable name.")?;
            self.advance();
            let value = self.expression()?;
            StmtKind::Assign { name, value }
        } else {
            StmtKind::Expr(self.expression()?)
        };
        Ok(Stmt { kind, line })
    }

    fn class(&mut self, is_foreign: bool) -> Result<ClassDecl, CompileError> {
        self.advance();
        let name = self.expect_name("Expect class name.")?;
        self.expect_punct('{', "Expect '{' after class declaration.")?;

        let mut decl = ClassDecl {
            name,
            is_foreign,
            constructors: Vec::new(),
            methods: Vec::new(),
        };

        while !self.at_punct('}') {
            if *self.peek() == Token::Eof {
                return Err(self.error("Expect '}' after class body."));
            }
            if self.at_word("construct") {
                self.advance();
                let name = self.expect_name("Expect constructor name after 'construct'.")?;
                let arity = self.parameters()?;
                self.skip_body()?;
                decl.constructors.push(signature(&name, Some(arity)));
            } else if self.at_word("foreign") {
                self.advance();
                let is_static = self.at_word("static");
                if is_static {
                    self.advance();
                }
                let name = self.expect_name("Expect method name.")?;
                let arity = if self.at_punct('(') {
                    Some(self.parameters()?)
                } else {
                    None
                };
                decl.methods.push(MethodDecl {
                    is_static,
                    signature: signature(&name, arity),
                });
            } else {
                return Err(self.error("Only constructors and foreign methods are supported."));
            }
        }
        self.advance();
        Ok(decl)
    }

    fn parameters(&mut self) -> Result<usize, CompileError> {
        self.expect_punct('(', "Expect '(' after method name.")?;
        let mut count = 0;
        if !self.at_punct(')') {
            loop {
                self.expect_name("Expect parameter name.")?;
                count += 1;
                if !self.at_punct(',') {
                    break;
                }
                self.advance();
            }
        }
        self.expect_punct(')', "Expect ')' after parameters.")?;
        Ok(count)
    }

    /// Skips a balanced `{ ... }` body. Constructor bodies are not executed.
    fn skip_body(&mut self) -> Result<(), CompileError> {
        self.expect_punct('{', "Expect '{' to begin method body.")?;
        let mut depth = 1;
        while depth > 0 {
            match self.advance() {
                Token::Punct('{') => depth += 1,
                Token::Punct('}') => depth -= 1,
                Token::Eof => return Err(self.error("Expect '}' after method body.")),
                _ => {}
            }
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.primary()?;
        while self.at_punct('.') {
            self.advance();
            let name = self.expect_name("Expect method name after '.'.")?;
            let args = if self.at_punct('(') {
                Some(self.arguments()?)
            } else {
                None
            };
            expr = Expr::Call {
                receiver: Box::new(expr),
                name,
                args,
            };
        }
        Ok(expr)
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, CompileError> {
        self.expect_punct('(', "Expect '(' before arguments.")?;
        let mut args = Vec::new();
        if !self.at_punct(')') {
            loop {
                args.push(self.expression()?);
                if !self.at_punct(',') {
                    break;
                }
                self.advance();
            }
        }
        self.expect_punct(')', "Expect ')' after arguments.")?;
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, CompileError> {
        let line = self.line();
        match self.peek().clone() {
            Token::Num(value) => {
                self.advance();
                Ok(Expr::Num(value))
            }
            Token::Str(text) => {
                self.advance();
                Ok(Expr::Str(text))
            }
            Token::Punct('-') => {
                self.advance();
                match self.advance() {
                    Token::Num(value) => Ok(Expr::Num(-value)),
                    _ => Err(self.error("Expect a number after '-'.")),
                }
            }
            Token::Punct('(') => {
                self.advance();
                let inner = self.expression()?;
                self.expect_punct(')', "Expect ')' after expression.")?;
                Ok(inner)
            }
            Token::Punct('[') => {
                self.advance();
                let mut items = Vec::new();
                if !self.at_punct(']') {
                    loop {
                        items.push(self.expression()?);
                        if !self.at_punct(',') {
                            break;
                        }
                        self.advance();
                    }
                }
                self.expect_punct(']', "Expect ']' after list elements.")?;
                Ok(Expr::List(items))
            }
            Token::Ident(word) => match word.as_str() {
                "true" | "false" => {
                    self.advance();
                    Ok(Expr::Bool(word == "true"))
                }
                "null" => {
                    self.advance();
                    Ok(Expr::Null)
                }
                other if !is_keyword(other) => {
                    let name = other.to_string();
                    self.advance();
                    Ok(Expr::Var { name, line })
                }
                _ => Err(self.error("Expect expression.")),
            },
            _ => Err(self.error("Expect expression.")),
        }
    }
}

pub(crate) fn parse(source: &str) -> Result<Vec<Stmt>, CompileError> {
    let tokens = tokenize(source)?;
    Parser { tokens, pos: 0 }.program()
}

/// Rejects programs that read undefined module variables or define one twice.
pub(crate) fn check_names(statements: &[Stmt], mut defined: FxHashSet<String>) -> Result<(), CompileError> {
    fn check_expr(expr: &Expr, defined: &FxHashSet<String>) -> Result<(), CompileError> {
        match expr {
            Expr::Var { name, line } if !defined.contains(name) => Err(CompileError {
                line: *line,
                near: format!("'{name}'"),
                message: "Variable is used but not defined.".to_string(),
            }),
            Expr::List(items) => items.iter().try_for_each(|item| check_expr(item, defined)),
            Expr::Call { receiver, args, .. } => {
                check_expr(receiver, defined)?;
                args.iter()
                    .flatten()
                    .try_for_each(|arg| check_expr(arg, defined))
            }
            _ => Ok(()),
        }
    }

    fn define(name: &str, line: i32, defined: &mut FxHashSet<String>) -> Result<(), CompileError> {
        if defined.insert(name.to_string()) {
            return Ok(());
        }
        Err(CompileError {
            line,
            near: format!("'{name}'"),
            message: "Module variable is already defined.".to_string(),
        })
    }

    for stmt in statements {
        match &stmt.kind {
            StmtKind::Import { names, .. } => {
                for name in names {
                    define(name, stmt.line, &mut defined)?;
                }
            }
            StmtKind::Var { name, value } => {
                check_expr(value, &defined)?;
                define(name, stmt.line, &mut defined)?;
            }
            StmtKind::Assign { name, value } => {
                check_expr(value, &defined)?;
                check_expr(
                    &Expr::Var {
                        name: name.clone(),
                        line: stmt.line,
                    },
                    &defined,
                )?;
            }
            StmtKind::Class(decl) => define(&decl.name, stmt.line, &mut defined)?,
            StmtKind::Expr(expr) => check_expr(expr, &defined)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_foreign_class_declarations() {
        let program = parse(
            "foreign class Point {\n  construct new(x, y) {}\n  foreign x\n  foreign static origin()\n}",
        )
        .unwrap();
        let StmtKind::Class(decl) = &program[0].kind else {
            panic!("expected a class");
        };
        assert!(decl.is_foreign);
        assert_eq!(decl.constructors, vec!["new(_,_)"]);
        assert_eq!(decl.methods[0].signature, "x");
        assert!(decl.methods[1].is_static);
        assert_eq!(decl.methods[1].signature, "origin()");
    }

    #[test]
    fn parses_calls_and_lists() {
        let program = parse("System.print([1, -2.5, \"a\\n\"]) // trailing").unwrap();
        assert_eq!(program.len(), 1);
        let StmtKind::Expr(Expr::Call { name, args, .. }) = &program[0].kind else {
            panic!("expected a call");
        };
        assert_eq!(name, "print");
        assert_eq!(
            args.as_deref(),
            Some(&[Expr::List(vec![
                Expr::Num(1.0),
                Expr::Num(-2.5),
                Expr::Str("a\n".to_string())
            ])][..])
        );
    }

    #[test]
    fn reports_the_offending_token() {
        let err = parse("var x = \nvar").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.to_string(), "Error at 'var': Expect expression.");
    }

    #[test]
    fn rejects_undefined_variables() {
        let program = parse("var a = 1\nSystem.print(b)").unwrap();
        let mut defined = FxHashSet::default();
        defined.insert("System".to_string());
        let err = check_names(&program, defined).unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.near, "'b'");
    }

    #[test]
    fn signatures_count_arguments() {
        assert_eq!(signature("call", Some(0)), "call()");
        assert_eq!(signature("call", Some(2)), "call(_,_)");
        assert_eq!(signature("count", None), "count");
    }
}
