use regex::Regex;
use serde_json::Value;
use snafu::{ResultExt as _, ensure};

use crate::constraint::{
    DuplicateDefinitionSnafu, InvalidRegexSnafu, Result, UnexpectedEndSnafu, UnexpectedTokenSnafu,
    ast::{Attribute, BoundOp, Expr, Field, Kind, Script, StructExpr},
    lexer::{Spanned, Token, tokenize},
};

pub(crate) fn parse(script: &str) -> Result<Script> {
    let mut parser = Parser {
        tokens: tokenize(script)?,
        position: 0,
        in_definition: false,
        script: Script::default(),
    };

    while parser.peek().is_some() {
        parser.top_level_declaration()?;
        parser.eat(&Token::Comma);
    }

    Ok(parser.script)
}

struct Parser {
    tokens: Vec<Spanned>,
    position: usize,
    in_definition: bool,
    script: Script,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|(token, _)| token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens
            .get(self.position + offset)
            .map(|(token, _)| token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map_or(1, |(_, line)| *line)
    }

    fn next(&mut self, expected: &'static str) -> Result<Token> {
        let (token, _) = self
            .tokens
            .get(self.position)
            .cloned()
            .ok_or_else(|| UnexpectedEndSnafu { expected }.build())?;
        self.position += 1;
        Ok(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, expected: &'static str) -> Result<()> {
        let line = self.line();
        let found = self.next(expected)?;
        ensure!(
            &found == token,
            UnexpectedTokenSnafu {
                line,
                expected,
                found: describe(&found),
            }
        );
        Ok(())
    }

    fn top_level_declaration(&mut self) -> Result<()> {
        if let Some(Token::Definition(name)) = self.peek() {
            let name = name.clone();
            let line = self.line();
            self.position += 1;
            self.expect(&Token::Colon, "':'")?;

            self.in_definition = true;
            let value = self.expression();
            self.in_definition = false;
            let value = value?;
            self.attributes();

            ensure!(
                !self.script.definitions.contains_key(&name),
                DuplicateDefinitionSnafu { line, name }
            );
            self.script.definitions.insert(name, value);
            return Ok(());
        }

        let field = self.field()?;
        self.script.fields.push(field);
        Ok(())
    }

    fn field(&mut self) -> Result<Field> {
        let line = self.line();
        let name = match self.next("a field name")? {
            Token::Ident(name) | Token::String(name) => name,
            other => {
                return UnexpectedTokenSnafu {
                    line,
                    expected: "a field name",
                    found: describe(&other),
                }
                .fail();
            }
        };
        let optional = self.eat(&Token::Question);
        self.expect(&Token::Colon, "':'")?;

        // `a: b: int` is a shorthand for `a: {b: int}`
        let value = if self.at_field_start() {
            Expr::Struct(StructExpr {
                fields: vec![self.field()?],
                open: !self.in_definition,
            })
        } else {
            self.expression()?
        };

        Ok(Field {
            name,
            optional,
            value,
            attributes: self.attributes(),
        })
    }

    fn at_field_start(&self) -> bool {
        matches!(self.peek(), Some(Token::Ident(_) | Token::String(_)))
            && match self.peek_at(1) {
                Some(Token::Colon) => true,
                Some(Token::Question) => self.peek_at(2) == Some(&Token::Colon),
                _ => false,
            }
    }

    fn attributes(&mut self) -> Vec<Attribute> {
        let mut attributes = Vec::new();
        while let Some(Token::Attribute { name, argument }) = self.peek() {
            attributes.push(Attribute {
                name: name.clone(),
                argument: argument.clone(),
            });
            self.position += 1;
        }
        attributes
    }

    fn expression(&mut self) -> Result<Expr> {
        let mut alternatives = vec![self.alternative()?];
        while self.eat(&Token::Pipe) {
            alternatives.push(self.alternative()?);
        }

        if alternatives.len() == 1 && !alternatives[0].1 {
            return Ok(alternatives.remove(0).0);
        }
        Ok(Expr::Disjunction(alternatives))
    }

    fn alternative(&mut self) -> Result<(Expr, bool)> {
        let default = self.eat(&Token::Star);

        let mut conjuncts = vec![self.unary()?];
        while self.eat(&Token::Ampersand) {
            conjuncts.push(self.unary()?);
        }

        let expr = if conjuncts.len() == 1 {
            conjuncts.remove(0)
        } else {
            Expr::Conjunction(conjuncts)
        };
        Ok((expr, default))
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Some(Token::Greater) => BoundOp::Greater,
            Some(Token::GreaterEqual) => BoundOp::GreaterEqual,
            Some(Token::Less) => BoundOp::Less,
            Some(Token::LessEqual) => BoundOp::LessEqual,
            Some(Token::NotEqual) => BoundOp::NotEqual,
            Some(Token::Match | Token::NotMatch) => return self.regex(),
            _ => return self.primary(),
        };
        self.position += 1;

        let line = self.line();
        match self.next("a literal")? {
            Token::Number(value) => Ok(Expr::Bound(op, value)),
            Token::String(value) => Ok(Expr::Bound(op, Value::String(value))),
            Token::Ident(ident) if op == BoundOp::NotEqual && ident == "null" => {
                Ok(Expr::Bound(op, Value::Null))
            }
            other => UnexpectedTokenSnafu {
                line,
                expected: "a literal",
                found: describe(&other),
            }
            .fail(),
        }
    }

    fn regex(&mut self) -> Result<Expr> {
        let negated = self.next("'=~'")? == Token::NotMatch;
        let line = self.line();
        match self.next("a regular expression")? {
            Token::String(pattern) => Ok(Expr::Regex {
                regex: Regex::new(&pattern).context(InvalidRegexSnafu { line, pattern })?,
                negated,
            }),
            other => UnexpectedTokenSnafu {
                line,
                expected: "a regular expression",
                found: describe(&other),
            }
            .fail(),
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let line = self.line();
        let token = self.next("an expression")?;

        Ok(match token {
            Token::Ident(ident) => match ident.as_str() {
                "_" => Expr::Top,
                "int" | "uint" => Expr::Kind(vec![Kind::Int]),
                "float" => Expr::Kind(vec![Kind::Float]),
                "number" => Expr::Kind(vec![Kind::Int, Kind::Float]),
                "string" | "bytes" => Expr::Kind(vec![Kind::String]),
                "bool" => Expr::Kind(vec![Kind::Bool]),
                "null" => Expr::Literal(Value::Null),
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                _ => Expr::Reference(ident),
            },
            Token::Definition(name) => Expr::Reference(format!("#{name}")),
            Token::String(value) => Expr::Literal(Value::String(value)),
            Token::Number(value) => Expr::Literal(value),
            Token::LeftBrace => Expr::Struct(self.struct_body()?),
            Token::LeftBracket => self.list()?,
            Token::LeftParen => {
                let expr = self.expression()?;
                self.expect(&Token::RightParen, "')'")?;
                expr
            }
            other => {
                return UnexpectedTokenSnafu {
                    line,
                    expected: "an expression",
                    found: describe(&other),
                }
                .fail();
            }
        })
    }

    fn struct_body(&mut self) -> Result<StructExpr> {
        let mut fields = Vec::new();
        let mut open = !self.in_definition;

        loop {
            match self.peek() {
                Some(Token::RightBrace) => {
                    self.position += 1;
                    return Ok(StructExpr { fields, open });
                }
                Some(Token::Ellipsis) => {
                    self.position += 1;
                    open = true;
                }
                Some(Token::Definition(_)) => {
                    // Nested definitions share the namespace of the top-level ones
                    let in_definition = self.in_definition;
                    self.top_level_declaration()?;
                    self.in_definition = in_definition;
                }
                Some(_) => fields.push(self.field()?),
                None => return UnexpectedEndSnafu { expected: "'}'" }.fail(),
            }
            self.eat(&Token::Comma);
        }
    }

    fn list(&mut self) -> Result<Expr> {
        if self.eat(&Token::Ellipsis) {
            let element = if self.peek() == Some(&Token::RightBracket) {
                Expr::Top
            } else {
                self.expression()?
            };
            self.expect(&Token::RightBracket, "']'")?;
            return Ok(Expr::List(Box::new(element)));
        }

        let mut values = Vec::new();
        while !self.eat(&Token::RightBracket) {
            let line = self.line();
            match self.expression()? {
                Expr::Literal(value) => values.push(value),
                _ => {
                    return UnexpectedTokenSnafu {
                        line,
                        expected: "a literal list element",
                        found: "an expression",
                    }
                    .fail();
                }
            }
            self.eat(&Token::Comma);
        }
        Ok(Expr::Literal(Value::Array(values)))
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(ident) => format!("identifier {ident:?}"),
        Token::Definition(name) => format!("definition #{name}"),
        Token::String(value) => format!("string {value:?}"),
        Token::Number(value) => format!("number {value}"),
        Token::Attribute { name, .. } => format!("attribute @{name}"),
        other => format!("{other:?}"),
    }
}
