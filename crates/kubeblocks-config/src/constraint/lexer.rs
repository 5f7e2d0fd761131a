use std::{iter::Peekable, str::CharIndices};

use serde_json::{Number, Value};
use snafu::{OptionExt as _, ensure};

use crate::constraint::{InvalidNumberSnafu, Result, UnexpectedCharacterSnafu, UnterminatedSnafu};

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    /// `#Name`, without the `#`.
    Definition(String),
    String(String),
    Number(Value),
    /// `@name(argument)`
    Attribute { name: String, argument: String },
    Colon,
    Question,
    Comma,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    LeftParen,
    RightParen,
    Ampersand,
    Pipe,
    Star,
    Ellipsis,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    NotEqual,
    Match,
    NotMatch,
}

/// A token and the line it starts on.
pub(crate) type Spanned = (Token, usize);

pub(crate) fn tokenize(script: &str) -> Result<Vec<Spanned>> {
    Lexer {
        chars: script.char_indices().peekable(),
        input: script,
        line: 1,
    }
    .run()
}

struct Lexer<'a> {
    chars: Peekable<CharIndices<'a>>,
    input: &'a str,
    line: usize,
}

impl Lexer<'_> {
    fn run(mut self) -> Result<Vec<Spanned>> {
        let mut tokens = Vec::new();

        while let Some((start, c)) = self.chars.next() {
            let line = self.line;
            let token = match c {
                '\n' => {
                    self.line += 1;
                    continue;
                }
                c if c.is_whitespace() => continue,
                '/' if self.eat('/') => {
                    while self.chars.next_if(|&(_, c)| c != '\n').is_some() {}
                    continue;
                }
                ':' => Token::Colon,
                '?' => Token::Question,
                ',' => Token::Comma,
                '{' => Token::LeftBrace,
                '}' => Token::RightBrace,
                '[' => Token::LeftBracket,
                ']' => Token::RightBracket,
                '(' => Token::LeftParen,
                ')' => Token::RightParen,
                '&' => Token::Ampersand,
                '|' => Token::Pipe,
                '*' => Token::Star,
                '.' if self.eat('.') => {
                    ensure!(self.eat('.'), UnexpectedCharacterSnafu { line, character: '.' });
                    Token::Ellipsis
                }
                '>' if self.eat('=') => Token::GreaterEqual,
                '>' => Token::Greater,
                '<' if self.eat('=') => Token::LessEqual,
                '<' => Token::Less,
                '!' if self.eat('=') => Token::NotEqual,
                '!' if self.eat('~') => Token::NotMatch,
                '=' if self.eat('~') => Token::Match,
                '"' => Token::String(self.string(line)?),
                '#' => Token::Definition(self.ident_from(None)),
                '@' => self.attribute(line)?,
                '-' if self.chars.peek().is_some_and(|(_, c)| c.is_ascii_digit()) => {
                    self.number(start, line)?
                }
                c if c.is_ascii_digit() => self.number(start, line)?,
                c if is_ident_char(c) => Token::Ident(self.ident_from(Some(c))),
                character => return UnexpectedCharacterSnafu { line, character }.fail(),
            };
            tokens.push((token, line));
        }

        Ok(tokens)
    }

    fn eat(&mut self, expected: char) -> bool {
        self.chars.next_if(|&(_, c)| c == expected).is_some()
    }

    fn ident_from(&mut self, first: Option<char>) -> String {
        let mut ident: String = first.into_iter().collect();
        while let Some((_, c)) = self.chars.next_if(|&(_, c)| is_ident_char(c)) {
            ident.push(c);
        }
        ident
    }

    fn string(&mut self, line: usize) -> Result<String> {
        let mut value = String::new();

        loop {
            let (_, c) = self.chars.next().context(UnterminatedSnafu {
                line,
                what: "string",
            })?;
            match c {
                '"' => return Ok(value),
                '\\' => {
                    let (_, escaped) = self.chars.next().context(UnterminatedSnafu {
                        line,
                        what: "string",
                    })?;
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
                '\n' => {
                    return UnterminatedSnafu {
                        line,
                        what: "string",
                    }
                    .fail();
                }
                c => value.push(c),
            }
        }
    }

    fn attribute(&mut self, line: usize) -> Result<Token> {
        let name = self.ident_from(None);
        ensure!(
            !name.is_empty() && self.eat('('),
            UnexpectedCharacterSnafu {
                line,
                character: '@'
            }
        );

        let mut argument = String::new();
        loop {
            let (_, c) = self.chars.next().context(UnterminatedSnafu {
                line,
                what: "attribute",
            })?;
            match c {
                ')' => break,
                '\n' => {
                    return UnterminatedSnafu {
                        line,
                        what: "attribute",
                    }
                    .fail();
                }
                c => argument.push(c),
            }
        }

        Ok(Token::Attribute {
            name,
            argument: argument.trim().to_owned(),
        })
    }

    /// Lexes integers, floats and integers with a multiplier like `1Gi` or `4K`.
    fn number(&mut self, start: usize, line: usize) -> Result<Token> {
        let mut end = start + 1;
        while let Some((index, c)) = self
            .chars
            .next_if(|&(_, c)| c.is_ascii_alphanumeric() || c == '.' || c == '_')
        {
            end = index + c.len_utf8();
        }
        let literal = &self.input[start..end];

        parse_number(literal).context(InvalidNumberSnafu { line, literal })
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn parse_number(literal: &str) -> Option<Token> {
    let cleaned = literal.replace('_', "");

    if let Ok(int) = cleaned.parse::<i64>() {
        return Some(Token::Number(Value::from(int)));
    }
    if let Ok(uint) = cleaned.parse::<u64>() {
        return Some(Token::Number(Value::from(uint)));
    }

    let (digits, multiplier) = split_multiplier(&cleaned);
    if let Some(multiplier) = multiplier {
        let value = digits.parse::<f64>().ok()? * multiplier;
        ensure_integral(value)?;
        return Some(Token::Number(Value::from(value as i64)));
    }

    let float = cleaned.parse::<f64>().ok()?;
    Number::from_f64(float).map(|n| Token::Number(Value::Number(n)))
}

fn split_multiplier(literal: &str) -> (&str, Option<f64>) {
    let suffix_start = literal
        .find(|c: char| c.is_ascii_alphabetic() && c != 'e' && c != 'E')
        .unwrap_or(literal.len());
    let (digits, suffix) = literal.split_at(suffix_start);

    let multiplier = match suffix {
        "K" | "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "Ki" => 1024_f64,
        "Mi" => 1024_f64.powi(2),
        "Gi" => 1024_f64.powi(3),
        "Ti" => 1024_f64.powi(4),
        "Pi" => 1024_f64.powi(5),
        _ => return (literal, None),
    };
    (digits, Some(multiplier))
}

fn ensure_integral(value: f64) -> Option<()> {
    (value.fract() == 0.0 && value.abs() < i64::MAX as f64).then_some(())
}
