use crate::error::ParseError;
use crate::symbolic::{Expr, Function};

/// Parses an infix expression such as `-k1*A + k2*B^2` into a canonical `Expr`.
///
/// Precedence from loosest to tightest: `+ -`, `* /`, unary minus, `^`
/// (right associative). Numbers accept scientific notation (`3e7`).
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    match parser.consume() {
        None => Ok(expr),
        Some(token) => Err(ParseError::UnexpectedToken {
            found: format!("{token:?}"),
            expected: "end of input",
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&(_, d)) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num_str.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            // exponent part: e, E, optionally signed
            if let Some(&(_, e)) = chars.peek() {
                if e == 'e' || e == 'E' {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    let mut exponent = String::from("e");
                    if let Some(&(_, sign)) = lookahead.peek() {
                        if sign == '+' || sign == '-' {
                            exponent.push(sign);
                            lookahead.next();
                        }
                    }
                    let mut digits = 0;
                    while let Some(&(_, d)) = lookahead.peek() {
                        if d.is_ascii_digit() {
                            exponent.push(d);
                            digits += 1;
                            lookahead.next();
                        } else {
                            break;
                        }
                    }
                    if digits > 0 {
                        num_str.push_str(&exponent);
                        chars = lookahead;
                    }
                }
            }
            let value = num_str
                .parse()
                .map_err(|_| ParseError::InvalidNumber(num_str.clone()))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&(_, d)) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                _ => return Err(ParseError::UnexpectedChar { ch: c, pos }),
            };
            tokens.push(token);
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_rparen(&mut self) -> Result<(), ParseError> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            Some(other) => Err(ParseError::UnexpectedToken {
                found: format!("{other:?}"),
                expected: "')'",
            }),
            None => Err(ParseError::UnexpectedEnd("')'")),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;

        while let Some(token) = self.peek() {
            match token {
                Token::Plus => {
                    self.consume();
                    let right = self.parse_term()?;
                    left = left + right;
                }
                Token::Minus => {
                    self.consume();
                    let right = self.parse_term()?;
                    left = left - right;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.peek() {
            match token {
                Token::Star => {
                    self.consume();
                    let right = self.parse_unary()?;
                    left = left * right;
                }
                Token::Slash => {
                    self.consume();
                    let right = self.parse_unary()?;
                    left = left / right;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            let expr = self.parse_unary()?;
            return Ok(-expr);
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            // right associative, and allows a signed exponent: x^-1
            let exponent = self.parse_unary()?;
            return Ok(Expr::pow(base, exponent));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::num(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    let arg = self.parse_expression()?;
                    self.expect_rparen()?;
                    let function =
                        Function::from_name(&name).ok_or(ParseError::UnknownFunction(name))?;
                    Ok(Expr::func(function, arg))
                } else {
                    Ok(Expr::Symbol(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(other) => Err(ParseError::UnexpectedToken {
                found: format!("{other:?}"),
                expected: "a number, symbol or '('",
            }),
            None => Err(ParseError::UnexpectedEnd("a number, symbol or '('")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse;
    use crate::error::ParseError;
    use crate::symbolic::Expr;

    fn s(name: &str) -> Expr {
        Expr::symbol(name)
    }

    #[test]
    fn respects_operator_precedence() {
        let parsed = parse("a + b*c^2").expect("parse");
        assert_eq!(parsed, s("a") + s("b") * s("c").powi(2));
    }

    #[test]
    fn power_binds_tighter_than_unary_minus() {
        let parsed = parse("-x^2").expect("parse");
        assert_eq!(parsed, -(s("x").powi(2)));
    }

    #[test]
    fn power_is_right_associative() {
        let parsed = parse("2^3^2").expect("parse");
        assert_eq!(parsed, Expr::num(512.0));
    }

    #[test]
    fn accepts_scientific_notation_and_signed_exponents() {
        let parsed = parse("3e7*B^-1 + 1.5E-3").expect("parse");
        assert_eq!(parsed, 3e7 * s("B").powi(-1) + Expr::num(1.5e-3));
    }

    #[test]
    fn parses_function_calls() {
        let parsed = parse("exp(-Ea/T)").expect("parse");
        assert_eq!(parsed, (-(s("Ea") / s("T"))).exp());
        assert_eq!(
            parse("foo(x)"),
            Err(ParseError::UnknownFunction("foo".to_string()))
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(parse("x +"), Err(ParseError::UnexpectedEnd(_))));
        assert!(matches!(parse("(x"), Err(ParseError::UnexpectedEnd(_))));
        assert!(matches!(
            parse("x $ y"),
            Err(ParseError::UnexpectedChar { ch: '$', pos: 2 })
        ));
        assert!(matches!(
            parse("x y"),
            Err(ParseError::UnexpectedToken { .. })
        ));
    }

    #[test]
    fn cancels_like_terms_while_parsing() {
        assert_eq!(parse("k*A - A*k").expect("parse"), Expr::zero());
    }
}
