//! Recursive descent parser for the surface language.
//!
//! ```text
//! f t x = expr
//! expr ::= let x = expr in expr
//!        | if expr then expr else expr
//!        | match expr with | leaf -> expr | node l m r -> expr
//!        | ~ [N[/D]] expr
//!        | app [(< | <= | > | >= | == | !=) app]
//! app  ::= f atom* | node atom atom atom | atom
//! atom ::= x | leaf | coin | true | false | ( expr )
//! ```
//!
//! Definitions start in the first column; anything indented continues the previous definition.

use arbor_common::data::raw_ast as raw;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::Zero;

use crate::lex::{Lexer, Token};
use crate::parse_error::ParseError;

type Result<T> = std::result::Result<T, ParseError>;

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<(usize, Token, usize)>,
    pos: usize,
}

const ATOM_START: &[&str] = &["name", "\"leaf\"", "\"coin\"", "\"true\"", "\"false\"", "\"(\""];

fn span(lo: usize, hi: usize, expr: raw::Expr) -> raw::Expr {
    raw::Expr::Span(lo, hi, Box::new(expr))
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Result<Self> {
        let tokens = Lexer::new(src).collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Parser {
            src,
            tokens,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, token, _)| token)
    }

    fn start(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|&(lo, _, _)| lo)
            .unwrap_or(self.src.len())
    }

    fn prev_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .map(|prev| self.tokens[prev].2)
            .unwrap_or(0)
    }

    fn at_line_start(&self) -> bool {
        match self.tokens.get(self.pos) {
            Some(&(lo, _, _)) => lo == 0 || self.src[..lo].ends_with('\n'),
            None => false,
        }
    }

    fn unexpected(&self, expected: &[&'static str]) -> ParseError {
        match self.tokens.get(self.pos) {
            Some(token) => ParseError::UnrecognizedToken {
                token: token.clone(),
                expected: expected.to_vec(),
            },
            None => ParseError::UnrecognizedEof {
                location: self.src.len(),
                expected: expected.to_vec(),
            },
        }
    }

    fn expect(&mut self, token: Token, display: &'static str) -> Result<()> {
        if self.peek() == Some(&token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(&[display]))
        }
    }

    fn name(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token::Name(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected(&["name"])),
        }
    }

    fn program(&mut self) -> Result<raw::Program> {
        let mut defs = Vec::new();
        while self.peek().is_some() {
            defs.push(self.func_def()?);
        }
        Ok(raw::Program(defs))
    }

    fn func_def(&mut self) -> Result<raw::FuncDef> {
        let lo = self.start();
        if !self.at_line_start() {
            return Err(ParseError::MisplacedDefinition {
                span: (lo, self.tokens[self.pos].2),
            });
        }
        let name = raw::FuncName(self.name()?);
        let mut params = Vec::new();
        while let Some(Token::Name(_)) = self.peek() {
            params.push(raw::VarName(self.name()?));
        }
        self.expect(Token::Equal, "\"=\"")?;
        let body = self.expr()?;
        if self.peek().is_some() && !self.at_line_start() {
            return Err(self.unexpected(&["a new definition"]));
        }
        Ok(raw::FuncDef {
            name,
            params,
            body,
            span: (lo, self.prev_end()),
        })
    }

    fn expr(&mut self) -> Result<raw::Expr> {
        let lo = self.start();
        let expr = match self.peek() {
            Some(Token::Let) => {
                self.pos += 1;
                let name = raw::VarName(self.name()?);
                self.expect(Token::Equal, "\"=\"")?;
                let value = self.expr()?;
                self.expect(Token::In, "\"in\"")?;
                let body = self.expr()?;
                raw::Expr::Let(name, Box::new(value), Box::new(body))
            }
            Some(Token::If) => {
                self.pos += 1;
                let cond = self.expr()?;
                self.expect(Token::Then, "\"then\"")?;
                let then_case = self.expr()?;
                self.expect(Token::Else, "\"else\"")?;
                let else_case = self.expr()?;
                raw::Expr::If(Box::new(cond), Box::new(then_case), Box::new(else_case))
            }
            Some(Token::Match) => {
                self.pos += 1;
                self.match_expr()?
            }
            Some(Token::Tilde) => {
                self.pos += 1;
                let cost = self.cost()?;
                let body = self.expr()?;
                raw::Expr::Tick(cost, Box::new(body))
            }
            _ => return self.comparison(),
        };
        Ok(span(lo, self.prev_end(), expr))
    }

    fn match_expr(&mut self) -> Result<raw::Expr> {
        let scrutinee = self.expr()?;
        self.expect(Token::With, "\"with\"")?;

        let mut leaf_case = None;
        let mut node_case = None;
        while self.peek() == Some(&Token::Bar) && (leaf_case.is_none() || node_case.is_none()) {
            self.pos += 1;
            match self.peek() {
                Some(Token::Leaf) if leaf_case.is_none() => {
                    self.pos += 1;
                    self.expect(Token::Arrow, "\"->\"")?;
                    leaf_case = Some(self.expr()?);
                }
                Some(Token::Node) if node_case.is_none() => {
                    self.pos += 1;
                    let left = raw::VarName(self.name()?);
                    let middle = raw::VarName(self.name()?);
                    let right = raw::VarName(self.name()?);
                    self.expect(Token::Arrow, "\"->\"")?;
                    node_case = Some(((left, middle, right), self.expr()?));
                }
                _ => {
                    return Err(self.unexpected(match (&leaf_case, &node_case) {
                        (None, None) => &["\"leaf\"", "\"node\""],
                        (None, Some(_)) => &["\"leaf\""],
                        _ => &["\"node\""],
                    }))
                }
            }
        }

        match (leaf_case, node_case) {
            (Some(leaf_case), Some((pattern, node_case))) => Ok(raw::Expr::Match(
                Box::new(scrutinee),
                Box::new(leaf_case),
                pattern,
                Box::new(node_case),
            )),
            _ => Err(self.unexpected(&["\"|\""])),
        }
    }

    fn cost(&mut self) -> Result<BigRational> {
        let lo = self.start();
        let numer = match self.peek() {
            Some(Token::IntLit(val)) => val.clone(),
            _ => return Ok(BigRational::from_integer(BigInt::from(1))),
        };
        self.pos += 1;
        if self.peek() != Some(&Token::Slash) {
            return Ok(BigRational::from_integer(numer));
        }
        self.pos += 1;
        let denom = match self.peek() {
            Some(Token::IntLit(val)) => val.clone(),
            _ => return Err(self.unexpected(&["int literal"])),
        };
        self.pos += 1;
        if denom.is_zero() {
            return Err(ParseError::ZeroCost {
                span: (lo, self.prev_end()),
            });
        }
        Ok(BigRational::new(numer, denom))
    }

    fn comparison(&mut self) -> Result<raw::Expr> {
        let lo = self.start();
        let lhs = self.app()?;
        let op = match self.peek() {
            Some(Token::Lt) => raw::CmpOp::Lt,
            Some(Token::Lte) => raw::CmpOp::Lte,
            Some(Token::Gt) => raw::CmpOp::Gt,
            Some(Token::Gte) => raw::CmpOp::Gte,
            Some(Token::DoubleEqual) => raw::CmpOp::Eq,
            Some(Token::NotEqual) => raw::CmpOp::NotEq,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.app()?;
        Ok(span(
            lo,
            self.prev_end(),
            raw::Expr::Cmp(op, Box::new(lhs), Box::new(rhs)),
        ))
    }

    fn starts_atom(&self) -> bool {
        !self.at_line_start()
            && matches!(
                self.peek(),
                Some(
                    Token::Name(_)
                        | Token::Leaf
                        | Token::Coin
                        | Token::True
                        | Token::False
                        | Token::LParen
                )
            )
    }

    fn app(&mut self) -> Result<raw::Expr> {
        let lo = self.start();
        let expr = match self.peek() {
            Some(Token::Name(name)) => {
                let name = name.clone();
                self.pos += 1;
                if !self.starts_atom() {
                    return Ok(span(lo, self.prev_end(), raw::Expr::Name(raw::VarName(name))));
                }
                let mut args = Vec::new();
                while self.starts_atom() {
                    args.push(self.atom()?);
                }
                raw::Expr::App(raw::FuncName(name), args)
            }
            Some(Token::Node) => {
                self.pos += 1;
                let left = self.atom()?;
                let middle = self.atom()?;
                let right = self.atom()?;
                raw::Expr::Node(Box::new(left), Box::new(middle), Box::new(right))
            }
            _ => return self.atom(),
        };
        Ok(span(lo, self.prev_end(), expr))
    }

    fn atom(&mut self) -> Result<raw::Expr> {
        let lo = self.start();
        let expr = match self.peek() {
            Some(Token::Name(name)) => raw::Expr::Name(raw::VarName(name.clone())),
            Some(Token::Leaf) => raw::Expr::Leaf,
            Some(Token::Coin) => raw::Expr::Coin,
            Some(Token::True) => raw::Expr::BoolLit(true),
            Some(Token::False) => raw::Expr::BoolLit(false),
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(Token::RParen, "\")\"")?;
                return Ok(inner);
            }
            _ => return Err(self.unexpected(ATOM_START)),
        };
        self.pos += 1;
        Ok(span(lo, self.prev_end(), expr))
    }
}

pub fn parse(src: &str) -> Result<raw::Program> {
    Parser::new(src)?.program()
}

#[cfg(test)]
mod test {
    use super::*;
    use arbor_common::lines;

    fn strip(expr: &raw::Expr) -> String {
        match expr {
            raw::Expr::Span(_, _, inner) => strip(inner),
            raw::Expr::Name(name) => name.0.clone(),
            raw::Expr::App(func, args) => {
                let args: Vec<_> = args.iter().map(strip).collect();
                format!("({} {})", func.0, args.join(" "))
            }
            raw::Expr::Leaf => "leaf".to_owned(),
            raw::Expr::Coin => "coin".to_owned(),
            raw::Expr::BoolLit(val) => val.to_string(),
            raw::Expr::Node(l, m, r) => format!("(node {} {} {})", strip(l), strip(m), strip(r)),
            raw::Expr::Cmp(op, a, b) => format!("({} {} {})", strip(a), op, strip(b)),
            raw::Expr::If(c, t, e) => format!("(if {} {} {})", strip(c), strip(t), strip(e)),
            raw::Expr::Match(x, leaf, (l, m, r), node) => format!(
                "(match {} {} ({} {} {}) {})",
                strip(x),
                strip(leaf),
                l.0,
                m.0,
                r.0,
                strip(node)
            ),
            raw::Expr::Let(x, v, b) => format!("(let {} {} {})", x.0, strip(v), strip(b)),
            raw::Expr::Tick(cost, body) => format!("(~{} {})", cost, strip(body)),
        }
    }

    #[test]
    fn test_definitions_split_at_first_column() {
        let src = lines![
            "# concatenates the left spine",
            "append t u = match t with",
            "  | leaf -> u",
            "  | node l x r -> ~ node l x (append r u)",
            "id t = t",
        ];
        let raw::Program(defs) = parse(src).unwrap();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name.0, "append");
        assert_eq!(
            strip(&defs[0].body),
            "(match t u (l x r) (~1 (node l x (append r u))))"
        );
        assert_eq!(strip(&defs[1].body), "t");
    }

    #[test]
    fn test_tick_costs_and_comparisons() {
        let raw::Program(defs) = parse("f a b = ~ 3/4 if a < b then coin else a == leaf\n").unwrap();
        assert_eq!(
            strip(&defs[0].body),
            "(~3/4 (if (a < b) coin (a == leaf)))"
        );
    }

    #[test]
    fn test_arms_in_either_order() {
        let raw::Program(defs) =
            parse("f t = match t with | node a b c -> a | leaf -> leaf\n").unwrap();
        assert_eq!(strip(&defs[0].body), "(match t leaf (a b c) a)");
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            parse("f t = ~ 1/0 t"),
            Err(ParseError::ZeroCost { .. })
        ));
        assert!(matches!(
            parse("f t = match t with | leaf -> t"),
            Err(ParseError::UnrecognizedEof { .. })
        ));
        assert!(matches!(
            parse("  f t = t"),
            Err(ParseError::MisplacedDefinition { .. })
        ));
        assert!(matches!(
            parse("f t = let in t"),
            Err(ParseError::UnrecognizedToken { .. })
        ));
    }
}
