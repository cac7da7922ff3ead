use num_bigint::BigInt;
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, Error)]
#[error("Unrecognized token at position {0}")]
pub struct Error(pub usize);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Name(String),
    IntLit(BigInt),

    Let,
    In,
    If,
    Then,
    Else,
    Match,
    With,
    Leaf,
    Node,
    Coin,
    True,
    False,

    LParen,
    RParen,
    Bar,
    Arrow,
    Equal,
    Tilde,
    Slash,

    Lt,
    Lte,
    Gt,
    Gte,
    DoubleEqual,
    NotEqual,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Token::Name(name) => write!(f, "{}", name),
            Token::IntLit(val) => write!(f, "{}", val),
            Token::Let => write!(f, "let"),
            Token::In => write!(f, "in"),
            Token::If => write!(f, "if"),
            Token::Then => write!(f, "then"),
            Token::Else => write!(f, "else"),
            Token::Match => write!(f, "match"),
            Token::With => write!(f, "with"),
            Token::Leaf => write!(f, "leaf"),
            Token::Node => write!(f, "node"),
            Token::Coin => write!(f, "coin"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Bar => write!(f, "|"),
            Token::Arrow => write!(f, "->"),
            Token::Equal => write!(f, "="),
            Token::Tilde => write!(f, "~"),
            Token::Slash => write!(f, "/"),
            Token::Lt => write!(f, "<"),
            Token::Lte => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Gte => write!(f, ">="),
            Token::DoubleEqual => write!(f, "=="),
            Token::NotEqual => write!(f, "!="),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer { src, pos: 0 }
    }
}

fn char_at(src: &str, pos: usize) -> Option<char> {
    src[pos..].chars().next()
}

fn consume_while(mut pos: usize, src: &str, pred: impl Fn(char) -> bool) -> usize {
    while let Some(c) = char_at(src, pos) {
        if !pred(c) {
            break;
        }
        pos += c.len_utf8();
    }
    pos
}

fn consume_comment(pos: usize, src: &str) -> Option<usize> {
    if char_at(src, pos)? != '#' {
        return None;
    }
    let end = consume_while(pos, src, |c| c != '\n');
    Some(consume_while(end, src, |c| c == '\n'))
}

fn consume_whitespace(pos: usize, src: &str) -> Option<usize> {
    if !char_at(src, pos)?.is_whitespace() {
        return None;
    }
    Some(consume_while(pos, src, char::is_whitespace))
}

fn skip_invisibles(mut pos: usize, src: &str) -> usize {
    loop {
        match (consume_comment(pos, src), consume_whitespace(pos, src)) {
            (None, None) => return pos,
            (Some(after_comment), _) => pos = after_comment,
            (_, Some(after_whitespace)) => pos = after_whitespace,
        }
    }
}

// Names may contain primes, as in `t'`, but never start with one or with an underscore. Names
// beginning with an underscore are reserved for bindings introduced by the compiler.
fn consume_name(pos: usize, src: &str) -> Option<usize> {
    if !char_at(src, pos)?.is_alphabetic() {
        return None;
    }
    Some(consume_while(pos, src, |c| {
        c.is_alphanumeric() || c == '_' || c == '\''
    }))
}

fn consume_int(pos: usize, src: &str) -> Option<usize> {
    if !char_at(src, pos)?.is_ascii_digit() {
        return None;
    }
    Some(consume_while(pos, src, |c| c.is_ascii_digit()))
}

const SYMBOLS: &[&str] = &["(", ")", "|", "->", "=", "~", "/", "<", "<=", ">", ">=", "==", "!="];

fn symbol(text: &str) -> Token {
    match text {
        "(" => Token::LParen,
        ")" => Token::RParen,
        "|" => Token::Bar,
        "->" => Token::Arrow,
        "=" => Token::Equal,
        "~" => Token::Tilde,
        "/" => Token::Slash,
        "<" => Token::Lt,
        "<=" => Token::Lte,
        ">" => Token::Gt,
        ">=" => Token::Gte,
        "==" => Token::DoubleEqual,
        "!=" => Token::NotEqual,
        _ => unreachable!("{:?} is not in SYMBOLS", text),
    }
}

/// Longest match among the fixed symbols.
fn consume_symbol(pos: usize, src: &str) -> Option<(usize, Token)> {
    SYMBOLS
        .iter()
        .filter(|text| src[pos..].starts_with(*text))
        .max_by_key(|text| text.len())
        .map(|text| (pos + text.len(), symbol(text)))
}

fn keyword(name: &str) -> Option<Token> {
    Some(match name {
        "let" => Token::Let,
        "in" => Token::In,
        "if" => Token::If,
        "then" => Token::Then,
        "else" => Token::Else,
        "match" => Token::Match,
        "with" => Token::With,
        "leaf" => Token::Leaf,
        "node" => Token::Node,
        "coin" => Token::Coin,
        "true" => Token::True,
        "false" => Token::False,
        _ => return None,
    })
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<(usize, Token, usize), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pos = skip_invisibles(self.pos, self.src);

        if self.pos == self.src.len() {
            return None;
        }

        let start = self.pos;

        if let Some(end) = consume_name(start, self.src) {
            self.pos = end;
            let name = &self.src[start..end];
            let token = keyword(name).unwrap_or_else(|| Token::Name(name.to_owned()));
            return Some(Ok((start, token, end)));
        }

        if let Some(end) = consume_int(start, self.src) {
            self.pos = end;
            return match self.src[start..end].parse() {
                Ok(val) => Some(Ok((start, Token::IntLit(val), end))),
                Err(_) => Some(Err(Error(start))),
            };
        }

        if let Some((end, token)) = consume_symbol(start, self.src) {
            self.pos = end;
            return Some(Ok((start, token, end)));
        }

        Some(Err(Error(start)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        Lexer::new(src).map(|tok| tok.unwrap().1).collect()
    }

    #[test]
    fn test_keywords_names_and_primes() {
        assert_eq!(
            tokens("match t' with | leaf -> leaf_1"),
            vec![
                Token::Match,
                Token::Name("t'".to_owned()),
                Token::With,
                Token::Bar,
                Token::Leaf,
                Token::Arrow,
                Token::Name("leaf_1".to_owned()),
            ]
        );
    }

    #[test]
    fn test_longest_symbol_and_comments() {
        assert_eq!(
            tokens("a <= b # trailing\n~ 3/2 c != d"),
            vec![
                Token::Name("a".to_owned()),
                Token::Lte,
                Token::Name("b".to_owned()),
                Token::Tilde,
                Token::IntLit(BigInt::from(3)),
                Token::Slash,
                Token::IntLit(BigInt::from(2)),
                Token::Name("c".to_owned()),
                Token::NotEqual,
                Token::Name("d".to_owned()),
            ]
        );
    }

    #[test]
    fn test_reserved_underscore_is_rejected() {
        let err = Lexer::new("f _z1 = leaf").nth(1).unwrap().unwrap_err();
        assert_eq!(err.0, 2);
    }
}
