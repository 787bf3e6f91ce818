use crate::priv_prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TokenKind {
    Ident,
    IntLiteral(i64),
    Add,
    Sub,
    Star,
    ForwardSlash,
    Percent,
    Bang,
    LessThan,
    LessThanEq,
    GreaterThan,
    GreaterThanEq,
    DoubleEquals,
    BangEquals,
    Equals,
    Comma,
    Semicolon,
    OpenParen,
    CloseParen,
    OpenBrace,
    CloseBrace,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Spanned for Token {
    fn span(&self) -> Span {
        self.span.clone()
    }
}

#[extension_trait]
impl CharExt for char {
    /// Single-character tokens that never combine with a following `=`.
    fn as_simple_token(self) -> Option<TokenKind> {
        match self {
            '+' => Some(TokenKind::Add),
            '-' => Some(TokenKind::Sub),
            '*' => Some(TokenKind::Star),
            '%' => Some(TokenKind::Percent),
            ',' => Some(TokenKind::Comma),
            ';' => Some(TokenKind::Semicolon),
            '(' => Some(TokenKind::OpenParen),
            ')' => Some(TokenKind::CloseParen),
            '{' => Some(TokenKind::OpenBrace),
            '}' => Some(TokenKind::CloseBrace),
            _ => None,
        }
    }

    /// Characters that form a two-character token when followed by `=`.
    fn with_equals(self) -> Option<(TokenKind, TokenKind)> {
        match self {
            '<' => Some((TokenKind::LessThan, TokenKind::LessThanEq)),
            '>' => Some((TokenKind::GreaterThan, TokenKind::GreaterThanEq)),
            '=' => Some((TokenKind::Equals, TokenKind::DoubleEquals)),
            '!' => Some((TokenKind::Bang, TokenKind::BangEquals)),
            _ => None,
        }
    }
}

struct CharIndicesInner<'a> {
    src: &'a str,
    position: usize,
}

impl<'a> Iterator for CharIndicesInner<'a> {
    type Item = (usize, char);

    fn next(&mut self) -> Option<(usize, char)> {
        let mut char_indices = self.src[self.position..].char_indices();
        let c = char_indices.next()?.1;
        let ret = (self.position, c);
        match char_indices.next() {
            Some((char_width, _)) => self.position += char_width,
            None => self.position = self.src.len(),
        };
        Some(ret)
    }
}

type CharIndices<'a> = std::iter::Peekable<CharIndicesInner<'a>>;

pub fn lex(src: &Arc<str>, path: Option<Arc<PathBuf>>) -> Result<Vec<Token>, LexError> {
    let mut char_indices = CharIndicesInner {
        src,
        position: 0,
    }
    .peekable();
    let mut tokens = Vec::new();
    while let Some((index, character)) = char_indices.next() {
        if character.is_whitespace() {
            continue;
        }
        if character == '/' {
            match char_indices.peek() {
                Some((_, '/')) => {
                    let _ = char_indices.next();
                    for (_, character) in char_indices.by_ref() {
                        if character == '\n' {
                            break;
                        }
                    }
                }
                _ => {
                    let span = span_until(src, index, &mut char_indices, &path);
                    tokens.push(Token {
                        kind: TokenKind::ForwardSlash,
                        span,
                    });
                }
            }
            continue;
        }
        if character.is_xid_start() || character == '_' {
            while let Some((_, next_character)) = char_indices.peek() {
                if !next_character.is_xid_continue() {
                    break;
                }
                let _ = char_indices.next();
            }
            let span = span_until(src, index, &mut char_indices, &path);
            tokens.push(Token {
                kind: TokenKind::Ident,
                span,
            });
            continue;
        }
        if let Some(digit) = character.to_digit(10) {
            let mut big_uint = BigUint::from(digit);
            while let Some(&(_, next_character)) = char_indices.peek() {
                match next_character.to_digit(10) {
                    Some(digit) => {
                        let _ = char_indices.next();
                        big_uint *= 10u32;
                        big_uint += digit;
                    }
                    None => break,
                }
            }
            let span = span_until(src, index, &mut char_indices, &path);
            let parsed = match big_uint.to_i64() {
                Some(parsed) => parsed,
                None => {
                    return Err(LexError {
                        kind: LexErrorKind::IntLiteralOutOfRange { position: index },
                        span,
                    });
                }
            };
            tokens.push(Token {
                kind: TokenKind::IntLiteral(parsed),
                span,
            });
            continue;
        }
        if let Some(kind) = character.as_simple_token() {
            let span = span_until(src, index, &mut char_indices, &path);
            tokens.push(Token { kind, span });
            continue;
        }
        if let Some((alone, with_equals)) = character.with_equals() {
            let kind = match char_indices.peek() {
                Some((_, '=')) => {
                    let _ = char_indices.next();
                    with_equals
                }
                _ => alone,
            };
            let span = span_until(src, index, &mut char_indices, &path);
            tokens.push(Token { kind, span });
            continue;
        }
        return Err(LexError {
            kind: LexErrorKind::InvalidCharacter {
                position: index,
                character,
            },
            span: Span::new(
                src.clone(),
                index,
                index + character.len_utf8(),
                path.clone(),
            )
            .unwrap(),
        });
    }
    Ok(tokens)
}

fn span_until(
    src: &Arc<str>,
    start: usize,
    char_indices: &mut CharIndices,
    path: &Option<Arc<PathBuf>>,
) -> Span {
    let end = match char_indices.peek() {
        Some(&(end, _)) => end,
        None => src.len(),
    };
    Span::new(src.clone(), start, end, path.clone()).unwrap()
}
