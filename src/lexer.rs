use std::{
    fmt,
    io::{self, Read},
};

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Eof,
    Def,
    Extern,
    Number(f64),
    Ident(String),
    Char(char),
    /// a malformed number literal, carrying the text lexed so far
    Error(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Eof => write!(f, "end of input"),
            Token::Def => write!(f, "'def'"),
            Token::Extern => write!(f, "'extern'"),
            Token::Number(num) => write!(f, "number {}", num),
            Token::Ident(ident) => write!(f, "identifier '{}'", ident),
            Token::Char(c) => write!(f, "'{}'", c),
            Token::Error(text) => write!(f, "malformed number '{}'", text),
        }
    }
}

/// whitespace as C's `isspace` sees it, vertical tab included
fn is_space(c: char) -> bool {
    c.is_ascii_whitespace() || c == '\x0b'
}

/// Pulls tokens one at a time out of a character source.
///
/// The lexer holds exactly one character of lookahead: the character that
/// terminated the previous token and has not been consumed yet.
pub struct Lexer<I: Iterator<Item = char>> {
    input: I,
    last_char: Option<char>,
}

impl<I: Iterator<Item = char>> Lexer<I> {
    pub fn new(input: I) -> Self {
        Lexer {
            input,
            last_char: Some(' '),
        }
    }

    fn bump(&mut self) {
        self.last_char = self.input.next();
    }

    pub fn next_token(&mut self) -> Token {
        loop {
            while let Some(c) = self.last_char {
                if !is_space(c) {
                    break;
                }
                self.bump();
            }

            let c = match self.last_char {
                Some(c) => c,
                None => return Token::Eof,
            };

            if c.is_ascii_alphabetic() {
                return self.lex_word();
            }

            if c.is_ascii_digit() || c == '.' {
                return self.lex_number();
            }

            if c == '#' {
                while let Some(c) = self.last_char {
                    if c == '\n' || c == '\r' {
                        break;
                    }
                    self.bump();
                }
                continue;
            }

            self.bump();
            return Token::Char(c);
        }
    }

    fn lex_word(&mut self) -> Token {
        let mut ident = String::new();
        while let Some(c) = self.last_char {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            ident.push(c);
            self.bump();
        }

        match ident.as_str() {
            "def" => Token::Def,
            "extern" => Token::Extern,
            _ => Token::Ident(ident),
        }
    }

    fn lex_number(&mut self) -> Token {
        let mut text = String::new();
        let mut decimal = false;
        while let Some(c) = self.last_char {
            if c == '.' {
                if decimal {
                    break;
                }
                decimal = true;
            } else if !c.is_ascii_digit() {
                break;
            }
            text.push(c);
            self.bump();
        }

        // a second '.' is left unconsumed so the rest of the run lexes on its own
        if decimal && self.last_char == Some('.') {
            return Token::Error(text);
        }

        // "." alone converts the way strtod does, to zero
        Token::Number(text.parse().unwrap_or(0.0))
    }
}

impl<I: Iterator<Item = char>> Iterator for Lexer<I> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        match self.next_token() {
            Token::Eof => None,
            tok => Some(tok),
        }
    }
}

/// Adapts a byte stream into single-byte characters. A read error ends the
/// stream like end of input does, after being handed to `on_error`.
pub fn chars<R, F>(reader: R, mut on_error: F) -> impl Iterator<Item = char>
where
    R: Read,
    F: FnMut(io::Error),
{
    reader.bytes().map_while(move |byte| match byte {
        Ok(byte) => Some(char::from(byte)),
        Err(e) => {
            on_error(e);
            None
        }
    })
}

/// lex a whole string, mostly useful for inspection and tests
pub fn lex(input: &str) -> Vec<Token> {
    Lexer::new(input.chars()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lex_works() {
        let input = "def add(x y) x+1.0;";
        let tokenized = vec![
            Token::Def,
            Token::Ident("add".to_string()),
            Token::Char('('),
            Token::Ident("x".to_string()),
            Token::Ident("y".to_string()),
            Token::Char(')'),
            Token::Ident("x".to_string()),
            Token::Char('+'),
            Token::Number(1.0),
            Token::Char(';'),
        ];
        assert_eq!(lex(input), tokenized);
    }

    #[test]
    fn keywords_only_match_whole_words() {
        assert_eq!(
            lex("extern externs def_x define"),
            vec![
                Token::Extern,
                Token::Ident("externs".to_string()),
                Token::Ident("def_x".to_string()),
                Token::Ident("define".to_string()),
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            lex("42 3.5 .25 7."),
            vec![
                Token::Number(42.0),
                Token::Number(3.5),
                Token::Number(0.25),
                Token::Number(7.0),
            ]
        );
        assert_eq!(lex("."), vec![Token::Number(0.0)]);
    }

    #[test]
    fn second_decimal_point_is_an_error() {
        let mut lexer = Lexer::new("3.14.15".chars());
        assert_eq!(lexer.next_token(), Token::Error("3.14".to_string()));
        assert_eq!(lexer.next_token(), Token::Number(0.15));
        assert_eq!(lexer.next_token(), Token::Eof);
    }

    #[test]
    fn comments_produce_no_tokens() {
        assert_eq!(lex("# ignored\n42"), vec![Token::Number(42.0)]);
        assert_eq!(lex("1 # trailing"), vec![Token::Number(1.0)]);
        assert_eq!(lex("# only\r# lines\n"), Vec::<Token>::new());
    }

    #[test]
    fn eof_is_idempotent() {
        let mut lexer = Lexer::new("x".chars());
        assert_eq!(lexer.next_token(), Token::Ident("x".to_string()));
        assert_eq!(lexer.next_token(), Token::Eof);
        assert_eq!(lexer.next_token(), Token::Eof);
    }

    #[test]
    fn tokens_cross_line_boundaries() {
        assert_eq!(
            lex("4 +\n\t5"),
            vec![Token::Number(4.0), Token::Char('+'), Token::Number(5.0)]
        );
    }

    #[test]
    fn vertical_tab_is_whitespace() {
        assert_eq!(
            lex("1\x0b+\x0c2"),
            vec![Token::Number(1.0), Token::Char('+'), Token::Number(2.0)]
        );
    }

    #[test]
    fn read_errors_end_input_and_are_reported() {
        struct Failing<'a>(&'a [u8]);

        impl Read for Failing<'_> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.0.is_empty() {
                    return Err(io::Error::new(io::ErrorKind::Other, "device gone"));
                }
                let n = self.0.read(buf)?;
                Ok(n)
            }
        }

        let mut errors = Vec::new();
        let tokens: Vec<Token> =
            Lexer::new(chars(Failing(b"x + 1"), |e| errors.push(e.to_string()))).collect();
        assert_eq!(
            tokens,
            vec![Token::Ident("x".to_string()), Token::Char('+'), Token::Number(1.0)]
        );
        assert_eq!(errors, vec!["device gone".to_string()]);
    }

    #[test]
    fn reads_from_bytes() {
        let source: &[u8] = b"foo(1)";
        let tokens: Vec<Token> = Lexer::new(chars(source, |e| panic!("{}", e))).collect();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("foo".to_string()),
                Token::Char('('),
                Token::Number(1.0),
                Token::Char(')'),
            ]
        );
    }
}
