use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loc {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenType {
    Word(String),
    StringLit(String),
    LBrace,
    RBrace,
    Semicolon,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenType,
    pub loc: Loc,
}

pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.chars().peekable(),
            line: 1,
            col: 1,
        }
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.input.next();
        if let Some(c) = c {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        c
    }

    fn peek(&mut self) -> Option<&char> {
        self.input.peek()
    }

    fn current_loc(&self) -> Loc {
        Loc {
            line: self.line,
            col: self.col,
        }
    }

    fn skip_comment(&mut self) {
        while let Some(&c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn read_quoted(&mut self, quote: char) -> Result<String, String> {
        let start = self.current_loc();
        self.advance(); // consume opening quote
        let mut s = String::new();
        loop {
            match self.advance() {
                Some('\\') => {
                    if let Some(next) = self.advance() {
                        s.push(next);
                    }
                }
                Some(c) if c == quote => return Ok(s),
                Some(c) => s.push(c),
                None => {
                    return Err(format!(
                        "unterminated string starting at line {}, col {}",
                        start.line, start.col
                    ));
                }
            }
        }
    }

    fn read_word(&mut self) -> String {
        let mut s = String::new();
        while let Some(&c) = self.peek() {
            if c.is_whitespace() || c == ';' || c == '{' || c == '}' || c == '#' {
                break;
            }
            s.push(c);
            self.advance();
        }
        s
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::new();

        while let Some(&c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
                continue;
            }
            if c == '#' {
                self.skip_comment();
                continue;
            }

            let loc = self.current_loc();
            match c {
                '{' => {
                    tokens.push(Token {
                        kind: TokenType::LBrace,
                        loc,
                    });
                    self.advance();
                }
                '}' => {
                    tokens.push(Token {
                        kind: TokenType::RBrace,
                        loc,
                    });
                    self.advance();
                }
                ';' => {
                    tokens.push(Token {
                        kind: TokenType::Semicolon,
                        loc,
                    });
                    self.advance();
                }
                '"' | '\'' => {
                    let s = self.read_quoted(c)?;
                    tokens.push(Token {
                        kind: TokenType::StringLit(s),
                        loc,
                    });
                }
                _ => {
                    let word = self.read_word();
                    if word.is_empty() {
                        return Err(format!(
                            "unexpected character '{}' at line {}, col {}",
                            c, loc.line, loc.col
                        ));
                    }
                    tokens.push(Token {
                        kind: TokenType::Word(word),
                        loc,
                    });
                }
            }
        }

        Ok(tokens)
    }
}
