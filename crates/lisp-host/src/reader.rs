//! S-expression reader.

use lisp_bridge::HostError;

use crate::interp::Interp;
use crate::object::Obj;

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("end of input inside {0}")]
    Eof(&'static str),

    #[error("unexpected `{0}`")]
    Unexpected(char),

    #[error("invalid escape `\\{0}`")]
    Escape(char),
}

impl From<ReadError> for HostError {
    fn from(e: ReadError) -> Self {
        HostError::signal("invalid-read-syntax", e.to_string())
    }
}

pub struct Reader<'a> {
    interp: &'a Interp,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(interp: &'a Interp, source: &str) -> Self {
        Self {
            interp,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    /// Read every top-level form.
    pub fn read_all(&mut self) -> Result<Vec<Obj>, ReadError> {
        let mut forms = Vec::new();
        loop {
            self.skip_trivia();
            if self.peek().is_none() {
                return Ok(forms);
            }
            forms.push(self.read()?);
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c == ';' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else if c.is_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn read(&mut self) -> Result<Obj, ReadError> {
        self.skip_trivia();
        match self.peek() {
            None => Err(ReadError::Eof("form")),
            Some('(') => {
                self.pos += 1;
                self.read_list()
            }
            Some('[') => {
                self.pos += 1;
                self.read_vector()
            }
            Some('\'') => {
                self.pos += 1;
                let quoted = self.read()?;
                Ok(Obj::list([self.interp.intern("quote"), quoted]))
            }
            Some('"') => {
                self.pos += 1;
                self.read_string()
            }
            Some(c @ (')' | ']')) => Err(ReadError::Unexpected(c)),
            Some(_) => Ok(self.read_atom()),
        }
    }

    fn read_list(&mut self) -> Result<Obj, ReadError> {
        let mut items = Vec::new();
        let mut tail = Obj::Nil;
        loop {
            self.skip_trivia();
            match self.peek() {
                None => return Err(ReadError::Eof("list")),
                Some(')') => {
                    self.pos += 1;
                    break;
                }
                Some('.') if self.is_lone_dot() => {
                    self.pos += 1;
                    tail = self.read()?;
                    self.skip_trivia();
                    match self.bump() {
                        Some(')') => break,
                        Some(c) => return Err(ReadError::Unexpected(c)),
                        None => return Err(ReadError::Eof("dotted list")),
                    }
                }
                Some(_) => items.push(self.read()?),
            }
        }
        Ok(items
            .into_iter()
            .rev()
            .fold(tail, |tail, item| Obj::cons(item, tail)))
    }

    fn is_lone_dot(&self) -> bool {
        self.chars
            .get(self.pos + 1)
            .is_none_or(|c| c.is_whitespace() || *c == '(' || *c == ')')
    }

    fn read_vector(&mut self) -> Result<Obj, ReadError> {
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                None => return Err(ReadError::Eof("vector")),
                Some(']') => {
                    self.pos += 1;
                    return Ok(Obj::vector(items));
                }
                Some(_) => items.push(self.read()?),
            }
        }
    }

    fn read_string(&mut self) -> Result<Obj, ReadError> {
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(ReadError::Eof("string")),
                Some('"') => return Ok(Obj::string(&text)),
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some(c @ ('"' | '\\')) => text.push(c),
                    Some(c) => return Err(ReadError::Escape(c)),
                    None => return Err(ReadError::Eof("string")),
                },
                Some(c) => text.push(c),
            }
        }
    }

    fn read_atom(&mut self) -> Obj {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | '"' | '\'' | ';') {
                break;
            }
            self.pos += 1;
        }
        let token: String = self.chars[start..self.pos].iter().collect();

        if let Ok(i) = token.parse::<i64>() {
            return Obj::Int(i);
        }
        if token.contains(['.', 'e']) && token.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
            if let Ok(f) = token.parse::<f64>() {
                return Obj::Float(f);
            }
        }
        self.interp.intern(&token)
    }
}
