//! Best-effort parsing of truncated JSON.
//!
//! Streaming tool-call arguments are only valid JSON once complete. This
//! parser reads the longest usable prefix: open arrays keep their complete
//! elements and drop a trailing incomplete one, open objects keep their
//! complete members. Scalars cut off mid-token are dropped.

use serde_json::{Map, Number, Value};

/// Parse `input`, tolerating truncation. Returns `None` when the prefix is
/// not JSON at all.
pub fn parse_partial(input: &str) -> Option<Value> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
    };
    parser.skip_ws();
    if parser.at_end() {
        return None;
    }
    match parser.value().ok()? {
        Parsed::Complete(value) => {
            parser.skip_ws();
            parser.at_end().then_some(value)
        }
        Parsed::Partial(value) => value,
    }
}

enum Parsed {
    Complete(Value),
    /// Input ended inside the value; carries what is usable so far
    Partial(Option<Value>),
}

struct Invalid;

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(' ' | '\n' | '\r' | '\t')) {
            self.pos += 1;
        }
    }

    fn value(&mut self) -> Result<Parsed, Invalid> {
        match self.peek() {
            None => Ok(Parsed::Partial(None)),
            Some('{') => self.object(),
            Some('[') => self.array(),
            Some('"') => Ok(match self.string()? {
                Some(s) => Parsed::Complete(Value::String(s)),
                None => Parsed::Partial(None),
            }),
            Some('t') => self.literal("true", Value::Bool(true)),
            Some('f') => self.literal("false", Value::Bool(false)),
            Some('n') => self.literal("null", Value::Null),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            Some(_) => Err(Invalid),
        }
    }

    fn object(&mut self) -> Result<Parsed, Invalid> {
        self.pos += 1;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Ok(Parsed::Partial(Some(Value::Object(map)))),
                Some('}') => {
                    self.pos += 1;
                    return Ok(Parsed::Complete(Value::Object(map)));
                }
                Some('"') => {}
                Some(_) => return Err(Invalid),
            }

            let Some(key) = self.string()? else {
                return Ok(Parsed::Partial(Some(Value::Object(map))));
            };
            self.skip_ws();
            match self.peek() {
                None => return Ok(Parsed::Partial(Some(Value::Object(map)))),
                Some(':') => self.pos += 1,
                Some(_) => return Err(Invalid),
            }
            self.skip_ws();

            match self.value()? {
                Parsed::Complete(value) => {
                    map.insert(key, value);
                }
                Parsed::Partial(value) => {
                    if let Some(value) = value {
                        map.insert(key, value);
                    }
                    return Ok(Parsed::Partial(Some(Value::Object(map))));
                }
            }

            self.skip_ws();
            match self.peek() {
                None => return Ok(Parsed::Partial(Some(Value::Object(map)))),
                Some(',') => self.pos += 1,
                Some('}') => {
                    self.pos += 1;
                    return Ok(Parsed::Complete(Value::Object(map)));
                }
                Some(_) => return Err(Invalid),
            }
        }
    }

    fn array(&mut self) -> Result<Parsed, Invalid> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Ok(Parsed::Partial(Some(Value::Array(items)))),
                Some(']') => {
                    self.pos += 1;
                    return Ok(Parsed::Complete(Value::Array(items)));
                }
                Some(_) => {}
            }

            match self.value()? {
                Parsed::Complete(value) => items.push(value),
                // Incomplete trailing element is discarded
                Parsed::Partial(_) => return Ok(Parsed::Partial(Some(Value::Array(items)))),
            }

            self.skip_ws();
            match self.peek() {
                None => return Ok(Parsed::Partial(Some(Value::Array(items)))),
                Some(',') => self.pos += 1,
                Some(']') => {
                    self.pos += 1;
                    return Ok(Parsed::Complete(Value::Array(items)));
                }
                Some(_) => return Err(Invalid),
            }
        }
    }

    /// Parse a string starting at the opening quote. `None` means the input
    /// ended before the closing quote.
    fn string(&mut self) -> Result<Option<String>, Invalid> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Ok(None);
            };
            self.pos += 1;
            match c {
                '"' => return Ok(Some(out)),
                '\\' => {
                    let Some(escaped) = self.peek() else {
                        return Ok(None);
                    };
                    self.pos += 1;
                    match escaped {
                        '"' => out.push('"'),
                        '\\' => out.push('\\'),
                        '/' => out.push('/'),
                        'b' => out.push('\u{8}'),
                        'f' => out.push('\u{c}'),
                        'n' => out.push('\n'),
                        'r' => out.push('\r'),
                        't' => out.push('\t'),
                        'u' => match self.unicode_escape()? {
                            Some(ch) => out.push(ch),
                            None => return Ok(None),
                        },
                        _ => return Err(Invalid),
                    }
                }
                c => out.push(c),
            }
        }
    }

    fn hex4(&mut self) -> Result<Option<u32>, Invalid> {
        if self.pos + 4 > self.chars.len() {
            self.pos = self.chars.len();
            return Ok(None);
        }
        let digits: String = self.chars[self.pos..self.pos + 4].iter().collect();
        self.pos += 4;
        u32::from_str_radix(&digits, 16).map(Some).map_err(|_| Invalid)
    }

    fn unicode_escape(&mut self) -> Result<Option<char>, Invalid> {
        let Some(high) = self.hex4()? else {
            return Ok(None);
        };
        if !(0xD800..0xDC00).contains(&high) {
            return Ok(Some(char::from_u32(high).unwrap_or('\u{FFFD}')));
        }
        // Surrogate pair: expect \uDC00..DFFF next
        if self.pos + 2 > self.chars.len() {
            self.pos = self.chars.len();
            return Ok(None);
        }
        if self.chars[self.pos] != '\\' || self.chars[self.pos + 1] != 'u' {
            return Ok(Some('\u{FFFD}'));
        }
        self.pos += 2;
        let Some(low) = self.hex4()? else {
            return Ok(None);
        };
        let code = 0x10000 + ((high - 0xD800) << 10) + (low.wrapping_sub(0xDC00) & 0x3FF);
        Ok(Some(char::from_u32(code).unwrap_or('\u{FFFD}')))
    }

    fn literal(&mut self, word: &str, value: Value) -> Result<Parsed, Invalid> {
        for expected in word.chars() {
            match self.peek() {
                None => return Ok(Parsed::Partial(None)),
                Some(c) if c == expected => self.pos += 1,
                Some(_) => return Err(Invalid),
            }
        }
        Ok(Parsed::Complete(value))
    }

    fn number(&mut self) -> Result<Parsed, Invalid> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        {
            self.pos += 1;
        }
        // A number running into the end of input may still grow
        if self.at_end() {
            return Ok(Parsed::Partial(None));
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        serde_json::from_str::<Number>(&text)
            .map(|n| Parsed::Complete(Value::Number(n)))
            .map_err(|_| Invalid)
    }
}
