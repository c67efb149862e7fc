/// Character cursor over a whitespace-stripped expression.
///
/// Whitespace carries no meaning in formulas (`a + b` and `a+b` are the same
/// expression), so it is removed up front. `origin` remembers where every
/// kept character sat in the source so diagnostics can point at the
/// original text.
#[derive(Debug, Clone)]
pub struct Scanner {
    chars: Vec<char>,
    origin: Vec<usize>,
    /// Length of the source in characters; the offset reported for
    /// end-of-input.
    source_len: usize,
    pos: usize,
}

impl Scanner {
    pub fn new(source: &str) -> Self {
        let mut chars = Vec::new();
        let mut origin = Vec::new();
        let mut source_len = 0;

        for (i, ch) in source.chars().enumerate() {
            source_len = i + 1;
            if !ch.is_whitespace() {
                chars.push(ch);
                origin.push(i);
            }
        }

        Scanner {
            chars,
            origin,
            source_len,
            pos: 0,
        }
    }

    pub fn current(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    pub fn peek(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    pub fn char_at(&self, pos: usize) -> Option<char> {
        self.chars.get(pos).copied()
    }

    pub fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos.min(self.chars.len());
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    /// Number of non-whitespace characters.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Source offset of the current position.
    pub fn offset(&self) -> usize {
        self.offset_at(self.pos)
    }

    /// Source offset of stripped position `pos`; positions past the end map
    /// to the source length.
    pub fn offset_at(&self, pos: usize) -> usize {
        self.origin.get(pos).copied().unwrap_or(self.source_len)
    }

    /// Position of the first `ch` at or after `from`.
    pub fn find(&self, ch: char, from: usize) -> Option<usize> {
        self.chars
            .iter()
            .skip(from)
            .position(|&c| c == ch)
            .map(|p| p + from)
    }

    /// Reads an identifier (`[A-Za-z_][A-Za-z0-9_]*`) at the cursor.
    ///
    /// Leaves the cursor untouched and returns `None` if no identifier starts
    /// here.
    pub fn read_identifier(&mut self) -> Option<String> {
        if !self.current().is_some_and(is_ident_start) {
            return None;
        }

        let mut ident = String::new();
        while let Some(ch) = self.current() {
            if is_ident_char(ch) {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        Some(ident)
    }

    /// Reads a numeric literal at the cursor.
    ///
    /// Accepts `digits [. digits] [(e|E) [+|-] digits]` and `. digits ...`,
    /// stopping at the first character that cannot extend the number. An `e`
    /// not followed by exponent digits is left for the next token. Returns
    /// `None` (cursor untouched) when no finite number starts here.
    pub fn read_number(&mut self) -> Option<f64> {
        let start = self.pos;
        let mut end = start;
        let mut mantissa_digits = 0;

        while self.is_digit_at(end) {
            end += 1;
            mantissa_digits += 1;
        }
        if self.char_at(end) == Some('.') {
            end += 1;
            while self.is_digit_at(end) {
                end += 1;
                mantissa_digits += 1;
            }
        }
        if mantissa_digits == 0 {
            return None;
        }

        if matches!(self.char_at(end), Some('e') | Some('E')) {
            let mut exp = end + 1;
            if matches!(self.char_at(exp), Some('+') | Some('-')) {
                exp += 1;
            }
            if self.is_digit_at(exp) {
                while self.is_digit_at(exp) {
                    exp += 1;
                }
                end = exp;
            }
        }

        let text: String = self.chars[start..end].iter().collect();
        let value: f64 = text.parse().ok()?;
        if !value.is_finite() {
            return None;
        }

        self.pos = end;
        Some(value)
    }

    fn is_digit_at(&self, pos: usize) -> bool {
        self.char_at(pos).is_some_and(|c| c.is_ascii_digit())
    }
}

pub fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

pub fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// True if `name` is a well-formed variable or function name.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(is_ident_start) && chars.all(is_ident_char)
}
