//! String generation from regular-expression patterns.
//!
//! Supports a practical subset of regex syntax:
//! - literals and escaped punctuation (`\.`, `\-`, `\/` ...)
//! - `\d` digit, `\w` word character, `\s` space, and a subset of `\D`
//!   (lowercase letters), `\W` (punctuation) and `\S` (alphanumerics)
//! - `\xHH`, `\x{H..}`, `\uHHHH` and `\u{H..}` code points, plus `\n \r \t`
//! - zero-width `\b`, `\B`, `\A` and `\z`, which generate nothing
//! - `.` any alphanumeric character
//! - `[abc]`, `[a-z0-9_]`, `[^@]` character classes, negation taken within printable ASCII
//! - `(a|b)` and `(?:a|b)` groups with alternation, and top-level `a|b`
//! - `?`, `*`, `+`, `{n}`, `{n,m}`, `{n,}` quantifiers (lazy `?` suffix ignored)
//! - `^` and `$` anchors
//!
//! Any other alphanumeric escape is rejected. Unbounded quantifiers add at
//! most [`UNBOUNDED_EXTRA`] repetitions unless a generator is widened with
//! [`PatternGenerator::with_unbounded_extra`].
//!
//! [`PatternSampler`] pairs a generator with the `regex` reading of the same
//! pattern and only hands out strings that regex accepts.

use crate::domain::SchemaError;
use rand::Rng;
use regex::Regex;

/// Extra repetitions allowed for `*`, `+` and `{n,}`
pub const UNBOUNDED_EXTRA: u32 = 3;

/// Candidates drawn by [`PatternSampler::sample`] before giving up
pub const SAMPLE_ATTEMPTS: usize = 256;

const PUNCTUATION: [char; 9] = [' ', '!', '@', '#', '$', '%', '^', '&', '*'];

#[derive(Debug, Clone)]
enum Atom {
    Literal(char),
    Class(Vec<char>),
    Group(Vec<Vec<Piece>>),
    /// Zero-width assertion
    Empty,
}

#[derive(Debug, Clone)]
struct Piece {
    atom: Atom,
    min: u32,
    /// `None` for open-ended quantifiers
    max: Option<u32>,
}

/// A compiled pattern ready to produce matching strings
#[derive(Debug, Clone)]
pub struct PatternGenerator {
    alternatives: Vec<Vec<Piece>>,
    unbounded_extra: u32,
}

impl PatternGenerator {
    pub fn parse(pattern: &str) -> Result<Self, SchemaError> {
        let mut parser = Parser {
            chars: pattern.chars().collect(),
            pos: 0,
            pattern,
        };
        let alternatives = parser.alternation()?;
        if parser.pos < parser.chars.len() {
            return Err(parser.error("unbalanced ')'"));
        }
        Ok(Self {
            alternatives,
            unbounded_extra: UNBOUNDED_EXTRA,
        })
    }

    /// Let `*`, `+` and `{n,}` repeat up to `extra` times past their minimum
    pub fn with_unbounded_extra(mut self, extra: u32) -> Self {
        self.unbounded_extra = extra;
        self
    }

    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        let mut out = String::new();
        self.emit(&self.alternatives, rng, &mut out);
        out
    }

    fn emit<R: Rng + ?Sized>(&self, alternatives: &[Vec<Piece>], rng: &mut R, out: &mut String) {
        if alternatives.is_empty() {
            return;
        }
        let branch = &alternatives[rng.gen_range(0..alternatives.len())];
        for piece in branch {
            let max = piece.max.unwrap_or(piece.min.saturating_add(self.unbounded_extra));
            let count = if piece.min == max {
                piece.min
            } else {
                rng.gen_range(piece.min..=max)
            };
            for _ in 0..count {
                match &piece.atom {
                    Atom::Literal(c) => out.push(*c),
                    Atom::Class(choices) => out.push(choices[rng.gen_range(0..choices.len())]),
                    Atom::Group(inner) => self.emit(inner, rng, out),
                    Atom::Empty => {}
                }
            }
        }
    }
}

/// Generator plus the compiled regex for the same pattern.
///
/// Generation covers a subset of the regex language while checks run the
/// real `regex` engine, so every sample is confirmed before it is returned.
#[derive(Debug, Clone)]
pub struct PatternSampler {
    generator: PatternGenerator,
    regex: Regex,
}

impl PatternSampler {
    /// `min_len` widens open-ended quantifiers so longer strings are reachable
    pub fn new(pattern: &str, min_len: Option<usize>) -> Result<Self, SchemaError> {
        let extra = u32::try_from(min_len.unwrap_or(0)).unwrap_or(u32::MAX).max(UNBOUNDED_EXTRA);
        let generator = PatternGenerator::parse(pattern)?.with_unbounded_extra(extra);
        let regex = Regex::new(pattern)
            .map_err(|e| SchemaError::Validation(format!("invalid pattern '{}': {}", pattern, e)))?;
        Ok(Self { generator, regex })
    }

    pub fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    /// First generated string that the regex matches and `accept` approves,
    /// or `None` after [`SAMPLE_ATTEMPTS`] candidates
    pub fn sample<R, F>(&self, rng: &mut R, accept: F) -> Option<String>
    where
        R: Rng + ?Sized,
        F: Fn(&str) -> bool,
    {
        (0..SAMPLE_ATTEMPTS)
            .map(|_| self.generator.generate(rng))
            .find(|candidate| self.matches(candidate) && accept(candidate))
    }
}

/// Produce one string matching `pattern` using the thread-local RNG
pub fn generate_from_pattern(pattern: &str) -> Result<String, SchemaError> {
    PatternSampler::new(pattern, None)?
        .sample(&mut rand::thread_rng(), |_| true)
        .ok_or_else(|| {
            SchemaError::Validation(format!(
                "no string matching pattern '{}' found after {} attempts",
                pattern, SAMPLE_ATTEMPTS
            ))
        })
}

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    pattern: &'a str,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> SchemaError {
        SchemaError::Validation(format!(
            "unsupported pattern '{}' at offset {}: {}",
            self.pattern, self.pos, reason
        ))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn alternation(&mut self) -> Result<Vec<Vec<Piece>>, SchemaError> {
        let mut alternatives = vec![self.sequence()?];
        while self.peek() == Some('|') {
            self.pos += 1;
            alternatives.push(self.sequence()?);
        }
        Ok(alternatives)
    }

    fn sequence(&mut self) -> Result<Vec<Piece>, SchemaError> {
        let mut pieces = Vec::new();
        while let Some(c) = self.peek() {
            match c {
                '|' | ')' => break,
                '^' | '$' => {
                    self.pos += 1;
                }
                _ => {
                    let atom = self.atom()?;
                    let (min, max) = self.quantifier()?;
                    pieces.push(Piece { atom, min, max });
                }
            }
        }
        Ok(pieces)
    }

    fn atom(&mut self) -> Result<Atom, SchemaError> {
        let c = self.next().ok_or_else(|| self.error("unexpected end"))?;
        match c {
            '(' => {
                if self.peek() == Some('?') {
                    self.pos += 1;
                    if self.next() != Some(':') {
                        return Err(self.error("only (?: groups are supported"));
                    }
                }
                let inner = self.alternation()?;
                if self.next() != Some(')') {
                    return Err(self.error("unclosed group"));
                }
                Ok(Atom::Group(inner))
            }
            '[' => self.class(),
            '\\' => self.escape(),
            '.' => Ok(Atom::Class(alphanumeric())),
            '*' | '+' | '?' | '{' => Err(self.error("quantifier without a preceding atom")),
            other => Ok(Atom::Literal(other)),
        }
    }

    fn class(&mut self) -> Result<Atom, SchemaError> {
        let negated = self.peek() == Some('^');
        if negated {
            self.pos += 1;
        }

        let mut members: Vec<char> = Vec::new();
        let mut first = true;
        loop {
            let c = self.next().ok_or_else(|| self.error("unclosed character class"))?;
            if c == ']' && !first {
                break;
            }
            first = false;

            let start = if c == '\\' {
                match self.escape()? {
                    Atom::Literal(lit) => lit,
                    Atom::Class(set) => {
                        members.extend(set);
                        continue;
                    }
                    Atom::Empty => return Err(self.error("assertion inside character class")),
                    Atom::Group(_) => return Err(self.error("group inside character class")),
                }
            } else {
                c
            };

            let is_range = self.peek() == Some('-')
                && self.chars.get(self.pos + 1).is_some_and(|next| *next != ']');
            if is_range {
                self.pos += 1;
                let end = match self.next().ok_or_else(|| self.error("unclosed range"))? {
                    '\\' => match self.escape()? {
                        Atom::Literal(lit) => lit,
                        _ => return Err(self.error("range bound must be a single character")),
                    },
                    other => other,
                };
                if end < start {
                    return Err(self.error("reversed character range"));
                }
                members.extend(start..=end);
            } else {
                members.push(start);
            }
        }

        if negated {
            let excluded = members;
            members = (' '..='~').filter(|c| !excluded.contains(c)).collect();
        }
        members.sort_unstable();
        members.dedup();
        if members.is_empty() {
            return Err(self.error("empty character class"));
        }
        Ok(Atom::Class(members))
    }

    fn quantifier(&mut self) -> Result<(u32, Option<u32>), SchemaError> {
        let bounds = match self.peek() {
            Some('?') => {
                self.pos += 1;
                (0, Some(1))
            }
            Some('*') => {
                self.pos += 1;
                (0, None)
            }
            Some('+') => {
                self.pos += 1;
                (1, None)
            }
            Some('{') => {
                self.pos += 1;
                let mut spec = String::new();
                loop {
                    match self.next() {
                        Some('}') => break,
                        Some(c) if c.is_ascii_digit() || c == ',' => spec.push(c),
                        _ => return Err(self.error("malformed repetition")),
                    }
                }
                let parse = |s: &str| s.trim().parse::<u32>().ok();
                match spec.split_once(',') {
                    None => {
                        let n = parse(&spec).ok_or_else(|| self.error("malformed repetition"))?;
                        (n, Some(n))
                    }
                    Some((lo, "")) => {
                        let n = parse(lo).ok_or_else(|| self.error("malformed repetition"))?;
                        (n, None)
                    }
                    Some((lo, hi)) => {
                        let lo = parse(lo).ok_or_else(|| self.error("malformed repetition"))?;
                        let hi = parse(hi).ok_or_else(|| self.error("malformed repetition"))?;
                        if hi < lo {
                            return Err(self.error("repetition upper bound below lower bound"));
                        }
                        (lo, Some(hi))
                    }
                }
            }
            _ => return Ok((1, Some(1))),
        };

        // Lazy and possessive suffixes do not change the generated language
        if matches!(self.peek(), Some('?') | Some('+')) {
            self.pos += 1;
        }
        Ok(bounds)
    }

    /// Escape sequence after a consumed `\\`
    fn escape(&mut self) -> Result<Atom, SchemaError> {
        let escaped = self.next().ok_or_else(|| self.error("dangling escape"))?;
        let atom = match escaped {
            'd' => Atom::Class(('0'..='9').collect()),
            'D' => Atom::Class(('a'..='z').collect()),
            'w' => Atom::Class(
                ('a'..='z')
                    .chain('A'..='Z')
                    .chain('0'..='9')
                    .chain(std::iter::once('_'))
                    .collect(),
            ),
            'W' => Atom::Class(PUNCTUATION.to_vec()),
            's' => Atom::Literal(' '),
            'S' => Atom::Class(alphanumeric()),
            'n' => Atom::Literal('\n'),
            'r' => Atom::Literal('\r'),
            't' => Atom::Literal('\t'),
            'b' | 'B' | 'A' | 'z' => Atom::Empty,
            'x' => Atom::Literal(self.code_point(2)?),
            'u' => Atom::Literal(self.code_point(4)?),
            other if other.is_ascii_alphanumeric() => {
                return Err(self.error(&format!("unsupported escape '\\{}'", other)));
            }
            other => Atom::Literal(other),
        };
        Ok(atom)
    }

    /// Hex code point: `{H..}` or exactly `width` digits
    fn code_point(&mut self, width: usize) -> Result<char, SchemaError> {
        let mut digits = String::new();
        if self.peek() == Some('{') {
            self.pos += 1;
            loop {
                match self.next() {
                    Some('}') => break,
                    Some(c) if c.is_ascii_hexdigit() => digits.push(c),
                    _ => return Err(self.error("malformed code point escape")),
                }
            }
        } else {
            for _ in 0..width {
                match self.next() {
                    Some(c) if c.is_ascii_hexdigit() => digits.push(c),
                    _ => return Err(self.error("malformed code point escape")),
                }
            }
        }
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error("invalid code point"))
    }
}

fn alphanumeric() -> Vec<char> {
    ('a'..='z').chain('A'..='Z').chain('0'..='9').collect()
}
