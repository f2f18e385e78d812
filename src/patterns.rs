//! Glob-style filename filters.
//!
//! These follow shell `fnmatch` rules rather than path globbing, so a `*`
//! will happily match across `/` separators. That means `*.json` selects
//! `config.json` *and* `onnx/config.json`, the same as the hub's own client.

use std::fmt::{self, Display, Formatter};

/// A compiled glob pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    original: String,
    tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(char),
    AnyChar,
    AnyRun,
    Class { negated: bool, items: Vec<ClassItem> },
}

#[derive(Debug, Copy, Clone, PartialEq)]
enum ClassItem {
    Single(char),
    Range(char, char),
}

impl Pattern {
    pub fn new(pattern: &str) -> Pattern {
        let mut original = pattern.to_string();

        // "onnx/" is shorthand for everything in that directory
        if original.ends_with('/') {
            original.push('*');
        }

        let tokens = tokenize(&original);
        Pattern { original, tokens }
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }

    pub fn matches(&self, name: &str) -> bool {
        let text: Vec<char> = name.chars().collect();
        let tokens = &self.tokens;

        let (mut t, mut p) = (0, 0);
        // where to resume after the most recent `*`
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            if p < tokens.len() {
                match tokens[p] {
                    Token::AnyRun => {
                        backtrack = Some((p, t));
                        p += 1;
                        continue;
                    }
                    ref tok if tok.matches(text[t]) => {
                        p += 1;
                        t += 1;
                        continue;
                    }
                    _ => {}
                }
            }

            match backtrack {
                Some((star, consumed)) => {
                    p = star + 1;
                    t = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            }
        }

        tokens[p..].iter().all(|tok| *tok == Token::AnyRun)
    }
}

impl Display for Pattern {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl<'a> From<&'a str> for Pattern {
    fn from(other: &'a str) -> Pattern {
        Pattern::new(other)
    }
}

impl Token {
    fn matches(&self, c: char) -> bool {
        match *self {
            Token::Literal(lit) => lit == c,
            Token::AnyChar => true,
            Token::AnyRun => true,
            Token::Class {
                negated,
                ref items,
            } => items.iter().any(|item| item.contains(c)) != negated,
        }
    }
}

impl ClassItem {
    fn contains(&self, c: char) -> bool {
        match *self {
            ClassItem::Single(single) => single == c,
            ClassItem::Range(low, high) => low <= c && c <= high,
        }
    }
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => {
                // consecutive stars are equivalent to one
                if tokens.last() != Some(&Token::AnyRun) {
                    tokens.push(Token::AnyRun);
                }
                i += 1;
            }
            '?' => {
                tokens.push(Token::AnyChar);
                i += 1;
            }
            '[' => match parse_class(&chars, i + 1) {
                Some((class, next)) => {
                    tokens.push(class);
                    i = next;
                }
                None => {
                    tokens.push(Token::Literal('['));
                    i += 1;
                }
            },
            c => {
                tokens.push(Token::Literal(c));
                i += 1;
            }
        }
    }

    tokens
}

/// Parse the inside of a `[...]` class starting just after the `[`,
/// returning the token and the index after the closing `]`. An unterminated
/// class yields `None` so the `[` can be treated literally.
fn parse_class(chars: &[char], start: usize) -> Option<(Token, usize)> {
    let mut i = start;
    let negated = chars.get(i) == Some(&'!');
    if negated {
        i += 1;
    }

    let body_start = i;
    // a `]` straight after the opening bracket is part of the class
    if chars.get(i) == Some(&']') {
        i += 1;
    }
    while i < chars.len() && chars[i] != ']' {
        i += 1;
    }
    if i >= chars.len() {
        return None;
    }

    let body = &chars[body_start..i];
    let mut items = Vec::new();
    let mut j = 0;

    while j < body.len() {
        if j + 2 < body.len() && body[j + 1] == '-' {
            items.push(ClassItem::Range(body[j], body[j + 2]));
            j += 3;
        } else {
            items.push(ClassItem::Single(body[j]));
            j += 1;
        }
    }

    Some((Token::Class { negated, items }, i + 1))
}

/// Select the files which match at least one `allow` pattern and none of the
/// `ignore` patterns, preserving their original order.
///
/// When `allow` is `None` every file is allowed.
pub fn filter_files<'a, I>(
    files: I,
    allow: Option<&[Pattern]>,
    ignore: &[Pattern],
) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    files
        .into_iter()
        .filter(|name| match allow {
            Some(patterns) => patterns.iter().any(|p| p.matches(name)),
            None => true,
        })
        .filter(|name| !ignore.iter().any(|p| p.matches(name)))
        .collect()
}

/// The allow patterns which didn't select anything.
pub fn unmatched<'p, 'a, I>(patterns: &'p [Pattern], files: I) -> Vec<&'p Pattern>
where
    I: IntoIterator<Item = &'a str> + Clone,
{
    patterns
        .iter()
        .filter(|p| !files.clone().into_iter().any(|name| p.matches(name)))
        .collect()
}
