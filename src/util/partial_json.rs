//! Best-effort parsing of truncated JSON text.
//!
//! Tool inputs arrive as JSON text split across many deltas. [`parse_partial_json`]
//! tries a strict parse first and otherwise repairs the prefix with [`fix_json`]:
//! a single linear scan that tracks the JSON grammar state, cuts the text back to
//! the last position that can be completed, and appends whatever closers are
//! still open.

use serde_json::Value;

/// Outcome of a partial parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialJsonState {
    /// No input at all.
    UndefinedInput,
    /// The text was already valid JSON.
    SuccessfulParse,
    /// The text was valid only after repair.
    RepairedParse,
    /// Not even the repaired text parsed.
    FailedParse,
}

/// Result of [`parse_partial_json`].
#[derive(Debug, Clone, PartialEq)]
pub struct PartialJson {
    pub value: Option<Value>,
    pub state: PartialJsonState,
}

/// Parse possibly-truncated JSON text.
pub fn parse_partial_json(text: Option<&str>) -> PartialJson {
    let Some(text) = text.filter(|t| !t.is_empty()) else {
        return PartialJson {
            value: None,
            state: PartialJsonState::UndefinedInput,
        };
    };

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return PartialJson {
            value: Some(value),
            state: PartialJsonState::SuccessfulParse,
        };
    }

    match serde_json::from_str::<Value>(&fix_json(text)) {
        Ok(value) => PartialJson {
            value: Some(value),
            state: PartialJsonState::RepairedParse,
        },
        Err(_) => PartialJson {
            value: None,
            state: PartialJsonState::FailedParse,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Root,
    Finish,
    InString,
    InStringEscape,
    InLiteral,
    InNumber,
    ObjectStart,
    ObjectKey,
    ObjectAfterKey,
    ObjectBeforeValue,
    ObjectAfterValue,
    ObjectAfterComma,
    ArrayStart,
    ArrayAfterValue,
    ArrayAfterComma,
}

const LITERALS: [&str; 3] = ["true", "false", "null"];

struct Scanner {
    stack: Vec<Scan>,
    last_valid: Option<usize>,
    literal_start: Option<usize>,
}

impl Scanner {
    fn swap_top(&mut self, next: Scan) {
        self.stack.pop();
        self.stack.push(next);
    }

    fn value_start(&mut self, c: char, i: usize, after: Scan) {
        let inner = match c {
            '"' => Scan::InString,
            'f' | 't' | 'n' => {
                self.literal_start = Some(i);
                Scan::InLiteral
            }
            '-' => {
                // A lone minus sign is not a completable prefix.
                self.swap_top(after);
                self.stack.push(Scan::InNumber);
                return;
            }
            '0'..='9' => Scan::InNumber,
            '{' => Scan::ObjectStart,
            '[' => Scan::ArrayStart,
            _ => return,
        };
        self.last_valid = Some(i);
        self.swap_top(after);
        self.stack.push(inner);
    }

    fn after_object_value(&mut self, c: char, i: usize) {
        match c {
            ',' => self.swap_top(Scan::ObjectAfterComma),
            '}' => {
                self.last_valid = Some(i);
                self.stack.pop();
            }
            _ => {}
        }
    }

    fn after_array_value(&mut self, c: char, i: usize) {
        match c {
            ',' => self.swap_top(Scan::ArrayAfterComma),
            ']' => {
                self.last_valid = Some(i);
                self.stack.pop();
            }
            _ => {}
        }
    }

    fn top(&self) -> Option<Scan> {
        self.stack.last().copied()
    }
}

/// Close unterminated strings, objects, arrays and literals in `input`.
///
/// Invalid JSON is not detected here; the output is meant to be handed to a
/// strict parser that will reject it.
pub fn fix_json(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut scanner = Scanner {
        stack: vec![Scan::Root],
        last_valid: None,
        literal_start: None,
    };

    for (i, &c) in chars.iter().enumerate() {
        let Some(state) = scanner.top() else { break };
        match state {
            Scan::Root => scanner.value_start(c, i, Scan::Finish),
            Scan::ObjectStart => match c {
                '"' => scanner.swap_top(Scan::ObjectKey),
                '}' => {
                    scanner.last_valid = Some(i);
                    scanner.stack.pop();
                }
                _ => {}
            },
            Scan::ObjectAfterComma => {
                if c == '"' {
                    scanner.swap_top(Scan::ObjectKey);
                }
            }
            Scan::ObjectKey => {
                if c == '"' {
                    scanner.swap_top(Scan::ObjectAfterKey);
                }
            }
            Scan::ObjectAfterKey => {
                if c == ':' {
                    scanner.swap_top(Scan::ObjectBeforeValue);
                }
            }
            Scan::ObjectBeforeValue => scanner.value_start(c, i, Scan::ObjectAfterValue),
            Scan::ObjectAfterValue => scanner.after_object_value(c, i),
            Scan::InString => match c {
                '"' => {
                    scanner.stack.pop();
                    scanner.last_valid = Some(i);
                }
                '\\' => scanner.stack.push(Scan::InStringEscape),
                _ => scanner.last_valid = Some(i),
            },
            Scan::ArrayStart => {
                if c == ']' {
                    scanner.last_valid = Some(i);
                    scanner.stack.pop();
                } else {
                    scanner.last_valid = Some(i);
                    scanner.value_start(c, i, Scan::ArrayAfterValue);
                }
            }
            Scan::ArrayAfterValue => match c {
                ',' => scanner.swap_top(Scan::ArrayAfterComma),
                ']' => {
                    scanner.last_valid = Some(i);
                    scanner.stack.pop();
                }
                _ => scanner.last_valid = Some(i),
            },
            Scan::ArrayAfterComma => scanner.value_start(c, i, Scan::ArrayAfterValue),
            Scan::InStringEscape => {
                scanner.stack.pop();
                scanner.last_valid = Some(i);
            }
            Scan::InNumber => match c {
                '0'..='9' => scanner.last_valid = Some(i),
                'e' | 'E' | '-' | '.' => {}
                ',' | '}' | ']' => {
                    scanner.stack.pop();
                    match scanner.top() {
                        Some(Scan::ArrayAfterValue) if c != '}' => scanner.after_array_value(c, i),
                        Some(Scan::ObjectAfterValue) if c != ']' => {
                            scanner.after_object_value(c, i)
                        }
                        _ => {}
                    }
                }
                _ => {
                    scanner.stack.pop();
                }
            },
            Scan::InLiteral => {
                let Some(start) = scanner.literal_start else {
                    continue;
                };
                let partial: String = chars[start..=i].iter().collect();
                if LITERALS.iter().any(|lit| lit.starts_with(&partial)) {
                    scanner.last_valid = Some(i);
                } else {
                    scanner.stack.pop();
                    match scanner.top() {
                        Some(Scan::ObjectAfterValue) => scanner.after_object_value(c, i),
                        Some(Scan::ArrayAfterValue) => scanner.after_array_value(c, i),
                        _ => {}
                    }
                }
            }
            Scan::Finish => {}
        }
    }

    let keep = scanner.last_valid.map_or(0, |i| i + 1);
    let mut result: String = chars[..keep].iter().collect();

    for state in scanner.stack.iter().rev() {
        match state {
            Scan::InString => result.push('"'),
            Scan::ObjectKey
            | Scan::ObjectAfterKey
            | Scan::ObjectAfterComma
            | Scan::ObjectStart
            | Scan::ObjectBeforeValue
            | Scan::ObjectAfterValue => result.push('}'),
            Scan::ArrayStart | Scan::ArrayAfterComma | Scan::ArrayAfterValue => result.push(']'),
            Scan::InLiteral => {
                if let Some(start) = scanner.literal_start {
                    let partial: String = chars[start..].iter().collect();
                    if let Some(lit) = LITERALS.iter().find(|lit| lit.starts_with(&partial)) {
                        result.push_str(&lit[partial.len()..]);
                    }
                }
            }
            _ => {}
        }
    }

    result
}
