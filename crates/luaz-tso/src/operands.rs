//! TSO operand parsing, shared by ALLOC/FREE specs, the command policy and
//! the emulated command processors.
//!
//! Operands follow the usual TSO shape:
//!
//! ```text
//! VERB positional 'QUOTED.NAME' KEYWORD(value) FLAG
//! ```
//!
//! Unquoted text is uppercased; quoted text keeps its case with the quotes
//! removed.

use std::collections::HashMap;

/// A command split into verb and operands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Verb, uppercased.
    pub name: String,
    pub positional: Vec<String>,
    /// Keyword operands: keyword → value.
    pub keywords: HashMap<String, String>,
    pub flags: Vec<String>,
}

impl ParsedCommand {
    pub fn has_flag(&self, flag: &str) -> bool {
        let upper = flag.to_ascii_uppercase();
        self.flags.iter().any(|f| *f == upper)
    }

    /// Keyword value, with alternate spellings tried in order.
    pub fn keyword(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .find_map(|n| self.keywords.get(&n.to_ascii_uppercase()))
            .map(String::as_str)
    }

    pub fn first_positional(&self) -> Option<&str> {
        self.positional.first().map(String::as_str)
    }
}

/// Split a command line into verb and operands.
pub fn parse_command(input: &str) -> ParsedCommand {
    let mut tokens = tokenize(input.trim()).into_iter();
    let name = tokens.next().map(|t| t.to_ascii_uppercase()).unwrap_or_default();
    let mut cmd = parse_operands(tokens);
    cmd.name = name;
    cmd
}

/// The uppercased verb of a command line, without parsing its operands.
pub fn verb(input: &str) -> String {
    tokenize(input.trim())
        .into_iter()
        .next()
        .map(|t| t.to_ascii_uppercase())
        .unwrap_or_default()
}

/// Parse a bare operand list (no verb), as used by ALLOC specs.
pub fn parse_operand_list(input: &str) -> ParsedCommand {
    parse_operands(tokenize(input.trim()).into_iter())
}

fn parse_operands(tokens: impl Iterator<Item = String>) -> ParsedCommand {
    let mut cmd = ParsedCommand::default();
    for token in tokens {
        if is_quoted(&token) {
            cmd.positional.push(unquote(&token));
        } else if let Some(open) = token.find('(') {
            let key = token[..open].to_ascii_uppercase();
            let inner = token[open + 1..].strip_suffix(')').unwrap_or(&token[open + 1..]);
            let value = if is_quoted(inner) {
                unquote(inner)
            } else {
                inner.trim().to_ascii_uppercase()
            };
            cmd.keywords.insert(key, value);
        } else if token.chars().all(|c| c.is_ascii_alphabetic()) && !cmd.positional.is_empty() {
            cmd.flags.push(token.to_ascii_uppercase());
        } else if is_known_flag(&token) {
            cmd.flags.push(token.to_ascii_uppercase());
        } else {
            cmd.positional.push(token.to_ascii_uppercase());
        }
    }
    cmd
}

fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;

    for c in input.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    current.push(c);
                }
                '(' => {
                    depth += 1;
                    current.push(c);
                }
                ')' => {
                    depth = depth.saturating_sub(1);
                    current.push(c);
                }
                ' ' | '\t' | ',' if depth == 0 => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                _ => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn is_known_flag(token: &str) -> bool {
    matches!(
        token.to_ascii_uppercase().as_str(),
        "SHR" | "OLD" | "NEW" | "MOD" | "REUSE" | "STATUS" | "HISTORY" | "MEMBERS" | "ALL"
            | "LIST"
    )
}

fn is_quoted(s: &str) -> bool {
    s.len() >= 2
        && ((s.starts_with('\'') && s.ends_with('\'')) || (s.starts_with('"') && s.ends_with('"')))
}

fn unquote(s: &str) -> String {
    s[1..s.len() - 1].to_string()
}
