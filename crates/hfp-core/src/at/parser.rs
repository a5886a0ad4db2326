//! AT text helpers: normalization, command typing and argument tokenizing.
//!
//! All helpers are quote aware: commas and spaces inside `"..."` are part of
//! the token, never separators.

use serde::{Deserialize, Serialize};

/// How an extended AT command was invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtCommandType {
    /// `AT+CMD?`
    Read,
    /// `AT+CMD=?`
    Test,
    /// `AT+CMD=...`
    Set,
    /// Anything else
    Basic,
}

/// One comma separated argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtArg {
    Int(i64),
    Str(String),
}

impl AtArg {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AtArg::Int(v) => Some(*v),
            AtArg::Str(_) => None,
        }
    }
}

/// Normalize a raw command: upper case and strip spaces outside quotes,
/// and close a quote left open at the end of the line.
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 1);
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '"' {
            out.push('"');
            let mut closed = false;
            for q in chars.by_ref() {
                out.push(q);
                if q == '"' {
                    closed = true;
                    break;
                }
            }
            if !closed {
                out.push('"');
                break;
            }
        } else if c != ' ' {
            out.extend(c.to_uppercase());
        }
    }
    out
}

/// Classify a normalized command such as `+CSCS=?` by what follows the
/// five character command name.
pub fn command_type(command: &str) -> AtCommandType {
    let command = command.trim();
    let rest = match command.get(5..) {
        Some(rest) if !rest.is_empty() => rest,
        _ => return AtCommandType::Basic,
    };
    if rest.starts_with('?') {
        AtCommandType::Read
    } else if rest.starts_with("=?") {
        AtCommandType::Test
    } else if rest.starts_with('=') {
        AtCommandType::Set
    } else {
        AtCommandType::Basic
    }
}

/// Byte index of the first `ch` at or after `from` outside quotes, or
/// `input.len()` when there is none.
pub fn find_char(ch: char, input: &str, from: usize) -> usize {
    let bytes = input.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == '"' {
            match input[i + 1..].find('"') {
                Some(close) => i += close + 1,
                None => return input.len(),
            }
        } else if c == ch {
            return i;
        }
        i += 1;
    }
    input.len()
}

fn split_args(input: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut i = 0;
    loop {
        let j = find_char(',', input, i);
        out.push(&input[i..j]);
        if j >= input.len() {
            break;
        }
        i = j + 1;
    }
    out
}

/// Split a comma delimited argument string. Tokens that parse as integers
/// become [`AtArg::Int`], everything else [`AtArg::Str`].
pub fn generate_args(input: &str) -> Vec<AtArg> {
    split_args(input)
        .into_iter()
        .map(|token| match token.parse::<i64>() {
            Ok(v) => AtArg::Int(v),
            Err(_) => AtArg::Str(token.to_string()),
        })
        .collect()
}

/// Parse the `<assigned number>,<value>` pair of an AT+BIEV command
pub fn parse_biev(input: &str) -> Option<(u16, u64)> {
    let args = split_args(input);
    if args.len() != 2 {
        return None;
    }
    let indicator = args[0].trim().parse::<u16>().ok()?;
    let value = args[1].trim().parse::<u64>().ok()?;
    Some((indicator, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_keeps_quoted_text() {
        assert_eq!(normalize("+xevent = \"a b\", 3"), "+XEVENT=\"a b\",3");
        assert_eq!(normalize("+cscs=\"utf-8"), "+CSCS=\"utf-8\"");
        assert_eq!(normalize(" +csq"), "+CSQ");
    }

    #[test]
    fn test_command_type() {
        assert_eq!(command_type("+CSCS?"), AtCommandType::Read);
        assert_eq!(command_type("+CSCS=?"), AtCommandType::Test);
        assert_eq!(command_type("+CSCS=\"UTF-8\""), AtCommandType::Set);
        assert_eq!(command_type("+CSQ"), AtCommandType::Basic);
        assert_eq!(command_type("+CPBS"), AtCommandType::Basic);
    }

    #[test]
    fn test_find_char_skips_quotes() {
        assert_eq!(find_char(',', "\"a,b\",c", 0), 5);
        assert_eq!(find_char(',', "abc", 0), 3);
        assert_eq!(find_char(',', "\"open,", 0), 6);
    }

    #[test]
    fn test_generate_args_mixed() {
        assert_eq!(
            generate_args("1,\"x,y\",-7,abc"),
            vec![
                AtArg::Int(1),
                AtArg::Str("\"x,y\"".into()),
                AtArg::Int(-7),
                AtArg::Str("abc".into()),
            ]
        );
        assert_eq!(generate_args(""), vec![AtArg::Str(String::new())]);
        assert_eq!(generate_args("1,"), vec![AtArg::Int(1), AtArg::Str(String::new())]);
    }

    #[test]
    fn test_parse_biev() {
        assert_eq!(parse_biev("1,1"), Some((1, 1)));
        assert_eq!(parse_biev("2,100"), Some((2, 100)));
        assert_eq!(parse_biev("1"), None);
        assert_eq!(parse_biev("x,1"), None);
        assert_eq!(parse_biev("1,-1"), None);
    }
}
