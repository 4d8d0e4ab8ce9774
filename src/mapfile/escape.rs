//! Quoted pattern strings
//!
//! Supported escapes: `\n`, `\t`, `\xHH`, `\uHHHH`, `\\`, `\"`, `\'`.
//! Anything else after a backslash rejects the line.

use crate::error::ParseErrorKind;

/// Read a double-quoted string from the start of `input`
///
/// Returns the unescaped content and the remainder after the closing quote.
pub fn read_quoted(input: &str) -> Result<(String, &str), ParseErrorKind> {
    let body = input
        .strip_prefix('"')
        .ok_or(ParseErrorKind::UnquotedPattern)?;

    let mut out = String::with_capacity(body.len());
    let mut chars = body.char_indices();

    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Ok((out, &body[idx + 1..])),
            '\\' => {
                let (_, esc) = chars.next().ok_or(ParseErrorKind::UnterminatedQuote)?;
                match esc {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    '\\' => out.push('\\'),
                    '"' => out.push('"'),
                    '\'' => out.push('\''),
                    'x' => out.push(read_hex(&mut chars, 2, 'x')?),
                    'u' => out.push(read_hex(&mut chars, 4, 'u')?),
                    other => return Err(ParseErrorKind::UnsupportedEscape(other.to_string())),
                }
            }
            _ => out.push(c),
        }
    }

    Err(ParseErrorKind::UnterminatedQuote)
}

fn read_hex(
    chars: &mut std::str::CharIndices<'_>,
    digits: usize,
    marker: char,
) -> Result<char, ParseErrorKind> {
    let mut hex = String::with_capacity(digits);
    for _ in 0..digits {
        match chars.next() {
            Some((_, d)) if d.is_ascii_hexdigit() => hex.push(d),
            _ => return Err(ParseErrorKind::InvalidEscapeValue(format!("\\{}{}", marker, hex))),
        }
    }
    u32::from_str_radix(&hex, 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| ParseErrorKind::InvalidEscapeValue(format!("\\{}{}", marker, hex)))
}
