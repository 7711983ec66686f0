//! Quote-aware command-line splitting and joining
//!
//! Requests carry the command line as a single string; the launcher
//! needs an argv. Double-quoted substrings are atomic arguments: the
//! quotes are consumed and interior spaces preserved. `join` is the
//! inverse, re-quoting arguments that contain whitespace so that
//! `split(&join(&v)) == v` for any argv without embedded quotes.

/// Placeholder for a space inside a quoted region while splitting.
const QUOTED_SPACE: char = '\u{1}';

/// Split a command line into arguments.
///
/// Unquoted runs of spaces separate arguments; a double-quoted
/// substring becomes a single argument with its quotes removed and
/// its spaces intact. An unterminated quote extends to the end of
/// the line.
pub fn split(line: &str) -> Vec<String> {
    let mut marked = String::with_capacity(line.len());
    let mut quoted = false;
    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                marked.push(' ');
            }
            ' ' if quoted => marked.push(QUOTED_SPACE),
            c => marked.push(c),
        }
    }

    marked
        .split(' ')
        .filter(|tok| !tok.is_empty())
        .map(|tok| tok.replace(QUOTED_SPACE, " "))
        .collect()
}

/// Join arguments back into a single command line.
///
/// Arguments containing whitespace (and empty arguments) are wrapped
/// in double quotes.
pub fn join(args: &[String]) -> String {
    let mut out = String::new();
    for arg in args {
        if !out.is_empty() {
            out.push(' ');
        }
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            out.push('"');
            out.push_str(arg);
            out.push('"');
        } else {
            out.push_str(arg);
        }
    }
    out
}

/// Parse a `;`-separated list of `KEY=VALUE` pairs.
///
/// Entries without an `=` and empty entries are ignored.
pub fn parse_env_overlay(overlay: &str) -> Vec<(String, String)> {
    overlay
        .split(';')
        .filter_map(|entry| {
            let entry = entry.trim();
            let (key, value) = entry.split_once('=')?;
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}
