//! Shell-like argument tokenizer.
//!
//! Splits a command line on whitespace, merging quoted multi-word arguments
//! back into one argument. This is deliberately not a shell parser: there is
//! no escaping and no nesting. A token with a quote on exactly one side
//! toggles a composite argument open or closed; everything between is
//! space-joined and the quote characters are removed. Malformed input never
//! fails, it just degrades to a plain whitespace split.

/// Characters recognised as quotes.
const QUOTES: [char; 2] = ['\'', '"'];

fn is_quote(c: char) -> bool {
    QUOTES.contains(&c)
}

/// A token has an unmatched quote when exactly one of its ends is a quote,
/// or when it is a lone quote character.
fn has_unmatched_quote(token: &str) -> bool {
    let starts = token.starts_with(is_quote);
    let ends = token.ends_with(is_quote);
    if starts && ends {
        token.chars().count() == 1
    } else {
        starts || ends
    }
}

fn is_self_quoted(token: &str) -> bool {
    token.chars().count() >= 2 && token.starts_with(is_quote) && token.ends_with(is_quote)
}

fn strip_quotes(s: &str) -> String {
    s.chars().filter(|c| !is_quote(*c)).collect()
}

/// Split `line` into argument tokens.
///
/// ```
/// use seqrun_core::argv::tokenize;
///
/// assert_eq!(tokenize("blastn -db nt"), vec!["blastn", "-db", "nt"]);
/// assert_eq!(tokenize("-title 'my db'"), vec!["-title", "my db"]);
/// ```
pub fn tokenize(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut composite: Option<Vec<&str>> = None;

    for token in line.split_whitespace() {
        match composite.as_mut() {
            Some(parts) => {
                parts.push(token);
                if has_unmatched_quote(token) {
                    args.push(strip_quotes(&parts.join(" ")));
                    composite = None;
                }
            }
            None if is_self_quoted(token) => args.push(strip_quotes(token)),
            None if has_unmatched_quote(token) => composite = Some(vec![token]),
            None => args.push(token.to_string()),
        }
    }

    // Unterminated composite: keep what was collected rather than failing.
    if let Some(parts) = composite {
        args.push(strip_quotes(&parts.join(" ")));
    }

    args
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
