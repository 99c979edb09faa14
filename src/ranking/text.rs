//! Text preprocessing shared by the rankers.
//!
//! Identifier-style values (`create_issue`, `listPullRequests`,
//! `repos/issues.list`) are normalized so they tokenize the same way as prose.

/// Lowercase `input`, turning separators into spaces and splitting
/// camelCase and acronym boundaries (`HTTPServer` → `http server`).
pub fn normalize(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 8);

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            out.push(' ');
            continue;
        }
        if i > 0 && c.is_uppercase() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower)
            {
                out.push(' ');
            }
        }
        out.extend(c.to_lowercase());
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized whitespace-separated tokens.
pub fn tokenize(input: &str) -> Vec<String> {
    normalize(input)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Tokens reduced by [`stem`].
pub fn stemmed_tokens(input: &str) -> Vec<String> {
    tokenize(input).iter().map(|t| stem(t)).collect()
}

/// Light English suffix stemmer.
///
/// Handles plurals, `-ing`, `-ed`, `-ly` and a trailing `e`, enough for
/// `create`/`creates`/`created`/`creating` to share one stem. Non-ASCII and
/// very short tokens pass through unchanged.
pub fn stem(token: &str) -> String {
    if token.len() <= 3 || !token.is_ascii() {
        return token.to_string();
    }

    let mut word = token.to_string();

    if word.ends_with("ies") && word.len() > 4 {
        word.truncate(word.len() - 3);
        word.push('y');
    } else if word.ends_with("sses") {
        word.truncate(word.len() - 2);
    } else if word.ends_with('s')
        && !word.ends_with("ss")
        && !word.ends_with("us")
        && !word.ends_with("is")
    {
        word.pop();
    }

    for suffix in ["ing", "ed", "ly"] {
        if word.ends_with(suffix) && word.len() - suffix.len() >= 4 {
            word.truncate(word.len() - suffix.len());
            undouble(&mut word);
            break;
        }
    }

    if word.ends_with('e') && word.len() > 4 {
        word.pop();
    }

    word
}

/// `runn` → `run`, `stopp` → `stop`; keeps `ll`, `ss`, `zz`.
fn undouble(word: &mut String) {
    let bytes = word.as_bytes();
    let n = bytes.len();
    if n >= 2 && bytes[n - 1] == bytes[n - 2] {
        let last = bytes[n - 1];
        if !matches!(last, b'l' | b's' | b'z' | b'a' | b'e' | b'i' | b'o' | b'u') {
            word.pop();
        }
    }
}
