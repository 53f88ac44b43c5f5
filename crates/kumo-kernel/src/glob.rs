//! Path-aware glob matching for listing and removal.
//!
//! Supported syntax:
//! - `*` matches zero or more characters within one path segment
//! - `**` matches across segments, including `/`
//! - `?` matches exactly one non-`/` character
//! - `[abc]`, `[a-z]`, `[!abc]` / `[^abc]` character classes
//! - `{a,b}` brace alternatives, nested braces allowed

use std::cell::Cell;

/// Bound on total recursive calls, so patterns like `*a*a*a*...` stay cheap.
const MAX_MATCH_CALLS: usize = 100_000;

/// True if `s` contains glob metacharacters.
///
/// ```
/// use kumo_kernel::glob::contains_glob;
/// assert!(contains_glob("photos/*.jpg"));
/// assert!(contains_glob("{a,b}.txt"));
/// assert!(!contains_glob("photos/a.jpg"));
/// ```
pub fn contains_glob(s: &str) -> bool {
    s.contains(['*', '?', '[', '{'])
}

/// Match a whole path against a glob pattern.
///
/// ```
/// use kumo_kernel::glob::glob_match;
/// assert!(glob_match("photos/*.jpg", "photos/a.jpg"));
/// assert!(!glob_match("photos/*.jpg", "photos/2024/a.jpg"));
/// assert!(glob_match("photos/**.jpg", "photos/2024/a.jpg"));
/// ```
pub fn glob_match(pattern: &str, input: &str) -> bool {
    let input: Vec<char> = input.chars().collect();
    let calls = Cell::new(0usize);
    expand_braces(pattern).iter().any(|pat| {
        let pat: Vec<char> = pat.chars().collect();
        match_bounded(&pat, 0, &input, 0, &calls)
    })
}

/// The literal part of a pattern before its first metacharacter.
///
/// Object listings use it as the server-side prefix.
pub fn literal_prefix(pattern: &str) -> &str {
    match pattern.find(['*', '?', '[', '{']) {
        Some(idx) => &pattern[..idx],
        None => pattern,
    }
}

/// Expand `{a,b}` alternatives into separate patterns.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let chars: Vec<char> = pattern.chars().collect();

    let mut depth = 0usize;
    let mut start = None;
    let mut end = None;
    for (i, &c) in chars.iter().enumerate() {
        match c {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    end = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }

    let (start, end) = match (start, end) {
        (Some(s), Some(e)) => (s, e),
        _ => return vec![pattern.to_string()],
    };

    let prefix: String = chars[..start].iter().collect();
    let suffix: String = chars[end + 1..].iter().collect();
    let body: String = chars[start + 1..end].iter().collect();

    split_alternatives(&body)
        .into_iter()
        .flat_map(|alt| expand_braces(&format!("{prefix}{alt}{suffix}")))
        .collect()
}

fn split_alternatives(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in body.chars() {
        match c {
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => out.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    out.push(current);
    out
}

fn match_bounded(pattern: &[char], pi: usize, input: &[char], ii: usize, calls: &Cell<usize>) -> bool {
    let count = calls.get() + 1;
    calls.set(count);
    if count > MAX_MATCH_CALLS {
        return false;
    }

    if pi >= pattern.len() {
        return ii >= input.len();
    }

    match pattern[pi] {
        '*' => {
            let mut next = pi;
            while next < pattern.len() && pattern[next] == '*' {
                next += 1;
            }
            let crosses = next - pi > 1;

            for end in ii..=input.len() {
                if match_bounded(pattern, next, input, end, calls) {
                    return true;
                }
                if end < input.len() && input[end] == '/' && !crosses {
                    break;
                }
            }
            false
        }

        '?' => {
            ii < input.len()
                && input[ii] != '/'
                && match_bounded(pattern, pi + 1, input, ii + 1, calls)
        }

        '[' => {
            if ii >= input.len() || input[ii] == '/' {
                return false;
            }
            let (matched, consumed) = char_class(&pattern[pi..], input[ii]);
            matched && match_bounded(pattern, pi + consumed, input, ii + 1, calls)
        }

        '\\' if pi + 1 < pattern.len() => {
            ii < input.len()
                && pattern[pi + 1] == input[ii]
                && match_bounded(pattern, pi + 2, input, ii + 1, calls)
        }

        c => {
            ii < input.len() && c == input[ii] && match_bounded(pattern, pi + 1, input, ii + 1, calls)
        }
    }
}

/// Returns (matched, pattern chars consumed). An unclosed `[` is literal.
fn char_class(pattern: &[char], ch: char) -> (bool, usize) {
    let mut idx = 1;
    let negate = matches!(pattern.get(idx), Some('!') | Some('^'));
    if negate {
        idx += 1;
    }

    let first = idx;
    let mut matched = false;
    let mut closed = false;
    while idx < pattern.len() {
        let c = pattern[idx];
        if c == ']' && idx > first {
            idx += 1;
            closed = true;
            break;
        }
        if idx + 2 < pattern.len() && pattern[idx + 1] == '-' && pattern[idx + 2] != ']' {
            if (c..=pattern[idx + 2]).contains(&ch) {
                matched = true;
            }
            idx += 3;
            continue;
        }
        if c == ch {
            matched = true;
        }
        idx += 1;
    }

    if !closed {
        return (ch == '[', 1);
    }
    (matched != negate, idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_stays_in_segment() {
        assert!(glob_match("photos/*.jpg", "photos/a.jpg"));
        assert!(!glob_match("photos/*.jpg", "photos/b.png"));
        assert!(!glob_match("photos/*.jpg", "docs/c.txt"));
        assert!(!glob_match("*.jpg", "photos/a.jpg"));
        assert!(glob_match("photos/*", "photos/"));
    }

    #[test]
    fn test_double_star_crosses() {
        assert!(glob_match("**", "a/b/c"));
        assert!(glob_match("logs/**/*.log", "logs/2024/01/x.log"));
        assert!(glob_match("**.log", "deep/x.log"));
    }

    #[test]
    fn test_question_and_classes() {
        assert!(glob_match("file?.txt", "file1.txt"));
        assert!(!glob_match("file?.txt", "file/.txt"));
        assert!(glob_match("[a-c]*", "beta"));
        assert!(!glob_match("[!a-c]*", "beta"));
        assert!(glob_match("[^x]", "y"));
        assert!(glob_match("a[b", "a[b"));
    }

    #[test]
    fn test_braces() {
        assert_eq!(expand_braces("x.{rs,go}"), vec!["x.rs", "x.go"]);
        assert!(glob_match("*.{jpg,png}", "b.png"));
        assert_eq!(expand_braces("{a,{b,c}}"), vec!["a", "b", "c"]);
        assert_eq!(expand_braces("plain"), vec!["plain"]);
    }

    #[test]
    fn test_literal_prefix() {
        assert_eq!(literal_prefix("photos/*.jpg"), "photos/");
        assert_eq!(literal_prefix("a/{b,c}"), "a/");
        assert_eq!(literal_prefix("plain/key"), "plain/key");
    }

    #[test]
    fn test_adversarial_pattern_terminates() {
        let pattern = "*a".repeat(30);
        let input = "a".repeat(60) + "b";
        assert!(!glob_match(&pattern, &input));
    }
}
