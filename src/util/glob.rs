//! Doublestar glob matching over `/`-separated names
//!
//! Grammar:
//! - `*` matches any run of characters inside one path component
//! - `**` as a whole component matches zero or more components
//! - `?` matches one character other than `/`
//! - `[abc]`, `[a-z]`, `[^a-z]` character classes
//! - `{a,b}` alternatives, nestable and allowed to span components
//! - `\x` matches `x` literally
//!
//! An empty pattern matches every name.

use crate::error::{ReplicationError, Result};

/// Whether `name` matches `pattern`. A malformed pattern is an error.
pub fn matches(pattern: &str, name: &str) -> Result<bool> {
    if pattern.is_empty() {
        return Ok(true);
    }
    validate(pattern)?;
    let names: Vec<&str> = name.split('/').collect();
    for alternative in expand_braces(pattern)? {
        let components: Vec<&str> = alternative.split('/').collect();
        if match_components(&components, &names)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Rejects unclosed classes or braces and trailing escapes
pub fn validate(pattern: &str) -> Result<()> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut depth = 0usize;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                if i + 1 >= chars.len() {
                    return Err(bad_pattern(pattern, "trailing escape"));
                }
                i += 1;
            }
            '[' => {
                i = class_end(&chars, i).ok_or_else(|| bad_pattern(pattern, "unclosed character class"))?;
            }
            '{' => depth += 1,
            '}' => {
                if depth == 0 {
                    return Err(bad_pattern(pattern, "unbalanced '}'"));
                }
                depth -= 1;
            }
            _ => {}
        }
        i += 1;
    }
    if depth != 0 {
        return Err(bad_pattern(pattern, "unclosed '{'"));
    }
    Ok(())
}

fn bad_pattern(pattern: &str, reason: &str) -> ReplicationError {
    ReplicationError::invalid(format!("bad pattern {:?}: {}", pattern, reason))
}

/// Index of the `]` closing the class opened at `start`
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut i = start + 1;
    if chars.get(i) == Some(&'^') || chars.get(i) == Some(&'!') {
        i += 1;
    }
    // a leading ']' is a literal member
    if chars.get(i) == Some(&']') {
        i += 1;
    }
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            ']' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Expands every `{a,b}` group into the list of brace-free patterns
pub(crate) fn expand_braces(pattern: &str) -> Result<Vec<String>> {
    let chars: Vec<char> = pattern.chars().collect();
    let Some((open, close, alternatives)) = first_brace_group(&chars) else {
        return Ok(vec![pattern.to_string()]);
    };
    let prefix: String = chars[..open].iter().collect();
    let suffix: String = chars[close + 1..].iter().collect();
    let mut expanded = Vec::new();
    for alternative in alternatives {
        expanded.extend(expand_braces(&format!("{}{}{}", prefix, alternative, suffix))?);
    }
    Ok(expanded)
}

/// Finds the first top-level brace group and splits it on top-level commas
fn first_brace_group(chars: &[char]) -> Option<(usize, usize, Vec<String>)> {
    let mut i = 0;
    let mut open = None;
    let mut depth = 0usize;
    let mut alternatives = Vec::new();
    let mut current = String::new();
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                if open.is_some() {
                    current.push(c);
                    if let Some(next) = chars.get(i + 1) {
                        current.push(*next);
                    }
                }
                i += 2;
                continue;
            }
            '[' => {
                let end = class_end(chars, i)?;
                if open.is_some() {
                    current.extend(&chars[i..=end]);
                }
                i = end + 1;
                continue;
            }
            '{' => {
                if open.is_none() {
                    open = Some(i);
                } else {
                    depth += 1;
                    current.push(c);
                }
            }
            '}' if open.is_some() => {
                if depth == 0 {
                    alternatives.push(current);
                    return open.map(|o| (o, i, alternatives));
                }
                depth -= 1;
                current.push(c);
            }
            ',' if open.is_some() && depth == 0 => {
                alternatives.push(std::mem::take(&mut current));
            }
            _ => {
                if open.is_some() {
                    current.push(c);
                }
            }
        }
        i += 1;
    }
    None
}

fn match_components(patterns: &[&str], names: &[&str]) -> Result<bool> {
    let Some((first, rest)) = patterns.split_first() else {
        return Ok(names.is_empty());
    };
    if *first == "**" {
        if rest.is_empty() {
            return Ok(!names.is_empty());
        }
        for skip in 0..=names.len() {
            if match_components(rest, &names[skip..])? {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    match names.split_first() {
        Some((name, remaining)) => {
            let pattern: Vec<char> = first.chars().collect();
            let name: Vec<char> = name.chars().collect();
            Ok(match_component(&pattern, &name)? && match_components(rest, remaining)?)
        }
        None => Ok(false),
    }
}

fn match_component(pattern: &[char], name: &[char]) -> Result<bool> {
    let Some(&c) = pattern.first() else {
        return Ok(name.is_empty());
    };
    match c {
        '*' => {
            let rest = trim_stars(pattern);
            if rest.is_empty() {
                return Ok(true);
            }
            for skip in 0..=name.len() {
                if match_component(rest, &name[skip..])? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        '?' => match name.split_first() {
            Some((_, rest)) => match_component(&pattern[1..], rest),
            None => Ok(false),
        },
        '[' => {
            let end = class_end(pattern, 0)
                .ok_or_else(|| ReplicationError::invalid("bad pattern: unclosed character class"))?;
            match name.split_first() {
                Some((ch, rest)) if class_matches(&pattern[1..end], *ch) => {
                    match_component(&pattern[end + 1..], rest)
                }
                _ => Ok(false),
            }
        }
        '\\' => {
            let literal = pattern
                .get(1)
                .ok_or_else(|| ReplicationError::invalid("bad pattern: trailing escape"))?;
            match name.split_first() {
                Some((ch, rest)) if ch == literal => match_component(&pattern[2..], rest),
                _ => Ok(false),
            }
        }
        _ => match name.split_first() {
            Some((ch, rest)) if *ch == c => match_component(&pattern[1..], rest),
            _ => Ok(false),
        },
    }
}

fn trim_stars(pattern: &[char]) -> &[char] {
    let count = pattern.iter().take_while(|c| **c == '*').count();
    &pattern[count..]
}

/// Evaluates the body of a character class (without the brackets)
fn class_matches(body: &[char], ch: char) -> bool {
    let (negated, body) = match body.first() {
        Some('^') | Some('!') => (true, &body[1..]),
        _ => (false, body),
    };
    let mut i = 0;
    let mut found = false;
    while i < body.len() {
        let mut lo = body[i];
        if lo == '\\' && i + 1 < body.len() {
            i += 1;
            lo = body[i];
        }
        if i + 2 < body.len() && body[i + 1] == '-' {
            let mut hi = body[i + 2];
            let mut step = 3;
            if hi == '\\' && i + 3 < body.len() {
                hi = body[i + 3];
                step = 4;
            }
            if lo <= ch && ch <= hi {
                found = true;
            }
            i += step;
        } else {
            if lo == ch {
                found = true;
            }
            i += 1;
        }
    }
    found != negated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_laws() {
        assert!(matches("", "anything/at/all").unwrap());
        assert!(matches("*", "a").unwrap());
        assert!(matches("a/b", "a/b").unwrap());
        assert!(matches("a/**", "a/b/c").unwrap());
    }

    #[test]
    fn test_single_star_stays_in_component() {
        assert!(matches("library/*", "library/hello-world").unwrap());
        assert!(!matches("library/*", "library/a/b").unwrap());
        assert!(!matches("*", "a/b").unwrap());
        assert!(matches("lib*/*-world", "library/hello-world").unwrap());
    }

    #[test]
    fn test_double_star() {
        assert!(matches("**", "a/b/c").unwrap());
        assert!(matches("a/**/c", "a/c").unwrap());
        assert!(matches("a/**/c", "a/x/y/c").unwrap());
        assert!(!matches("a/**", "a").unwrap());
        assert!(!matches("a/**/c", "a/x/d").unwrap());
    }

    #[test]
    fn test_question_and_classes() {
        assert!(matches("v?", "v1").unwrap());
        assert!(!matches("v?", "v10").unwrap());
        assert!(matches("[a-c]x", "bx").unwrap());
        assert!(!matches("[^a-c]x", "bx").unwrap());
        assert!(matches("[^a-c]x", "dx").unwrap());
        assert!(matches("1.*", "1.0").unwrap());
        assert!(!matches("1.*", "2.0").unwrap());
    }

    #[test]
    fn test_braces() {
        assert!(matches("library/{nginx,redis}", "library/redis").unwrap());
        assert!(!matches("library/{nginx,redis}", "library/mysql").unwrap());
        assert!(matches("{a/b,c}", "a/b").unwrap());
        assert!(matches("v{1,2{a,b}}", "v2b").unwrap());
        assert_eq!(expand_braces("x{a,b}y").unwrap(), vec!["xay", "xby"]);
    }

    #[test]
    fn test_escapes() {
        assert!(matches("a\\*", "a*").unwrap());
        assert!(!matches("a\\*", "ab").unwrap());
    }

    #[test]
    fn test_bad_patterns() {
        assert!(matches("[abc", "a").is_err());
        assert!(matches("{a,b", "a").is_err());
        assert!(matches("abc\\", "abc").is_err());
        assert!(validate("a}").is_err());
        assert!(validate("library/**").is_ok());
    }
}
