//! Transition resolution.
//!
//! Pure functions: given an exit status and an element's ordered transitions,
//! pick the first matching one or fall back to the element's `next`.

use crate::definition::Transition;

/// Outcome of resolving an element's transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<'a> {
    /// First transition whose pattern matched
    Matched(&'a Transition),
    /// Nothing matched, continue with the element's `next` if any
    Default(Option<&'a str>),
}

/// Exit-status pattern match: `*` alone matches everything, otherwise `*`
/// and `?` act as globs and every other character must match exactly.
pub fn matches_exit_status(pattern: &str, exit_status: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains(['*', '?']) {
        return pattern == exit_status;
    }
    glob_match(
        &pattern.chars().collect::<Vec<_>>(),
        &exit_status.chars().collect::<Vec<_>>(),
    )
}

fn glob_match(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some('?') => {
                p += 1;
                t += 1;
            }
            Some(c) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

/// Resolve against `transitions`, falling back to `default_next`
pub fn resolve_transition<'a>(
    transitions: &'a [Transition],
    exit_status: &str,
    default_next: Option<&'a str>,
) -> Resolution<'a> {
    transitions
        .iter()
        .find(|t| matches_exit_status(t.on(), exit_status))
        .map(Resolution::Matched)
        .unwrap_or(Resolution::Default(default_next))
}
