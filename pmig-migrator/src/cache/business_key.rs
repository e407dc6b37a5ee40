//! Business key construction
//!
//! A business key joins the semantic components of an entity with `|`.
//! Components are trimmed and escaped (`\` → `\\`, `|` → `\|`) so two distinct
//! component tuples can never produce the same key.

use crate::store::RemoteId;

pub const SEPARATOR: char = '|';
const ESCAPE: char = '\\';

fn escape_into(out: &mut String, component: &str) {
    for ch in component.trim().chars() {
        if ch == SEPARATOR || ch == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(ch);
    }
}

/// Join components into a key
pub fn join<S: AsRef<str>>(components: &[S]) -> String {
    let mut key = String::new();
    for (i, component) in components.iter().enumerate() {
        if i > 0 {
            key.push(SEPARATOR);
        }
        escape_into(&mut key, component.as_ref());
    }
    key
}

/// Split a key back into its (unescaped) components
pub fn split(key: &str) -> Vec<String> {
    let mut components = vec![String::new()];
    let mut chars = key.chars();
    while let Some(ch) = chars.next() {
        match ch {
            ESCAPE => {
                if let Some(next) = chars.next() {
                    if let Some(last) = components.last_mut() {
                        last.push(next);
                    }
                }
            }
            SEPARATOR => components.push(String::new()),
            other => {
                if let Some(last) = components.last_mut() {
                    last.push(other);
                }
            }
        }
    }
    components
}

pub fn program_key(name: &str) -> String {
    join(&[name])
}

/// `name|cycle|period`
pub fn implementation_key(name: &str, cycle: &str, period: &str) -> String {
    join(&[name, cycle, period])
}

/// CCT codes are case-insensitive
pub fn normalize_cct(code: &str) -> String {
    code.trim().to_uppercase()
}

pub fn cct_key(code: &str) -> String {
    join(&[normalize_cct(code)])
}

pub fn survey_key(code: &str) -> String {
    join(&[code])
}

pub fn participant_key(external_id: &str) -> String {
    join(&[external_id])
}

/// `field|implementationId` for modules, attendances and work items
pub fn dependent_key(field: &str, implementation_id: RemoteId) -> String {
    join(&[field, &implementation_id.to_string()])
}

/// Inverse of [`dependent_key`]
pub fn parse_dependent_key(key: &str) -> Option<(String, RemoteId)> {
    let mut components = split(key);
    if components.len() != 2 {
        return None;
    }
    let id = components.pop()?.parse().ok()?;
    let field = components.pop()?;
    Some((field, id))
}
