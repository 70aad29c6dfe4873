//! `${name}` property interpolation

use std::collections::BTreeMap;

/// Nested references are expanded up to this depth
const MAX_PASSES: usize = 8;

/// Replaces `${name}` references with property values.
///
/// Unknown references are left as written.
pub fn interpolate(value: &str, properties: &BTreeMap<String, String>) -> String {
    let mut current = value.to_string();
    for _ in 0..MAX_PASSES {
        let next = expand_once(&current, properties);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn expand_once(value: &str, properties: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match properties.get(name) {
                    Some(resolved) => out.push_str(resolved),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}
