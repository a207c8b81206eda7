//! Endpoint path template matching.
//!
//! Templates are literal paths where a segment may contain one `{name}`
//! placeholder, optionally surrounded by literal text:
//! `/v1beta/models/{model}:generateContent`.

use std::collections::BTreeMap;

/// Match `path` against `template`, returning captured placeholders.
///
/// Query strings and trailing slashes are ignored.
pub fn match_path_template(template: &str, path: &str) -> Option<BTreeMap<String, String>> {
    let path = strip_query(path);
    let template_segments = segments(template);
    let path_segments = segments(path);

    if template_segments.len() != path_segments.len() {
        return None;
    }

    let mut params = BTreeMap::new();
    for (tmpl, actual) in template_segments.iter().zip(path_segments.iter()) {
        match split_placeholder(tmpl) {
            Some((prefix, name, suffix)) => {
                if actual.len() <= prefix.len() + suffix.len()
                    || !actual.starts_with(prefix)
                    || !actual.ends_with(suffix)
                {
                    return None;
                }
                let value = &actual[prefix.len()..actual.len() - suffix.len()];
                params.insert(name.to_string(), value.to_string());
            }
            None => {
                if tmpl != actual {
                    return None;
                }
            }
        }
    }

    Some(params)
}

/// Remove the query string and fragment from a request path.
pub fn strip_query(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}

fn segments(path: &str) -> Vec<&str> {
    path.trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_placeholder(segment: &str) -> Option<(&str, &str, &str)> {
    let open = segment.find('{')?;
    let close = segment[open..].find('}')? + open;
    Some((
        &segment[..open],
        &segment[open + 1..close],
        &segment[close + 1..],
    ))
}
