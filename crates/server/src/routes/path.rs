//! Resource path extraction.
//!
//! Depending on how the request reached us, the path after the mount prefix
//! may be in the request URI or in one of several proxy headers, raw or
//! percent-encoded. Every candidate is searched for the mount prefix.

use percent_encoding::percent_decode_str;

/// Headers that may carry the original request path, in priority order
pub const PATH_HEADERS: [&str; 3] = ["x-nf-original-pathname", "x-nf-original-uri", "x-original-uri"];

/// Resource and optional id, the first two segments of the resource path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Route {
    pub resource: Option<String>,
    pub id: Option<String>,
}

impl Route {
    pub fn parse(path: &str) -> Self {
        let mut segments = path.split('/').filter(|segment| !segment.is_empty());
        Self {
            resource: segments.next().map(str::to_string),
            id: segments.next().map(str::to_string),
        }
    }
}

/// Resolve the resource path from the candidates.
///
/// Returns `""` for the root resource. When no candidate contains the mount
/// prefix the first candidate is used with its origin, query and fragment removed.
pub fn normalise_path(candidates: &[String], mount_prefix: &str) -> String {
    let prefix = mount_prefix.trim_end_matches('/');
    let mut unique: Vec<&str> = Vec::new();
    for candidate in candidates {
        if !candidate.is_empty() && !unique.contains(&candidate.as_str()) {
            unique.push(candidate);
        }
    }

    let mut saw_root = false;
    for candidate in &unique {
        let decoded = percent_decode_str(candidate).decode_utf8_lossy();
        let Some(rest) = after_prefix(&decoded, prefix) else {
            continue;
        };
        let rest = cut_query(rest).trim();
        if rest.is_empty() {
            saw_root = true;
            continue;
        }
        return collapse_slashes(rest);
    }

    if saw_root {
        return String::new();
    }

    unique
        .first()
        .map(|candidate| {
            let decoded = percent_decode_str(candidate).decode_utf8_lossy();
            cut_query(strip_origin(&decoded)).to_string()
        })
        .unwrap_or_default()
}

/// Text following the first occurrence of `prefix` that ends on a segment boundary
fn after_prefix<'a>(candidate: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(strip_origin(candidate));
    }
    candidate.match_indices(prefix).find_map(|(start, matched)| {
        let rest = &candidate[start + matched.len()..];
        match rest.chars().next() {
            None | Some('/') | Some('?') | Some('#') => Some(rest),
            _ => None,
        }
    })
}

fn cut_query(path: &str) -> &str {
    match path.find(['?', '#']) {
        Some(index) => &path[..index],
        None => path,
    }
}

/// Drop `scheme://host` from an absolute URL
fn strip_origin(candidate: &str) -> &str {
    match candidate.find("://") {
        Some(index) => {
            let after_scheme = &candidate[index + 3..];
            after_scheme.find('/').map_or("", |slash| &after_scheme[slash..])
        }
        None => candidate,
    }
}

/// Leading slash, no repeated slashes
fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    if !path.starts_with('/') {
        out.push('/');
    }
    for c in path.chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MOUNT_PREFIX;

    fn resolve(candidates: &[&str]) -> String {
        let candidates: Vec<String> = candidates.iter().map(|c| c.to_string()).collect();
        normalise_path(&candidates, DEFAULT_MOUNT_PREFIX)
    }

    #[test]
    fn test_path_after_prefix() {
        assert_eq!(resolve(&["/.netlify/functions/airtable/sessions"]), "/sessions");
        assert_eq!(resolve(&["/.netlify/functions/airtable/topics?foo=bar"]), "/topics");
    }

    #[test]
    fn test_prefers_non_empty_match() {
        assert_eq!(
            resolve(&[
                "/.netlify/functions/airtable",
                "https://example.com/.netlify/functions/airtable/topics?foo=bar",
            ]),
            "/topics"
        );
    }

    #[test]
    fn test_header_candidate_with_fragment() {
        assert_eq!(
            resolve(&["/.netlify/functions/airtable", "/.netlify/functions/airtable/votes#hash"]),
            "/votes"
        );
    }

    #[test]
    fn test_percent_encoded_segments() {
        assert_eq!(
            resolve(&["https://example.com/.netlify/functions/airtable%2Fsessions%2Fabc"]),
            "/sessions/abc"
        );
        assert_eq!(resolve(&["/.netlify/functions/airtable/%2Ftopics%2Fxyz"]), "/topics/xyz");
    }

    #[test]
    fn test_root_only_match_is_empty() {
        assert_eq!(resolve(&["/.netlify/functions/airtable"]), "");
        assert_eq!(resolve(&["/.netlify/functions/airtable?foo=bar"]), "");
        assert_eq!(resolve(&["/.netlify/functions/airtable#fragment"]), "");
    }

    #[test]
    fn test_empty_candidates_are_skipped() {
        assert_eq!(
            resolve(&["", "https://example.com/.netlify/functions/airtable/sessions?foo=bar"]),
            "/sessions"
        );
    }

    #[test]
    fn test_no_match_falls_back_to_first_candidate() {
        assert_eq!(resolve(&["/api/airtable"]), "/api/airtable");
        assert_eq!(resolve(&["https://example.com/api/airtable?x=1", "/other"]), "/api/airtable");
        assert_eq!(resolve(&[]), "");
    }

    #[test]
    fn test_prefix_requires_segment_boundary() {
        assert_eq!(
            resolve(&["/.netlify/functions/airtablefoo/topics"]),
            "/.netlify/functions/airtablefoo/topics"
        );
    }

    #[test]
    fn test_custom_mount_prefix() {
        let candidates = vec!["/api/board/votes/recV".to_string()];
        assert_eq!(normalise_path(&candidates, "/api/board/"), "/votes/recV");
        assert_eq!(normalise_path(&candidates, ""), "/api/board/votes/recV");
    }

    #[test]
    fn test_route_parse() {
        assert_eq!(Route::parse(""), Route::default());
        assert_eq!(
            Route::parse("/votes/recV1/extra"),
            Route {
                resource: Some("votes".into()),
                id: Some("recV1".into()),
            }
        );
    }
}
