//! Address and path normalization for database references.

use crate::database::query::QueryParams;

/// Normalizes a user supplied database address.
///
/// `https://` is prepended when no scheme is present and trailing slashes are removed,
/// so `example.firebaseio.com/` and `https://example.firebaseio.com` render identically.
pub(crate) fn sanitize_address(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut address = if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        trimmed.to_owned()
    } else {
        format!("https://{trimmed}")
    };

    while address.ends_with('/') {
        address.pop();
    }
    address
}

/// Normalizes a child path segment.
///
/// `/foo/.json` -> `foo`, `foo/bar/` -> `foo/bar`.
pub(crate) fn sanitize_path(raw: &str) -> &str {
    let trimmed = raw.trim_matches('/');
    let trimmed = trimmed.strip_suffix(".json").unwrap_or(trimmed);
    trimmed.trim_end_matches('/')
}

pub(crate) fn join_path(address: &str, path: &str) -> String {
    let segment = sanitize_path(path);
    if segment.is_empty() {
        address.to_owned()
    } else {
        format!("{address}/{segment}")
    }
}

/// Renders `<address>/.json[?<encoded params>]`.
pub(crate) fn render_url(address: &str, params: &QueryParams) -> String {
    let mut url = format!("{address}/.json");
    if !params.is_empty() {
        url.push('?');
        url.push_str(&params.encode());
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_render_to_the_same_canonical_form() {
        let canonical = "https://demo.firebaseio.com";
        for raw in [
            "demo.firebaseio.com",
            "demo.firebaseio.com/",
            "https://demo.firebaseio.com",
            "https://demo.firebaseio.com/",
        ] {
            assert_eq!(sanitize_address(raw), canonical, "input {raw}");
        }
    }

    #[test]
    fn http_scheme_is_kept() {
        assert_eq!(
            sanitize_address("http://127.0.0.1:9000/"),
            "http://127.0.0.1:9000"
        );
    }

    #[test]
    fn paths_are_sanitized() {
        for raw in [
            "foo", "/foo", "foo/", "/foo/", "foo.json", "/foo.json", "foo/.json", "/foo/.json",
        ] {
            assert_eq!(sanitize_path(raw), "foo", "input {raw}");
        }
        assert_eq!(sanitize_path("/a/b/c/"), "a/b/c");
        assert_eq!(sanitize_path("/"), "");
    }

    #[test]
    fn repeated_joins_never_duplicate_separators() {
        let base = sanitize_address("demo.firebaseio.com/");
        let child = join_path(&base, "/users/");
        let grandchild = join_path(&child, "/alice.json");
        assert_eq!(grandchild, "https://demo.firebaseio.com/users/alice");
        assert_eq!(join_path(&grandchild, "/"), grandchild);
    }

    #[test]
    fn render_without_params() {
        let params = QueryParams::default();
        assert_eq!(
            render_url("https://demo.firebaseio.com/users", &params),
            "https://demo.firebaseio.com/users/.json"
        );
    }
}
