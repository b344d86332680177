//! URL construction for provider endpoints.

use url::Url;

use unistore_common::{Error, Result};

/// Join path segments onto a base URL and attach a query string.
///
/// The base URL's own path segments come first, followed by `segments` in
/// order. Separators at either end of a segment are stripped and empty
/// segments are dropped, so the result never contains `//` in its path.
/// `query` replaces whatever query the base carried; an empty `query`
/// removes it.
pub fn build_url<S: AsRef<str>>(base: &str, segments: &[S], query: &[(&str, &str)]) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| Error::InvalidInput(format!("Invalid base URL '{}': {}", base, e)))?;

    let base_segments: Vec<String> = url
        .path_segments()
        .ok_or_else(|| Error::InvalidInput(format!("URL '{}' cannot take a path", base)))?
        .map(str::to_string)
        .collect();

    let path = base_segments
        .iter()
        .map(String::as_str)
        .chain(segments.iter().map(AsRef::as_ref))
        .flat_map(|segment| segment.split('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    url.set_path(&path);

    if query.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(query);
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_build_url_elides_empty_segments() {
        let url = build_url("https://host/a/", &["b", "", "/c/"], &[]).unwrap();
        assert_eq!(url.as_str(), "https://host/a/b/c");
    }

    #[test]
    fn test_build_url_replaces_query() {
        let url = build_url("https://host/x?old=1", &["files", "abc"], &[("alt", "media")]).unwrap();
        assert_eq!(url.as_str(), "https://host/x/files/abc?alt=media");

        let url = build_url("https://host/x?old=1", &["y"], &[]).unwrap();
        assert_eq!(url.as_str(), "https://host/x/y");
    }

    #[test]
    fn test_build_url_bare_host() {
        let url = build_url("https://www.googleapis.com", &["drive/v3/", "files"], &[]).unwrap();
        assert_eq!(url.as_str(), "https://www.googleapis.com/drive/v3/files");
    }

    #[test]
    fn test_build_url_rejects_garbage_base() {
        assert!(build_url("not a url", &["a"], &[]).is_err());
        assert!(build_url("mailto:someone@example.com", &["a"], &[]).is_err());
    }

    proptest! {
        #[test]
        fn prop_segments_preserved_in_order(
            segments in proptest::collection::vec("/{0,2}[a-z0-9]{0,6}/{0,2}", 0..8)
        ) {
            let url = build_url("https://host/base/", &segments, &[]).unwrap();
            let path = url.path();

            prop_assert!(!path.contains("//"));

            let expected: Vec<&str> = std::iter::once("base")
                .chain(segments.iter().map(|s| s.trim_matches('/')))
                .filter(|s| !s.is_empty())
                .collect();
            let actual: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
