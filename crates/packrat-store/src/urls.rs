//! Canonical form of attachment URLs.
//!
//! Media CDNs attach short-lived signing parameters to attachment links, so
//! the same file shows up under a different URL every time a channel is
//! re-tracked. The normalized form is what keys `download_metadata`.

use url::Url;

/// Query parameters that change between captures without changing the
/// referenced content (CDN signature and expiry).
const VOLATILE_PARAMS: &[&str] = &["ex", "is", "hm"];

/// Normalize a download URL: lowercase host (done by the parser), drop the
/// fragment, strip volatile signing parameters, keep everything else in
/// order. Path casing is preserved. Unparseable input is returned verbatim.
pub fn normalize_download_url(raw: &str) -> String {
    let Ok(mut parsed) = Url::parse(raw) else {
        return raw.to_string();
    };

    parsed.set_fragment(None);

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !VOLATILE_PARAMS.contains(&key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let mut pairs = parsed.query_pairs_mut();
        pairs.clear();
        for (key, value) in &kept {
            pairs.append_pair(key, value);
        }
        drop(pairs);
    }

    parsed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_signing_params() {
        let raw = "https://cdn.example.com/attachments/1/2/cat.png?ex=aa&is=bb&hm=cc";
        assert_eq!(
            normalize_download_url(raw),
            "https://cdn.example.com/attachments/1/2/cat.png"
        );
    }

    #[test]
    fn keeps_content_params() {
        let raw = "https://cdn.example.com/a.png?width=640&ex=aa&height=480";
        assert_eq!(
            normalize_download_url(raw),
            "https://cdn.example.com/a.png?width=640&height=480"
        );
    }

    #[test]
    fn lowercases_host_preserves_path_case() {
        let raw = "https://CDN.Example.COM/Attachments/Cat.PNG";
        assert_eq!(
            normalize_download_url(raw),
            "https://cdn.example.com/Attachments/Cat.PNG"
        );
    }

    #[test]
    fn drops_fragment() {
        assert_eq!(
            normalize_download_url("https://cdn.example.com/a.png#frag"),
            "https://cdn.example.com/a.png"
        );
    }

    #[test]
    fn unparseable_is_identity() {
        assert_eq!(normalize_download_url("not a url"), "not a url");
    }

    #[test]
    fn deterministic() {
        let raw = "https://cdn.example.com/a.png?hm=1&size=large";
        assert_eq!(normalize_download_url(raw), normalize_download_url(raw));
    }
}
