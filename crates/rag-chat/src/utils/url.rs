use once_cell::sync::Lazy;
use regex::Regex;

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:http|https)://(?:(?:[A-Z0-9](?:[A-Z0-9-]{0,61}[A-Z0-9])?\.)+(?:[A-Z]{2,6}\.?|[A-Z0-9-]{2,}\.?)|localhost|\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}|\[?[A-F0-9]*:[A-F0-9:]+\]?)(?::\d+)?(?:/?|[/?]\S+)$",
    )
    .expect("URL pattern is valid")
});

/// http(s) URL with a domain, `localhost`, IPv4 or IPv6 host, optional
/// port and path.
pub fn is_valid_url(url: &str) -> bool {
    !url.is_empty() && URL_PATTERN.is_match(url)
}

/// Clone URLs accepted by the source tree loader.
pub fn is_valid_git_url(url: &str) -> bool {
    let url = url.trim();
    (url.starts_with("https://") && is_valid_url(url))
        || (url.starts_with("git@") && url.contains(':') && !url.contains(char::is_whitespace))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_urls() {
        assert!(is_valid_url("https://example.com"));
        assert!(is_valid_url("http://example.com/path?q=1"));
        assert!(is_valid_url("http://localhost:8080/docs"));
        assert!(is_valid_url("http://192.168.1.10"));
        assert!(is_valid_url("HTTPS://Sub.Example.org/"));
    }

    #[test]
    fn test_invalid_urls() {
        assert!(!is_valid_url(""));
        assert!(!is_valid_url("example.com"));
        assert!(!is_valid_url("ftp://example.com"));
        assert!(!is_valid_url("https://exa mple.com"));
    }

    #[test]
    fn test_git_urls() {
        assert!(is_valid_git_url("https://github.com/rust-lang/rust.git"));
        assert!(is_valid_git_url("git@github.com:rust-lang/rust.git"));
        assert!(!is_valid_git_url("http://github.com/rust-lang/rust.git"));
        assert!(!is_valid_git_url("/tmp/repo"));
    }
}
