//! Origin/Host equivalence check for the `check_origin` admission policy.
//!
//! The comparison normalizes away the default port for the scheme before
//! comparing case-insensitively: `Origin: http://host` and `Host:
//! host:80` must be treated as equal, and likewise for 443/https.

/// Normalize a `host[:port]` or `scheme://host[:port]` string to the form
/// used for comparison: `host` alone when the port is 80 or 443, otherwise
/// `host:port`, lowercased.
fn normalize(authority: &str) -> String {
    let without_scheme = authority
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(authority);
    // Strip a path/query if one sneaked in (Origin headers shouldn't carry
    // one, but Host-derived strings are sometimes reused loosely).
    let without_path = without_scheme
        .split(['/', '?'])
        .next()
        .unwrap_or(without_scheme);

    match without_path.rsplit_once(':') {
        Some((host, port)) if port == "80" || port == "443" => host.to_lowercase(),
        _ => without_path.to_lowercase(),
    }
}

/// True if `origin`'s host:port (after default-port normalization) equals
/// `host`'s, case-insensitively.
pub fn origin_matches_host(origin: &str, host: &str) -> bool {
    normalize(origin) == normalize(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_identical_hosts() {
        assert!(origin_matches_host(
            "http://example.com",
            "example.com"
        ));
    }

    #[test]
    fn matches_case_insensitively() {
        assert!(origin_matches_host("http://Example.COM", "example.com"));
    }

    #[test]
    fn normalizes_default_http_port() {
        assert!(origin_matches_host("http://example.com:80", "example.com"));
    }

    #[test]
    fn normalizes_default_https_port() {
        assert!(origin_matches_host(
            "https://example.com:443",
            "example.com"
        ));
    }

    #[test]
    fn rejects_mismatched_nonstandard_port() {
        assert!(!origin_matches_host(
            "http://example.com:8080",
            "example.com"
        ));
    }

    #[test]
    fn rejects_different_hosts() {
        assert!(!origin_matches_host("http://evil.example", "example.com"));
    }

    #[test]
    fn preserves_matching_nonstandard_ports() {
        assert!(origin_matches_host(
            "http://example.com:8080",
            "example.com:8080"
        ));
    }
}
