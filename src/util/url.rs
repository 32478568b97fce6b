//! Minimal URL inspection used to derive throttle keys.

/// Extract the lower-cased host of an absolute URL.
///
/// Only the authority section is inspected: userinfo and port are stripped,
/// bracketed IPv6 hosts keep their brackets. Returns `None` for relative
/// references or an empty host.
///
/// ```
/// use prometheus_cluster::util::domain_of;
///
/// assert_eq!(domain_of("http://Example.com:8080/a?b"), Some("example.com".into()));
/// assert_eq!(domain_of("/relative/path"), None);
/// ```
#[must_use]
pub fn domain_of(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("://")?;
    let authority = rest
        .split(|c| matches!(c, '/' | '?' | '#'))
        .next()
        .unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);

    let host = if host_port.starts_with('[') {
        // [::1]:8080
        host_port
            .find(']')
            .map_or(host_port, |end| &host_port[..=end])
    } else {
        host_port.split(':').next().unwrap_or_default()
    };

    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}
