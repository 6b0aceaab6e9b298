//! Fixed rewrites applied to every forwarded request head.

use std::sync::OnceLock;

use regex::{NoExpand, Regex};

fn host_line() -> &'static Regex {
    static HOST: OnceLock<Regex> = OnceLock::new();
    HOST.get_or_init(|| {
        Regex::new(r"(?i)((?:^|\n)host: )[^\r\n]+").expect("host pattern is valid")
    })
}

fn http_1_0() -> &'static Regex {
    static VERSION: OnceLock<Regex> = OnceLock::new();
    VERSION.get_or_init(|| Regex::new(r"(?i)HTTP/1\.0").expect("version pattern is valid"))
}

/// Host as written in an authority: IPv6 literals are bracketed.
fn bracketed(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

/// `host:port`, bracketing IPv6 literals.
pub fn authority(host: &str, port: u16) -> String {
    format!("{}:{port}", bracketed(host))
}

/// `Host` header value for a backend: the port is omitted when it is the
/// scheme default (443 with TLS, 80 without).
pub fn host_value(host: &str, port: u16, tls: bool) -> String {
    if (tls && port == 443) || (!tls && port == 80) {
        bracketed(host)
    } else {
        authority(host, port)
    }
}

/// Replace the value of the first `Host:` header line.
pub fn rewrite_host(head: &str, value: &str) -> String {
    host_line()
        .replacen(head, 1, |caps: &regex::Captures<'_>| format!("{}{}", &caps[1], value))
        .into_owned()
}

/// Upgrade the first `HTTP/1.0` token to `HTTP/1.1`; TLS forwarding relies
/// on persistent connections.
pub fn upgrade_http_version(head: &str) -> String {
    http_1_0().replacen(head, 1, NoExpand("HTTP/1.1")).into_owned()
}

/// Length of the header block including its terminating blank line.
pub fn header_end(buffer: &[u8]) -> Option<usize> {
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4);
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|i| i + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_value_omits_default_ports() {
        assert_eq!(host_value("api.internal", 443, true), "api.internal");
        assert_eq!(host_value("api.internal", 80, false), "api.internal");
        assert_eq!(host_value("api.internal", 443, false), "api.internal:443");
        assert_eq!(host_value("api.internal", 8443, true), "api.internal:8443");
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        assert_eq!(authority("::1", 8080), "[::1]:8080");
        assert_eq!(authority("[::1]", 8080), "[::1]:8080");
        assert_eq!(authority("10.0.0.1", 8080), "10.0.0.1:8080");
        assert_eq!(host_value("fd00::2", 443, true), "[fd00::2]");
        assert_eq!(host_value("fd00::2", 8443, true), "[fd00::2]:8443");
    }

    #[test]
    fn rewrites_only_the_host_line() {
        let head = "GET / HTTP/1.1\r\nX-Forwarded-Host: keep\r\nhost: proxy.local\r\nHost: second\r\n\r\n";
        let out = rewrite_host(head, "backend:8080");
        assert_eq!(
            out,
            "GET / HTTP/1.1\r\nX-Forwarded-Host: keep\r\nhost: backend:8080\r\nHost: second\r\n\r\n"
        );
    }

    #[test]
    fn upgrades_first_http_1_0_only() {
        assert_eq!(
            upgrade_http_version("GET / http/1.0\r\nVia: HTTP/1.0 proxy\r\n\r\n"),
            "GET / HTTP/1.1\r\nVia: HTTP/1.0 proxy\r\n\r\n"
        );
    }

    #[test]
    fn finds_header_terminator() {
        assert_eq!(header_end(b"GET / HTTP/1.1\r\nA: b\r\n\r\nbody"), Some(24));
        assert_eq!(header_end(b"GET / HTTP/1.1\nA: b\n\nbody"), Some(21));
        assert_eq!(header_end(b"GET / HTTP/1.1\r\nA: b\r\n"), None);
    }
}
