use std::net::IpAddr;
use url::Url;

/// Second-level labels that act as public suffixes under a country code
const COUNTRY_SECOND_LEVELS: &[&str] = &[
    "ac", "co", "com", "edu", "gov", "gv", "ltd", "me", "mil", "ne", "net", "nhs", "nic", "or",
    "org", "plc", "sch",
];

/// Extracts the domain from a URL
///
/// This function retrieves the host portion of a URL and converts it to lowercase.
/// URLs without a host (such as `mailto:` links) return None.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_fetch::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
///
/// let url = Url::parse("mailto:someone@example.com").unwrap();
/// assert_eq!(extract_domain(&url), None);
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str()
        .filter(|h| !h.is_empty())
        .map(|h| h.to_lowercase())
}

/// Returns the paid-level (registrable) domain of a host name
///
/// IP addresses and single-label names are returned unchanged. Hosts under a
/// two-letter country code with a generic second level (`co.uk`, `com.au`)
/// keep three labels; everything else keeps two.
///
/// # Examples
///
/// ```
/// use sumi_fetch::url::paid_level_domain;
///
/// assert_eq!(paid_level_domain("www.news.example.com"), "example.com");
/// assert_eq!(paid_level_domain("shop.example.co.uk"), "example.co.uk");
/// assert_eq!(paid_level_domain("10.0.0.1"), "10.0.0.1");
/// ```
pub fn paid_level_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_lowercase();
    if host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>().is_ok() {
        return host;
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }

    let n = labels.len();
    let tld = labels[n - 1];
    let second = labels[n - 2];
    let keep = if tld.len() == 2 && COUNTRY_SECOND_LEVELS.contains(&second) {
        3
    } else {
        2
    };

    labels[n.saturating_sub(keep)..].join(".")
}
