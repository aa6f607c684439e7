//! # Label-Type Detectors
//!
//! Pure classifiers used to infer what a node label looks like when its
//! declared `type` is not enough to pick transforms. Detectors err on the
//! side of false negatives.

use crate::types::{Node, kind};
use regex::Regex;
use std::collections::BTreeSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

static URL_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://[^\s/?#@]+(?:[/?#][^\s]*)?$").ok()
});

static EMAIL_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?)*\.[A-Za-z]{2,}$").ok()
});

static DOMAIN_LABEL_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_](?:[A-Za-z0-9\-]{0,61}[A-Za-z0-9])?$").ok()
});

static TLD_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(?:[A-Za-z]{2,63}|xn--[A-Za-z0-9\-]{1,59})$").ok());

fn matches(regex: &LazyLock<Option<Regex>>, text: &str) -> bool {
    regex.as_ref().is_some_and(|re| re.is_match(text))
}

/// `scheme://host[/path...]`
#[must_use]
pub fn is_url(text: &str) -> bool {
    matches(&URL_REGEX, text)
}

#[must_use]
pub fn is_email(text: &str) -> bool {
    text.len() <= 254 && matches(&EMAIL_REGEX, text)
}

#[must_use]
pub fn is_ipv4(text: &str) -> bool {
    text.parse::<Ipv4Addr>().is_ok()
}

#[must_use]
pub fn is_ipv6(text: &str) -> bool {
    text.parse::<Ipv6Addr>().is_ok()
}

/// A dotted hostname of at least two labels ending in an alphabetic or
/// punycode TLD. One trailing dot is tolerated.
#[must_use]
pub fn is_domain(text: &str) -> bool {
    let name = text.strip_suffix('.').unwrap_or(text);
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    let labels: Vec<&str> = name.split('.').collect();
    let Some((tld, rest)) = labels.split_last() else {
        return false;
    };
    !rest.is_empty()
        && matches(&TLD_REGEX, tld)
        && rest.iter().all(|label| matches(&DOMAIN_LABEL_REGEX, label))
}

/// Classify a label. The first matching detector wins, in the order
/// uri, email, ipv4, ipv6, domain.
#[must_use]
pub fn detect_label_type(label: &str) -> Option<&'static str> {
    let label = label.trim();
    if is_url(label) {
        Some(kind::URI)
    } else if is_email(label) {
        Some(kind::EMAIL)
    } else if is_ipv4(label) {
        Some(kind::IPV4)
    } else if is_ipv6(label) {
        Some(kind::IPV6)
    } else if is_domain(label) {
        Some(kind::DOMAIN)
    } else {
        None
    }
}

/// Tags of a node: its declared type plus the detected label type.
#[must_use]
pub fn infer_tags(node: &Node) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    if !node.node_type.is_empty() {
        tags.insert(node.node_type.clone());
    }
    if let Some(detected) = detect_label_type(&node.label) {
        tags.insert(detected.to_string());
    }
    tags
}
