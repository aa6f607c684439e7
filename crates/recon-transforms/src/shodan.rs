//! # Shodan Host Search
//!
//! Two jobs share one implementation and differ only in the search filter:
//!
//! - `shodan_org_search` (`sos`): `org:"<label>"` for brands and orgs
//! - `shodan_ssl_search` (`sss`): `ssl:"<label>"` for domains, keeping only
//!   hosts whose certificate names the domain or a subdomain of it
//!
//! Every kept match yields an `ipv4` node linked from the input, a
//! `<port>/TCP` port node linked from the address and one `domain` node per
//! hostname, also linked from the address.

use crate::scheduler::Scheduler;
use async_trait::async_trait;
use recon_core::{
    Node, NodeSpec, Transform, TransformContext, TransformDescriptor, TransformEntry,
    TransformError, TransformOptions, derive_node_id, kind, string_option,
};
use serde::Deserialize;

pub const SEARCH_URL: &str = "https://api.shodan.io/shodan/host/search";

/// Environment fallback when no `shodanKey` option is given.
pub const KEY_ENV: &str = "SHODAN_KEY";

// =============================================================================
// RESPONSE
// =============================================================================

/// One page of `/shodan/host/search`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub matches: Vec<HostMatch>,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostMatch {
    pub ip_str: String,
    pub port: u64,
    #[serde(default)]
    pub ssl: Option<SslInfo>,
    #[serde(default)]
    pub hostnames: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SslInfo {
    #[serde(default)]
    pub cert: Certificate,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Certificate {
    #[serde(default)]
    pub extensions: Vec<CertificateExtension>,
    #[serde(default)]
    pub subject: Subject,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CertificateExtension {
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Subject {
    #[serde(rename = "CN", default)]
    pub common_name: Option<String>,
}

pub fn parse_page(body: &str) -> Result<SearchPage, TransformError> {
    serde_json::from_str(body).map_err(|e| TransformError::Parse(format!("shodan: {e}")))
}

/// Specs for one match, rooted at `source`.
#[must_use]
pub fn host_specs(source: &str, host: &HostMatch) -> Vec<NodeSpec> {
    let ipv4_id = derive_node_id(kind::IPV4, &host.ip_str);
    let port_label = format!("{}/TCP", host.port);

    let mut specs = vec![
        NodeSpec::new(kind::IPV4, host.ip_str.clone())
            .with_id(ipv4_id.clone())
            .with_prop("ipv4", host.ip_str.clone())
            .with_edge(source),
        NodeSpec::new(kind::PORT, port_label)
            .with_prop("port", host.port)
            .with_prop("ssl", host.ssl.is_some())
            .with_edge(ipv4_id.clone()),
    ];
    specs.extend(host.hostnames.iter().map(|domain| {
        NodeSpec::new(kind::DOMAIN, domain.clone())
            .with_prop("domain", domain.clone())
            .with_edge(ipv4_id.clone())
    }));
    specs
}

// =============================================================================
// SEARCH KIND
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Org,
    Ssl,
}

impl SearchKind {
    #[must_use]
    pub fn query(self, label: &str, extra: &str) -> String {
        let filter = match self {
            Self::Org => "org",
            Self::Ssl => "ssl",
        };
        format!("{filter}:\"{label}\" {extra}").trim_end().to_string()
    }

    /// Org searches keep everything. SSL searches keep hosts whose
    /// certificate subject or an extension names `label` or a subdomain.
    #[must_use]
    pub fn keeps(self, label: &str, host: &HostMatch) -> bool {
        match self {
            Self::Org => true,
            Self::Ssl => {
                let Some(ssl) = &host.ssl else {
                    return false;
                };
                let suffix = format!(".{label}");
                let names = |name: &str| name == label || name.ends_with(&suffix);
                ssl.cert
                    .subject
                    .common_name
                    .as_deref()
                    .is_some_and(names)
                    || ssl
                        .cert
                        .extensions
                        .iter()
                        .filter_map(|extension| extension.data.as_deref())
                        .any(names)
            }
        }
    }
}

// =============================================================================
// JOB
// =============================================================================

pub struct ShodanSearch {
    kind: SearchKind,
    scheduler: Scheduler,
}

impl ShodanSearch {
    #[must_use]
    pub fn new(kind: SearchKind, scheduler: Scheduler) -> Self {
        Self { kind, scheduler }
    }
}

fn api_key(options: &TransformOptions) -> Result<String, TransformError> {
    string_option(options, "shodanKey")
        .map(str::to_string)
        .or_else(|| {
            std::env::var(KEY_ENV)
                .ok()
                .filter(|key| !key.trim().is_empty())
        })
        .ok_or_else(|| TransformError::MissingOption("shodanKey".to_string()))
}

#[async_trait]
impl Transform for ShodanSearch {
    async fn handle(
        &self,
        node: &Node,
        options: &TransformOptions,
        ctx: &TransformContext,
    ) -> Result<Vec<NodeSpec>, TransformError> {
        let key = api_key(options)?;
        let query = self
            .kind
            .query(&node.label, string_option(options, "extraQuery").unwrap_or(""));

        let mut results = Vec::new();
        let mut page: u64 = 1;
        let mut seen: u64 = 0;
        loop {
            ctx.info(format!("Retrieving shodan page {page}"));
            let page_text = page.to_string();
            let url = reqwest::Url::parse_with_params(
                SEARCH_URL,
                [
                    ("key", key.as_str()),
                    ("query", query.as_str()),
                    ("page", page_text.as_str()),
                ],
            )
            .map_err(|e| TransformError::Other(e.to_string()))?;

            let body = self.scheduler.fetch(url.as_str()).await?;
            let SearchPage { matches, total } = parse_page(&body)?;
            if matches.is_empty() {
                break;
            }
            seen += matches.len() as u64;
            results.extend(
                matches
                    .iter()
                    .filter(|host| self.kind.keeps(&node.label, host))
                    .flat_map(|host| host_specs(&node.id, host)),
            );
            if seen >= total {
                break;
            }
            page += 1;
        }
        Ok(results)
    }
}

// =============================================================================
// REGISTRATION
// =============================================================================

fn descriptor(search: SearchKind) -> TransformDescriptor {
    let base = match search {
        SearchKind::Org => TransformDescriptor::new("shodan_org_search", "Shodan ORG Search")
            .alias(["sos"])
            .description("Performs search using ORG filter.")
            .types([kind::BRAND, kind::ORG])
            .noise(50),
        SearchKind::Ssl => TransformDescriptor::new("shodan_ssl_search", "Shodan SSL Search")
            .alias(["sss"])
            .description("Performs search using SSL filter.")
            .types([kind::DOMAIN])
            .noise(9),
    };
    base.tags(["ce"])
        .priority(1)
        .option("shodanKey", "string", "Shodan API key.")
        .option("extraQuery", "string", "Extra query.")
}

/// Registry entries for both searches, sharing `scheduler`.
#[must_use]
pub fn entries(scheduler: &Scheduler) -> Vec<TransformEntry> {
    [SearchKind::Org, SearchKind::Ssl]
        .into_iter()
        .map(|search| {
            let scheduler = scheduler.clone();
            TransformEntry::new(descriptor(search), move || {
                Box::new(ShodanSearch::new(search, scheduler.clone())) as Box<dyn Transform>
            })
        })
        .collect()
}
