//! # PwnDB Search
//!
//! Looks up leaked credentials for a domain or an email address and turns
//! every record in the response into a `pwndb:account` node labelled
//! `<id>@<user>@<domain>`.
//!
//! The service answers with an HTML page whose `<pre>` block holds PHP
//! `print_r` dumps:
//!
//! ```text
//! 1Array
//! (
//!     [id] => 1234
//!     [luser] => alice
//!     [domain] => example.com
//!     [password] => hunter2
//! )
//! ```

use crate::scheduler::Scheduler;
use async_trait::async_trait;
use recon_core::{
    Node, NodeSpec, Transform, TransformContext, TransformDescriptor, TransformEntry,
    TransformError, TransformOptions, kind,
};
use regex::Regex;
use std::sync::LazyLock;

pub const SEARCH_URL: &str = "http://pwndb2am4tzkvold.onion.pet/";

pub const ACCOUNT_TYPE: &str = "pwndb:account";

/// Matches any user in the `luser` field.
const ANY_USER: &str = "%";

static PRE_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"<pre>([\w\W]+?)</pre>").ok());
static RECORD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\d\W?Array\W+?\(([\w\W]*?)\)").ok());
static FIELD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[(id|luser|domain|password)\]\s=>\s(.*)").ok());

// =============================================================================
// REQUEST
// =============================================================================

fn split_address(label: &str) -> (&str, &str) {
    let mut parts = label.split('@');
    (parts.next().unwrap_or(""), parts.next().unwrap_or(""))
}

/// Form fields for a lookup on `node`.
///
/// Domains search every user of the domain; emails search one user. Other
/// types are treated as an email when the label has a user part.
#[must_use]
pub fn form_fields(node: &Node) -> Vec<(&'static str, String)> {
    let (user, domain) = match node.node_type.as_str() {
        kind::DOMAIN => (ANY_USER, node.label.as_str()),
        kind::EMAIL => split_address(&node.label),
        _ if node.label.find('@').is_some_and(|at| at > 0) => split_address(&node.label),
        _ => (ANY_USER, node.label.as_str()),
    };
    vec![
        ("luser", user.to_string()),
        ("domain", domain.to_string()),
        ("luseropr", "1".to_string()),
        ("domainopr", "0".to_string()),
        ("submitform", "em".to_string()),
    ]
}

// =============================================================================
// RESPONSE
// =============================================================================

/// One leaked credential record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub record_id: String,
    pub user: String,
    pub domain: String,
    pub password: String,
}

impl Account {
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}@{}@{}", self.record_id, self.user, self.domain)
    }

    #[must_use]
    pub fn to_spec(&self, source: &str) -> NodeSpec {
        NodeSpec::new(ACCOUNT_TYPE, self.label())
            .with_prop("recordId", self.record_id.clone())
            .with_prop("user", self.user.clone())
            .with_prop("domain", self.domain.clone())
            .with_prop("password", self.password.clone())
            .with_edge(source)
    }
}

/// Extract every record from a response page. Pages without a `<pre>`
/// block hold no records.
#[must_use]
pub fn parse_records(page: &str) -> Vec<Account> {
    let (Some(pre), Some(record), Some(field)) =
        (PRE_BLOCK.as_ref(), RECORD.as_ref(), FIELD.as_ref())
    else {
        return Vec::new();
    };
    let Some(block) = pre.captures(page).and_then(|c| c.get(1)) else {
        return Vec::new();
    };

    record
        .captures_iter(block.as_str())
        .filter_map(|c| c.get(1))
        .map(|body| {
            let mut account = Account::default();
            for entry in field.captures_iter(body.as_str()) {
                let (Some(name), Some(value)) = (entry.get(1), entry.get(2)) else {
                    continue;
                };
                let value = value.as_str().trim_end().to_string();
                match name.as_str() {
                    "id" => account.record_id = value,
                    "luser" => account.user = value,
                    "domain" => account.domain = value,
                    _ => account.password = value,
                }
            }
            account
        })
        .collect()
}

// =============================================================================
// JOB
// =============================================================================

pub struct PwndbSearch {
    scheduler: Scheduler,
}

impl PwndbSearch {
    #[must_use]
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Transform for PwndbSearch {
    async fn handle(
        &self,
        node: &Node,
        _options: &TransformOptions,
        ctx: &TransformContext,
    ) -> Result<Vec<NodeSpec>, TransformError> {
        let page = self
            .scheduler
            .post_form(SEARCH_URL, &form_fields(node))
            .await?;
        let accounts = parse_records(&page);
        ctx.debug(format!("{} records for {}", accounts.len(), node.label));
        Ok(accounts.iter().map(|account| account.to_spec(&node.id)).collect())
    }
}

#[must_use]
pub fn entry(scheduler: &Scheduler) -> TransformEntry {
    let scheduler = scheduler.clone();
    let descriptor = TransformDescriptor::new("pwndb_search", "PwnDB Search")
        .alias(["pds"])
        .description("Searching the PwnDB database")
        .tags(["ce"])
        .types([kind::DOMAIN, kind::EMAIL])
        .priority(1)
        .noise(1);
    TransformEntry::new(descriptor, move || {
        Box::new(PwndbSearch::new(scheduler.clone())) as Box<dyn Transform>
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "<html><body><pre>
0Array
(
    [id] => 1234
    [luser] => alice
    [domain] => example.com
    [password] => hunter2
)
1Array
(
    [id] => 1235
    [luser] => bob
    [domain] => example.com
    [password] => p@ss w0rd
)
</pre></body></html>";

    fn field<'a>(fields: &'a [(&'static str, String)], name: &str) -> &'a str {
        fields
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
            .expect("field")
    }

    #[test]
    fn domain_searches_all_users() {
        let fields = form_fields(&Node::new("d", kind::DOMAIN, "example.com"));
        assert_eq!(field(&fields, "luser"), "%");
        assert_eq!(field(&fields, "domain"), "example.com");
        assert_eq!(field(&fields, "submitform"), "em");
    }

    #[test]
    fn email_searches_one_user() {
        let fields = form_fields(&Node::new("e", kind::EMAIL, "alice@example.com"));
        assert_eq!(field(&fields, "luser"), "alice");
        assert_eq!(field(&fields, "domain"), "example.com");

        let guessed = form_fields(&Node::new("n", kind::NICK, "bob@example.org"));
        assert_eq!(field(&guessed, "luser"), "bob");

        let leading = form_fields(&Node::new("n", kind::NICK, "@handle"));
        assert_eq!(field(&leading, "luser"), "%");
        assert_eq!(field(&leading, "domain"), "@handle");
    }

    #[test]
    fn parses_print_r_records() {
        let accounts = parse_records(PAGE);
        assert_eq!(accounts.len(), 2);
        assert_eq!(
            accounts[0],
            Account {
                record_id: "1234".into(),
                user: "alice".into(),
                domain: "example.com".into(),
                password: "hunter2".into(),
            }
        );
        assert_eq!(accounts[1].password, "p@ss w0rd");
        assert_eq!(accounts[1].label(), "1235@bob@example.com");
    }

    #[test]
    fn page_without_pre_block_is_empty() {
        assert!(parse_records("<html>nothing here</html>").is_empty());
        assert!(parse_records("<pre></pre>").is_empty());
    }

    #[test]
    fn account_spec_links_source() {
        let spec = parse_records(PAGE)[0].to_spec("src");
        assert_eq!(spec.node_type.as_deref(), Some(ACCOUNT_TYPE));
        assert_eq!(spec.label.as_deref(), Some("1234@alice@example.com"));
        assert_eq!(spec.edges[0].source(), "src");
    }
}
