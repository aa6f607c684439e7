//! # Working-Set Scope
//!
//! CLI invocations and API calls both start from a session whose working
//! set they may replace before operating on it: selectors first, then
//! traversal steps.

use clap::Args;
use recon_core::{ReconError, Session};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Args, Serialize, Deserialize)]
#[serde(default)]
pub struct Scope {
    /// Selector expression; repeat to union several
    #[arg(short = 's', long = "select", value_name = "EXPR")]
    pub select: Vec<String>,

    /// Traversal expression applied after selecting
    #[arg(short = 't', long = "traverse", value_name = "EXPR")]
    pub traverse: Vec<String>,
}

impl Scope {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.select.is_empty() && self.traverse.is_empty()
    }

    /// Replace the session's working set. An empty scope keeps it.
    pub fn apply(&self, session: &mut Session) -> Result<(), ReconError> {
        if !self.select.is_empty() {
            session.select(&self.select)?;
        }
        if !self.traverse.is_empty() {
            session.traverse(&self.traverse)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_core::NodeSpec;

    fn session() -> Session {
        let mut session = Session::new();
        session
            .upsert(vec![
                NodeSpec::new("domain", "example.com").with_id("d"),
                NodeSpec::new("ipv4", "10.0.0.1").with_id("i").with_edge("d"),
            ])
            .expect("upsert");
        session
    }

    #[test]
    fn empty_scope_keeps_working_set() {
        let mut session = session();
        Scope::default().apply(&mut session).expect("apply");
        assert_eq!(session.selection().len(), 2);
    }

    #[test]
    fn select_then_traverse() {
        let mut session = session();
        let scope = Scope {
            select: vec!["#d".into()],
            traverse: vec!["nodes | leaves".into()],
        };
        scope.apply(&mut session).expect("apply");
        assert_eq!(session.selection().node_ids().collect::<Vec<_>>(), vec!["i"]);
    }

    #[test]
    fn bad_selector_is_reported() {
        let mut session = session();
        let scope = Scope {
            select: vec!["[type =".into()],
            traverse: Vec::new(),
        };
        assert!(matches!(
            scope.apply(&mut session),
            Err(ReconError::InvalidSelector { .. })
        ));
    }
}
