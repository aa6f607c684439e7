//! # recon-transforms
//!
//! Enrichment jobs for the recon graph engine.
//!
//! | Name                | Alias | Types           | Noise |
//! |---------------------|-------|-----------------|-------|
//! | `shodan_org_search` | `sos` | `brand`, `org`  | 50    |
//! | `shodan_ssl_search` | `sss` | `domain`        | 9     |
//! | `pwndb_search`      | `pds` | `domain`, `email` | 1   |
//!
//! All jobs share one retrying [`Scheduler`].

pub mod pwndb;
pub mod scheduler;
pub mod shodan;

pub use scheduler::Scheduler;

use recon_core::TransformRegistry;

/// Register every bundled job, sharing one scheduler.
pub fn register_all(registry: &mut TransformRegistry) {
    register_with(registry, &Scheduler::new());
}

/// Register every bundled job on top of a caller-configured scheduler.
pub fn register_with(registry: &mut TransformRegistry, scheduler: &Scheduler) {
    registry.register_all(shodan::entries(scheduler));
    registry.register(pwndb::entry(scheduler));
}
