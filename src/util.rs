//! Small shared helpers: id generation, resource naming, cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use uuid::Uuid;

/// Shared cancellation flag, set by the signal handler. Pipeline code polls
/// it at suspension points; the process runner awaits [`CancelFlag::cancelled`]
/// so in-flight children are terminated too.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation has been requested. Polled at 100ms, which
    /// is well inside the 5s terminate grace window.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}

/// Generate a unique id of the form `<prefix>-<unix-millis>-<random>`.
///
/// The timestamp component keeps ids sortable by creation time; the random
/// suffix breaks ties when two ids are minted in the same millisecond.
pub fn generate_id(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let random = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{millis}-{}", &random[..8])
}

/// Replace dots with dashes (`api.example.com` -> `api-example-com`).
pub fn dot_to_dash(domain: &str) -> String {
    domain.replace('.', "-")
}

/// Database name for a (domain, environment) pair.
///
/// Pure function: `<dot-to-dash(domain)>-<env>-db`.
pub fn database_name(domain: &str, env: &str) -> String {
    format!("{}-{}-db", dot_to_dash(domain), env)
}
