//! Registry reconciliation.
//!
//! Turns two consecutive registry observations into an entered/left diff,
//! with a grace window so a transiently unreachable registry does not tear
//! down active sessions.

use super::{BotHandle, RegistryClient};
use crate::config::RegistrySettings;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Diff between the previous and current registry observations.
///
/// `current` always carries the full listing (not just the delta) so
/// dependents can resync from full state after a restart.
#[derive(Debug, Clone, Default)]
pub struct RegistryDiff {
    /// Bots present now that were absent last poll.
    pub entered: Vec<BotHandle>,
    /// Entity ids absent now that were present last poll.
    pub left: Vec<String>,
    /// Full current listing.
    pub current: Vec<BotHandle>,
}

/// Polls the registry and reconciles membership.
pub struct Reconciler {
    client: Arc<dyn RegistryClient>,
    settings: RegistrySettings,
    observed: HashMap<String, BotHandle>,
    consecutive_failures: u32,
}

impl Reconciler {
    pub fn new(client: Arc<dyn RegistryClient>, settings: RegistrySettings) -> Self {
        Self {
            client,
            settings,
            observed: HashMap::new(),
            consecutive_failures: 0,
        }
    }

    /// Poll the registry once and compute the membership diff.
    ///
    /// A failed poll inside the grace window reports the last successful
    /// listing as still current with an empty diff; past the grace window
    /// the registry is treated as empty and every observed bot leaves.
    pub async fn poll(&mut self) -> RegistryDiff {
        match self.client.list_bots().await {
            Ok(listing) => {
                self.consecutive_failures = 0;
                self.reconcile(listing)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures <= self.settings.failure_grace_polls {
                    warn!(
                        "Registry poll failed ({} consecutive): {}. Keeping {} bots current",
                        self.consecutive_failures,
                        e,
                        self.observed.len()
                    );
                    RegistryDiff {
                        entered: Vec::new(),
                        left: Vec::new(),
                        current: self.observed.values().cloned().collect(),
                    }
                } else {
                    warn!(
                        "Registry unreachable for {} polls, treating as empty: {}",
                        self.consecutive_failures, e
                    );
                    let left: Vec<String> = self.observed.keys().cloned().collect();
                    self.observed.clear();
                    RegistryDiff {
                        entered: Vec::new(),
                        left,
                        current: Vec::new(),
                    }
                }
            }
        }
    }

    fn reconcile(&mut self, listing: Vec<BotHandle>) -> RegistryDiff {
        let mut entered = Vec::new();
        let mut next = HashMap::with_capacity(listing.len());

        for handle in &listing {
            if !self.observed.contains_key(&handle.id) {
                entered.push(handle.clone());
            }
            // Descriptive fields refresh on every poll, membership or not.
            next.insert(handle.id.clone(), handle.clone());
        }

        let left: Vec<String> = self
            .observed
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();

        if !entered.is_empty() || !left.is_empty() {
            debug!("Registry diff: {} entered, {} left", entered.len(), left.len());
        }

        self.observed = next;

        RegistryDiff {
            entered,
            left,
            current: listing,
        }
    }

    /// Extra delay to apply before the next poll after failures, capped.
    pub fn backoff_delay(&self) -> Option<Duration> {
        if self.consecutive_failures == 0 {
            return None;
        }
        let exp = self.consecutive_failures.saturating_sub(1).min(16);
        let secs = self
            .settings
            .backoff_base_seconds
            .saturating_mul(1u64 << exp)
            .min(self.settings.backoff_max_seconds);
        Some(Duration::from_secs(secs))
    }
}
