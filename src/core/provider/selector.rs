//! Criteria-based provider selection

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Criteria, LocationProvider, ProviderError, ProviderFactory};
use crate::core::location::Location;

/// Picks the first candidate that satisfies the criteria and opens
pub struct ProviderSelector {
    candidates: Vec<Arc<dyn ProviderFactory>>,
    selected: Mutex<Option<Arc<dyn LocationProvider>>>,
}

impl ProviderSelector {
    /// Selector over `candidates`, in order of preference
    pub fn new(candidates: Vec<Arc<dyn ProviderFactory>>) -> Self {
        Self {
            candidates,
            selected: Mutex::new(None),
        }
    }

    /// Open the first candidate matching `criteria`.
    ///
    /// Returns `Ok(None)` when no candidate matches. If matching candidates
    /// exist but none opens, the first open error is returned.
    pub async fn select(
        &self,
        criteria: &Criteria,
    ) -> Result<Option<Arc<dyn LocationProvider>>, ProviderError> {
        let mut first_error = None;

        for (index, candidate) in self.candidates.iter().enumerate() {
            if !candidate.characteristics().satisfies(criteria) {
                debug!(index, "provider does not meet criteria");
                continue;
            }

            match candidate.open(criteria).await {
                Ok(provider) => {
                    debug!(index, provider = provider.name(), "provider selected");
                    *self.selected.lock() = Some(provider.clone());
                    return Ok(Some(provider));
                }
                Err(e) => {
                    warn!(index, error = %e, "matching provider failed to open");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Most recently selected provider
    pub fn selected(&self) -> Option<Arc<dyn LocationProvider>> {
        self.selected.lock().clone()
    }

    /// Last known location of the selected provider
    pub fn last_known_location(&self) -> Option<Location> {
        self.selected()?.last_known_location()
    }
}
