//! Read interfaces onto position and security storage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::SourceError;
use crate::ids::{ExternalIdBundle, ObjectId, UniqueId, VersionCorrection};

use super::{Portfolio, Security};

/// Lookup of portfolios by identifier.
pub trait PositionSource: Send + Sync {
    /// Returns the portfolio tree for `id` as seen at `version_correction`.
    ///
    /// # Errors
    ///
    /// `SourceError::NotFound` when no such portfolio exists.
    fn get_portfolio(
        &self,
        id: &UniqueId,
        version_correction: &VersionCorrection,
    ) -> Result<Portfolio, SourceError>;

    /// Returns the portfolio for `id` at its latest version under `version_correction`.
    fn get_portfolio_by_object(
        &self,
        id: &ObjectId,
        version_correction: &VersionCorrection,
    ) -> Result<Portfolio, SourceError> {
        self.get_portfolio(&id.at_latest_version(), version_correction)
    }
}

/// Lookup of securities by unique id, object id or external ids.
pub trait SecuritySource: Send + Sync {
    /// Returns the security with the given unique id.
    fn get_security(&self, id: &UniqueId) -> Result<Arc<Security>, SourceError>;

    /// Returns the security with the given object id as seen at `version_correction`.
    fn get_security_by_object(
        &self,
        id: &ObjectId,
        version_correction: &VersionCorrection,
    ) -> Result<Arc<Security>, SourceError>;

    /// Returns every security matching any id in `bundle`.
    fn get_securities(
        &self,
        bundle: &ExternalIdBundle,
        version_correction: &VersionCorrection,
    ) -> Result<Vec<Arc<Security>>, SourceError>;

    /// Returns the single best match for `bundle`.
    ///
    /// The default takes the first result of [`get_securities`](Self::get_securities).
    fn get_security_by_bundle(
        &self,
        bundle: &ExternalIdBundle,
        version_correction: &VersionCorrection,
    ) -> Result<Arc<Security>, SourceError> {
        self.get_securities(bundle, version_correction)?
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::not_found("Security", bundle))
    }
}

/// Position source backed by a map, counting every lookup.
#[derive(Debug, Default)]
pub struct InMemoryPositionSource {
    portfolios: RwLock<HashMap<ObjectId, Portfolio>>,
    calls: AtomicUsize,
}

impl InMemoryPositionSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a portfolio, replacing any earlier one with the same object id.
    pub fn add_portfolio(&self, portfolio: Portfolio) {
        let mut portfolios = self
            .portfolios
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        portfolios.insert(portfolio.unique_id.object_id(), portfolio);
    }

    /// Number of lookups served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PositionSource for InMemoryPositionSource {
    fn get_portfolio(
        &self,
        id: &UniqueId,
        _version_correction: &VersionCorrection,
    ) -> Result<Portfolio, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let portfolios = self
            .portfolios
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        portfolios
            .get(&id.object_id())
            .filter(|p| id.version().is_none() || p.unique_id == *id)
            .cloned()
            .ok_or_else(|| SourceError::not_found("Portfolio", id))
    }
}

/// Security source backed by a list, counting every lookup.
#[derive(Debug, Default)]
pub struct InMemorySecuritySource {
    securities: RwLock<Vec<Arc<Security>>>,
    calls: AtomicUsize,
}

impl InMemorySecuritySource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source holding `securities`.
    pub fn with_securities(securities: impl IntoIterator<Item = Security>) -> Self {
        let source = Self::new();
        for security in securities {
            source.add_security(security);
        }
        source
    }

    /// Stores a security.
    pub fn add_security(&self, security: Security) {
        self.securities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(security));
    }

    /// Number of lookups served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn find(&self, predicate: impl Fn(&Security) -> bool) -> Vec<Arc<Security>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.securities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| predicate(s))
            .cloned()
            .collect()
    }
}

impl SecuritySource for InMemorySecuritySource {
    fn get_security(&self, id: &UniqueId) -> Result<Arc<Security>, SourceError> {
        self.find(|s| s.unique_id == *id)
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::not_found("Security", id))
    }

    fn get_security_by_object(
        &self,
        id: &ObjectId,
        _version_correction: &VersionCorrection,
    ) -> Result<Arc<Security>, SourceError> {
        self.find(|s| s.unique_id.object_id() == *id)
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::not_found("Security", id))
    }

    fn get_securities(
        &self,
        bundle: &ExternalIdBundle,
        _version_correction: &VersionCorrection,
    ) -> Result<Vec<Arc<Security>>, SourceError> {
        if bundle.is_empty() {
            return Err(SourceError::InvalidArgument(
                "empty external id bundle".to_string(),
            ));
        }
        Ok(self.find(|s| s.external_ids.contains_any(bundle)))
    }
}
