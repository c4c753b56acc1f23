//! Bulk resolution of security links against a [`SecuritySource`].
//!
//! One resolver serves one compilation. Its cache is never invalidated, and a
//! concurrent insert of the same key keeps the first security stored.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};

use rayon::ThreadPool;
use tracing::{debug, info};
use view_core::position::{Portfolio, Security, SecurityLink, SecuritySource};
use view_core::{CancellationToken, ExternalIdBundle, ObjectId, SourceError, VersionCorrection};

use crate::bulk::{bulk_resolve, BulkError};
use crate::error::{CompilationError, Result};

/// Two-level cache: by object id and by external id bundle.
#[derive(Debug, Default)]
pub struct SecurityCache {
    by_object: RwLock<HashMap<ObjectId, Arc<Security>>>,
    by_bundle: RwLock<HashMap<ExternalIdBundle, Arc<Security>>>,
}

fn cached<K: Eq + Hash>(map: &RwLock<HashMap<K, Arc<Security>>>, key: &K) -> Option<Arc<Security>> {
    map.read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(key)
        .cloned()
}

fn insert_if_absent<K: Eq + Hash>(
    map: &RwLock<HashMap<K, Arc<Security>>>,
    key: K,
    security: Arc<Security>,
) -> Arc<Security> {
    if let Some(existing) = cached(map, &key) {
        return existing;
    }
    let mut entries = map.write().unwrap_or_else(PoisonError::into_inner);
    // another thread may have stored it between the locks
    entries.entry(key).or_insert(security).clone()
}

impl SecurityCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached security for `link`, trying the object id before the bundle.
    pub fn get(&self, link: &SecurityLink) -> Option<Arc<Security>> {
        if let Some(object_id) = link.object_id() {
            if let Some(security) = cached(&self.by_object, object_id) {
                return Some(security);
            }
        }
        if link.external_id().is_empty() {
            return None;
        }
        cached(&self.by_bundle, link.external_id())
    }

    /// Stores `security` under the keys of `link` and of the security itself.
    ///
    /// Returns the security held by the cache, which is an earlier winner when
    /// one exists.
    pub fn insert(&self, link: &SecurityLink, security: Arc<Security>) -> Arc<Security> {
        let winner = insert_if_absent(&self.by_object, security.unique_id.object_id(), security);
        if let Some(object_id) = link.object_id() {
            insert_if_absent(&self.by_object, object_id.clone(), winner.clone());
        }
        if !link.external_id().is_empty() {
            insert_if_absent(&self.by_bundle, link.external_id().clone(), winner.clone());
        }
        if !winner.external_ids.is_empty() {
            insert_if_absent(&self.by_bundle, winner.external_ids.clone(), winner.clone());
        }
        winner
    }

    /// Number of distinct securities cached by object id.
    pub fn len(&self) -> usize {
        self.by_object.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if nothing has been cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves security links with one pool task per uncached link.
///
/// Resolution is all or nothing: when any lookup fails the call fails and no
/// link of the batch is reported, although securities fetched by lookups that
/// completed stay cached.
pub struct SecurityLinkResolver {
    executor: Arc<ThreadPool>,
    source: Arc<dyn SecuritySource>,
    version_correction: VersionCorrection,
    cancel: CancellationToken,
    cache: Arc<SecurityCache>,
}

impl SecurityLinkResolver {
    /// Creates a resolver with an empty cache.
    pub fn new(
        executor: Arc<ThreadPool>,
        source: Arc<dyn SecuritySource>,
        version_correction: VersionCorrection,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            source,
            version_correction,
            cancel,
            cache: Arc::new(SecurityCache::new()),
        }
    }

    /// The resolver's cache.
    pub fn cache(&self) -> &SecurityCache {
        &self.cache
    }

    /// Resolves every link in `links`.
    ///
    /// Already-resolved links are cached and returned without a lookup.
    /// Duplicate links are looked up once.
    ///
    /// # Errors
    ///
    /// - `BulkResolutionFailure` naming the first link whose lookup failed,
    ///   or an empty link
    /// - `Interrupted` when the resolver's token is cancelled
    pub fn resolve_links(
        &self,
        links: impl IntoIterator<Item = SecurityLink>,
    ) -> Result<HashMap<SecurityLink, Arc<Security>>> {
        let mut resolved = HashMap::new();
        let mut outstanding: Vec<SecurityLink> = Vec::new();
        for link in links {
            if link.is_empty() {
                return Err(CompilationError::BulkResolutionFailure {
                    reference: link.to_string(),
                    source: SourceError::InvalidArgument("empty security link".to_string()),
                });
            }
            if resolved.contains_key(&link) {
                continue;
            }
            if let Some(security) = link.target() {
                let security = self.cache.insert(&link, security.clone());
                resolved.insert(link, security);
            } else if let Some(security) = self.cache.get(&link) {
                resolved.insert(link, security);
            } else if !outstanding.contains(&link) {
                outstanding.push(link);
            }
        }
        if outstanding.is_empty() {
            return Ok(resolved);
        }

        debug!(
            lookups = outstanding.len(),
            cached = resolved.len(),
            "Resolving security links"
        );
        let source = Arc::clone(&self.source);
        let cache = Arc::clone(&self.cache);
        let version_correction = self.version_correction;
        let references: Vec<String> = outstanding.iter().map(ToString::to_string).collect();
        let fetched = bulk_resolve(
            &self.executor,
            outstanding,
            &self.cancel,
            move |link: SecurityLink| {
                let security = lookup(source.as_ref(), &link, &version_correction)?;
                let security = cache.insert(&link, security);
                Ok::<_, SourceError>((link, security))
            },
        )
        .map_err(|err| match err {
            BulkError::Failed { index, error } => CompilationError::BulkResolutionFailure {
                reference: references[index].clone(),
                source: error,
            },
            BulkError::Panicked { index, message } => CompilationError::BulkResolutionFailure {
                reference: references[index].clone(),
                source: SourceError::Unavailable(message),
            },
            BulkError::Interrupted => {
                CompilationError::Interrupted("security resolution".to_string())
            }
        })?;
        resolved.extend(fetched);
        Ok(resolved)
    }

    /// Returns `portfolio` with every position and trade link resolved.
    ///
    /// # Errors
    ///
    /// As [`resolve_links`](Self::resolve_links).
    pub fn resolve_portfolio_securities(&self, portfolio: &Portfolio) -> Result<Portfolio> {
        let links = portfolio.security_links();
        let link_count = links.len();
        let resolved = self.resolve_links(links)?;
        info!(
            portfolio = %portfolio.unique_id,
            links = link_count,
            "Resolved portfolio securities"
        );
        portfolio
            .with_resolved_securities(|link| resolved.get(link).cloned())
            .map_err(|source| CompilationError::BulkResolutionFailure {
                reference: portfolio.unique_id.to_string(),
                source,
            })
    }
}

fn lookup(
    source: &dyn SecuritySource,
    link: &SecurityLink,
    version_correction: &VersionCorrection,
) -> std::result::Result<Arc<Security>, SourceError> {
    match link.object_id() {
        Some(object_id) => source.get_security_by_object(object_id, version_correction),
        None => source.get_security_by_bundle(link.external_id(), version_correction),
    }
}
