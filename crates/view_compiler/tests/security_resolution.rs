//! Integration tests for bulk security link resolution.

use std::sync::Arc;

use view_compiler::security::SecurityLinkResolver;
use view_compiler::CompilationError;
use view_core::position::{
    InMemorySecuritySource, Portfolio, PortfolioNode, Position, Security, SecurityLink,
};
use view_core::{CancellationToken, ExternalId, ExternalIdBundle, UniqueId, VersionCorrection};

// ============================================================================
// Fixtures
// ============================================================================

fn ticker(value: &str) -> SecurityLink {
    SecurityLink::from_bundle(ExternalIdBundle::of([ExternalId::of("TICKER", value)]))
}

fn source() -> Arc<InMemorySecuritySource> {
    Arc::new(InMemorySecuritySource::with_securities(
        [("1", "IBM"), ("3", "MSFT")].map(|(id, name)| {
            Security::new(
                UniqueId::of("DbSec", id),
                ExternalIdBundle::of([ExternalId::of("TICKER", name)]),
                "EQUITY",
                name,
            )
        }),
    ))
}

fn resolver(source: Arc<InMemorySecuritySource>) -> SecurityLinkResolver {
    SecurityLinkResolver::new(
        Arc::new(rayon::ThreadPoolBuilder::new().num_threads(3).build().unwrap()),
        source,
        VersionCorrection::LATEST,
        CancellationToken::new(),
    )
}

fn position(id: &str, link: SecurityLink) -> Position {
    Position {
        unique_id: UniqueId::of("DbPos", id),
        quantity: 1.0,
        security_link: link,
        trades: Vec::new(),
    }
}

// ============================================================================
// Batches
// ============================================================================

#[test]
fn test_batch_with_one_failing_link_returns_no_results() {
    let resolver = resolver(source());
    let result = resolver.resolve_links([ticker("IBM"), ticker("MISSING"), ticker("MSFT")]);
    match result {
        Err(CompilationError::BulkResolutionFailure { reference, source }) => {
            assert!(reference.contains("TICKER~MISSING"));
            assert!(source.is_not_found());
        }
        other => panic!("expected bulk resolution failure, got {other:?}"),
    }
}

#[test]
fn test_batch_resolves_every_link() {
    let source = source();
    let resolver = resolver(source.clone());
    let resolved = resolver
        .resolve_links([ticker("IBM"), ticker("MSFT"), ticker("IBM")])
        .unwrap();
    assert_eq!(resolved.len(), 2);
    assert_eq!(resolved[&ticker("MSFT")].unique_id, UniqueId::of("DbSec", "3"));
    assert_eq!(source.call_count(), 2);
}

#[test]
fn test_portfolio_links_share_lookups() {
    let source = source();
    let resolver = resolver(source.clone());
    let portfolio = Portfolio::new(
        UniqueId::of("DbPrt", "1"),
        "Shared",
        PortfolioNode::new(UniqueId::of("DbNode", "root"), "Root")
            .with_position(position("1", ticker("IBM")))
            .with_child(
                PortfolioNode::new(UniqueId::of("DbNode", "child"), "Child")
                    .with_position(position("2", ticker("IBM")))
                    .with_position(position("3", ticker("MSFT"))),
            ),
    );

    let resolved = resolver.resolve_portfolio_securities(&portfolio).unwrap();
    assert!(resolved.is_fully_resolved());
    assert!(!portfolio.is_fully_resolved());
    assert_eq!(source.call_count(), 2);
    assert_eq!(resolver.cache().get(&ticker("IBM")).unwrap().name, "IBM");

    // a second pass is served from the cache
    resolver.resolve_portfolio_securities(&portfolio).unwrap();
    assert_eq!(source.call_count(), 2);
}
