//! Integration tests for dependency graph construction.
//!
//! These tests drive the builder through the public API only, over portfolio
//! targets with securities, market data leaves and multi-level aggregation.

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use view_core::position::{Portfolio, PortfolioNode, Position, Security, SecurityLink};
use view_core::{
    CancellationToken, ComputationTargetSpecification, ComputationTargetType, ExternalId,
    ExternalIdBundle, UniqueId, ValueProperties, ValueRequirement,
};
use view_depgraph::{
    CompiledFunctionResolver, DeclaredFunction, DeclaredInput, DeclaredOutput, DependencyGraph,
    DependencyGraphBuilder, FixedMarketDataAvailabilityProvider, FunctionRepository, InputTarget,
    MapTargetResolver, MarketDataAvailabilityProvider, ResolutionContext,
    SimpleResolutionRuleTransform, ValueNameMarketDataAvailabilityProvider,
};

// ============================================================================
// Fixtures
// ============================================================================

fn security(id: &str, security_type: &str) -> Arc<Security> {
    Arc::new(Security::new(
        UniqueId::of("DbSec", id),
        ExternalIdBundle::of([ExternalId::of("TICKER", id)]),
        security_type,
        id,
    ))
}

fn position(id: &str, security: &Arc<Security>) -> Position {
    Position {
        unique_id: UniqueId::of("DbPos", id),
        quantity: 100.0,
        security_link: SecurityLink::resolved_to(security.clone()),
        trades: Vec::new(),
    }
}

/// Root holding one swap, with a child node holding two equities.
fn portfolio() -> Portfolio {
    let swap = security("SWAP1", "SWAP");
    let ibm = security("IBM", "EQUITY");
    let msft = security("MSFT", "EQUITY");
    let equities = PortfolioNode::new(UniqueId::of("DbNode", "2"), "Equities")
        .with_position(position("2", &ibm))
        .with_position(position("3", &msft));
    Portfolio::new(
        UniqueId::of("DbPrt", "1"),
        "Test",
        PortfolioNode::new(UniqueId::of("DbNode", "1"), "Root")
            .with_child(equities)
            .with_position(position("1", &swap)),
    )
}

fn functions() -> Vec<DeclaredFunction> {
    let pv_output = DeclaredOutput {
        value_name: "PresentValue".to_string(),
        properties: ValueProperties::new().with_any("Currency"),
    };
    vec![
        DeclaredFunction::new("EquityPV", ComputationTargetType::Position, [pv_output.clone()])
            .for_security_type("EQUITY")
            .with_input(DeclaredInput::on("MarketPrice", InputTarget::Security)),
        DeclaredFunction::new("SwapPV", ComputationTargetType::Position, [pv_output.clone()])
            .for_security_type("SWAP")
            .with_input(
                DeclaredInput::on(
                    "YieldCurve",
                    InputTarget::Primitive {
                        scheme: "CurveName".to_string(),
                        value: "FUNDING".to_string(),
                    },
                )
                .inheriting("Currency"),
            ),
        DeclaredFunction::new("Curve", ComputationTargetType::Primitive, [DeclaredOutput {
            value_name: "YieldCurve".to_string(),
            properties: ValueProperties::new().with_any("Currency"),
        }])
        .with_input(DeclaredInput::same("YieldCurveMarketData").inheriting("Currency")),
        DeclaredFunction::new("Summing", ComputationTargetType::PortfolioNode, [pv_output])
            .with_input(DeclaredInput::on("PresentValue", InputTarget::Children).inheriting("Currency")),
    ]
}

fn context(
    functions: Vec<DeclaredFunction>,
    market_data: Arc<dyn MarketDataAvailabilityProvider>,
    portfolio: &Portfolio,
) -> ResolutionContext {
    let repository: FunctionRepository = functions.into_iter().collect();
    let targets = MapTargetResolver::new();
    targets.add_portfolio(portfolio);
    ResolutionContext {
        resolver: Arc::new(CompiledFunctionResolver::new(
            &repository,
            &SimpleResolutionRuleTransform::new(),
        )),
        market_data,
        targets: Arc::new(targets),
    }
}

fn market_data() -> Arc<dyn MarketDataAvailabilityProvider> {
    Arc::new(ValueNameMarketDataAvailabilityProvider::new([
        "MarketPrice",
        "YieldCurveMarketData",
    ]))
}

fn usd_pv(target: ComputationTargetSpecification) -> ValueRequirement {
    ValueRequirement::new(
        "PresentValue",
        target,
        ValueProperties::new().with("Currency", ["USD"]),
    )
}

fn build(context: ResolutionContext, requirements: Vec<ValueRequirement>) -> DependencyGraph {
    let builder = DependencyGraphBuilder::new("Default", context, CancellationToken::new());
    builder.add_targets(requirements);
    builder.into_dependency_graph().unwrap()
}

fn assert_well_formed(graph: &DependencyGraph) {
    assert!(graph.is_acyclic());
    for node in graph.nodes() {
        for input in node.input_values() {
            assert!(
                graph.producer_of(input).is_some(),
                "input {} of {} has no producer",
                input,
                node.function_id()
            );
        }
    }
    for specification in graph.terminal_outputs().keys() {
        assert!(graph.producer_of(specification).is_some());
    }
}

// ============================================================================
// Portfolio Aggregation Tests
// ============================================================================

/// Root aggregation pulls in every position below it.
#[test]
fn test_root_aggregate_resolves_whole_tree() {
    let portfolio = portfolio();
    let graph = build(
        context(functions(), market_data(), &portfolio),
        vec![usd_pv(ComputationTargetSpecification::portfolio_node(UniqueId::of("DbNode", "1")))],
    );
    assert_well_formed(&graph);
    assert!(graph.missing_requirements().is_empty());

    let mut ids: Vec<&str> = graph.nodes().iter().map(|n| n.function_id()).collect();
    ids.sort_unstable();
    assert_eq!(
        ids,
        vec![
            "Curve",
            "EquityPV",
            "EquityPV",
            "MarketDataSourcingFunction",
            "MarketDataSourcingFunction",
            "MarketDataSourcingFunction",
            "Summing",
            "Summing",
            "SwapPV",
        ]
    );
    assert_eq!(graph.market_data_requirements().len(), 3);
}

/// Currency constraints flow down through aggregation into the curve inputs.
#[test]
fn test_constraints_inherited_through_levels() {
    let portfolio = portfolio();
    let graph = build(
        context(functions(), market_data(), &portfolio),
        vec![usd_pv(ComputationTargetSpecification::portfolio_node(UniqueId::of("DbNode", "1")))],
    );
    let curve_data = graph
        .market_data_requirements()
        .into_iter()
        .find(|s| s.value_name == "YieldCurveMarketData")
        .unwrap();
    assert_eq!(curve_data.properties.value_of("Currency"), Some("USD"));

    for node in graph.nodes().iter().filter(|n| n.function_id() == "EquityPV") {
        for output in node.output_values() {
            assert_eq!(output.properties.value_of("Currency"), Some("USD"));
        }
    }
}

/// Two currencies on the same target produce distinct nodes sharing market prices.
#[test]
fn test_distinct_constraints_share_market_data() {
    let portfolio = portfolio();
    let pos = ComputationTargetSpecification::position(UniqueId::of("DbPos", "2"));
    let eur = ValueRequirement::new(
        "PresentValue",
        pos.clone(),
        ValueProperties::new().with("Currency", ["EUR"]),
    );
    let graph = build(
        context(functions(), market_data(), &portfolio),
        vec![usd_pv(pos), eur],
    );
    assert_well_formed(&graph);
    assert_eq!(graph.terminal_outputs().len(), 2);
    assert_eq!(graph.market_data_requirements().len(), 1);
    // one invocation with identical inputs produces both currencies
    assert_eq!(graph.nodes().iter().filter(|n| n.function_id() == "EquityPV").count(), 1);
}

/// Security type filtering leaves positions without a matching function unresolved.
#[test]
fn test_unmatched_security_type_reported() {
    let portfolio = portfolio();
    let only_equities: Vec<DeclaredFunction> = functions()
        .into_iter()
        .filter(|f| f.id != "SwapPV")
        .collect();
    let swap = usd_pv(ComputationTargetSpecification::position(UniqueId::of("DbPos", "1")));
    let root = usd_pv(ComputationTargetSpecification::portfolio_node(UniqueId::of("DbNode", "1")));
    let equities = usd_pv(ComputationTargetSpecification::portfolio_node(UniqueId::of("DbNode", "2")));

    let builder = DependencyGraphBuilder::new(
        "Default",
        context(only_equities, market_data(), &portfolio),
        CancellationToken::new(),
    );
    builder.add_targets([swap.clone(), root.clone(), equities.clone()]);
    builder.wait_for_dependency_graph_build().unwrap();

    let unresolved = builder.unresolved_requirements();
    assert!(unresolved.contains(&swap));
    assert!(unresolved.contains(&root));
    assert!(!unresolved.contains(&equities));
    assert!(builder.value_requirement_mapping().contains_key(&equities));

    let graph = builder.into_dependency_graph().unwrap();
    assert_well_formed(&graph);
    assert_eq!(graph.nodes().iter().filter(|n| n.function_id() == "Summing").count(), 1);
}

/// Explicit availability overrides computing the value.
#[test]
fn test_fixed_market_data_replaces_function() {
    let portfolio = portfolio();
    let curve_target = ComputationTargetSpecification::primitive(UniqueId::of("CurveName", "FUNDING"));
    let market_data = FixedMarketDataAvailabilityProvider::new().with_properties(
        "YieldCurve",
        curve_target,
        ValueProperties::new().with_any("Currency"),
    );
    let graph = build(
        context(functions(), Arc::new(market_data), &portfolio),
        vec![usd_pv(ComputationTargetSpecification::position(UniqueId::of("DbPos", "1")))],
    );
    assert_well_formed(&graph);
    let ids: BTreeSet<&str> = graph.nodes().iter().map(|n| n.function_id()).collect();
    assert!(!ids.contains("Curve"));
    assert_eq!(graph.size(), 2);
}

// ============================================================================
// Determinism Tests
// ============================================================================

fn describe(graph: &DependencyGraph) -> Vec<String> {
    graph
        .nodes()
        .iter()
        .map(|n| {
            let outputs: Vec<String> = n.output_values().iter().map(ToString::to_string).collect();
            format!("{} {} {:?}", n.function_id(), n.target(), outputs)
        })
        .collect()
}

/// The same inputs in the same order yield identical graphs.
#[test]
fn test_repeated_builds_identical() {
    let portfolio = portfolio();
    let requirements = vec![
        usd_pv(ComputationTargetSpecification::portfolio_node(UniqueId::of("DbNode", "1"))),
        usd_pv(ComputationTargetSpecification::position(UniqueId::of("DbPos", "3"))),
    ];
    let first = build(context(functions(), market_data(), &portfolio), requirements.clone());
    let second = build(context(functions(), market_data(), &portfolio), requirements);
    assert_eq!(describe(&first), describe(&second));
}

/// Background resolution on a pool gives the same node set as inline resolution.
#[test]
fn test_pool_and_inline_agree() {
    let portfolio = portfolio();
    let requirements: Vec<ValueRequirement> = ["1", "2", "3"]
        .iter()
        .map(|id| usd_pv(ComputationTargetSpecification::position(UniqueId::of("DbPos", *id))))
        .collect();

    let inline = build(context(functions(), market_data(), &portfolio), requirements.clone());

    let pool = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap());
    let builder = DependencyGraphBuilder::new(
        "Default",
        context(functions(), market_data(), &portfolio),
        CancellationToken::new(),
    );
    builder.start(pool);
    builder.add_targets(requirements);
    let pooled = builder.into_dependency_graph().unwrap();

    let mut a = describe(&inline);
    let mut b = describe(&pooled);
    a.sort();
    b.sort();
    assert_eq!(a, b);
}

// ============================================================================
// Property-Based Tests
// ============================================================================

fn arbitrary_functions() -> impl Strategy<Value = Vec<(usize, Vec<usize>, i32)>> {
    // (output index, input indices, priority) over a small value-name alphabet
    prop::collection::vec(
        (0usize..6, prop::collection::vec(0usize..8, 0..3), -2i32..3),
        1..10,
    )
}

proptest! {
    /// Whatever the function set, built graphs are acyclic and every input is produced.
    #[test]
    fn prop_graphs_acyclic_and_closed(specs in arbitrary_functions(), requested in prop::collection::vec(0usize..6, 1..4)) {
        let functions: Vec<DeclaredFunction> = specs
            .iter()
            .enumerate()
            .map(|(i, (output, inputs, priority))| {
                let mut f = DeclaredFunction::new(
                    format!("F{}", i),
                    ComputationTargetType::Primitive,
                    [DeclaredOutput::named(format!("V{}", output))],
                )
                .with_priority(*priority);
                for input in inputs {
                    f = f.with_input(DeclaredInput::same(format!("V{}", input)));
                }
                f
            })
            .collect();
        let target = ComputationTargetSpecification::primitive(UniqueId::of("Test", "T"));
        // V6 and V7 only exist as market data
        let market_data = ValueNameMarketDataAvailabilityProvider::new(["V6", "V7"]);
        let requirements: Vec<ValueRequirement> = requested
            .iter()
            .map(|r| ValueRequirement::unconstrained(format!("V{}", r), target.clone()))
            .collect();

        let graph = build(context(functions, Arc::new(market_data), &portfolio()), requirements.clone());

        prop_assert!(graph.is_acyclic());
        for node in graph.nodes() {
            for input in node.input_values() {
                prop_assert!(graph.producer_of(input).is_some());
            }
        }
        let resolved: usize = graph.terminal_outputs().values().map(BTreeSet::len).sum();
        let distinct: BTreeSet<&ValueRequirement> = requirements.iter().collect();
        prop_assert_eq!(resolved + graph.missing_requirements().len(), distinct.len());
    }
}
