//! Portfolio resolution and portfolio-derived requirements.
//!
//! The portfolio is resolved once per compile call, including every security
//! link, and only when some output actually needs it. Requirements are then
//! generated per configuration by a parallel walk of the tree:
//!
//! - every node gets the configuration's [`AGGREGATE_ONLY`] requirements plus
//!   the requirements of each security type held anywhere beneath it
//! - every position gets the requirements of its own security type
//! - every trade gets the requirements of its own security's type when trade
//!   output is on, falling back to the position's type for unlinked trades
//!
//! Security types without configured requirements contribute nothing.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info};
use view_core::position::{PortfolioNode, Position};
use view_core::{ComputationTargetSpecification, ComputationTargetType, UniqueId, ValueRequirement};

use crate::config::GraphBuildMode;
use crate::context::{ConfigurationContext, ViewCompilationContext};
use crate::definition::{PortfolioRequirement, ResultModelDefinition, ViewDefinition, AGGREGATE_ONLY};
use crate::error::{CompilationError, Result};
use crate::security::SecurityLinkResolver;
use crate::traversal::{PortfolioNodeTraversalCallback, PortfolioNodeTraverser, SecurityTypeGatherer};

/// Resolves the view's portfolio and derives requirements from it.
pub struct PortfolioCompiler;

impl PortfolioCompiler {
    /// Returns true if the compile call needs the portfolio at all.
    ///
    /// That is the case when some configuration has a portfolio requirement
    /// that lands on an enabled target type, or when a specific requirement
    /// targets a node, position or trade.
    pub fn is_portfolio_output_required(
        view: &ViewDefinition,
        specific_target_types: &BTreeSet<ComputationTargetType>,
    ) -> bool {
        let result_model = &view.result_model;
        let portfolio_requirements = result_model.portfolio_outputs_enabled()
            && view
                .calculation_configurations
                .iter()
                .any(|configuration| configuration.has_enabled_portfolio_requirements(result_model));
        portfolio_requirements
            || specific_target_types.iter().any(|target_type| {
                matches!(
                    target_type,
                    ComputationTargetType::PortfolioNode
                        | ComputationTargetType::Position
                        | ComputationTargetType::Trade
                )
            })
    }

    /// Fetches the portfolio, resolves its securities and registers its targets.
    ///
    /// # Errors
    ///
    /// - `MissingPortfolio` when the view names no portfolio
    /// - `NotFound` when the position source cannot produce it
    /// - `BulkResolutionFailure` or `Interrupted` from security resolution
    pub fn resolve_portfolio(context: &mut ViewCompilationContext) -> Result<()> {
        let view_name = context.view().name.clone();
        let portfolio_id = context
            .view()
            .portfolio_id
            .clone()
            .ok_or_else(|| CompilationError::MissingPortfolio(view_name.clone()))?;
        let services = context.services().clone();

        let portfolio = services
            .positions
            .get_portfolio(&portfolio_id, &context.version_correction())
            .map_err(|source| CompilationError::NotFound {
                view: view_name.clone(),
                source,
            })?;
        context.check_cancelled("portfolio resolution")?;

        let resolver = SecurityLinkResolver::new(
            Arc::clone(&services.executor),
            Arc::clone(&services.securities),
            context.version_correction(),
            context.cancel().clone(),
        );
        let portfolio = resolver.resolve_portfolio_securities(&portfolio)?;
        if !portfolio.is_fully_resolved() {
            return Err(CompilationError::InvalidState(format!(
                "portfolio {} of view '{}' still has unresolved securities",
                portfolio.unique_id, view_name
            )));
        }
        info!(
            view = %view_name,
            portfolio = %portfolio.unique_id,
            positions = portfolio.root_node.position_count(),
            "Resolved portfolio"
        );
        context.set_portfolio(Arc::new(portfolio));
        Ok(())
    }

    /// Feeds portfolio requirements to every configuration's builder.
    ///
    /// Configurations are handled in declaration order. In sequential mode
    /// each configuration's build is waited for before the next starts; in
    /// striped mode the builder is waited for after every stripe. Does nothing
    /// when no portfolio was resolved.
    ///
    /// # Errors
    ///
    /// `GraphBuild` when a wait fails, `Interrupted` on cancellation.
    pub fn add_portfolio_requirements(context: &ViewCompilationContext) -> Result<()> {
        let Some(portfolio) = context.portfolio() else {
            return Ok(());
        };
        let config = &context.services().config;
        let traverser = PortfolioNodeTraverser::parallel(Arc::clone(&context.services().executor));

        let gatherer = SecurityTypeGatherer::new();
        traverser.traverse(&portfolio.root_node, &gatherer);
        let node_types = gatherer.into_types();

        let result_model = context.view().result_model;
        for configuration in context.configurations() {
            context.check_cancelled("portfolio requirement compilation")?;
            if !configuration
                .configuration()
                .has_enabled_portfolio_requirements(&result_model)
            {
                continue;
            }
            let before = configuration.requirements().len();
            if config.striped_portfolio_requirements {
                for stripe in stripes(configuration) {
                    let callback = RequirementGatherer {
                        configuration,
                        result_model,
                        node_types: &node_types,
                        stripe: Some(&stripe),
                    };
                    traverser.traverse(&portfolio.root_node, &callback);
                    debug!(
                        configuration = configuration.name(),
                        value_name = %stripe.value_name,
                        "Waiting for requirement stripe"
                    );
                    wait(context, configuration)?;
                }
            } else {
                let callback = RequirementGatherer {
                    configuration,
                    result_model,
                    node_types: &node_types,
                    stripe: None,
                };
                traverser.traverse(&portfolio.root_node, &callback);
                if config.graph_build_mode == GraphBuildMode::Sequential {
                    wait(context, configuration)?;
                }
            }
            debug!(
                configuration = configuration.name(),
                added = configuration.requirements().len() - before,
                "Added portfolio requirements"
            );
        }
        Ok(())
    }
}

fn wait(context: &ViewCompilationContext, configuration: &ConfigurationContext) -> Result<()> {
    configuration
        .wait_for_graph_build()
        .map_err(|source| CompilationError::GraphBuild {
            view: context.view().name.clone(),
            configuration: configuration.name().to_string(),
            source,
        })
}

/// Distinct `(value name, constraints)` pairs across every security type.
fn stripes(configuration: &ConfigurationContext) -> BTreeSet<PortfolioRequirement> {
    configuration
        .configuration()
        .all_portfolio_requirements()
        .into_iter()
        .map(|(_, requirement)| requirement.clone())
        .collect()
}

struct RequirementGatherer<'a> {
    configuration: &'a ConfigurationContext,
    result_model: ResultModelDefinition,
    node_types: &'a HashMap<UniqueId, BTreeSet<String>>,
    stripe: Option<&'a PortfolioRequirement>,
}

impl RequirementGatherer<'_> {
    fn add_for_type(&self, security_type: &str, target: &ComputationTargetSpecification) {
        let Some(requirements) = self
            .configuration
            .configuration()
            .portfolio_requirements_for(security_type)
        else {
            return;
        };
        for requirement in requirements {
            if self.stripe.is_some_and(|stripe| stripe != requirement) {
                continue;
            }
            self.configuration.add_requirement(ValueRequirement::new(
                requirement.value_name.clone(),
                target.clone(),
                requirement.constraints.clone(),
            ));
        }
    }
}

impl PortfolioNodeTraversalCallback for RequirementGatherer<'_> {
    fn pre_order_node(&self, node: &PortfolioNode) {
        if !self.result_model.aggregate_position.is_enabled() {
            return;
        }
        let target = ComputationTargetSpecification::portfolio_node(node.unique_id.clone());
        self.add_for_type(AGGREGATE_ONLY, &target);
        if let Some(types) = self.node_types.get(&node.unique_id) {
            for security_type in types {
                self.add_for_type(security_type, &target);
            }
        }
    }

    fn position(&self, _parent: &PortfolioNode, position: &Position) {
        if self.result_model.position.is_enabled() {
            if let Some(security_type) = position.security_type() {
                let target = ComputationTargetSpecification::position(position.unique_id.clone());
                self.add_for_type(security_type, &target);
            }
        }
        if self.result_model.trade.is_enabled() {
            for trade in &position.trades {
                let security_type = trade
                    .security()
                    .map(|security| security.security_type.as_str())
                    .or_else(|| position.security_type());
                if let Some(security_type) = security_type {
                    let target = ComputationTargetSpecification::trade(trade.unique_id.clone());
                    self.add_for_type(security_type, &target);
                }
            }
        }
    }
}
