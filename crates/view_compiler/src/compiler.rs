//! The view definition compiler.
//!
//! A compile call runs through [`CompilationState`] phases in order:
//!
//! 1. specific requirements are queued and the portfolio is resolved if any
//!    output needs it
//! 2. portfolio requirements are fed to the builders
//! 3. every configuration's graph is completed, sequentially or in parallel
//! 4. graphs are assembled into a [`CompiledViewDefinitionWithGraphs`]
//!
//! Any failure aborts the call; there is no partially compiled result.

use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use view_core::{CancellationToken, VersionCorrection};

use crate::bulk::{bulk_resolve, BulkError};
use crate::compiled::{AssemblyInput, CompiledViewDefinitionWithGraphs};
use crate::config::GraphBuildMode;
use crate::context::{BuiltConfiguration, CompilationState, ConfigurationContext, ViewCompilationContext};
use crate::definition::ViewDefinition;
use crate::error::{CompilationError, Result};
use crate::portfolio::PortfolioCompiler;
use crate::services::ViewCompilationServices;
use crate::specific::SpecificRequirementsCompiler;
use view_depgraph::BuildError;

/// Compiles view definitions into executable graphs.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use chrono::Utc;
/// use view_compiler::{ViewCalculationConfiguration, ViewCompilationServices, ViewDefinition, ViewDefinitionCompiler};
/// use view_core::position::{InMemoryPositionSource, InMemorySecuritySource};
/// use view_core::{ComputationTargetSpecification, UniqueId, ValueRequirement, VersionCorrection};
/// use view_depgraph::{FunctionRepository, ValueNameMarketDataAvailabilityProvider};
///
/// let services = ViewCompilationServices::new(
///     Arc::new(ValueNameMarketDataAvailabilityProvider::new(["SpotRate"])),
///     Arc::new(FunctionRepository::new()),
///     Arc::new(InMemoryPositionSource::new()),
///     Arc::new(InMemorySecuritySource::new()),
///     Arc::new(rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()),
/// );
/// let spot = ValueRequirement::unconstrained(
///     "SpotRate",
///     ComputationTargetSpecification::primitive(UniqueId::of("CurrencyPair", "EURUSD")),
/// );
/// let view = ViewDefinition::new("FX").with_calculation_configuration(
///     ViewCalculationConfiguration::new("Default").with_specific_requirement(spot),
/// );
///
/// let compiled =
///     ViewDefinitionCompiler::compile(&view, &services, Utc::now(), VersionCorrection::LATEST).unwrap();
/// assert_eq!(compiled.market_data_requirements().len(), 1);
/// assert!(compiled.portfolio().is_none());
/// ```
pub struct ViewDefinitionCompiler;

impl ViewDefinitionCompiler {
    /// Compiles `view` for `valuation_time`.
    ///
    /// # Errors
    ///
    /// See [`CompilationError`].
    pub fn compile(
        view: &ViewDefinition,
        services: &ViewCompilationServices,
        valuation_time: DateTime<Utc>,
        version_correction: VersionCorrection,
    ) -> Result<CompiledViewDefinitionWithGraphs> {
        Self::compile_with_cancellation(
            view,
            services,
            valuation_time,
            version_correction,
            &CancellationToken::new(),
        )
    }

    /// Compiles `view`, giving up with `Interrupted` once `cancel` fires.
    ///
    /// Every call, failed or not, is counted in the services'
    /// [`metrics`](ViewCompilationServices::metrics).
    ///
    /// # Errors
    ///
    /// See [`CompilationError`].
    pub fn compile_with_cancellation(
        view: &ViewDefinition,
        services: &ViewCompilationServices,
        valuation_time: DateTime<Utc>,
        version_correction: VersionCorrection,
        cancel: &CancellationToken,
    ) -> Result<CompiledViewDefinitionWithGraphs> {
        let started = Instant::now();
        services.metrics.record_start();
        let result = Self::compile_untimed(view, services, valuation_time, version_correction, cancel);
        let elapsed = started.elapsed();
        services.metrics.record_finish(elapsed, result.is_ok());
        match result {
            Ok(compiled) => {
                info!(
                    view = %view.name,
                    compilation_id = compiled.compilation_id(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "View definition compiled"
                );
                Ok(compiled.with_compile_duration(elapsed))
            }
            Err(err) => {
                warn!(
                    view = %view.name,
                    error = %err,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "View definition compilation failed"
                );
                Err(err)
            }
        }
    }

    fn compile_untimed(
        view: &ViewDefinition,
        services: &ViewCompilationServices,
        valuation_time: DateTime<Utc>,
        version_correction: VersionCorrection,
        cancel: &CancellationToken,
    ) -> Result<CompiledViewDefinitionWithGraphs> {
        view.validate()?;
        info!(
            view = %view.name,
            valuation_time = %valuation_time,
            version_correction = %version_correction,
            configurations = view.calculation_configurations.len(),
            mode = %services.config.graph_build_mode,
            "Compiling view definition"
        );

        let mut context = ViewCompilationContext::new(
            view.clone(),
            services.clone(),
            valuation_time,
            version_correction,
            cancel.clone(),
        );

        let specific_target_types = SpecificRequirementsCompiler::execute(&context);
        let portfolio_required =
            PortfolioCompiler::is_portfolio_output_required(view, &specific_target_types);
        context.set_specific_target_types(specific_target_types);
        if portfolio_required {
            PortfolioCompiler::resolve_portfolio(&mut context)?;
        } else {
            debug!(view = %view.name, "No portfolio outputs required");
        }
        context.check_cancelled("requirement gathering")?;
        context.advance(CompilationState::RequirementsGathered)?;

        context.advance(CompilationState::GraphsBuilding)?;
        PortfolioCompiler::add_portfolio_requirements(&context)?;
        let built = match services.config.graph_build_mode {
            GraphBuildMode::Sequential => build_sequential(&mut context)?,
            GraphBuildMode::Parallel => build_parallel(&mut context)?,
        };
        context.check_cancelled("graph building")?;
        context.advance(CompilationState::GraphsBuilt)?;

        let compiled = CompiledViewDefinitionWithGraphs::assemble(AssemblyInput {
            view: context.view().clone(),
            portfolio: context.portfolio().cloned(),
            valuation_time,
            version_correction,
            function_init_id: services.function_init_id(),
            configurations: built,
            targets: context.targets(),
            resolutions: context.targets().resolutions(),
        })?;
        context.advance(CompilationState::Assembled)?;

        debug!(
            view = %view.name,
            nodes = compiled.dependency_graphs().iter().map(|g| g.size()).sum::<usize>(),
            market_data = compiled.market_data_requirements().len(),
            validity = %compiled.validity(),
            "Assembled compiled view"
        );
        Ok(compiled)
    }
}

fn graph_build_error(view: &str, configuration: &str, source: BuildError) -> CompilationError {
    CompilationError::GraphBuild {
        view: view.to_string(),
        configuration: configuration.to_string(),
        source,
    }
}

/// Completes each configuration in declaration order on the calling thread.
fn build_sequential(context: &mut ViewCompilationContext) -> Result<Vec<BuiltConfiguration>> {
    let view = context.view().name.clone();
    let mut built = Vec::with_capacity(context.configurations().len());
    for configuration in context.take_configurations() {
        let name = configuration.name().to_string();
        debug!(view = %view, configuration = %name, "Building dependency graph");
        built.push(
            configuration
                .build()
                .map_err(|source| graph_build_error(&view, &name, source))?,
        );
    }
    Ok(built)
}

/// Completes every configuration at once, one pool task per configuration.
///
/// Builders share nothing mutable, so a failing configuration cannot affect
/// another's graph; the first failure fails the call.
fn build_parallel(context: &mut ViewCompilationContext) -> Result<Vec<BuiltConfiguration>> {
    let view = context.view().name.clone();
    let configurations = context.take_configurations();
    let names: Vec<String> = configurations
        .iter()
        .map(|configuration| configuration.name().to_string())
        .collect();
    debug!(view = %view, configurations = names.len(), "Building dependency graphs in parallel");
    bulk_resolve(
        &context.services().executor,
        configurations,
        context.cancel(),
        ConfigurationContext::build,
    )
    .map_err(|err| match err {
        BulkError::Failed { index, error } => graph_build_error(&view, &names[index], error),
        BulkError::Panicked { index, message } => graph_build_error(
            &view,
            &names[index],
            BuildError::Aborted {
                configuration: names[index].clone(),
                message,
            },
        ),
        BulkError::Interrupted => CompilationError::Interrupted("graph building".to_string()),
    })
}
