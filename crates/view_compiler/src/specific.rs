//! Explicitly declared requirements.

use std::collections::BTreeSet;

use tracing::{debug, trace};
use view_core::ComputationTargetType;

use crate::context::ViewCompilationContext;

/// Queues every configuration's specific requirements with its builder.
pub struct SpecificRequirementsCompiler;

impl SpecificRequirementsCompiler {
    /// Queues the specific requirements whose target type output is enabled.
    ///
    /// Returns the target types of the queued requirements. A PORTFOLIO_NODE,
    /// POSITION or TRADE among them forces portfolio resolution.
    pub fn execute(context: &ViewCompilationContext) -> BTreeSet<ComputationTargetType> {
        let result_model = &context.view().result_model;
        let mut target_types = BTreeSet::new();
        for configuration in context.configurations() {
            let mut queued = 0usize;
            for requirement in &configuration.configuration().specific_requirements {
                let target_type = requirement.target.target_type;
                if !result_model.output_mode(target_type).is_enabled() {
                    trace!(
                        configuration = configuration.name(),
                        requirement = %requirement,
                        "Skipping specific requirement with suppressed output"
                    );
                    continue;
                }
                configuration.add_requirement(requirement.clone());
                target_types.insert(target_type);
                queued += 1;
            }
            debug!(
                configuration = configuration.name(),
                queued,
                "Queued specific requirements"
            );
        }
        target_types
    }
}
