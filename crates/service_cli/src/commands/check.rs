//! Check command implementation
//!
//! Validates a scenario file without building any graph: the view definition,
//! the portfolio reference, every security link and the function declarations.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{info, warn};
use view_core::position::{PortfolioNode, SecurityLink};

use crate::scenario::Scenario;
use crate::{CliError, Result};

/// Problems found in a scenario; empty when it is compilable.
pub fn check_scenario(scenario: &Scenario) -> Vec<String> {
    let mut problems = Vec::new();

    if let Err(err) = scenario.view.validate() {
        problems.push(err.to_string());
    }

    let mut ids = BTreeSet::new();
    for function in &scenario.functions {
        if !ids.insert(function.id.as_str()) {
            problems.push(format!("duplicate function '{}'", function.id));
        }
        if function.outputs.is_empty() {
            problems.push(format!("function '{}' declares no outputs", function.id));
        }
    }

    if let Some(portfolio_id) = &scenario.view.portfolio_id {
        match scenario
            .portfolios
            .iter()
            .find(|p| p.unique_id.object_id() == portfolio_id.object_id())
        {
            Some(portfolio) => {
                let mut links = Vec::new();
                collect_links(&portfolio.root_node, &mut links);
                for link in links {
                    if !resolvable(scenario, link) {
                        problems.push(format!("security link {} does not resolve", link));
                    }
                }
            }
            None => problems.push(format!("portfolio {} is not in the scenario", portfolio_id)),
        }
    }

    problems
}

fn collect_links<'a>(node: &'a PortfolioNode, links: &mut Vec<&'a SecurityLink>) {
    for position in &node.positions {
        links.push(&position.security_link);
        links.extend(position.trades.iter().map(|t| &t.security_link));
    }
    for child in &node.child_nodes {
        collect_links(child, links);
    }
}

fn resolvable(scenario: &Scenario, link: &SecurityLink) -> bool {
    scenario.securities.iter().any(|security| match link.object_id() {
        Some(object_id) => security.unique_id.object_id() == *object_id,
        None => !link.external_id().is_empty() && security.external_ids.contains_any(link.external_id()),
    })
}

/// Run the check command
pub fn run(scenario: &Path) -> Result<()> {
    info!(scenario = %scenario.display(), "Checking scenario");
    let parsed = Scenario::from_file(scenario)?;
    let problems = check_scenario(&parsed);
    if problems.is_empty() {
        println!("{}: OK", scenario.display());
        return Ok(());
    }
    for problem in &problems {
        warn!(problem = %problem, "Scenario problem");
        println!("  {}", problem);
    }
    Err(CliError::InvalidScenario {
        path: scenario.display().to_string(),
        message: format!("{} problem(s) found", problems.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWAP_BOOK: &str = include_str!("../../scenarios/swap_book.toml");

    #[test]
    fn test_bundled_scenario_is_clean() {
        let scenario = Scenario::from_toml_str(SWAP_BOOK).unwrap();
        assert!(check_scenario(&scenario).is_empty());
    }

    #[test]
    fn test_reports_missing_security_and_portfolio() {
        let mut scenario = Scenario::from_toml_str(SWAP_BOOK).unwrap();
        scenario.securities.retain(|s| s.name != "IBM");
        let problems = check_scenario(&scenario);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("TICKER~IBM"));

        scenario.portfolios.clear();
        let problems = check_scenario(&scenario);
        assert!(problems.iter().any(|p| p.contains("DbPrt~1")));
    }

    #[test]
    fn test_reports_duplicate_functions_and_configurations() {
        let mut scenario = Scenario::from_toml_str(SWAP_BOOK).unwrap();
        let first = scenario.functions[0].clone();
        scenario.functions.push(first);
        let copy = scenario.view.calculation_configurations[0].clone();
        scenario.view.calculation_configurations.push(copy);
        let problems = check_scenario(&scenario);
        assert_eq!(problems.len(), 2);
    }
}
