//! Compile command implementation
//!
//! Compiles the view of a scenario file and prints the compiled artifact.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use view_compiler::{CompiledViewDefinitionWithGraphs, CompilerConfig, ViewDefinitionCompiler};
use view_core::VersionCorrection;

use crate::scenario::Scenario;
use crate::{CliError, Result};

/// Output format of the compile command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Box-drawn summary.
    Table,
    /// Pretty-printed JSON report.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            other => Err(CliError::InvalidArgument(format!(
                "Unknown format: {}. Supported: table, json",
                other
            ))),
        }
    }
}

/// Serializable summary of a compiled view.
#[derive(Debug, Serialize)]
pub struct CompilationReport {
    compilation_id: String,
    view: String,
    valuation_time: DateTime<Utc>,
    valid_from: Option<DateTime<Utc>>,
    valid_to: Option<DateTime<Utc>>,
    function_init_id: u64,
    compile_time_us: u64,
    portfolio: Option<String>,
    security_types: Vec<String>,
    market_data: Vec<String>,
    configurations: Vec<ConfigurationReport>,
}

#[derive(Debug, Serialize)]
struct ConfigurationReport {
    name: String,
    nodes: usize,
    terminal_outputs: Vec<String>,
    market_data: usize,
    unresolved: Vec<String>,
    failures: Vec<String>,
}

impl CompilationReport {
    /// Summarizes `compiled`.
    pub fn of(compiled: &CompiledViewDefinitionWithGraphs) -> Self {
        let configurations = compiled
            .compiled_calculation_configurations()
            .iter()
            .zip(compiled.dependency_graphs())
            .map(|(configuration, graph)| ConfigurationReport {
                name: configuration.name().to_string(),
                nodes: graph.size(),
                terminal_outputs: configuration
                    .terminal_outputs()
                    .keys()
                    .map(ToString::to_string)
                    .collect(),
                market_data: configuration.market_data_requirements().len(),
                unresolved: configuration
                    .unresolved_requirements()
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
                failures: configuration
                    .failures()
                    .iter()
                    .map(|(failure, count)| format!("{} (x{})", failure, count))
                    .collect(),
            })
            .collect();
        Self {
            compilation_id: compiled.compilation_id().to_string(),
            view: compiled.view_definition().name.clone(),
            valuation_time: compiled.valuation_time(),
            valid_from: compiled.valid_from(),
            valid_to: compiled.valid_to(),
            function_init_id: compiled.function_init_id(),
            compile_time_us: compiled.compile_duration().as_micros() as u64,
            portfolio: compiled.portfolio().map(|p| p.unique_id.to_string()),
            security_types: compiled.security_types().iter().cloned().collect(),
            market_data: compiled
                .market_data_requirements()
                .iter()
                .map(ToString::to_string)
                .collect(),
            configurations,
        }
    }

    /// Number of requirements left unresolved across configurations.
    pub fn unresolved_count(&self) -> usize {
        self.configurations.iter().map(|c| c.unresolved.len()).sum()
    }

    fn render_table(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("View:          {}\n", self.view));
        out.push_str(&format!("Compilation:   {}\n", self.compilation_id));
        out.push_str(&format!("Valuation:     {}\n", self.valuation_time));
        out.push_str(&format!(
            "Valid:         {} .. {}\n",
            self.valid_from.map_or("-inf".to_string(), |t| t.to_string()),
            self.valid_to.map_or("+inf".to_string(), |t| t.to_string())
        ));
        out.push_str(&format!(
            "Compile time:  {:.3} ms\n",
            self.compile_time_us as f64 / 1000.0
        ));
        out.push_str(&format!(
            "Portfolio:     {}\n",
            self.portfolio.as_deref().unwrap_or("(none)")
        ));
        out.push_str("\n┌──────────────────────┬────────┬──────────┬─────────────┬────────────┐\n");
        out.push_str("│ Configuration        │ Nodes  │ Outputs  │ Market data │ Unresolved │\n");
        out.push_str("├──────────────────────┼────────┼──────────┼─────────────┼────────────┤\n");
        for c in &self.configurations {
            out.push_str(&format!(
                "│ {:<20} │ {:>6} │ {:>8} │ {:>11} │ {:>10} │\n",
                c.name,
                c.nodes,
                c.terminal_outputs.len(),
                c.market_data,
                c.unresolved.len()
            ));
        }
        out.push_str("└──────────────────────┴────────┴──────────┴─────────────┴────────────┘\n");
        for c in self.configurations.iter().filter(|c| !c.unresolved.is_empty()) {
            out.push_str(&format!("\nUnresolved in {}:\n", c.name));
            for requirement in &c.unresolved {
                out.push_str(&format!("  {}\n", requirement));
            }
        }
        if !self.market_data.is_empty() {
            out.push_str("\nMarket data:\n");
            for spec in &self.market_data {
                out.push_str(&format!("  {}\n", spec));
            }
        }
        out
    }

    /// Renders the report in `format`.
    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Table => Ok(self.render_table()),
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
        }
    }
}

/// Parses an RFC 3339 valuation time.
pub fn parse_valuation_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CliError::InvalidArgument(format!("Invalid valuation time '{}': {}", value, e)))
}

/// Compiles the scenario's view and returns the report.
///
/// The valuation time comes from the command line, then the scenario, then
/// the clock.
pub fn compile_scenario(
    scenario: &Scenario,
    valuation_time: Option<DateTime<Utc>>,
    config: CompilerConfig,
) -> Result<CompilationReport> {
    let valuation_time = valuation_time
        .or(scenario.valuation_time)
        .unwrap_or_else(Utc::now);
    let services = scenario.services(config)?;
    let compiled = ViewDefinitionCompiler::compile(
        &scenario.view,
        &services,
        valuation_time,
        VersionCorrection::LATEST,
    )?;
    Ok(CompilationReport::of(&compiled))
}

/// Run the compile command
pub fn run(
    scenario: &Path,
    valuation_time: Option<&str>,
    format: &str,
    config: CompilerConfig,
) -> Result<()> {
    let format: OutputFormat = format.parse()?;
    let valuation_time = valuation_time.map(parse_valuation_time).transpose()?;
    info!(scenario = %scenario.display(), mode = %config.graph_build_mode, "Compiling scenario");

    let scenario = Scenario::from_file(scenario)?;
    let report = compile_scenario(&scenario, valuation_time, config)?;
    println!("{}", report.render(format)?);

    info!(
        unresolved = report.unresolved_count(),
        "Compilation complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use view_compiler::GraphBuildMode;

    const SWAP_BOOK: &str = include_str!("../../scenarios/swap_book.toml");

    fn config(mode: GraphBuildMode) -> CompilerConfig {
        CompilerConfig {
            graph_build_mode: mode,
            worker_threads: Some(2),
            ..CompilerConfig::default()
        }
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("TABLE".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("csv".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_valuation_time_parsing() {
        let t = parse_valuation_time("2024-06-28T19:00:00+02:00").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-06-28T17:00:00+00:00");
        assert!(parse_valuation_time("yesterday").is_err());
    }

    #[test]
    fn test_compile_bundled_scenario() {
        let scenario = Scenario::from_toml_str(SWAP_BOOK).unwrap();
        let report = compile_scenario(&scenario, None, config(GraphBuildMode::Sequential)).unwrap();

        assert_eq!(report.view, "Swap book");
        assert_eq!(report.portfolio.as_deref(), Some("DbPrt~1"));
        assert_eq!(report.configurations.len(), 2);
        let default = &report.configurations[0];
        assert!(default.unresolved.is_empty());
        // three positions, two nodes and the FX rate
        assert_eq!(default.terminal_outputs.len(), 6);
        // the swap and its parent fail once the curve is excluded
        let no_curve = &report.configurations[1];
        assert_eq!(no_curve.unresolved.len(), 2);
        assert!(!no_curve.failures.is_empty());
    }

    #[test]
    fn test_parallel_report_matches_sequential() {
        let scenario = Scenario::from_toml_str(SWAP_BOOK).unwrap();
        let sequential = compile_scenario(&scenario, None, config(GraphBuildMode::Sequential)).unwrap();
        let parallel = compile_scenario(&scenario, None, config(GraphBuildMode::Parallel)).unwrap();
        for (s, p) in sequential.configurations.iter().zip(&parallel.configurations) {
            assert_eq!(s.nodes, p.nodes);
            assert_eq!(s.terminal_outputs, p.terminal_outputs);
            assert_eq!(s.unresolved, p.unresolved);
        }
        assert_eq!(sequential.market_data, parallel.market_data);
    }

    #[test]
    fn test_render_formats() {
        let scenario = Scenario::from_toml_str(SWAP_BOOK).unwrap();
        let report = compile_scenario(&scenario, None, config(GraphBuildMode::Sequential)).unwrap();

        let table = report.render(OutputFormat::Table).unwrap();
        assert!(table.contains("Swap book"));
        assert!(table.contains("Compile time:"));
        assert!(table.contains("Unresolved in NoCurve"));

        let json: serde_json::Value =
            serde_json::from_str(&report.render(OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["view"], "Swap book");
        assert!(json["compile_time_us"].is_u64());
        assert_eq!(json["configurations"].as_array().unwrap().len(), 2);
    }
}
