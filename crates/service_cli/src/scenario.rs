//! Scenario files.
//!
//! A scenario is a TOML document holding everything one compile call needs:
//! the view definition, the portfolios and securities behind the position and
//! security sources, the declared functions and the value names available as
//! market data.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use view_compiler::{CompilerConfig, ViewCompilationServices, ViewDefinition};
use view_core::position::{InMemoryPositionSource, InMemorySecuritySource, Portfolio, Security};
use view_depgraph::{DeclaredFunction, ValueNameMarketDataAvailabilityProvider};

use crate::{CliError, Result};

/// Contents of a scenario file.
#[derive(Debug, Deserialize)]
pub struct Scenario {
    /// Valuation time used when none is given on the command line.
    #[serde(default)]
    pub valuation_time: Option<DateTime<Utc>>,
    /// View to compile.
    pub view: ViewDefinition,
    /// Portfolios served by the position source.
    #[serde(default)]
    pub portfolios: Vec<Portfolio>,
    /// Securities served by the security source.
    #[serde(default)]
    pub securities: Vec<Security>,
    /// Function declarations.
    #[serde(default)]
    pub functions: Vec<DeclaredFunction>,
    /// Value names available as market data on any target.
    #[serde(default)]
    pub market_data: Vec<String>,
}

impl Scenario {
    /// Reads and parses a scenario file.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CliError::FileNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|err| match err {
            CliError::InvalidScenario { message, .. } => CliError::InvalidScenario {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Parses scenario TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CliError::InvalidScenario {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })
    }

    /// Builds in-memory compilation services for the scenario.
    pub fn services(&self, config: CompilerConfig) -> Result<ViewCompilationServices> {
        let positions = InMemoryPositionSource::new();
        for portfolio in &self.portfolios {
            positions.add_portfolio(portfolio.clone());
        }
        let executor = config.build_executor()?;
        Ok(ViewCompilationServices::new(
            Arc::new(ValueNameMarketDataAvailabilityProvider::new(
                self.market_data.iter().cloned(),
            )),
            Arc::new(self.functions.iter().cloned().collect()),
            Arc::new(positions),
            Arc::new(InMemorySecuritySource::with_securities(
                self.securities.iter().cloned(),
            )),
            executor,
        )
        .with_config(config))
    }
}
