use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use bitcoin::Network as BitcoinNetwork;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::cli::{CliArgs, infer_network, parse_network};
use crate::coins::SelectionStrategy;
use crate::distribution::DistributionPolicy;
use crate::error::AppError;

const ENV_PREFIX: &str = "FUND_DISTRIBUTOR";

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub funding_file: PathBuf,
    pub output_file: PathBuf,
    pub prefix: String,
    /// Comma-separated source addresses.
    pub sources: String,
    pub strategy: SelectionStrategy,
    pub network: Option<String>,
    pub debug: bool,
    pub chunk_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 10617,
            user: "user".to_string(),
            password: "password".to_string(),
            funding_file: PathBuf::from("funding.csv"),
            output_file: PathBuf::from("accounts.csv"),
            prefix: "fund".to_string(),
            sources: String::new(),
            strategy: SelectionStrategy::Oldest,
            network: None,
            debug: false,
            chunk_delay_ms: 200,
        }
    }
}

// Keeps the RPC password out of logs.
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("funding_file", &self.funding_file)
            .field("output_file", &self.output_file)
            .field("prefix", &self.prefix)
            .field("sources", &self.sources)
            .field("strategy", &self.strategy)
            .field("network", &self.network)
            .field("debug", &self.debug)
            .field("chunk_delay_ms", &self.chunk_delay_ms)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Defaults, then the config file, then `FUND_DISTRIBUTOR_*` variables, then the command line.
    pub fn load(args: &CliArgs) -> Result<Self, AppError> {
        let mut builder = Config::builder();
        if let Some(path) = &args.config {
            builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Ini).required(true));
        }
        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX));
        let mut settings: Settings = builder.build()?.try_deserialize()?;
        settings.apply_overrides(args);
        settings.validate()?;
        Ok(settings)
    }

    fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(host) = &args.host {
            self.host = host.clone();
        }
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(user) = &args.user {
            self.user = user.clone();
        }
        if let Some(password) = &args.password {
            self.password = password.clone();
        }
        if let Some(funding_file) = &args.funding_file {
            self.funding_file = funding_file.clone();
        }
        if let Some(output_file) = &args.output_file {
            self.output_file = output_file.clone();
        }
        if let Some(prefix) = &args.prefix {
            self.prefix = prefix.clone();
        }
        if let Some(sources) = &args.sources {
            self.sources = sources.clone();
        }
        if let Some(strategy) = args.strategy {
            self.strategy = strategy;
        }
        if let Some(network) = &args.network {
            self.network = Some(network.clone());
        }
        if args.debug {
            self.debug = true;
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.source_addresses().is_empty() {
            return Err(AppError::InputValidation("at least one source address is required".to_string()));
        }
        if self.prefix.trim().is_empty() {
            return Err(AppError::InputValidation("account name prefix must not be empty".to_string()));
        }
        self.network()?;
        Ok(())
    }

    /// Configured sources in order, each listed once. The first one receives change.
    pub fn source_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = Vec::new();
        for address in self.sources.split(',').map(str::trim) {
            if !address.is_empty() && !addresses.iter().any(|known| known == address) {
                addresses.push(address.to_string());
            }
        }
        addresses
    }

    pub fn network(&self) -> Result<BitcoinNetwork, AppError> {
        match &self.network {
            Some(name) => parse_network(name),
            None => Ok(infer_network(self.port)),
        }
    }

    pub fn policy(&self) -> DistributionPolicy {
        DistributionPolicy {
            chunk_delay: Duration::from_millis(self.chunk_delay_ms),
            ..DistributionPolicy::default()
        }
    }
}
