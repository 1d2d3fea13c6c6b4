use clap::Parser;
use std::path::PathBuf;
use bitcoin::Network as BitcoinNetwork;
use crate::coins::SelectionStrategy;
use crate::error::AppError;

/// Every option may also come from the config file; the command line wins.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Wallet RPC server host (default: localhost)
    #[clap(long, value_parser)]
    pub host: Option<String>,

    /// Wallet RPC server port (default: 10617)
    #[clap(short = 'P', long, value_parser)]
    pub port: Option<u16>,

    /// Wallet RPC user
    #[clap(short, long, value_parser)]
    pub user: Option<String>,

    /// Wallet RPC password
    #[clap(short, long, value_parser)]
    pub password: Option<String>,

    /// Funding plan: one `amount,accountCount` row per line
    #[clap(short, long, value_parser)]
    pub funding_file: Option<PathBuf>,

    /// Ledger CSV receiving the generated accounts
    #[clap(short, long, value_parser)]
    pub output_file: Option<PathBuf>,

    /// Prefix of generated account names
    #[clap(short = 'a', long, value_parser)]
    pub prefix: Option<String>,

    /// Comma-separated source addresses; the first also receives change
    #[clap(short, long, value_parser)]
    pub sources: Option<String>,

    /// Which unspent outputs to spend first
    #[clap(long, value_enum)]
    pub strategy: Option<SelectionStrategy>,

    /// Key network ("bitcoin", "testnet", "regtest"); inferred from the port when omitted
    #[clap(short, long, value_parser)]
    pub network: Option<String>,

    /// Enable debug logging
    #[clap(short, long)]
    pub debug: bool,

    /// Configuration file (key=value) to load options from
    #[clap(short, long, value_parser)]
    pub config: Option<PathBuf>,
}

pub fn parse_network(network_str: &str) -> Result<BitcoinNetwork, AppError> {
    match network_str.to_lowercase().as_str() {
        "bitcoin" | "mainnet" => Ok(BitcoinNetwork::Bitcoin),
        "testnet" => Ok(BitcoinNetwork::Testnet),
        "regtest" => Ok(BitcoinNetwork::Regtest),
        s => Err(AppError::InputValidation(format!("unknown network: {}", s))),
    }
}

/// Mainnet RPC ports start with `10`; anything else is treated as testnet.
pub fn infer_network(port: u16) -> BitcoinNetwork {
    if port.to_string().starts_with("10") {
        BitcoinNetwork::Bitcoin
    } else {
        BitcoinNetwork::Testnet
    }
}
