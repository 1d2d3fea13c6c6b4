use chrono::Utc;
use clap::Parser;
use bitcoin::Denomination;

mod cli;
mod coins;
mod distribution;
mod error;
mod keys;
mod ledger;
mod plan;
mod rpc;
mod settings;
mod transaction;
mod types;
#[cfg(test)]
mod testing;

use cli::CliArgs;
use distribution::DistributionRequest;
use error::AppError;
use keys::SecpKeyGenerator;
use rpc::NodeClient;
use settings::Settings;

fn main() -> Result<(), AppError> {
    let args = CliArgs::parse();
    let settings = Settings::load(&args)?;

    let default_filter = if settings.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();
    log::info!("Starting distribution with settings: {:?}", settings);

    let network = settings.network()?;
    log::info!("Generating keys for network: {:?}", network);

    let lines = plan::load_funding_plan(&settings.funding_file).map_err(|e| {
        eprintln!("No usable funding plan in {:?}.", settings.funding_file);
        e
    })?;
    let run_id = plan::run_identifier(Utc::now());
    let obligations = plan::expand_obligations(&lines, &settings.prefix, &run_id);
    let planned_total = plan::total_amount(&obligations)?;
    println!(
        "Planned {} accounts totalling {} (run {}).",
        obligations.len(),
        planned_total.display_in(Denomination::Bitcoin),
        run_id
    );

    let client = NodeClient::connect(&settings.host, settings.port, &settings.user, &settings.password)?;
    let keys = SecpKeyGenerator::new(network);
    let request = DistributionRequest {
        sources: settings.source_addresses(),
        strategy: settings.strategy,
        ledger_path: settings.output_file.clone(),
    };

    let summary = distribution::run_pipeline(&client, &keys, obligations, &request, &settings.policy())?;
    println!("{}", summary);
    log::info!("Ledger written to {:?}", settings.output_file);
    Ok(())
}
