//! Deployer CLI
//!
//! Usage:
//!   deployer
//!   deployer deploy.yaml --cancel-on-failure
//!   deployer deploy.json --dry-run

use deployer::{
    load_configuration, DependencyGraph, DeployArgs, DeployPlan, ProcessAdapter, WaveScheduler,
};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let args: DeployArgs = argh::from_env();

    // Initialize logging
    let env = env_logger::Env::default().default_filter_or(args.log_filter());
    env_logger::init_from_env(env);

    // A missing or invalid deploy file means there is nothing to run
    let Some((source, deploy_file)) = load_configuration(&args.locator()) else {
        log::info!("Deployer not started");
        return;
    };

    // Validate only mode
    if args.validate {
        println!("Deploy file '{}' is valid", source);
        println!("  Global config keys: {}", deploy_file.config.len());
        println!("  Units: {}", deploy_file.unit_ids().join(", "));
        match DependencyGraph::build(&deploy_file) {
            Ok(graph) => println!("  Waves: {}", graph.waves.len()),
            Err(e) => {
                println!("  Dependencies: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    // Dry run mode
    if args.dry_run {
        match DeployPlan::build(&deploy_file) {
            Ok(plan) => println!("{}", plan),
            Err(e) => {
                log::error!("Failed to generate deploy plan: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    // Create shutdown channel
    let (shutdown_tx, mut shutdown_rx) = watch::channel(());

    // Set up Ctrl+C handler
    {
        let shutdown_tx = shutdown_tx.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            log::info!("Received Ctrl+C, initiating shutdown...");
            let _ = shutdown_tx.send(());
        }) {
            log::error!("Error setting Ctrl+C handler: {}", e);
            std::process::exit(1);
        }
    }

    let adapter = Arc::new(ProcessAdapter::new());
    let scheduler = WaveScheduler::new(adapter.clone()).with_config(args.scheduler_config());
    let grace = args.shutdown_grace();

    let outcome = tokio::select! {
        result = scheduler.run(deploy_file.units, deploy_file.config) => Some(result),
        _ = shutdown_rx.changed() => None,
    };

    match outcome {
        Some(Ok(deployed)) => {
            log::info!("Deployed {} units: {}", deployed.len(), deployed.join(", "));
        }
        Some(Err(e)) => {
            log::error!("Deployment stopped: {}", e);
            if !e.started().is_empty() {
                log::warn!("Started before the run stopped: {}", e.started().join(", "));
            }
            adapter.shutdown(grace).await;
            std::process::exit(1);
        }
        None => {
            log::info!("Deployment interrupted");
            adapter.shutdown(grace).await;
            return;
        }
    }

    // Supervise until shutdown signal or all processes exit
    adapter.wait(shutdown_rx).await;

    adapter.shutdown(grace).await;

    log::info!("Deployer exiting");
}
