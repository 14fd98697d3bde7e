use std::str::FromStr;

use clap_complete::Shell;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

mod artifact;
mod backend;
mod cli;
mod compile;
mod completions;
mod errors;
mod network;
mod scaffold;

use errors::CliError;

#[tokio::main]
async fn main() {
    let matches = cli::build_cli().get_matches();

    // setup logging
    let level_filter = if matches.get_flag("verbose") {
        "debug"
    } else {
        "info"
    };
    let filter_layer = EnvFilter::new(level_filter)
        .add_directive("hyper=off".parse().expect("static directive parses"))
        .add_directive("reqwest=off".parse().expect("static directive parses"));
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(error) = run(&matches).await {
        eprintln!("Error: {error}");
        std::process::exit(error.exit_code());
    }
}

async fn run(matches: &clap::ArgMatches) -> Result<(), CliError> {
    match matches.subcommand() {
        Some(("compile", matches)) => compile::run(matches).await,
        Some(("artifact", matches)) => match matches.subcommand() {
            Some(("push", matches)) => artifact::push(matches).await,
            Some(("pull", matches)) => artifact::pull(matches).await,
            Some(("list", matches)) => artifact::list(matches).await,
            Some(("rm", matches)) => artifact::rm(matches).await,
            Some(("sign", matches)) => artifact::sign(matches).await,
            Some(("verify", matches)) => artifact::verify(matches).await,
            Some(("inspect", matches)) => artifact::inspect(matches).await,
            _ => unreachable!("clap enforces subcommand_required"),
        },
        Some(("network", matches)) => match matches.subcommand() {
            Some(("generate", matches)) => network::generate_cmd(matches).await,
            Some(("validate", matches)) => network::validate_cmd(matches).await,
            _ => unreachable!("clap enforces subcommand_required"),
        },
        Some(("scaffold", matches)) => match matches.subcommand() {
            Some(("verification-config", _)) => scaffold::verification_config(),
            _ => unreachable!("clap enforces subcommand_required"),
        },
        Some(("completions", matches)) => {
            let shell = matches
                .get_one::<String>("shell")
                .expect("shell is required");
            let shell = Shell::from_str(shell)
                .map_err(|_| anyhow::anyhow!("unknown shell {shell:?}"))?;
            completions::completions(&shell)
        }
        _ => unreachable!("clap enforces subcommand_required"),
    }
}
