// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! `bst`: a hermetic, declarative build orchestrator. Parses arguments, bootstraps a project, and
//! dispatches to the subcommand handlers in `commands`.
mod args;
mod commands;
mod error;
mod jobs;
mod project;
mod sources;

use clap::Parser;

use args::{Cli, Command};

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Build { targets } => commands::build(cli.directory, cli.option, targets).await,
        Command::Fetch { targets } => commands::fetch(cli.directory, cli.option, targets).await,
        Command::Track { targets } => commands::track(cli.directory, cli.option, targets).await,
        Command::Show { targets, format } => commands::show(cli.directory, cli.option, targets, format).await,
        Command::Checkout { element, directory } => {
            commands::checkout(cli.directory, cli.option, element, directory).await
        }
        Command::Shell { build } => commands::shell(cli.directory, cli.option, build).await,
        Command::Push { targets } => commands::push(cli.directory, cli.option, targets).await,
        Command::Pull { targets } => commands::pull(cli.directory, cli.option, targets).await,
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    }
}
