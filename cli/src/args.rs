// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! Argument parsing. `clap`'s derive macros, matching the 4.5 dependency pin rather than the
//! legacy builder API `process_executor`'s own binary still uses.
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "bst", about = "A hermetic, declarative build orchestrator")]
pub struct Cli {
    /// Project directory to operate in; defaults to the current directory.
    #[arg(short = 'C', long = "directory", global = true)]
    pub directory: Option<PathBuf>,

    /// Configuration override in `key=value` form (e.g. `scheduler.builders=2`); repeatable.
    #[arg(short = 'o', long = "option", global = true)]
    pub option: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch, build, and push the given targets and their dependencies.
    Build { targets: Vec<String> },
    /// Fetch the given targets and their dependencies, without building.
    Fetch { targets: Vec<String> },
    /// Consult each target's sources for a new ref and write it back.
    Track { targets: Vec<String> },
    /// Print each target's resolved cache key and kind.
    Show {
        targets: Vec<String>,
        #[arg(long, default_value = "plain")]
        format: String,
    },
    /// Materialize a built element's artifact into a directory.
    Checkout { element: String, directory: PathBuf },
    /// Open an interactive shell at the assembly staging point of an element.
    Shell {
        #[arg(long)]
        build: String,
    },
    /// Push built artifacts to the project's configured artifact remotes.
    Push { targets: Vec<String> },
    /// Pull built artifacts from the project's configured artifact remotes.
    Pull { targets: Vec<String> },
}
