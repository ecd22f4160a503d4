// Copyright 2025 vista Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! `vista-cli` provides debug tools for the disk tier of vista.

mod disk;
mod error;
mod formats;

use clap::{Parser, Subcommand};
use disk::{ClearArgs, RemoveArgs, StatArgs, TrimArgs};
use formats::FormatsArgs;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show entry count and usage of every format.
    Stat(StatArgs),
    /// Apply a new capacity to a format and wait for the eviction.
    Trim(TrimArgs),
    /// Remove a key from every format.
    Remove(RemoveArgs),
    /// Remove every entry, or the entries of one format.
    Clear(ClearArgs),
    /// Validate a JSON formats file.
    Formats(FormatsArgs),
}

fn init_logger() {
    use tracing_subscriber::{prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_line_number(true))
        .with(EnvFilter::from_default_env())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();

    match cli.command {
        Command::Stat(args) => disk::stat(args).await?,
        Command::Trim(args) => disk::trim(args).await?,
        Command::Remove(args) => disk::remove(args).await?,
        Command::Clear(args) => disk::clear(args).await?,
        Command::Formats(args) => formats::run(args)?,
    }

    Ok(())
}
