use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, about, version)]
pub struct CliOptions {
    /// Path to the YAML configuration file. Can also be set via env. var.
    #[clap(long, env = "FIELDGATE_CONFIG")]
    pub config: PathBuf,
    /// Overrides the GraphQL API port of the configuration file.
    #[clap(long)]
    pub port: Option<u16>,
}
