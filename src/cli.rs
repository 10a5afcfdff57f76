use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "bms-api", version, about = "Multi-tenant cluster health aggregator")]
pub struct Cli {
    /// Location of kubeconfig if not ~/.kube/config
    #[arg(short, long)]
    pub kubeconfig: Option<PathBuf>,
}
