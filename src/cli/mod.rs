pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ringsink")]
#[command(author = "Ignoramuss")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Polls eBPF ring buffers and turns their records into Prometheus metrics", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Load the eBPF object and serve every configured span")]
    Run {
        #[arg(short, long, help = "Configuration file")]
        config: PathBuf,
    },
    #[command(about = "Validate a configuration file and print a summary")]
    Check {
        #[arg(short, long, help = "Configuration file")]
        config: PathBuf,
    },
    #[command(about = "Feed synthetic records through every span and print the metrics")]
    Simulate {
        #[arg(short, long, help = "Configuration file")]
        config: PathBuf,

        #[arg(short, long, default_value_t = 10, help = "Records per span")]
        records: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simulate() {
        let cli = Cli::parse_from(["ringsink", "-v", "simulate", "-c", "sink.yaml", "-r", "3"]);
        assert!(cli.verbose);
        match cli.command {
            Some(Commands::Simulate { config, records }) => {
                assert_eq!(config, PathBuf::from("sink.yaml"));
                assert_eq!(records, 3);
            }
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn test_run_requires_config() {
        assert!(Cli::try_parse_from(["ringsink", "run"]).is_err());
    }
}
