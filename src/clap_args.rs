use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Benchmark relational databases on direct and NFS storage", long_about = None)]
pub struct Args {
    /// Verbose mode (-v, --verbose)
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the benchmark matrix
    Run {
        /// Path to the config file
        #[arg(short, long, default_value = "config/default.yaml")]
        config: String,

        /// Override the output directory from the config
        #[arg(short, long)]
        output: Option<String>,

        /// Restrict the run to these database engines
        #[arg(short, long)]
        databases: Vec<String>,

        /// Restrict the run to these scenarios
        #[arg(short, long)]
        scenarios: Vec<String>,

        /// Restrict the run to these storage types (direct, nfs)
        #[arg(long = "storage-types")]
        storage_types: Vec<String>,

        /// Restrict NFS units to these protocol versions (v3, v4)
        #[arg(long = "nfs-versions")]
        nfs_versions: Vec<String>,

        /// Skip units already recorded in this previous results directory
        #[arg(long)]
        resume: Option<String>,

        /// Print the execution plan without touching any infrastructure
        #[arg(long)]
        dry_run: bool,
    },

    /// Start configured services and leave them running
    Start {
        /// Path to the config file
        #[arg(short, long, default_value = "config/default.yaml")]
        config: String,

        /// Services to start (all configured services when empty)
        services: Vec<String>,
    },

    /// Stop configured services
    Stop {
        /// Path to the config file
        #[arg(short, long, default_value = "config/default.yaml")]
        config: String,

        /// Services to stop (all configured services when empty)
        services: Vec<String>,
    },

    /// Show the lifecycle state and health of every configured service
    Status {
        /// Path to the config file
        #[arg(short, long, default_value = "config/default.yaml")]
        config: String,
    },

    /// Write an annotated starter config to get a new setup going
    ConfigTemplate {
        /// Where to write the template
        #[arg(short, long, default_value = "config/default.yaml")]
        output: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn parse() -> Args {
    Args::parse()
}
