use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "devarch")]
#[command(about = "Local developer-environment controller for isolated container stacks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP surface and background supervisor
    Serve {
        /// Listen address, overriding the configured one
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Diagnose engine, database, and filesystem setup
    Doctor,
    /// Manage stacks
    Stack {
        #[command(subcommand)]
        action: StackCommands,
    },
    /// Compute the plan for a stack
    Plan { stack: String },
    /// Apply a stack, optionally pinning a plan fingerprint
    Apply {
        stack: String,
        /// Fingerprint from a previous plan; computed fresh when omitted
        #[arg(long)]
        fingerprint: Option<String>,
    },
    /// Export a stack manifest and lockfile
    Export {
        stack: String,
        /// Output directory (defaults to the stack's materialization dir)
        #[arg(short, long)]
        out: Option<String>,
    },
    /// Import a manifest (create-update, never delete)
    Import { file: String },
    /// Configure devarch
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum StackCommands {
    /// List active stacks
    List,
    /// Create a stack
    Create {
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Show one stack with its instances
    Show { name: String },
    /// Soft-delete a stack (trash)
    Delete { name: String },
    /// Restore a trashed stack
    Restore { name: String },
    /// Clone a stack under a new name
    Clone { source: String, target: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Write the default configuration file
    Init,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Serve { listen } => commands::serve(config, listen.as_deref()).await,
        Commands::Doctor => commands::doctor(config).await,
        Commands::Stack { action } => match action {
            StackCommands::List => commands::stack::list(config).await,
            StackCommands::Create { name, description } => {
                commands::stack::create(config, &name, &description).await
            }
            StackCommands::Show { name } => commands::stack::show(config, &name).await,
            StackCommands::Delete { name } => commands::stack::delete(config, &name).await,
            StackCommands::Restore { name } => commands::stack::restore(config, &name).await,
            StackCommands::Clone { source, target } => {
                commands::stack::clone(config, &source, &target).await
            }
        },
        Commands::Plan { stack } => commands::plan(config, &stack).await,
        Commands::Apply { stack, fingerprint } => {
            commands::apply(config, &stack, fingerprint.as_deref()).await
        }
        Commands::Export { stack, out } => commands::export(config, &stack, out.as_deref()).await,
        Commands::Import { file } => commands::import(config, &file).await,
        Commands::Config { action } => match action {
            ConfigCommands::Show => commands::config_show(config).await,
            ConfigCommands::Init => commands::config_init(config).await,
        },
    };

    if let Err(err) = result {
        eprintln!("error: {}", err);
        std::process::exit(commands::exit_code(&err));
    }
}
