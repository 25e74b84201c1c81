use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "products-api", version, about = "Products API with OpenTelemetry-style observability")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Start the API server (default)
    Start,

    /// Print the effective configuration as JSON
    Config,
}

impl Cli {
    /// Get the command, defaulting to Start if none provided
    pub fn get_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_start() {
        let cli = Cli::parse_from(["products-api"]);
        assert_eq!(cli.get_command(), Commands::Start);
    }

    #[test]
    fn test_config_command() {
        let cli = Cli::parse_from(["products-api", "config"]);
        assert_eq!(cli.get_command(), Commands::Config);
    }
}
