use clap::{Parser, Subcommand};

mod commands;
mod util;

use commands::admin::AdminCommands;
use commands::chat_mode::ChatModeCommands;
use commands::forecast::ForecastArgs;
use commands::home::HomeCommands;
use commands::intervention::InterventionCommands;
use commands::recommendations::RecommendationCommands;
use commands::system::SystemCommands;

#[derive(Parser)]
#[command(
    name = "hearth",
    version,
    about = "Hearth CLI: home-system confidence, failure forecasts and interventions",
    after_help = "\
Exit codes: 0 success, 1 client error (4xx), 2 server error (5xx), \
3 connection error, 4 usage error. Output is JSON on stdout; errors are JSON on stderr."
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "HEARTH_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// API key (hth_sk_...)
    #[arg(long, env = "HEARTH_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Create users and API keys (direct database access)
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
    /// Homes, evidence and confidence
    Home {
        #[command(subcommand)]
        command: HomeCommands,
    },
    /// Systems, install data and forecasts
    System {
        #[command(subcommand)]
        command: SystemCommands,
    },
    /// Top recommendations and local dismissals
    Recommendations {
        #[command(subcommand)]
        command: RecommendationCommands,
    },
    /// Chat mode routing
    ChatMode {
        #[command(subcommand)]
        command: ChatModeCommands,
    },
    /// Risk-threshold interventions
    Intervention {
        #[command(subcommand)]
        command: InterventionCommands,
    },
    /// Run the failure model offline
    Forecast(ForecastArgs),
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("HEARTH_LOG")
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let api_url = cli.api_url.trim_end_matches('/');
    let api_key = cli.api_key.as_deref();

    let code = match cli.command {
        Commands::Health => commands::health::run(api_url).await,
        Commands::Admin { command } => commands::admin::run(command).await,
        Commands::Home { command } => {
            let token = util::require_api_key(api_key);
            commands::home::run(api_url, &token, command).await
        }
        Commands::System { command } => {
            let token = util::require_api_key(api_key);
            commands::system::run(api_url, &token, command).await
        }
        Commands::Recommendations { command } => {
            commands::recommendations::run(api_url, api_key, command).await
        }
        Commands::ChatMode { command } => {
            let token = util::require_api_key(api_key);
            commands::chat_mode::run(api_url, &token, command).await
        }
        Commands::Intervention { command } => {
            let token = util::require_api_key(api_key);
            commands::intervention::run(api_url, &token, command).await
        }
        Commands::Forecast(args) => commands::forecast::run(args),
    };

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_nested_subcommands() {
        let cli = Cli::try_parse_from([
            "hearth",
            "--api-key",
            "hth_sk_test",
            "system",
            "set-install",
            "--home",
            "0192f0a0-0000-7000-8000-000000000000",
            "--kind",
            "water_heater",
            "--year",
            "2019",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::System {
                command: SystemCommands::SetInstall { replaced: false, .. }
            }
        ));
    }

    #[test]
    fn forecast_accepts_now_override() {
        let cli = Cli::try_parse_from([
            "hearth",
            "forecast",
            "--kind",
            "roof",
            "--install-date",
            "2004-05-01",
            "--now",
            "2025-01-15T00:00:00Z",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Forecast(_)));
    }
}
