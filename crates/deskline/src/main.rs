// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deskline - real-time support-chat router.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod serve;
mod token;

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use deskline_config::DesklineConfig;
use deskline_core::types::Role;

/// Deskline - real-time support-chat router.
#[derive(Parser, Debug)]
#[command(name = "deskline", version, about, long_about = None)]
struct Cli {
    /// Load this file instead of the standard config locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the chat server.
    Serve,
    /// Mint a session credential for a user.
    Token {
        /// Account identifier carried by the credential.
        #[arg(long)]
        user_id: String,
        /// `customer` or `support`.
        #[arg(long, value_parser = parse_role)]
        role: Role,
        /// Lifetime in seconds (defaults to `auth.session_ttl_secs`).
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Load and validate configuration, then print a summary.
    Check,
}

fn parse_role(s: &str) -> Result<Role, String> {
    Role::from_str(s).map_err(|_| format!("unknown role '{s}' (expected customer or support)"))
}

fn load_config(path: Option<&PathBuf>) -> DesklineConfig {
    let loaded = match path {
        Some(path) => deskline_config::load_and_validate_path(path),
        None => deskline_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => config,
        Err(errors) => {
            deskline_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref());

    match cli.command {
        Some(Commands::Serve) => {
            if let Err(e) = serve::run_serve(config).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        Some(Commands::Token { user_id, role, ttl }) => {
            match token::mint(&config.auth, &user_id, role, ttl, chrono::Utc::now().timestamp()) {
                Ok(credential) => println!("{credential}"),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Config {
            action: ConfigCommands::Check,
        }) => {
            println!("configuration ok");
            println!("  listen:   {}:{}", config.server.host, config.server.port);
            println!("  database: {}", config.storage.database_path);
            println!(
                "  sessions: {}",
                if config.auth.session_secret.is_some() {
                    "enabled"
                } else {
                    "disabled (no auth.session_secret)"
                }
            );
        }
        None => {
            println!("deskline: use --help for available commands");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // Only jemalloc supports advancing the stats epoch.
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn token_command_parses_role() {
        let cli = Cli::try_parse_from([
            "deskline", "token", "--user-id", "agent-7", "--role", "support",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Token { user_id, role, ttl }) => {
                assert_eq!(user_id, "agent-7");
                assert_eq!(role, Role::Support);
                assert!(ttl.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(
            Cli::try_parse_from(["deskline", "token", "--user-id", "u", "--role", "admin"])
                .is_err()
        );
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["deskline", "config", "check", "--config", "/tmp/d.toml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/d.toml")));
    }
}
