//! Config validation CLI tool
//!
//! Validates a shield configuration file and reports any errors.

use shield_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a shield configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match shield_config::load_config(&config_path) {
        Ok(policy) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", shield_config::CURRENT_CONFIG_VERSION);
            println!("  Data dir: {}", policy.service.data_dir.display());
            match &policy.service.device_id {
                Some(id) => println!("  Device: {}", id),
                None => println!("  Device: (not set)"),
            }
            println!(
                "  Unlock: {} min default, {} min max",
                policy.shield.default_unlock_minutes, policy.shield.max_unlock_minutes
            );
            println!(
                "  Passcode: {} attempts, {}s lockout",
                policy.passcode.max_attempts,
                policy.passcode.lockout_duration.as_secs()
            );
            match &policy.mirror {
                Some(mirror) => println!("  Mirror: {} (table {})", mirror.url, mirror.table),
                None => println!("  Mirror: disabled"),
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                shield_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                shield_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                shield_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                shield_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        shield_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
