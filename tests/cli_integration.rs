use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tempfile::TempDir;

use tunclip::cli::{Cli, CliHandler, Mode};
use tunclip::config::Config;

#[test]
fn test_cli_parsing() -> Result<()> {
    let cli = Cli::try_parse_from(["tunclip", "--server", "--socket", "/tmp/tunclip.sock"])?;
    assert_eq!(cli.mode(), Mode::Server);
    assert_eq!(cli.socket, PathBuf::from("/tmp/tunclip.sock"));

    let cli = Cli::try_parse_from(["tunclip", "--client", "--socket", "/tmp/tunclip.sock", "--verbose"])?;
    assert_eq!(cli.mode(), Mode::Client);
    assert!(cli.verbose);

    Ok(())
}

#[test]
fn test_socket_path_is_expanded() -> Result<()> {
    let cli = Cli::try_parse_from(["tunclip", "--client", "--socket", "~/tunclip.sock"])?;
    let expanded = cli.socket_path();
    assert!(!expanded.to_string_lossy().starts_with('~'));
    assert!(expanded.ends_with("tunclip.sock"));
    Ok(())
}

#[test]
fn test_cli_handler_loads_config() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        "log_level = \"info\"\n\n[sync]\nsync_primary = false\n",
    )?;

    let handler = CliHandler::new(Some(&config_path))?;
    assert_eq!(handler.config().log_level, "info");
    assert!(!handler.config().sync.sync_primary);
    assert_eq!(handler.config().reconnect, Config::default().reconnect);
    Ok(())
}

#[test]
fn test_cli_handler_rejects_invalid_config() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, "[reconnect]\njitter_factor = 2.5\n")?;

    let err = CliHandler::new(Some(&config_path)).err().expect("config should be rejected");
    assert!(format!("{:#}", err).contains("jitter_factor"));
    Ok(())
}
