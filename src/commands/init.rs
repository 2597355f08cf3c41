/*!
 * Tether Init Command - Configuration Wizard
 *
 * Interviews the user about their setting, picks a profile, asks for a
 * disarm password and writes the result to the config file. With
 * `--defaults` no questions are asked and the default profile is written.
 */

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Password, Select};
use tether_core_interface::{ActionList, ActionType};

use crate::auth::password_digest;
use crate::config::TetherConfig;

/// Profiles offered by the wizard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Lock the screen after a relaxed countdown
    Cafe,
    /// Lock, clear the clipboard and unmount volumes
    Travel,
    /// Short countdown the thief cannot cancel, ends in shutdown
    Strict,
}

impl Profile {
    pub const ALL: [Profile; 3] = [Profile::Cafe, Profile::Travel, Profile::Strict];

    pub fn description(&self) -> &'static str {
        match self {
            Profile::Cafe => "Cafe / library (lock screen, 30s grace)",
            Profile::Travel => "Travel (lock, clear clipboard, unmount volumes, 20s grace)",
            Profile::Strict => "Strict (lock, log out, shut down, 10s grace, not cancellable)",
        }
    }

    /// Configuration for this profile, starting from the defaults
    pub fn config(&self) -> TetherConfig {
        let mut config = TetherConfig::default();
        match self {
            Profile::Cafe => {
                config.grace_period.duration_secs = 30;
            }
            Profile::Travel => {
                config.grace_period.duration_secs = 20;
                config.actions = action_list(&[
                    ActionType::LockScreen,
                    ActionType::ClearClipboard,
                    ActionType::UnmountVolumes,
                ]);
                config.alarm.enabled = true;
            }
            Profile::Strict => {
                config.grace_period.duration_secs = 10;
                config.grace_period.cancellable = false;
                config.actions = action_list(&[
                    ActionType::LockScreen,
                    ActionType::LogOut,
                    ActionType::Shutdown,
                ]);
                config.shutdown_delay_secs = 0;
                config.alarm.enabled = true;
            }
        }
        config
    }
}

fn action_list(actions: &[ActionType]) -> ActionList {
    ActionList::new(actions.iter().copied()).unwrap_or_default()
}

/// Where the config goes: the explicit path or the default location
pub fn resolve_output(output: Option<&Path>) -> Result<PathBuf> {
    match output {
        Some(path) => Ok(path.to_path_buf()),
        None => TetherConfig::default_path()
            .ok_or_else(|| anyhow!("Could not determine the configuration directory")),
    }
}

/// Validate and write `config`, refusing to replace a file unless `force`
pub fn write_config(config: &TetherConfig, path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists, pass --force to overwrite",
            path.display()
        );
    }
    config.validate()?;
    config
        .save(path)
        .with_context(|| format!("Failed to save configuration to {}", path.display()))?;
    Ok(())
}

/// Run the init command
pub fn run_init(output: Option<&Path>, force: bool, defaults: bool) -> Result<PathBuf> {
    let path = resolve_output(output)?;

    if defaults {
        let config = TetherConfig::default();
        write_config(&config, &path, force)?;
        print_summary(&path, &config);
        return Ok(path);
    }

    print_welcome();

    let mut force = force;
    if path.exists() && !force {
        if !Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Existing configuration found. Overwrite?")
            .default(false)
            .interact()?
        {
            println!("\n{}", style("Configuration unchanged.").cyan());
            return Ok(path);
        }
        force = true;
    }

    let config = interview()?;
    write_config(&config, &path, force)?;
    print_summary(&path, &config);
    Ok(path)
}

fn interview() -> Result<TetherConfig> {
    let theme = ColorfulTheme::default();

    println!("\n{}", style("Protection Profile").cyan().bold());
    let descriptions: Vec<&str> = Profile::ALL.iter().map(|p| p.description()).collect();
    let selection = Select::with_theme(&theme)
        .with_prompt("Where will this machine be left unattended?")
        .default(0)
        .items(&descriptions[..])
        .interact()?;
    let profile = Profile::ALL
        .get(selection)
        .copied()
        .unwrap_or(Profile::Cafe);
    let mut config = profile.config();

    config.grace_period.duration_secs = Input::with_theme(&theme)
        .with_prompt("Grace period in seconds")
        .default(config.grace_period.duration_secs)
        .interact_text()?;

    println!("\n{}", style("Disarm Password").cyan().bold());
    let set_password = Confirm::with_theme(&theme)
        .with_prompt("Set a password for disarming?")
        .default(true)
        .interact()?;
    if set_password {
        let password = Password::with_theme(&theme)
            .with_prompt("Password")
            .with_confirmation("Repeat password", "Passwords do not match")
            .interact()?;
        config.auth.password_sha256 = Some(password_digest(&password));
    } else {
        println!(
            "  {}",
            style("Without a password only biometric authentication can disarm.").dim()
        );
    }

    Ok(config)
}

fn print_welcome() {
    println!();
    println!(
        "{}",
        style("╔════════════════════════════════════════╗").cyan()
    );
    println!(
        "{}",
        style("║    🛡  Welcome to Tether Setup          ║").cyan()
    );
    println!(
        "{}",
        style("╚════════════════════════════════════════╝").cyan()
    );
    println!();
    println!("This wizard creates the configuration for `tether run`.");
}

fn print_summary(config_path: &Path, config: &TetherConfig) {
    let actions: Vec<&str> = config.actions.iter().map(|a| a.label()).collect();

    println!();
    println!("  {} Configuration saved", style("✓").green().bold());
    println!("  Location: {}", style(config_path.display()).cyan());
    println!();
    println!("  {}", style("Configuration Summary:").bold());
    println!("  ─────────────────────────");
    println!(
        "  Grace Period:     {}",
        style(format!("{}s", config.grace_period.duration_secs)).yellow()
    );
    println!(
        "  Cancellable:      {}",
        style(config.grace_period.cancellable).yellow()
    );
    println!("  Actions:          {}", style(actions.join(", ")).yellow());
    println!("  Alarm:            {}", style(config.alarm.enabled).yellow());
    println!(
        "  Password:         {}",
        style(if config.auth.password_sha256.is_some() {
            "set"
        } else {
            "not set"
        })
        .yellow()
    );
    println!();
    println!("  {}", style("Next Steps:").bold());
    println!("  1. Review the configuration: tether check-config");
    println!("  2. Start protecting: tether run");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_profiles_validate() {
        for profile in Profile::ALL {
            let config = profile.config();
            assert!(config.validate().is_ok(), "{:?}", profile);
        }
    }

    #[test]
    fn test_strict_profile() {
        let config = Profile::Strict.config();
        assert!(!config.grace_period.cancellable);
        assert_eq!(config.grace_period.duration_secs, 10);
        assert_eq!(
            config.actions.as_slice(),
            &[
                ActionType::LockScreen,
                ActionType::LogOut,
                ActionType::Shutdown
            ]
        );
    }

    #[test]
    fn test_write_config_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tether").join("config.toml");

        write_config(&TetherConfig::default(), &path, false).unwrap();
        assert!(path.exists());

        let err = write_config(&Profile::Travel.config(), &path, false).unwrap_err();
        assert!(err.to_string().contains("--force"));

        write_config(&Profile::Travel.config(), &path, true).unwrap();
        let loaded = TetherConfig::load(&path).unwrap();
        assert_eq!(loaded.grace_period.duration_secs, 20);
        assert!(loaded.alarm.enabled);
    }

    #[test]
    fn test_run_init_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let written = run_init(Some(&path), false, true).unwrap();
        assert_eq!(written, path);
        let loaded = TetherConfig::load(&path).unwrap();
        assert_eq!(loaded.actions, ActionList::default());
    }
}
