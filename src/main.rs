/*!
 * Tether CLI - Command Line Interface
 *
 * `tether run` wires the local collaborators into the arming state machine
 * and reads console commands until `quit` or Ctrl-C.
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dialoguer::{theme::ColorfulTheme, Password};
use tether::{
    audit::AuditLog,
    auth::{password_digest, GuardedAuthenticator},
    cli_style::{
        event_table, metrics_table, print_banner, print_error, print_info, print_state,
        print_success, print_warning, section_header, stats_table, Theme,
    },
    config::{SettingsSource, SharedSettings, TetherConfig},
    core::{validate_script, ArmingState, ArmingStateMachine},
    error::{TetherError, EXIT_FATAL, EXIT_SUCCESS},
    logging,
    system::{platform_monitor, CommandActionRunner, CommandAlarm, DesktopNotifier, PasswordPrompt},
    ActionType,
};
use tether_core_interface::PowerStateProvider;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "tether")]
#[command(version, about = "Power-loss theft deterrence for unattended machines", long_about = None)]
struct Cli {
    /// Configuration file (default: <config dir>/tether/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch mains power and protect the machine
    Run {
        /// Start disarmed
        #[arg(long)]
        no_arm: bool,
    },

    /// Write a configuration file (interactive unless --defaults)
    InitConfig {
        /// Output path (default: <config dir>/tether/config.toml)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,

        /// Write the defaults without asking
        #[arg(long)]
        defaults: bool,
    },

    /// Load and validate the configuration, then print it
    CheckConfig,

    /// Print the SHA-256 digest of a password for `auth.password_sha256`
    HashPassword,

    /// Check that a custom script would be accepted
    ValidateScript {
        /// Absolute path to the script
        path: PathBuf,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let tether_error = e.downcast_ref::<TetherError>();
            print_error(&format!("{:#}", e), tether_error.and_then(suggestion));
            tether_error.map(TetherError::exit_code).unwrap_or(EXIT_FATAL)
        }
    };
    std::process::exit(code);
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { no_arm } => {
            let mut config = TetherConfig::load_or_default(cli.config.as_deref())?;
            config.verbose |= cli.verbose;
            if let Err(e) = logging::init_logging(&config) {
                eprintln!("Warning: Failed to initialize logging: {}", e);
            }

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start the async runtime")?;
            runtime.block_on(run_console(config, no_arm))
        }
        Commands::InitConfig {
            output,
            force,
            defaults,
        } => {
            tether::commands::init::run_init(output.as_deref(), force, defaults)?;
            Ok(())
        }
        Commands::CheckConfig => check_config(cli.config.as_deref()),
        Commands::HashPassword => hash_password(),
        Commands::ValidateScript { path } => {
            validate_script(&path)?;
            print_success(&format!("{} can run as a protective action", path.display()));
            Ok(())
        }
        Commands::Completions { shell } => {
            use clap::CommandFactory;
            use clap_complete::generate;
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "tether", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn suggestion(err: &TetherError) -> Option<&'static str> {
    match err {
        TetherError::Config(_) => Some("Run 'tether init-config' or 'tether check-config'"),
        TetherError::ScriptValidationFailed(_) => {
            Some("Use an absolute path to an existing .sh, .bash, .zsh or .command file")
        }
        TetherError::AuthenticationFailed(_) => Some("Set a password with 'tether hash-password'"),
        _ => None,
    }
}

fn check_config(path: Option<&Path>) -> anyhow::Result<()> {
    let config = TetherConfig::load_or_default(path)?;
    let settings = config.settings()?;

    let source = match path {
        Some(p) => p.display().to_string(),
        None => match TetherConfig::default_path() {
            Some(p) if p.exists() => p.display().to_string(),
            _ => "built-in defaults".to_string(),
        },
    };
    let actions: Vec<&str> = settings.actions.iter().map(|a| a.label()).collect();

    section_header("Configuration");
    println!(
        "{}",
        stats_table(&[
            ("Source", source),
            (
                "Grace period",
                format!("{}s", settings.grace_period.duration.as_secs())
            ),
            ("Cancellable", settings.grace_period.cancellable.to_string()),
            ("Actions", actions.join(", ")),
            (
                "Shutdown delay",
                format!("{}s", settings.shutdown_delay.as_secs())
            ),
            (
                "Action timeout",
                format!("{}s", settings.action_timeout.as_secs())
            ),
            ("Alarm", settings.alarm.enabled.to_string()),
            (
                "Prompt timeout",
                format!("{}s", settings.auth_timeout.as_secs())
            ),
            (
                "Password",
                if config.auth.password_sha256.is_some() {
                    "set".to_string()
                } else {
                    "not set".to_string()
                }
            ),
            (
                "Rate limit",
                format!(
                    "{} per {}s",
                    settings.protection_default.max_attempts,
                    settings.protection_default.window.as_secs()
                )
            ),
        ])
    );
    print_success("Configuration is valid");
    Ok(())
}

fn hash_password() -> anyhow::Result<()> {
    let password = Password::with_theme(&ColorfulTheme::default())
        .with_prompt("Password")
        .with_confirmation("Repeat password", "Passwords do not match")
        .interact()?;
    let digest = password_digest(&password);
    println!("{}", digest);
    print_info("Add this to the [auth] section of your configuration:");
    println!("  password_sha256 = \"{}\"", Theme::primary(&digest));
    Ok(())
}

// ============================================================================
// CONSOLE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsoleCommand {
    Status,
    Arm,
    Disarm,
    Cancel,
    Log(usize),
    Metrics,
    Reset(Option<ActionType>),
    Help,
    Quit,
}

const DEFAULT_LOG_LINES: usize = 20;

fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();

    let command = match verb.to_ascii_lowercase().as_str() {
        "status" | "s" => ConsoleCommand::Status,
        "arm" => ConsoleCommand::Arm,
        "disarm" => ConsoleCommand::Disarm,
        "cancel" | "c" => ConsoleCommand::Cancel,
        "log" | "l" => match arg {
            Some(n) => ConsoleCommand::Log(
                n.parse()
                    .map_err(|_| format!("'{}' is not a number of lines", n))?,
            ),
            None => ConsoleCommand::Log(DEFAULT_LOG_LINES),
        },
        "metrics" | "m" => ConsoleCommand::Metrics,
        "reset" => match arg {
            Some(action) => ConsoleCommand::Reset(Some(
                action.parse::<ActionType>().map_err(|e| e.to_string())?,
            )),
            None => ConsoleCommand::Reset(None),
        },
        "help" | "h" | "?" => ConsoleCommand::Help,
        "quit" | "exit" | "q" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command '{}', try 'help'", other)),
    };
    Ok(Some(command))
}

fn print_help() {
    println!(
        "{}",
        Theme::muted("Commands: status, arm, disarm, cancel, log [N], metrics, reset [action], quit")
    );
}

async fn run_console(config: TetherConfig, no_arm: bool) -> anyhow::Result<()> {
    let settings = SharedSettings::new(config.settings()?);

    let audit = match &config.audit.log_file {
        Some(path) => AuditLog::with_file(config.audit.capacity, path)?,
        None => AuditLog::new(config.audit.capacity),
    };
    let authenticator = GuardedAuthenticator::with_limits(
        PasswordPrompt::new(config.auth.password_sha256.clone()),
        config.auth.max_attempts,
        Duration::from_secs(config.auth.attempt_window_secs),
    );

    let mut builder = ArmingStateMachine::builder()
        .settings(settings.clone())
        .authenticator(Arc::new(authenticator))
        .runner(Arc::new(CommandActionRunner::new()))
        .alarm(Arc::new(CommandAlarm::new()))
        .notifier(Arc::new(DesktopNotifier::new()))
        .audit_log(Arc::new(audit));

    match platform_monitor(&config.power).await {
        Ok(monitor) => {
            print_info(&format!(
                "Watching mains power ({}, currently {:?})",
                monitor.name(),
                monitor.current()
            ));
            builder = builder.power_source(Arc::new(monitor));
        }
        Err(e) => print_warning(&format!(
            "Power monitoring unavailable ({}); only console commands will work",
            e
        )),
    }

    let machine = builder.build()?;

    print_banner();
    if config.auth.password_sha256.is_none() {
        print_warning("No disarm password set; run 'tether hash-password'");
    }
    if !no_arm {
        machine.arm().await?;
    }
    print_state(&machine.snapshot());
    print_help();

    let watcher = tokio::spawn(announce_transitions(machine.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };

        match parse_command(&line) {
            Ok(Some(ConsoleCommand::Quit)) => break,
            Ok(Some(command)) => handle_command(&machine, &settings, command).await,
            Ok(None) => {}
            Err(message) => print_warning(&message),
        }
    }

    watcher.abort();
    if machine.current_state() != ArmingState::Disarmed {
        print_warning("Exiting while armed; protection stops with this process");
    }
    Ok(())
}

/// Print state changes as they are committed, ignoring countdown ticks
async fn announce_transitions(machine: ArmingStateMachine) {
    let mut rx = machine.subscribe();
    let mut last = rx.borrow_and_update().state;
    while rx.changed().await.is_ok() {
        let snapshot = *rx.borrow_and_update();
        if snapshot.state != last {
            last = snapshot.state;
            print_state(&snapshot);
            if snapshot.state == ArmingState::Armed {
                if let Some(result) = machine.last_execution() {
                    print_info(&result.summary());
                }
            }
        }
    }
}

async fn handle_command(
    machine: &ArmingStateMachine,
    settings: &SharedSettings,
    command: ConsoleCommand,
) {
    let outcome = match command {
        ConsoleCommand::Status => {
            print_state(&machine.snapshot());
            if let Some(result) = machine.last_execution() {
                print_info(&format!("Last trigger: {}", result.summary()));
            }
            Ok(())
        }
        ConsoleCommand::Arm => machine.arm().await,
        ConsoleCommand::Disarm => machine.disarm().await,
        ConsoleCommand::Cancel => machine.cancel_grace_period().await,
        ConsoleCommand::Log(limit) => {
            let events = machine.get_event_log(limit);
            if events.is_empty() {
                print_info("No events recorded");
            } else {
                println!("{}", event_table(&events));
            }
            Ok(())
        }
        ConsoleCommand::Metrics => {
            let mut rows = Vec::new();
            for action in settings.current().actions.iter() {
                rows.push((*action, machine.get_protection_metrics(*action).await));
            }
            println!("{}", metrics_table(&rows));
            Ok(())
        }
        ConsoleCommand::Reset(Some(action)) => {
            machine.reset_protection(action).await;
            print_success(&format!("Protection reset for {}", action.label()));
            Ok(())
        }
        ConsoleCommand::Reset(None) => {
            for action in ActionType::ALL {
                machine.reset_protection(action).await;
            }
            print_success("Protection reset for every action");
            Ok(())
        }
        ConsoleCommand::Help => {
            print_help();
            Ok(())
        }
        ConsoleCommand::Quit => Ok(()),
    };

    if let Err(e) = outcome {
        print_error(&e.to_string(), suggestion(&e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["tether", "run", "--no-arm", "-c", "/tmp/t.toml"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { no_arm: true }));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/t.toml")));

        let cli = Cli::try_parse_from(["tether", "init-config", "--force", "--defaults"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::InitConfig {
                force: true,
                defaults: true,
                output: None
            }
        ));

        assert!(Cli::try_parse_from(["tether", "validate-script"]).is_err());
    }

    #[test]
    fn test_parse_console_commands() {
        assert_eq!(parse_command("  "), Ok(None));
        assert_eq!(parse_command("status"), Ok(Some(ConsoleCommand::Status)));
        assert_eq!(
            parse_command("log"),
            Ok(Some(ConsoleCommand::Log(DEFAULT_LOG_LINES)))
        );
        assert_eq!(parse_command("log 5"), Ok(Some(ConsoleCommand::Log(5))));
        assert!(parse_command("log many").is_err());
        assert_eq!(
            parse_command("reset shutdown"),
            Ok(Some(ConsoleCommand::Reset(Some(ActionType::Shutdown))))
        );
        assert_eq!(parse_command("QUIT"), Ok(Some(ConsoleCommand::Quit)));
        assert!(parse_command("explode").is_err());
    }
}
