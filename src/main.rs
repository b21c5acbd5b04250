use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use relaypanel::config::AppConfig;
use relaypanel::control::{RelayCommand, RelayControl};
use relaypanel::mqtt::{ConnectionManager, MqttError, RumqttConnector};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Toggle the rescue pole relay over MQTT
#[derive(Parser, Debug)]
#[command(name = "relaypanel", version)]
struct Cli {
    /// Config file, defaults to ~/.config/relaypanel/config.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish the activate (SAFE) payload once
    Activate,
    /// Publish the deactivate (DANGER) payload once
    Deactivate,
    /// Connect and print the connection status
    Status,
    /// Stay connected and print status changes and relay messages until Ctrl-C
    Watch,
    /// Write the default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

enum Action {
    Send(RelayCommand),
    Status,
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup(cli.verbose)?;

    let path = cli.config.unwrap_or_else(AppConfig::default_path);
    match cli.command {
        Command::InitConfig { force } => AppConfig::write_default(&path, force).await,
        Command::Activate => run(&path, Action::Send(RelayCommand::Activate)).await,
        Command::Deactivate => run(&path, Action::Send(RelayCommand::Deactivate)).await,
        Command::Status => run(&path, Action::Status).await,
        Command::Watch => run(&path, Action::Watch).await,
    }
}

fn setup(verbose: bool) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env(if verbose { Level::DEBUG } else { Level::INFO });
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

async fn run(path: &Path, action: Action) -> Result<()> {
    let config = AppConfig::load(path).await?;
    info!(
        "Relay control on {} via {}",
        config.control.topic, config.mqtt.server
    );

    let manager = Arc::new(ConnectionManager::new(
        RumqttConnector,
        config.mqtt.clone(),
        config.control.topic.clone(),
    )?);
    let control = RelayControl::new(manager.clone(), &config.control)?;

    manager.connect()?;
    let timeout = config.mqtt.connect_timeout();
    let result = match action {
        Action::Send(command) => send_once(&manager, &control, command, timeout).await,
        Action::Status => show_status(&manager, timeout).await,
        Action::Watch => watch(&manager, &control).await,
    };

    manager.close(CLOSE_GRACE).await?;
    result
}

async fn wait_connected(manager: &ConnectionManager<RumqttConnector>, timeout: Duration) {
    match manager.wait_until_connected(timeout).await {
        Ok(()) => info!("Connected to {}", manager.config().server),
        Err(MqttError::Timeout(t)) => warn!("Still not connected after {:?}", t),
        Err(e) => warn!("Connection did not come up: {}", e),
    }
}

async fn send_once(
    manager: &ConnectionManager<RumqttConnector>,
    control: &RelayControl<RumqttConnector>,
    command: RelayCommand,
    timeout: Duration,
) -> Result<()> {
    wait_connected(manager, timeout).await;

    let outcome = control.send(command);
    println!("{} ({}): {}", command, command.label(), outcome);
    if outcome.is_sent() {
        Ok(())
    } else {
        Err(eyre!("Relay {} was not published: {}", command, outcome))
    }
}

async fn show_status(manager: &ConnectionManager<RumqttConnector>, timeout: Duration) -> Result<()> {
    wait_connected(manager, timeout).await;

    let status = manager.status();
    println!("{}: {}", manager.config().server, status.connection_state.status_text());
    println!(
        "messages sent: {}, received: {}",
        status.messages_sent, status.messages_received
    );
    if let Some(last) = status.last_activity {
        println!("last activity: {}", last.format("%Y-%m-%d %H:%M:%S"));
    }
    for error in &status.error_messages {
        println!("error: {}", error);
    }
    Ok(())
}

async fn watch(
    manager: &ConnectionManager<RumqttConnector>,
    control: &RelayControl<RumqttConnector>,
) -> Result<()> {
    let mut status = manager
        .watch_status()
        .ok_or_else(|| eyre!("No MQTT session to watch"))?;
    let mut messages = manager
        .messages()
        .ok_or_else(|| eyre!("No MQTT session to watch"))?;

    let mut last_state = status.borrow().connection_state.clone();
    println!("{}", last_state.status_text());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing MQTT session");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    warn!("MQTT session went away");
                    break;
                }
                let state = status.borrow_and_update().connection_state.clone();
                if state != last_state {
                    println!("{}", state.status_text());
                    last_state = state;
                }
            }
            message = messages.recv() => match message {
                Ok(message) => {
                    let label = control
                        .payloads()
                        .command_for(message.content())
                        .map(|command| command.label())
                        .unwrap_or("UNKNOWN");
                    println!("{} [{}]", message.render(), label);
                }
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} relay messages", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}
