use std::convert::Infallible;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use galaxy_throttle::config::{LoggingConfig, StoreKind, ThrottleConfig};
use galaxy_throttle::gate::{GateOutcome, ThrottledAction, Throttles};
use galaxy_throttle::ratelimit::{Clock, SystemClock};
use galaxy_throttle::registry::{Registration, RegistrationForm, UserRegistry};
use galaxy_throttle::store;

/// Exit status when an action is refused by its limiter.
const EXIT_THROTTLED: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "galaxy-throttle", version, about = "Throttle Code Galaxy site actions")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use this JSON file as the store, overriding the configuration
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ask for a slot and record it when granted
    Acquire { action: ActionArg },
    /// Print the advisory number of seconds until a slot frees up
    Wait { action: ActionArg },
    /// Show the state of both limiters
    Status,
    /// Forget the recorded history of one limiter
    Reset { action: ActionArg },
    /// Register a user, gated by the email limiter
    Register {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        surname: String,
        #[arg(long, default_value = "")]
        nickname: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ActionArg {
    Email,
    Chat,
}

impl From<ActionArg> for ThrottledAction {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Email => ThrottledAction::RegistrationEmail,
            ActionArg::Chat => ThrottledAction::ChatMessage,
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = ThrottleConfig::load(cli.config.as_deref())?;
    if let Some(path) = cli.store {
        config.store.kind = StoreKind::File;
        config.store.path = path;
    }

    init_tracing(&config.logging);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        config = ?cli.config,
        store = ?config.store.kind,
        "Configuration loaded"
    );

    let store = store::open(&config.store);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let throttles = Throttles::new(&config.limits, store.clone(), clock.clone())?;

    let code = match cli.command {
        Command::Acquire { action } => {
            let action = ThrottledAction::from(action);
            match throttles.run(action, || ()) {
                GateOutcome::Performed(()) => {
                    println!(
                        "{}: permitted, {} left in window",
                        action,
                        throttles.for_action(action).remaining()
                    );
                    ExitCode::SUCCESS
                }
                throttled => {
                    println!("{}", throttled.retry_message().unwrap_or_default());
                    ExitCode::from(EXIT_THROTTLED)
                }
            }
        }
        Command::Wait { action } => {
            let limiter = throttles.for_action(action.into());
            println!("{}", limiter.seconds_until_next_slot());
            ExitCode::SUCCESS
        }
        Command::Status => {
            for action in [ThrottledAction::RegistrationEmail, ThrottledAction::ChatMessage] {
                let limiter = throttles.for_action(action);
                println!(
                    "{:<6} key={} capacity={} window={}s recorded={} remaining={} wait={}s",
                    action.name(),
                    limiter.key(),
                    limiter.capacity(),
                    limiter.window().as_secs(),
                    limiter.recorded_count(),
                    limiter.remaining(),
                    limiter.seconds_until_next_slot(),
                );
            }
            ExitCode::SUCCESS
        }
        Command::Reset { action } => {
            let action = ThrottledAction::from(action);
            throttles.for_action(action).clear()?;
            println!("{}: history cleared", action);
            ExitCode::SUCCESS
        }
        Command::Register {
            name,
            surname,
            nickname,
            email,
            password,
        } => {
            let registry = UserRegistry::new(store, clock);
            let form = RegistrationForm {
                name,
                surname,
                nickname,
                email,
                password,
            };

            let outcome = registry.register(throttles.email(), &form, |user| {
                info!(email = %user.email, "Registration notification queued");
                Ok::<(), Infallible>(())
            })?;

            match outcome {
                GateOutcome::Performed(Registration::Notified(user)) => {
                    println!("Registration successful: {}", user.id);
                    ExitCode::SUCCESS
                }
                GateOutcome::Performed(Registration::NotificationFailed { user, reason }) => {
                    println!("Registered {} (email notification failed: {})", user.id, reason);
                    ExitCode::SUCCESS
                }
                throttled => {
                    println!("{}", throttled.retry_message().unwrap_or_default());
                    ExitCode::from(EXIT_THROTTLED)
                }
            }
        }
    };

    Ok(code)
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
