//! pg-notify command line
//!
//! Install row-change triggers and watch notification channels.

use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pg_notify::mqtt::{MqttSettings, DEFAULT_MQTT_PORT};
use pg_notify::schema::{Database, DEFAULT_SCHEMA};
use pg_notify::{
    builtin_registry, CancellationToken, ChannelName, Dispatcher, NotifyError, NotifyResult, PgSource,
    WatchConfig, DEFAULT_CHANNEL,
};

/// Set up PostgreSQL NOTIFY/LISTEN actions.
#[derive(Parser, Debug)]
#[command(name = "pg-notify")]
#[command(version, about = "A command line utility to set up postgres NOTIFY/LISTEN actions")]
struct Cli {
    /// The connection URL
    #[arg(long, global = true, env = "DATABASE_URL", default_value = "postgres://localhost/postgres")]
    conn: String,

    /// Show SQL and debug logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install the notification trigger on tables
    Install {
        /// Tables to watch
        #[arg(required = true)]
        tables: Vec<String>,

        /// Channel the trigger function notifies
        #[arg(long, default_value = DEFAULT_CHANNEL)]
        channel: String,
    },

    /// Remove the notification trigger from tables
    Uninstall {
        #[arg(required = true)]
        tables: Vec<String>,
    },

    /// List tables of a schema
    ListTables {
        #[arg(long, default_value = DEFAULT_SCHEMA)]
        schema: String,
    },

    /// List triggers attached to a table
    ListTriggers { table: String },

    /// Watch a channel and dispatch events
    Watch(WatchArgs),
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Seconds to wait per cycle; 0 waits indefinitely
    #[arg(long, default_value_t = 0)]
    timeout: u64,

    /// Registered handler to call for each event (log, json, changes, mqtt)
    #[arg(long)]
    callback: Option<String>,

    /// Run the callback in its own worker
    #[arg(long)]
    ipc: bool,

    /// Channel to listen on
    #[arg(long, default_value = DEFAULT_CHANNEL)]
    channel: String,

    /// Bound the --ipc hand-off queue, dropping events when it is full.
    /// Unbounded when omitted.
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Longest single wait before checking for shutdown, in milliseconds
    #[arg(long, default_value_t = 1000)]
    liveness_ms: u64,

    /// Broker the `mqtt` callback publishes to
    #[arg(long, default_value = "localhost")]
    mqtt_host: String,

    /// Port of the `mqtt` callback's broker
    #[arg(long, default_value_t = DEFAULT_MQTT_PORT)]
    mqtt_port: u16,
}

/// Explicit per-invocation context shared by every command.
struct Context {
    conn: String,
    verbose: bool,
}

impl TryFrom<&WatchArgs> for WatchConfig {
    type Error = NotifyError;

    fn try_from(args: &WatchArgs) -> Result<Self, Self::Error> {
        let channel = ChannelName::parse(&args.channel)?;
        let mut config = WatchConfig::new(channel)
            .with_timeout_secs(args.timeout)
            .isolated(args.ipc)
            .with_handoff_capacity(args.queue_capacity)
            .with_liveness_interval(Duration::from_millis(args.liveness_ms));
        if let Some(callback) = &args.callback {
            config = config.with_handler(callback.clone());
        }
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "pg_notify=debug" } else { "pg_notify=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let ctx = Context {
        conn: cli.conn,
        verbose: cli.verbose,
    };

    match run(&ctx, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
        }
    }
}

fn run(ctx: &Context, command: Command) -> NotifyResult<()> {
    match command {
        Command::Install { tables, channel } => {
            let channel = ChannelName::parse(&channel)?;
            let mut db = Database::connect(&ctx.conn)?;
            for table in db.install_triggers(&channel, &tables, ctx.verbose)? {
                println!("OK: {table}");
            }
        }
        Command::Uninstall { tables } => {
            let mut db = Database::connect(&ctx.conn)?;
            for table in db.uninstall_triggers(&tables, ctx.verbose)? {
                println!("Removed: {table}");
            }
        }
        Command::ListTables { schema: name } => {
            let mut db = Database::connect(&ctx.conn)?;
            for table in db.list_tables(&name)? {
                println!("* {table}");
            }
        }
        Command::ListTriggers { table } => {
            let mut db = Database::connect(&ctx.conn)?;
            for trigger in db.table_triggers(&table)? {
                println!(
                    "* {} {} {} on {}: {}",
                    trigger.name, trigger.timing, trigger.event, trigger.table, trigger.statement
                );
            }
        }
        Command::Watch(args) => watch(ctx, &args)?,
    }
    Ok(())
}

fn watch(ctx: &Context, args: &WatchArgs) -> NotifyResult<()> {
    let config = WatchConfig::try_from(args)?;
    let mut registry = builtin_registry();
    pg_notify::mqtt::register(
        &mut registry,
        MqttSettings {
            host: args.mqtt_host.clone(),
            port: args.mqtt_port,
            ..MqttSettings::default()
        },
    );
    // Fail on bad options and unknown callbacks before connecting.
    config.validate()?;
    if let Some(name) = &config.handler {
        registry.check(name)?;
    }

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone())?;

    let source = PgSource::connect(&ctx.conn)?;
    let mut dispatcher = Dispatcher::new(config, registry).with_cancellation(cancel);
    let mut stdout = std::io::stdout().lock();
    let report = dispatcher.run(source, &mut stdout)?;

    tracing::info!(
        mode = ?report.mode,
        read = report.events_read,
        handled = report.events_handled,
        dropped = report.events_dropped,
        abandoned = report.events_abandoned,
        "watch stopped"
    );
    Ok(())
}

/// Cancel `token` on Ctrl+C / SIGINT, or SIGTERM on unix.
///
/// The SIGTERM handler is installed before this returns.
fn spawn_signal_listener(token: CancellationToken) -> NotifyResult<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| NotifyError::internal(format!("failed to start signal runtime: {e}")))?;
    let terminate = {
        let _guard = runtime.enter();
        listen_terminate()
    };

    thread::Builder::new()
        .name("pg-notify-signal".to_string())
        .spawn(move || {
            runtime.block_on(async {
                if let Some(signal) = shutdown_signal(terminate).await {
                    tracing::info!(signal, "shutdown signal received, stopping watch");
                    token.cancel();
                }
            });
        })
        .map_err(|e| NotifyError::internal(format!("failed to spawn signal listener: {e}")))?;
    Ok(())
}

#[cfg(unix)]
type Terminate = Option<tokio::signal::unix::Signal>;

#[cfg(not(unix))]
type Terminate = ();

#[cfg(unix)]
fn listen_terminate() -> Terminate {
    use tokio::signal::unix::{signal, SignalKind};

    signal(SignalKind::terminate())
        .map_err(|err| tracing::warn!(error = %err, "cannot listen for SIGTERM"))
        .ok()
}

#[cfg(not(unix))]
fn listen_terminate() -> Terminate {}

/// Name of the first shutdown signal delivered, `None` if listening failed.
#[cfg(unix)]
async fn shutdown_signal(terminate: Terminate) -> Option<&'static str> {
    let Some(mut terminate) = terminate else {
        return tokio::signal::ctrl_c().await.ok().map(|()| "SIGINT");
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.ok().map(|()| "SIGINT"),
        _ = terminate.recv() => Some("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal((): Terminate) -> Option<&'static str> {
    tokio::signal::ctrl_c().await.ok().map(|()| "ctrl-c")
}
