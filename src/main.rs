mod alert;
mod cache;
mod config;
mod error;
mod model;
mod monitor;
mod notifier;
mod provider;
mod resolver;
mod storage;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use alert::NewAlert;
use alert::checker::AlertChecker;
use alert::service::AlertService;
use cache::PriceCache;
use config::AppConfig;
use model::{Alert, ChannelSettings};
use monitor::PriceMonitor;
use notifier::Dispatcher;
use resolver::PriceResolver;
use storage::sqlite::SqliteStorage;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("storage error")]
    Storage,
    #[display("price error")]
    Price,
    #[display("alert error")]
    Alert,
    #[display("runtime error")]
    Runtime,
}

#[derive(Parser)]
#[command(name = "price-alert", about = "Crypto price monitor with multi-channel alerts")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Monitor the price and evaluate alerts until Ctrl+C
    Run,
    /// Resolve the current price once and print it
    Price,
    /// Manage alerts
    #[command(subcommand)]
    Alert(AlertCommand),
}

#[derive(Subcommand)]
enum AlertCommand {
    List,
    Add(AlertArgs),
    Update {
        id: i64,
        #[command(flatten)]
        args: AlertArgs,
    },
    /// Pause or resume an alert
    Toggle { id: i64 },
    /// Re-arm a triggered alert
    Reset { id: i64 },
    Delete { id: i64 },
    /// Send a test notification with the current price
    Test { id: i64 },
}

#[derive(Args)]
struct AlertArgs {
    #[arg(long)]
    name: String,
    /// above | below | change
    #[arg(long)]
    kind: String,
    #[arg(long)]
    target: Option<f64>,
    /// Signed 24h percentage; negative values watch for drops
    #[arg(long, allow_hyphen_values = true)]
    threshold: Option<f64>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    telegram_chat_id: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    push: bool,
    #[arg(long, default_value = "en")]
    locale: String,
}

impl From<AlertArgs> for NewAlert {
    fn from(args: AlertArgs) -> Self {
        NewAlert {
            name: args.name,
            kind: args.kind,
            target_price: args.target,
            percentage_threshold: args.threshold,
            channels: ChannelSettings {
                email_enabled: args.email.is_some(),
                email: args.email,
                telegram_enabled: args.telegram_chat_id.is_some(),
                telegram_chat_id: args.telegram_chat_id,
                push_enabled: args.push,
                whatsapp_enabled: args.phone.is_some(),
                phone_number: args.phone,
                locale: args.locale,
            },
        }
    }
}

/// Everything the commands share, wired once from config.
struct App {
    storage: Arc<SqliteStorage>,
    resolver: Arc<PriceResolver>,
    cache: Arc<PriceCache>,
    checker: AlertChecker,
}

impl App {
    async fn build(config: &AppConfig) -> Result<Self, Report<AppError>> {
        let db_path = Path::new(&config.general.data_dir).join("price-alert.db");
        let storage = Arc::new(
            SqliteStorage::open(&db_path)
                .await
                .change_context(AppError::Storage)?,
        );

        let providers =
            provider::build_providers(&config.providers).change_context(AppError::Price)?;
        let resolver = Arc::new(PriceResolver::new(
            providers,
            config.providers.request_timeout(),
        ));
        let cache = Arc::new(PriceCache::new(config.monitor.history_capacity));

        let dispatcher = Arc::new(
            Dispatcher::from_config(&config.channels, storage.clone())
                .change_context(AppError::Config)?,
        );
        info!(channels = ?dispatcher.channel_names(), "notification channels registered");
        let checker = AlertChecker::new(storage.clone(), dispatcher);

        Ok(Self {
            storage,
            resolver,
            cache,
            checker,
        })
    }

    fn service(&self) -> AlertService {
        AlertService::new(
            self.storage.clone(),
            self.checker.clone(),
            self.cache.clone(),
            self.resolver.clone(),
        )
    }
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();
    let config = config::load(Path::new(&cli.config)).change_context(AppError::Config)?;

    init_tracing(&config);

    let app = App::build(&config).await?;

    match cli.command {
        Command::Run => run_monitor(&app, &config).await,
        Command::Price => {
            let reading = app
                .resolver
                .get_current_price()
                .await
                .change_context(AppError::Price)?;
            let change = reading
                .percentage_change
                .map(|c| format!(" ({c:+.2}% 24h)"))
                .unwrap_or_default();
            println!(
                "{:.2} {}{} via {} at {}",
                reading.price,
                reading.currency,
                change,
                reading.source,
                reading.timestamp.to_rfc3339()
            );
            Ok(())
        }
        Command::Alert(command) => run_alert_command(&app.service(), command)
            .await
            .change_context(AppError::Alert),
    }
}

async fn run_monitor(app: &App, config: &AppConfig) -> Result<(), Report<AppError>> {
    let monitor = PriceMonitor::new(
        app.resolver.clone(),
        app.cache.clone(),
        config.monitor.interval(),
    );
    monitor.subscribe(Arc::new(app.checker.clone()));

    let cancel = CancellationToken::new();
    monitor
        .start(&cancel)
        .await
        .change_context(AppError::Runtime)?;

    tokio::signal::ctrl_c()
        .await
        .change_context(AppError::Runtime)?;

    info!("ctrl+c received, shutting down");
    cancel.cancel();

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, monitor.stop())
        .await
        .is_err()
    {
        tracing::warn!("price monitor did not stop in time");
    }

    let recent: Vec<f64> = app.cache.history(5).iter().map(|e| e.price).collect();
    info!(
        running = monitor.is_running().await,
        cached = app.cache.len(),
        ?recent,
        "shutdown complete"
    );
    Ok(())
}

async fn run_alert_command(
    service: &AlertService,
    command: AlertCommand,
) -> Result<(), Report<error::AlertError>> {
    match command {
        AlertCommand::List => {
            for alert in service.list_alerts().await? {
                print_alert(&alert);
            }
        }
        AlertCommand::Add(args) => print_alert(&service.create_alert(args.into()).await?),
        AlertCommand::Update { id, args } => {
            print_alert(&service.update_alert(id, args.into()).await?)
        }
        AlertCommand::Toggle { id } => print_alert(&service.toggle_alert(id).await?),
        AlertCommand::Reset { id } => print_alert(&service.reset_alert(id).await?),
        AlertCommand::Delete { id } => {
            service.delete_alert(id).await?;
            println!("deleted alert {id}");
        }
        AlertCommand::Test { id } => {
            let report = service.test_alert_by_id(id).await?;
            println!(
                "sent: [{}] failed: [{}]",
                report.sent.join(", "),
                report.failed.join(", ")
            );
        }
    }
    Ok(())
}

fn print_alert(alert: &Alert) {
    let condition = match (alert.condition.target_price(), alert.condition.percentage_threshold()) {
        (Some(target), _) => format!("{} {target:.2}", alert.condition.kind()),
        (_, Some(threshold)) => format!("{} {threshold:+.2}%", alert.condition.kind()),
        _ => alert.condition.kind().to_owned(),
    };
    let state = match alert.last_triggered_at() {
        Some(at) => format!("triggered at {}", at.to_rfc3339()),
        None => "armed".to_owned(),
    };
    println!(
        "#{} {} [{}] {}, {} (fired {}x){}",
        alert.id,
        alert.name,
        condition,
        if alert.is_active { "active" } else { "paused" },
        state,
        alert.trigger_count,
        if alert.channels.locale == "en" {
            String::new()
        } else {
            format!(" locale={}", alert.channels.locale)
        }
    );
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
