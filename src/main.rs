//! CLI entry point for the De Lijn tracker.
//!
//! Provides subcommands for setting up tracked departures (halte, line and
//! time), removing them, and polling the De Lijn Open Data API to publish
//! waiting-time and delay sensors.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use delijn_tracker::config::TrackerConfig;
use delijn_tracker::coordinator::Coordinator;
use delijn_tracker::flow::{KEEP_ALL_OPTION, SetupFlow, removal_options};
use delijn_tracker::fetch::BasicClient;
use delijn_tracker::fetch::auth::ApiKey;
use delijn_tracker::infra::delijn::DeLijnClient;
use delijn_tracker::output::{SensorReading, append_record, print_pretty, write_state};
use delijn_tracker::schedule::{now_brussels, parse_date};
use delijn_tracker::sensor::{Sensor, SensorState};
use delijn_tracker::services::transit_api::{ScheduleQuery, TransitApi};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "delijn_tracker")]
#[command(about = "Track De Lijn departures and their real-time delays", long_about = None)]
struct Cli {
    /// Tracker configuration file
    #[arg(
        short,
        long,
        env = "DELIJN_TRACKER_CONFIG",
        default_value = "delijn_tracker.json",
        global = true
    )]
    config: PathBuf,

    /// De Lijn Open Data subscription key (overrides the stored one)
    #[arg(long, env = "DELIJN_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Override the API base URL
    #[arg(long, env = "DELIJN_API_BASE_URL", global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the API key is accepted
    Validate {
        /// Store the key in the configuration file once validated
        #[arg(long, default_value_t = false)]
        save: bool,
    },
    /// List the lines served at a halte
    Lines {
        /// Six-digit halte number
        halte: String,
    },
    /// List the scheduled departures of a line at a halte
    Times {
        halte: String,
        line: String,

        /// Service day (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Track a departure; lists the choices when --line or --time is missing
    Add {
        halte: String,

        #[arg(short, long)]
        line: Option<String>,

        /// Departure as HH:MM or HH:MM_ritnummer
        #[arg(short, long)]
        time: Option<String>,

        /// Service day to pick the departure from (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Stop tracking a device
    Remove {
        /// Device id as shown by `devices`
        unique_id: String,
    },
    /// List tracked devices
    Devices,
    /// Refresh once and print all sensor states as JSON
    Status,
    /// Poll continuously until Ctrl+C
    Run {
        /// CSV file to append every sensor reading to
        #[arg(long)]
        history: Option<PathBuf>,

        /// JSON file overwritten with the latest sensor states
        #[arg(long)]
        state_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let _file_guard = init_logging()?;

    let Cli {
        config: config_path,
        api_key,
        base_url,
        command,
    } = Cli::parse();
    let mut config = TrackerConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let connect = |config: &TrackerConfig| client_from(config, api_key.clone(), base_url.as_deref());

    match command {
        Commands::Validate { save } => {
            let api_key = require_api_key(&config, api_key.clone())?;
            let api = build_client(&api_key, base_url.as_deref(), &config)?;
            let flow = SetupFlow::new(&api);
            if let Err(e) = flow.validate_api_key().await {
                bail!("API key rejected ({}): {e}", e.flow_key());
            }
            info!("API key accepted");

            if save {
                config.api_key = Some(api_key);
                config.save(&config_path)?;
                info!(path = %config_path.display(), "API key stored");
            }
        }
        Commands::Lines { halte } => {
            let api = connect(&config)?;
            let lines = api.available_lines(&halte).await?;
            if lines.is_empty() {
                warn!(halte = %halte, "No lines available");
            }
            for line in &lines {
                info!(
                    line = %line.lijnnummer,
                    public_line = %line.public_line,
                    description = %line.description,
                    halte_name = %line.halte_name,
                    "Line"
                );
            }
        }
        Commands::Times { halte, line, date } => {
            let api = connect(&config)?;
            let date = date.as_deref().map(parse_date).transpose()?;
            let times = api
                .schedule_times(&ScheduleQuery::new(&halte, &line).on(date))
                .await?;
            if times.is_empty() {
                warn!(halte = %halte, line = %line, "No times available");
            }
            for t in &times {
                info!(
                    option = %t.option_key(),
                    date = %t.date,
                    destination = %t.destination,
                    "Departure"
                );
            }
        }
        Commands::Add {
            halte,
            line,
            time,
            date,
        } => {
            let api = connect(&config)?;
            let date = date.as_deref().map(parse_date).transpose()?;
            let mut flow = SetupFlow::new(&api);

            flow.select_halte(&halte).await?;
            let Some(line) = line else {
                for (key, label) in flow.line_options() {
                    info!(line = %key, "{label}");
                }
                info!("Pass --line to pick one of these lines");
                return Ok(());
            };

            flow.select_line(&line, date).await?;
            let Some(time) = time else {
                for (key, label) in flow.time_options() {
                    info!(time = %key, "{label}");
                }
                info!("Pass --time with one of these departures");
                return Ok(());
            };
            let key = match flow.time_option_for(&time) {
                Ok(key) => key,
                Err(e) => {
                    for (key, label) in flow.time_options() {
                        info!(time = %key, "{label}");
                    }
                    return Err(e.into());
                }
            };

            let device = flow.select_time(&key)?;
            let unique_id = device.device_id();
            if config.devices.is_empty() {
                if let Some(title) = flow.entry_title() {
                    info!(title = %title, "Creating tracker configuration");
                }
            }
            config.add_device(device)?;
            config.save(&config_path)?;
            info!(device = %unique_id, "Device added");
        }
        Commands::Remove { unique_id } => {
            if unique_id == KEEP_ALL_OPTION {
                info!("Nothing removed");
                return Ok(());
            }
            config.remove_device(&unique_id)?;
            config.save(&config_path)?;
            info!(device = %unique_id, "Device removed");
        }
        Commands::Devices => {
            for (key, label) in removal_options(&config)
                .into_iter()
                .filter(|(key, _)| key != KEEP_ALL_OPTION)
            {
                info!(device = %key, "{label}");
            }
            info!(total = config.devices.len(), "Tracked devices");
        }
        Commands::Status => {
            let api = connect(&config)?;
            let sensors = Sensor::for_devices(&config.devices);
            let mut coordinator = Coordinator::new(api, &config);

            let now = now_brussels();
            let snapshot = coordinator.refresh(now).await?;
            let states: Vec<SensorState> =
                sensors.iter().map(|s| s.state(&snapshot, &now)).collect();

            print_pretty(&states);
            println!("{}", serde_json::to_string_pretty(&states)?);
        }
        Commands::Run {
            history,
            state_file,
        } => {
            if config.devices.is_empty() {
                bail!("No devices configured; add one with `add` first");
            }

            let api = connect(&config)?;
            let sensors = Sensor::for_devices(&config.devices);
            let mut coordinator = Coordinator::new(api, &config);

            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
            };

            coordinator
                .run(shutdown, |snapshot, now| {
                    let states: Vec<SensorState> =
                        sensors.iter().map(|s| s.state(snapshot, now)).collect();

                    for state in &states {
                        info!(
                            sensor = %state.name,
                            value = ?state.value,
                            unit = state.unit,
                            "Sensor updated"
                        );
                    }

                    if let Some(path) = &history {
                        for state in &states {
                            let reading = SensorReading::from_state(state, now);
                            if let Err(e) = append_record(path, &reading) {
                                error!(error = %e, "Failed to append history");
                            }
                        }
                    }

                    if let Some(path) = &state_file {
                        if let Err(e) = write_state(path, &states) {
                            error!(error = %e, "Failed to write state file");
                        }
                    }
                })
                .await;
        }
    }

    Ok(())
}

/// Colored stderr logging plus a JSON rolling log file. The returned guard
/// must be held for the file writer to flush.
fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/delijn_tracker.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("delijn_tracker.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    Ok(file_guard)
}

fn require_api_key(config: &TrackerConfig, cli_key: Option<String>) -> Result<String> {
    config
        .resolve_api_key(cli_key)
        .context("No API key configured; set DELIJN_API_KEY or run `validate --save`")
}

type Client = DeLijnClient<ApiKey<BasicClient>>;

fn build_client(api_key: &str, cli_base_url: Option<&str>, config: &TrackerConfig) -> Result<Client> {
    let base_url = cli_base_url.or(config.base_url.as_deref());
    Ok(DeLijnClient::with_api_key(api_key, base_url)?)
}

fn client_from(
    config: &TrackerConfig,
    cli_key: Option<String>,
    cli_base_url: Option<&str>,
) -> Result<Client> {
    let api_key = require_api_key(config, cli_key)?;
    build_client(&api_key, cli_base_url, config)
}
