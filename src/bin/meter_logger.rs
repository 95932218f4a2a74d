//! Meter Logger
//!
//! Polls the meters listed in the settings file through one Modbus TCP
//! gateway and forwards their readings to the ingestion service.
//!
//! Usage: meter-logger [--config setting.json] [--device-ip IP] [--check]

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use voltage_meter_logger::config::DEFAULT_SETTINGS_FILE;
use voltage_meter_logger::{
    health_check_worker, init_logging, wait_for_shutdown, AppConfig, ConfigOverrides,
    HttpIngestClient, MeterContext, PollScheduler, Supervisor, TcpSession,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Meter Logger - Modbus TCP meter acquisition")]
struct Args {
    /// Settings file
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "METER_LOGGER_CONFIG",
        default_value = DEFAULT_SETTINGS_FILE
    )]
    config: PathBuf,

    /// Gateway address, overrides Device_IP
    #[arg(long, value_name = "IP")]
    device_ip: Option<String>,

    /// Gateway port, overrides Device_Port
    #[arg(long, value_name = "PORT")]
    device_port: Option<u16>,

    /// Ingestion service URL, overrides API_BASE_URL and ingest.base_url
    #[arg(long, value_name = "URL")]
    api_base_url: Option<String>,

    /// Validate the configuration, log the read plan and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let overrides = ConfigOverrides {
        device_ip: args.device_ip,
        device_port: args.device_port,
        api_base_url: args.api_base_url,
    };

    let config = AppConfig::load_with(&args.config, &overrides)
        .with_context(|| format!("loading {}", args.config.display()))?;
    init_logging(config.settings.debug, config.settings.troubleshoot)?;

    let settings = &config.settings;
    info!("{}", "=".repeat(60));
    info!("Home Logger - Modbus TCP Mode");
    info!("{}", "=".repeat(60));
    info!("Device: {}:{}", settings.device_ip, settings.device_port);
    info!("Logger ID: {}", settings.logger_id);
    info!("Troubleshoot: {}", settings.troubleshoot);
    info!("Ingestion: {}", settings.ingest.base_url);

    if args.check {
        log_plan(&config);
        info!("Configuration OK");
        return Ok(());
    }

    run(config).await
}

fn log_plan(config: &AppConfig) {
    let planner = config.settings.planner();
    for device in &config.devices {
        let meter = MeterContext::new(device.clone(), &planner);
        info!(
            "{} (unit {}, model {}, fc {:02X}): {} params in {} reads, {} per instant cycle",
            meter.name(),
            device.unit_id,
            device.model,
            device.function_code,
            device.parameters.len(),
            meter.full_groups.len(),
            meter.instant_groups.len()
        );
        for group in &meter.full_groups {
            let members: Vec<&str> = group.members.iter().map(|m| m.parameter.name()).collect();
            info!("  {}+{}: {}", group.start, group.count, members.join(", "));
        }
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let ingest = HttpIngestClient::new(config.settings.ingest.clone())?;
    let health_client = ingest.clone();
    let session = TcpSession::new(config.settings.session_config());

    let mut scheduler = PollScheduler::from_config(&config, session, ingest);
    let mut supervisor = Supervisor::new(config.settings.supervisor);

    info!(
        "Starting meter reading loop, target {}",
        config.settings.session_config().address()
    );

    let outcome = tokio::select! {
        result = supervisor.supervise(&mut scheduler) => match result {
            Ok(never) => match never {},
            Err(e) => Err(e),
        },
        _ = health_check_worker(&health_client, config.settings.health) => Ok(()),
        signal = wait_for_shutdown() => {
            info!("Received {}, stopping", signal);
            Ok(())
        }
    };

    scheduler.shutdown().await;

    if let Err(e) = &outcome {
        error!("Exiting: {}", e);
    }
    outcome.context("meter logger stopped")
}
