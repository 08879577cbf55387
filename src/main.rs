use std::time::Duration;

use anyhow::Context;
use backon::BlockingRetryable;
use backon::ConstantBuilder;
use config::Config;
use connectivity::ConnectivitySupervisor;
use decoder::SerialDecoder;
use link::LinkMonitor;
use nmcli::NmcliProvisioner;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use tokio::sync::oneshot;

mod acquisition;
mod config;
mod connectivity;
mod decoder;
mod link;
mod nmcli;
mod reading;
mod report;
mod uploader;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env().context("Failed to load configuration")?;

    TermLogger::init(
        config.log_level,
        ConfigBuilder::new()
            .set_time_format_rfc3339()
            .set_time_offset_to_local()
            .map_err(|_| anyhow::anyhow!("Failed to set time offset to local"))?
            .build(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")?;

    log::info!("Firmware version: {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(config).await {
        log::error!("{e:#}");
    }

    Ok(())
}

pub async fn run(config: Config) -> Result<(), anyhow::Error> {
    let retry_builder = ConstantBuilder::default()
        .with_delay(Duration::from_millis(100))
        .with_max_times(20);

    let uart = (|| decoder::open_uart(&config.serial_port, config.baud_rate))
        .retry(retry_builder)
        .notify(|e, dur| {
            log::error!("{e}");
            log::info!("Retrying in {:?}", dur);
        })
        .call()?;
    let decoder = SerialDecoder::new(uart, config.decode_timeout, config.sensor_ids.clone());

    let supervisor = ConnectivitySupervisor::new(
        NmcliProvisioner::new(&config.wifi_interface),
        &config.portal_name,
        config.portal_timeout,
    );
    log::info!("Starting execution...");
    supervisor.ensure_connected(None).await;
    log::info!("Connectivity: {:?}", supervisor.current_state());

    let mut link_monitor = LinkMonitor::new(&config.wifi_interface, config.link_poll);
    let handle = supervisor.clone();
    link_monitor.on_link_lost(move || handle.on_link_lost());
    link_monitor.spawn();

    // The HTTP client blocks, so the whole acquisition loop lives off the runtime.
    let (done_tx, done_rx) = oneshot::channel();
    let acquisition_config = config.clone();
    std::thread::Builder::new()
        .name("acquisition".to_string())
        .spawn(move || {
            let _ = done_tx.send(acquisition::start(decoder, &acquisition_config));
        })
        .context("Failed to spawn acquisition thread")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to wait for Ctrl+C signal")?;
        }
        result = done_rx => {
            match result.context("Acquisition thread exited")? {
                Ok(never) => match never {},
                Err(e) => return Err(e.context("Acquisition stopped")),
            }
        }
    }

    Ok(())
}
