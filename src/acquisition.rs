use std::convert::Infallible;
use std::time::Duration;

use anyhow::Context;

use crate::config::Config;
use crate::decoder::{DecodeStatus, Decoder};
use crate::reading::Reading;
use crate::report::Report;
use crate::uploader::{AmmsClient, Transport, Uploader};

pub const IDLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub enum DecodeOutcome<'a> {
    Success(&'a Reading),
    Timeout,
    Error(anyhow::Error),
}

/// One bounded attempt to obtain a fresh reading into the decode slot.
#[derive(Debug)]
pub struct DecodeCycle<D> {
    decoder: D,
    slot: Reading,
}

impl<D: Decoder> DecodeCycle<D> {
    pub fn new(decoder: D) -> DecodeCycle<D> {
        DecodeCycle {
            decoder,
            slot: Reading::default(),
        }
    }

    pub fn poll(&mut self) -> DecodeOutcome<'_> {
        self.slot.clear();
        match self.decoder.decode(&mut self.slot) {
            DecodeStatus::Ok => DecodeOutcome::Success(&self.slot),
            DecodeStatus::Timeout => DecodeOutcome::Timeout,
            DecodeStatus::Error(e) => DecodeOutcome::Error(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    /// A report with this many fields was handed to the uploader.
    Reported(usize),
    Timeout,
    DecodeError,
}

#[derive(Debug)]
pub struct AcquisitionLoop<D, T> {
    cycle: DecodeCycle<D>,
    uploader: Uploader<T>,
}

impl<D: Decoder, T: Transport> AcquisitionLoop<D, T> {
    pub fn new(decoder: D, uploader: Uploader<T>) -> AcquisitionLoop<D, T> {
        AcquisitionLoop {
            cycle: DecodeCycle::new(decoder),
            uploader,
        }
    }

    pub fn run_once(&mut self) -> Iteration {
        match self.cycle.poll() {
            DecodeOutcome::Success(reading) => {
                log::info!("{reading}");
                if !reading.has_valid_slot() {
                    log::debug!("Reading from {:X} carries no measurements", reading.sensor_id);
                }
                let report = Report::build(reading);
                let fields = report.len();
                match serde_json::to_string(&report) {
                    Ok(json) => log::debug!("Report: {json}"),
                    Err(e) => log::debug!("Failed to render report: {e}"),
                }

                log::info!("Sending data");
                self.uploader.send(report);
                Iteration::Reported(fields)
            }
            DecodeOutcome::Timeout => Iteration::Timeout,
            DecodeOutcome::Error(e) => {
                log::warn!("Decode failed: {e:#}");
                Iteration::DecodeError
            }
        }
    }

    pub fn run(mut self) -> ! {
        loop {
            self.iterate(std::thread::sleep);
        }
    }

    /// One iteration followed by the idle delay.
    fn iterate(&mut self, idle: impl FnOnce(Duration)) -> Iteration {
        let iteration = self.run_once();
        if let Iteration::Reported(fields) = iteration {
            log::debug!("Uploaded report with {fields} fields");
        }
        idle(IDLE_DELAY);
        iteration
    }
}

/// Authenticates against the cloud service and runs the acquisition loop on
/// the calling thread. Only returns on a setup failure.
pub fn start<D: Decoder>(decoder: D, config: &Config) -> Result<Infallible, anyhow::Error> {
    let mut transport = AmmsClient::new(&config.amms_endpoint, config.amms_timeout)
        .context("Failed to initialize AMMS client")?;
    transport
        .authenticate(&config.amms_token)
        .context("Failed to authenticate with AMMS")?;

    let uploader = Uploader::new(transport, config.upload_failure);
    AcquisitionLoop::new(decoder, uploader).run()
}
