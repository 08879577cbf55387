use std::time::{Duration, Instant};

use anyhow::Context;
use rppal::uart::{Parity, Uart};
use serde::Deserialize;

use crate::reading::Reading;

pub const PARITY: Parity = Parity::None;
pub const DATA_BITS: u8 = 8;
pub const STOP_BITS: u8 = 1;

/// Longest frame line accepted from the receiver.
pub const MAX_LINE_LEN: usize = 1024;

// VTIME granularity of the tty driver.
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Result of one bounded decode attempt.
#[derive(Debug)]
pub enum DecodeStatus {
    Ok,
    Timeout,
    Error(anyhow::Error),
}

/// Radio decoder collaborator.
///
/// `decode` must return within a small multiple of the expected time on air
/// whether or not a transmission arrives. On [`DecodeStatus::Ok`] the
/// mandatory fields of `slot` are populated; optional slots are only set when
/// the transmission carried them.
pub trait Decoder {
    fn decode(&mut self, slot: &mut Reading) -> DecodeStatus;
}

/// Byte stream the receiver module writes decoded frames to.
pub trait ByteSource {
    /// Reads at most `buf.len()` bytes, waiting no longer than roughly
    /// `timeout`. Returns `Ok(0)` when nothing arrived in time.
    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, anyhow::Error>;
}

impl ByteSource for Uart {
    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, anyhow::Error> {
        self.set_read_mode(0, timeout.max(MIN_READ_TIMEOUT))
            .context("Failed to set read mode")?;
        let read = self.read(buf).context("Failed to read from UART")?;
        Ok(read)
    }
}

pub fn open_uart(path: &str, baud_rate: u32) -> Result<Uart, anyhow::Error> {
    let uart = Uart::with_path(path, baud_rate, PARITY, DATA_BITS, STOP_BITS)
        .with_context(|| format!("Failed to open UART {path}"))?;
    Ok(uart)
}

/// One JSON frame as emitted by the receiver (rtl_433 field names).
#[derive(Debug, Deserialize)]
struct Frame {
    id: u32,
    #[serde(default, alias = "subtype")]
    sensor_type: u8,
    battery_ok: Option<u8>,
    rssi: Option<f32>,
    #[serde(rename = "temperature_C")]
    temperature_c: Option<f32>,
    humidity: Option<u8>,
    wind_max_m_s: Option<f32>,
    wind_avg_m_s: Option<f32>,
    wind_dir_deg: Option<f32>,
    rain_mm: Option<f32>,
    moisture: Option<u8>,
}

impl Frame {
    fn parse(line: &[u8]) -> Result<Frame, anyhow::Error> {
        serde_json::from_slice(line).context("Malformed frame")
    }

    fn fill(self, slot: &mut Reading) {
        slot.sensor_id = self.id;
        slot.sensor_type = self.sensor_type;
        // A frame without a battery flag comes from a sensor that does not
        // report one.
        slot.battery_ok = self.battery_ok.is_none_or(|b| b != 0);
        slot.rssi = self.rssi.unwrap_or_default();
        slot.temperature_c = self.temperature_c;
        slot.humidity = self.humidity;
        slot.wind_gust_meter_sec = self.wind_max_m_s;
        slot.wind_avg_meter_sec = self.wind_avg_m_s;
        slot.wind_direction_deg = self.wind_dir_deg;
        slot.rain_mm = self.rain_mm;
        slot.moisture = self.moisture;
    }
}

/// Decoder reading newline-delimited JSON frames from a serial receiver.
#[derive(Debug)]
pub struct SerialDecoder<S> {
    source: S,
    budget: Duration,
    accepted_ids: Vec<u32>,
    buffer: Vec<u8>,
}

impl<S: ByteSource> SerialDecoder<S> {
    /// `accepted_ids` empty means every sensor is accepted.
    pub fn new(source: S, budget: Duration, accepted_ids: Vec<u32>) -> SerialDecoder<S> {
        SerialDecoder {
            source,
            budget,
            accepted_ids,
            buffer: Vec::with_capacity(MAX_LINE_LEN),
        }
    }

    fn accepts(&self, id: u32) -> bool {
        self.accepted_ids.is_empty() || self.accepted_ids.contains(&id)
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }
}

impl<S: ByteSource> Decoder for SerialDecoder<S> {
    fn decode(&mut self, slot: &mut Reading) -> DecodeStatus {
        let deadline = Instant::now() + self.budget;
        let mut chunk = [0u8; 256];

        loop {
            while let Some(line) = self.take_line() {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                if line.len() > MAX_LINE_LEN {
                    return DecodeStatus::Error(anyhow::anyhow!(
                        "Frame too long: {} bytes",
                        line.len()
                    ));
                }

                let frame = match Frame::parse(&line) {
                    Ok(frame) => frame,
                    Err(e) => return DecodeStatus::Error(e),
                };
                if !self.accepts(frame.id) {
                    log::debug!("Ignoring frame from sensor {:X}", frame.id);
                    continue;
                }

                frame.fill(slot);
                return DecodeStatus::Ok;
            }

            if self.buffer.len() > MAX_LINE_LEN {
                let len = self.buffer.len();
                self.buffer.clear();
                return DecodeStatus::Error(anyhow::anyhow!("Frame too long: {len} bytes"));
            }

            let now = Instant::now();
            if now >= deadline {
                return DecodeStatus::Timeout;
            }

            match self.source.read_chunk(&mut chunk, deadline - now) {
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) => return DecodeStatus::Error(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Replays scripted chunks; an exhausted script behaves like a silent line.
    struct Script {
        chunks: VecDeque<Result<Vec<u8>, String>>,
    }

    impl Script {
        fn new(chunks: &[&str]) -> Script {
            Script {
                chunks: chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect(),
            }
        }
    }

    impl ByteSource for Script {
        fn read_chunk(
            &mut self,
            buf: &mut [u8],
            timeout: Duration,
        ) -> Result<usize, anyhow::Error> {
            match self.chunks.pop_front() {
                Some(Ok(mut bytes)) => {
                    if bytes.len() > buf.len() {
                        let rest = bytes.split_off(buf.len());
                        self.chunks.push_front(Ok(rest));
                    }
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(anyhow::anyhow!(e)),
                None => {
                    std::thread::sleep(timeout);
                    Ok(0)
                }
            }
        }
    }

    fn decoder(chunks: &[&str]) -> SerialDecoder<Script> {
        SerialDecoder::new(Script::new(chunks), Duration::from_millis(20), Vec::new())
    }

    #[test]
    fn test_decode_full_frame() {
        let mut decoder = decoder(&[concat!(
            r#"{"model":"Bresser-6in1","id":6699,"subtype":1,"battery_ok":1,"#,
            r#""temperature_C":21.5,"humidity":48,"wind_max_m_s":3.2,"wind_avg_m_s":2.1,"#,
            r#""wind_dir_deg":270.0,"rain_mm":12.4,"moisture":30,"rssi":-71.5}"#,
            "\n"
        )]);
        let mut slot = Reading::default();

        assert!(matches!(decoder.decode(&mut slot), DecodeStatus::Ok));
        assert_eq!(slot.sensor_id, 6699);
        assert_eq!(slot.sensor_type, 1);
        assert!(slot.battery_ok);
        assert_eq!(slot.rssi, -71.5);
        assert_eq!(slot.temperature_c, Some(21.5));
        assert_eq!(slot.humidity, Some(48));
        assert_eq!(slot.wind_gust_meter_sec, Some(3.2));
        assert_eq!(slot.wind_avg_meter_sec, Some(2.1));
        assert_eq!(slot.wind_direction_deg, Some(270.0));
        assert_eq!(slot.rain_mm, Some(12.4));
        assert_eq!(slot.moisture, Some(30));
    }

    #[test]
    fn test_partial_frame_leaves_missing_slots_invalid() {
        let mut decoder = decoder(&["{\"id\":6699,\"battery_ok\":0,\"temperature_C\":-3.5}\r\n"]);
        let mut slot = Reading::default();

        assert!(matches!(decoder.decode(&mut slot), DecodeStatus::Ok));
        assert!(!slot.battery_ok);
        assert_eq!(slot.temperature_c, Some(-3.5));
        assert_eq!(slot.humidity, None);
        assert_eq!(slot.rain_mm, None);
    }

    #[test]
    fn test_frame_split_across_reads() {
        let mut decoder = decoder(&["{\"id\":1,\"hum", "idity\":55}\n"]);
        let mut slot = Reading::default();

        assert!(matches!(decoder.decode(&mut slot), DecodeStatus::Ok));
        assert_eq!(slot.humidity, Some(55));
    }

    #[test]
    fn test_silence_times_out() {
        let mut decoder = decoder(&[]);
        let mut slot = Reading::default();

        assert!(matches!(decoder.decode(&mut slot), DecodeStatus::Timeout));
    }

    #[test]
    fn test_incomplete_line_is_kept_for_next_poll() {
        let mut decoder = decoder(&["{\"id\":7,\"rain_mm\":"]);
        let mut slot = Reading::default();
        assert!(matches!(decoder.decode(&mut slot), DecodeStatus::Timeout));

        decoder.source.chunks.push_back(Ok(b"0.8}\n".to_vec()));
        assert!(matches!(decoder.decode(&mut slot), DecodeStatus::Ok));
        assert_eq!(slot.rain_mm, Some(0.8));
    }

    #[test]
    fn test_malformed_frame_is_error() {
        let mut decoder = decoder(&["not json\n"]);
        let mut slot = Reading::default();

        assert!(matches!(decoder.decode(&mut slot), DecodeStatus::Error(_)));
    }

    #[test]
    fn test_frame_without_id_is_error() {
        let mut decoder = decoder(&["{\"temperature_C\":20.0}\n"]);
        let mut slot = Reading::default();

        assert!(matches!(decoder.decode(&mut slot), DecodeStatus::Error(_)));
    }

    #[test]
    fn test_read_failure_is_error() {
        let mut decoder = SerialDecoder::new(
            Script {
                chunks: VecDeque::from([Err("device unplugged".to_string())]),
            },
            Duration::from_millis(20),
            Vec::new(),
        );
        let mut slot = Reading::default();

        assert!(matches!(decoder.decode(&mut slot), DecodeStatus::Error(_)));
    }

    #[test]
    fn test_oversized_line_is_discarded() {
        let junk = "x".repeat(MAX_LINE_LEN + 1);
        let mut decoder = decoder(&[&junk, "{\"id\":1,\"humidity\":40}\n"]);
        let mut slot = Reading::default();

        assert!(matches!(decoder.decode(&mut slot), DecodeStatus::Error(_)));
        assert!(matches!(decoder.decode(&mut slot), DecodeStatus::Ok));
        assert_eq!(slot.humidity, Some(40));
    }

    #[test]
    fn test_unaccepted_sensor_is_skipped() {
        let mut decoder = SerialDecoder::new(
            Script::new(&[
                "{\"id\":1,\"temperature_C\":10.0}\n",
                "{\"id\":2,\"temperature_C\":20.0}\n",
            ]),
            Duration::from_millis(20),
            vec![2],
        );
        let mut slot = Reading::default();

        assert!(matches!(decoder.decode(&mut slot), DecodeStatus::Ok));
        assert_eq!(slot.sensor_id, 2);
        assert_eq!(slot.temperature_c, Some(20.0));
    }

    #[test]
    fn test_only_unaccepted_sensors_times_out() {
        let mut decoder = SerialDecoder::new(
            Script::new(&["{\"id\":1,\"temperature_C\":10.0}\n"]),
            Duration::from_millis(20),
            vec![2],
        );
        let mut slot = Reading::default();

        assert!(matches!(decoder.decode(&mut slot), DecodeStatus::Timeout));
    }
}
