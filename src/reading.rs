use std::fmt;

/// One decoded transmission from the weather sensor.
///
/// Every optional measurement is an `Option`: `None` is an invalid slot.
/// The decode slot is reused across iterations and must be [`Reading::clear`]ed
/// before each decode attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reading {
    pub sensor_id: u32,
    pub sensor_type: u8,
    pub battery_ok: bool,
    pub rssi: f32,
    pub temperature_c: Option<f32>,
    pub humidity: Option<u8>,
    pub wind_gust_meter_sec: Option<f32>,
    pub wind_avg_meter_sec: Option<f32>,
    pub wind_direction_deg: Option<f32>,
    pub rain_mm: Option<f32>,
    pub moisture: Option<u8>,
}

impl Reading {
    pub fn clear(&mut self) {
        *self = Reading::default();
    }

    pub fn has_valid_slot(&self) -> bool {
        self.temperature_c.is_some()
            || self.humidity.is_some()
            || self.wind_gust_meter_sec.is_some()
            || self.wind_avg_meter_sec.is_some()
            || self.wind_direction_deg.is_some()
            || self.rain_mm.is_some()
            || self.moisture.is_some()
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Id: [{:8X}] Typ: [{:X}] Battery: [{}] ",
            self.sensor_id,
            self.sensor_type,
            if self.battery_ok { "OK " } else { "Low" }
        )?;

        match self.temperature_c {
            Some(t) => write!(f, "Temp: [{t:5.1}C] ")?,
            None => write!(f, "Temp: [---.-C] ")?,
        }
        match self.humidity {
            Some(h) => write!(f, "Hum: [{h:3}%] ")?,
            None => write!(f, "Hum: [---%] ")?,
        }
        match self.wind_gust_meter_sec {
            Some(w) => write!(f, "Wind max: [{w:4.1}m/s] ")?,
            None => write!(f, "Wind max: [--.-m/s] ")?,
        }
        match self.wind_avg_meter_sec {
            Some(w) => write!(f, "Wind avg: [{w:4.1}m/s] ")?,
            None => write!(f, "Wind avg: [--.-m/s] ")?,
        }
        match self.wind_direction_deg {
            Some(d) => write!(f, "Wind dir: [{d:5.1}deg] ")?,
            None => write!(f, "Wind dir: [---.-deg] ")?,
        }
        match self.rain_mm {
            Some(r) => write!(f, "Rain: [{r:7.1}mm] ")?,
            None => write!(f, "Rain: [-----.-mm] ")?,
        }
        match self.moisture {
            Some(m) => write!(f, "Moisture: [{m:2}%] ")?,
            None => write!(f, "Moisture: [--%] ")?,
        }

        write!(f, "RSSI: [{:5.1}dBm]", self.rssi)
    }
}
