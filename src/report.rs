use std::collections::BTreeMap;

use serde::Serialize;

use crate::reading::Reading;

/// Names the ingestion endpoint accepts. Wind gust and soil moisture have no
/// field; they only appear on the console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Temperature,
    Humidity,
    WindSpeed,
    WindDirection,
    Precipitation,
}

/// Telemetry built from the valid slots of one reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Report {
    fields: BTreeMap<Field, f32>,
}

impl Report {
    /// Builds a report from exactly the valid slots of `reading`. Invalid
    /// slots are omitted, never zero-filled.
    pub fn build(reading: &Reading) -> Report {
        let slots = [
            (Field::Temperature, reading.temperature_c),
            (Field::Humidity, reading.humidity.map(f32::from)),
            (Field::WindSpeed, reading.wind_avg_meter_sec),
            (Field::WindDirection, reading.wind_direction_deg),
            (Field::Precipitation, reading.rain_mm),
        ];

        let fields = slots
            .into_iter()
            .filter_map(|(field, value)| value.map(|v| (field, v)))
            .collect();

        Report { fields }
    }

    pub fn get(&self, field: Field) -> Option<f32> {
        self.fields.get(&field).copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
