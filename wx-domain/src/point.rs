use chrono::{DateTime, Utc};

use crate::records::{ProcessedRecord, RawRecord, TimeError};

/// Tag distinguishing schema revisions of written points.
pub const POINT_VERSION: &str = "wx1";

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

/// One time-series measurement ready for the line-protocol encoder.
///
/// Fields keep insertion order so encoded lines are deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub version: &'static str,
    pub fields: Vec<(&'static str, FieldValue)>,
    pub timestamp: DateTime<Utc>,
}

impl Point {
    pub fn new(measurement: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.to_string(),
            version: POINT_VERSION,
            fields: Vec::new(),
            timestamp,
        }
    }

    pub fn float(mut self, name: &'static str, value: f32) -> Self {
        self.fields
            .push((name, FieldValue::Float(f64::from(value))));
        self
    }

    pub fn integer(mut self, name: &'static str, value: i64) -> Self {
        self.fields.push((name, FieldValue::Integer(value)));
        self
    }
}

impl ProcessedRecord {
    /// Builds the time-series point for this record.
    ///
    /// The measurement is the model name and the device timestamp becomes the
    /// point timestamp. Station battery health is not persisted, and the CO2
    /// concentration is written under the historical `co2_con_ppm` column.
    pub fn to_point(&self) -> Result<Point, TimeError> {
        let timestamp = self.utc_timestamp()?;
        let point = match self.raw() {
            RawRecord::WeatherStation(r) => {
                let mut point = Point::new(&r.model, timestamp)
                    .integer("id", i64::from(r.id))
                    .float("temperature_C", r.temperature_c);
                if let Some(dewpoint) = self.derived().dewpoint_c {
                    point = point.float("dewpoint_C", dewpoint);
                }
                point
                    .float("humidity", r.humidity)
                    .float("wind_max_m_s", r.wind_max_m_s)
                    .float("wind_avg_m_s", r.wind_avg_m_s)
                    .integer("wind_dir_deg", i64::from(r.wind_dir_deg))
                    .float("rain_mm", r.rain_mm)
                    .float("light_lux", r.light_lux)
                    .float("uvi", r.uvi)
            }
            RawRecord::Pressure(r) => Point::new(&r.model, timestamp)
                .float("temperature_C", r.temperature_c)
                .float("pressure_Pa", r.pressure_pa),
            RawRecord::Co2(r) => Point::new(&r.model, timestamp)
                .float("temperature_C", r.temperature_c)
                .float("humidity", r.humidity)
                .float("co2_con_ppm", r.co2_concentration_ppm),
        };
        Ok(point)
    }
}
