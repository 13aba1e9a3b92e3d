use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::America::Los_Angeles;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{derived, registry};

pub const WEATHER_STATION_MODEL: &str = "Bresser-7in1";
pub const PRESSURE_SENSOR_MODEL: &str = "BMP390";
pub const CO2_SENSOR_MODEL: &str = "SCD30";

/// Layout of the receive timestamps the radio bridge stamps on each record.
///
/// The bridge runs without timezone metadata, so the wall-clock strings are
/// interpreted in the deployment timezone (America/Los_Angeles).
const RECEIVE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum TimeError {
    #[error("unparseable receive time {value:?}: {source}")]
    Parse {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("receive time {0:?} does not exist in America/Los_Angeles")]
    Nonexistent(String),
    #[error("epoch timestamp {0} is out of range")]
    EpochRange(u64),
}

/// Outdoor multi-sensor station, received over the air via the radio bridge.
///
/// Field names follow the bridge's JSON output so records decode and
/// re-encode without a mapping layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherStationReading {
    pub time: String,
    pub model: String,
    pub id: i32,
    #[serde(rename = "temperature_C")]
    pub temperature_c: f32,
    pub humidity: f32,
    pub wind_max_m_s: f32,
    pub wind_avg_m_s: f32,
    pub wind_dir_deg: i32,
    pub rain_mm: f32,
    pub light_lux: f32,
    pub uvi: f32,
    pub battery_ok: i32,
}

/// Wired barometric sensor, pushed over HTTP with an epoch timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureReading {
    pub unix_time: u64,
    pub model: String,
    #[serde(rename = "temperature_C")]
    pub temperature_c: f32,
    #[serde(rename = "pressure_Pa")]
    pub pressure_pa: f32,
}

/// Wired CO2 sensor, pushed over HTTP with an epoch timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Co2Reading {
    pub unix_time: u64,
    pub model: String,
    #[serde(rename = "temperature_C")]
    pub temperature_c: f32,
    pub humidity: f32,
    pub co2_concentration_ppm: f32,
}

/// A decoded sensor record, one variant per registered model.
///
/// Serialization is untagged: each variant writes its reading's fields
/// directly, and the embedded `model` field is the routing tag on the way
/// back in (see [`registry::ModelRegistry::decode`]).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RawRecord {
    WeatherStation(WeatherStationReading),
    Pressure(PressureReading),
    Co2(Co2Reading),
}

impl RawRecord {
    pub fn model(&self) -> &str {
        match self {
            RawRecord::WeatherStation(r) => &r.model,
            RawRecord::Pressure(r) => &r.model,
            RawRecord::Co2(r) => &r.model,
        }
    }

    /// Resolves the device timestamp to UTC.
    ///
    /// Station records carry a local wall-clock string; during a fall-back
    /// overlap the earlier of the two candidate instants wins, and a
    /// spring-forward gap is an error.
    pub fn utc_timestamp(&self) -> Result<DateTime<Utc>, TimeError> {
        match self {
            RawRecord::WeatherStation(r) => local_to_utc(&r.time),
            RawRecord::Pressure(r) => epoch_to_utc(r.unix_time),
            RawRecord::Co2(r) => epoch_to_utc(r.unix_time),
        }
    }

    pub fn epoch_seconds(&self) -> Result<i64, TimeError> {
        Ok(self.utc_timestamp()?.timestamp())
    }
}

fn local_to_utc(value: &str) -> Result<DateTime<Utc>, TimeError> {
    let naive = NaiveDateTime::parse_from_str(value, RECEIVE_TIME_FORMAT).map_err(|source| {
        TimeError::Parse {
            value: value.to_string(),
            source,
        }
    })?;
    match Los_Angeles.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => Err(TimeError::Nonexistent(value.to_string())),
    }
}

fn epoch_to_utc(unix_time: u64) -> Result<DateTime<Utc>, TimeError> {
    let secs = i64::try_from(unix_time).map_err(|_| TimeError::EpochRange(unix_time))?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or(TimeError::EpochRange(unix_time))
}

/// Metrics computed from a record's own measurements.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DerivedMetrics {
    #[serde(rename = "dewpoint_C", skip_serializing_if = "Option::is_none")]
    pub dewpoint_c: Option<f32>,
}

/// A raw record plus its derived metrics.
///
/// Constructed through [`ProcessedRecord::enrich`] so the derived values are
/// always a function of the embedded raw record. Serializes to a single flat
/// JSON object, which is also the line format of the flat-file store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedRecord {
    #[serde(flatten)]
    raw: RawRecord,
    #[serde(flatten)]
    derived: DerivedMetrics,
}

impl ProcessedRecord {
    /// Attaches derived metrics to a raw record.
    ///
    /// Station readings gain a dew point computed from their temperature and
    /// relative humidity; models without both inputs pass through with no
    /// derived fields.
    pub fn enrich(raw: RawRecord) -> Self {
        let derived = match &raw {
            RawRecord::WeatherStation(r) => DerivedMetrics {
                dewpoint_c: Some(derived::dewpoint(r.temperature_c, r.humidity)),
            },
            RawRecord::Pressure(_) | RawRecord::Co2(_) => DerivedMetrics::default(),
        };
        Self { raw, derived }
    }

    pub fn raw(&self) -> &RawRecord {
        &self.raw
    }

    pub fn derived(&self) -> DerivedMetrics {
        self.derived
    }

    pub fn model(&self) -> &str {
        self.raw.model()
    }

    pub fn utc_timestamp(&self) -> Result<DateTime<Utc>, TimeError> {
        self.raw.utc_timestamp()
    }

    pub fn epoch_seconds(&self) -> Result<i64, TimeError> {
        self.raw.epoch_seconds()
    }
}

impl<'de> Deserialize<'de> for ProcessedRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let derived = match value.get("dewpoint_C") {
            None | Some(Value::Null) => DerivedMetrics::default(),
            Some(v) => DerivedMetrics {
                dewpoint_c: Some(f32::deserialize(v).map_err(serde::de::Error::custom)?),
            },
        };
        let raw = registry::default_registry()
            .decode(&value)
            .map_err(serde::de::Error::custom)?;
        Ok(ProcessedRecord { raw, derived })
    }
}

/// Inclusive query window in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: i64,
    pub to: i64,
}
