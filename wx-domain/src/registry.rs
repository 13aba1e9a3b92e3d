use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::records::{
    Co2Reading, PressureReading, RawRecord, WeatherStationReading, CO2_SENSOR_MODEL,
    PRESSURE_SENSOR_MODEL, WEATHER_STATION_MODEL,
};

type DecodeFn = fn(&Value) -> Result<RawRecord, serde_json::Error>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("record has no string \"model\" field")]
    MissingModel,
    #[error("model {0:?} is not registered")]
    UnknownModel(String),
    #[error("malformed {model} record: {source}")]
    Malformed {
        model: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Maps the `model` tag of an incoming record to its decoder.
///
/// Decoders are strict about the registered shape but tolerant of extra
/// fields, since the radio bridge attaches metadata (checksum flags, channel
/// numbers) that the pipeline does not track.
#[derive(Debug)]
pub struct ModelRegistry {
    decoders: HashMap<&'static str, DecodeFn>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Registry holding every model the deployment knows about.
    pub fn with_default_models() -> Self {
        let mut registry = Self::new();
        registry.register(WEATHER_STATION_MODEL, |v| {
            serde_json::from_value::<WeatherStationReading>(v.clone())
                .map(RawRecord::WeatherStation)
        });
        registry.register(PRESSURE_SENSOR_MODEL, |v| {
            serde_json::from_value::<PressureReading>(v.clone()).map(RawRecord::Pressure)
        });
        registry.register(CO2_SENSOR_MODEL, |v| {
            serde_json::from_value::<Co2Reading>(v.clone()).map(RawRecord::Co2)
        });
        registry
    }

    pub fn register(&mut self, model: &'static str, decode: DecodeFn) {
        self.decoders.insert(model, decode);
    }

    pub fn contains(&self, model: &str) -> bool {
        self.decoders.contains_key(model)
    }

    /// Routes a JSON envelope to the decoder its `model` tag names.
    pub fn decode(&self, envelope: &Value) -> Result<RawRecord, RegistryError> {
        let model = envelope
            .get("model")
            .and_then(Value::as_str)
            .ok_or(RegistryError::MissingModel)?;
        let decode = self
            .decoders
            .get(model)
            .ok_or_else(|| RegistryError::UnknownModel(model.to_string()))?;
        decode(envelope).map_err(|source| RegistryError::Malformed {
            model: model.to_string(),
            source,
        })
    }
}

/// Shared registry for the deployment's sensor fleet.
pub fn default_registry() -> &'static ModelRegistry {
    static REGISTRY: Lazy<ModelRegistry> = Lazy::new(ModelRegistry::with_default_models);
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_each_registered_model() {
        let registry = default_registry();

        let station = registry
            .decode(&json!({
                "time": "2024-06-01 12:00:00", "model": "Bresser-7in1", "id": 1,
                "temperature_C": 25.0, "humidity": 50.0, "wind_max_m_s": 3.2,
                "wind_avg_m_s": 1.9, "wind_dir_deg": 207, "rain_mm": 110.8,
                "light_lux": 32190.0, "uvi": 2.5, "battery_ok": 1
            }))
            .unwrap();
        assert!(matches!(station, RawRecord::WeatherStation(_)));

        let pressure = registry
            .decode(&json!({
                "unix_time": 1_717_268_400u64, "model": "BMP390",
                "temperature_C": 22.5, "pressure_Pa": 101325.0
            }))
            .unwrap();
        assert!(matches!(pressure, RawRecord::Pressure(_)));

        let co2 = registry
            .decode(&json!({
                "unix_time": 1_717_268_400u64, "model": "SCD30", "temperature_C": 21.0,
                "humidity": 40.0, "co2_concentration_ppm": 640.0
            }))
            .unwrap();
        assert!(matches!(co2, RawRecord::Co2(_)));
    }

    #[test]
    fn unregistered_model_is_rejected_by_name() {
        let err = default_registry()
            .decode(&json!({"model": "Acurite-606TX", "temperature_C": 10.0}))
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownModel(m) if m == "Acurite-606TX"));
    }

    #[test]
    fn missing_or_non_string_model_is_rejected() {
        let registry = default_registry();
        assert!(matches!(
            registry.decode(&json!({"temperature_C": 10.0})),
            Err(RegistryError::MissingModel)
        ));
        assert!(matches!(
            registry.decode(&json!({"model": 42, "temperature_C": 10.0})),
            Err(RegistryError::MissingModel)
        ));
    }

    #[test]
    fn wrong_field_types_are_a_malformed_record() {
        let err = default_registry()
            .decode(&json!({
                "unix_time": "not-a-number", "model": "BMP390",
                "temperature_C": 22.5, "pressure_Pa": 101325.0
            }))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Malformed { model, .. } if model == "BMP390"));
    }

    #[test]
    fn registry_reports_registered_models() {
        let registry = ModelRegistry::with_default_models();
        assert!(registry.contains("Bresser-7in1"));
        assert!(registry.contains("BMP390"));
        assert!(registry.contains("SCD30"));
        assert!(!registry.contains("bresser-7in1"));
    }
}
