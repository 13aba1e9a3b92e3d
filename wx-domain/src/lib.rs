pub mod archive;
pub mod derived;
pub mod point;
pub mod records;
pub mod registry;

pub use archive::{read_archive, window_slice, ArchiveError, ENDPOINT_TOLERANCE_SECS};
pub use point::{FieldValue, Point, POINT_VERSION};
pub use records::{
    Co2Reading, DerivedMetrics, PressureReading, ProcessedRecord, RawRecord, TimeError,
    TimeWindow, WeatherStationReading, CO2_SENSOR_MODEL, PRESSURE_SENSOR_MODEL,
    WEATHER_STATION_MODEL,
};
pub use registry::{default_registry, ModelRegistry, RegistryError};
