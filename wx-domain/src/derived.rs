//! Metrics computed from temperature and humidity pairs.

/// Dew point in Celsius via the Magnus approximation.
///
/// `relative_humidity` is a percentage in (0, 100]. At 100% the dew point
/// equals the air temperature; a zero or negative input has no physical
/// meaning and produces a non-finite result.
pub fn dewpoint(temperature_c: f32, relative_humidity: f32) -> f32 {
    const A: f32 = 17.625;
    const B: f32 = 243.04; // Celsius

    let gamma = f64::from(relative_humidity / 100.0).ln() as f32
        + A * temperature_c / (B + temperature_c);
    B * gamma / (A - gamma)
}

/// Heat index in Celsius from the NOAA regression.
///
/// Only meaningful in the regression's fitted range, roughly 27C and above
/// at 40% relative humidity or more.
pub fn heat_index(temperature_c: f64, relative_humidity: f64) -> f32 {
    const C1: f64 = -8.78469475556;
    const C2: f64 = 1.61139411;
    const C3: f64 = 2.33854883889;
    const C4: f64 = -0.14611605;
    const C5: f64 = -0.012308094;
    const C6: f64 = -0.0164248277778;
    const C7: f64 = 0.002211732;
    const C8: f64 = 0.00072546;
    const C9: f64 = -0.000003582;

    let t = temperature_c;
    let rh = relative_humidity;
    let hi = C1
        + C2 * t
        + C3 * rh
        + C4 * t * rh
        + C5 * t * t
        + C6 * rh * rh
        + C7 * t * t * rh
        + C8 * t * rh * rh
        + C9 * t * t * rh * rh;
    hi as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dewpoint_matches_reference_value() {
        let d = dewpoint(25.0, 50.0);
        assert!((d - 13.86).abs() < 0.1, "dewpoint was {d}");
    }

    #[test]
    fn dewpoint_at_saturation_equals_air_temperature() {
        for t in [-10.0f32, 0.0, 12.5, 25.0, 37.5] {
            let d = dewpoint(t, 100.0);
            assert!((d - t).abs() < 1e-3, "dewpoint({t}, 100) was {d}");
        }
    }

    #[test]
    fn dewpoint_never_exceeds_air_temperature() {
        for t in (-10..=40).step_by(5) {
            for rh in (5..=100).step_by(5) {
                let d = dewpoint(t as f32, rh as f32);
                assert!(
                    d <= t as f32 + 1e-3,
                    "dewpoint({t}, {rh}) was {d}, above air temperature"
                );
            }
        }
    }

    #[test]
    fn dewpoint_rises_with_humidity() {
        let low = dewpoint(20.0, 40.0);
        let mid = dewpoint(20.0, 60.0);
        let high = dewpoint(20.0, 80.0);
        assert!(low < mid && mid < high);
    }

    #[test]
    fn heat_index_matches_reference_value() {
        let hi = heat_index(30.0, 70.0);
        assert!((hi - 35.038).abs() < 1e-3, "heat index was {hi}");
    }

    #[test]
    fn heat_index_exceeds_air_temperature_when_humid() {
        assert!(heat_index(32.0, 80.0) > 35.0);
    }
}
