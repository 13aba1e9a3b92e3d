use reqwest::header::CONTENT_TYPE;
use wx_domain::{FieldValue, Point, ProcessedRecord};

use super::{RecordSink, SinkError};

/// Escape measurement/tag keys/tag values/field keys for the line protocol.
///
/// The protocol requires escaping commas, spaces and equals with a backslash.
fn ilp_escape_ident(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            ',' | ' ' | '=' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
}

fn push_tag(out: &mut String, key: &str, value: &str) {
    out.push(',');
    ilp_escape_ident(key, out);
    out.push('=');
    ilp_escape_ident(value, out);
}

fn push_field(out: &mut String, first: &mut bool, key: &str, value: &FieldValue) {
    if *first {
        *first = false;
    } else {
        out.push(',');
    }

    ilp_escape_ident(key, out);
    out.push('=');
    match value {
        FieldValue::Float(v) => out.push_str(&v.to_string()),
        FieldValue::Integer(v) => {
            out.push_str(&v.to_string());
            out.push('i');
        }
    }
}

/// Encodes one point as a protocol line, without the trailing newline.
pub fn write_line(point: &Point, out: &mut String) {
    // measurement
    ilp_escape_ident(&point.measurement, out);

    // tags
    push_tag(out, "version", point.version);

    // fields
    out.push(' ');
    let mut first = true;
    for (key, value) in &point.fields {
        push_field(out, &mut first, key, value);
    }

    // timestamp (seconds)
    out.push(' ');
    out.push_str(&point.timestamp.timestamp().to_string());
}

/// Writes record batches to InfluxDB over its HTTP line-protocol endpoint.
///
/// Timestamps are written in seconds to match the precision the write URL
/// requests. A record whose device timestamp cannot be resolved is dropped
/// from the batch rather than failing the whole write.
#[derive(Clone)]
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: String,
    token: String,
}

impl InfluxSink {
    pub fn new(host: &str, token: &str, database: &str) -> Self {
        let host = host.trim_end_matches('/');
        Self {
            client: reqwest::Client::new(),
            write_url: format!("{host}/api/v3/write_lp?db={database}&precision=second"),
            token: token.to_string(),
        }
    }

    /// Returns the protocol body and the number of points encoded into it,
    /// which can be fewer than the batch when timestamps fail to resolve.
    fn encode_batch(&self, batch: &[ProcessedRecord]) -> (String, usize) {
        // Heuristic capacity: ~160 bytes per line.
        let mut body = String::with_capacity(batch.len().saturating_mul(160));
        let mut encoded = 0;
        for record in batch {
            let point = match record.to_point() {
                Ok(point) => point,
                Err(e) => {
                    metrics::counter!("influx_dropped_records_total").increment(1);
                    tracing::warn!(
                        model = record.model(),
                        error = %e,
                        "dropping record with unresolvable timestamp"
                    );
                    continue;
                }
            };
            write_line(&point, &mut body);
            body.push('\n');
            encoded += 1;
        }
        (body, encoded)
    }
}

#[async_trait::async_trait]
impl RecordSink for InfluxSink {
    async fn write(&self, batch: &[ProcessedRecord]) -> Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }
        let (body, encoded) = self.encode_batch(batch);
        if body.is_empty() {
            return Ok(());
        }

        let mut request = self
            .client
            .post(&self.write_url)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body);
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            metrics::counter!("influx_write_errors_total").increment(1);
            return Err(SinkError::Rejected { status, body });
        }

        metrics::counter!("influx_written_records_total").increment(encoded as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wx_domain::{Co2Reading, PressureReading, RawRecord, WeatherStationReading};

    use super::*;

    fn station_record() -> ProcessedRecord {
        ProcessedRecord::enrich(RawRecord::WeatherStation(WeatherStationReading {
            time: "2024-06-01 12:00:00".to_string(),
            model: "Bresser-7in1".to_string(),
            id: 606876,
            temperature_c: 25.0,
            humidity: 50.0,
            wind_max_m_s: 3.2,
            wind_avg_m_s: 1.9,
            wind_dir_deg: 207,
            rain_mm: 110.8,
            light_lux: 32190.0,
            uvi: 2.5,
            battery_ok: 1,
        }))
    }

    fn line_for(record: &ProcessedRecord) -> String {
        let mut out = String::new();
        write_line(&record.to_point().unwrap(), &mut out);
        out
    }

    #[test]
    fn ilp_escape_ident_escapes_commas_spaces_and_equals() {
        let mut out = String::new();
        ilp_escape_ident("a b,c=d", &mut out);
        assert_eq!(out, "a\\ b\\,c\\=d");
    }

    #[test]
    fn station_line_has_tag_fields_and_second_timestamp() {
        let line = line_for(&station_record());

        assert!(line.starts_with("Bresser-7in1,version=wx1 "));
        assert!(line.contains("id=606876i"));
        assert!(line.contains("temperature_C=25,"));
        assert!(line.contains("dewpoint_C=13.8"));
        assert!(line.contains("wind_dir_deg=207i"));
        assert!(!line.contains("battery_ok"));

        // Timestamp should be epoch seconds.
        assert!(line.ends_with(" 1717268400"));
    }

    #[test]
    fn co2_line_round_numbers_encode_bare() {
        let record = ProcessedRecord::enrich(RawRecord::Co2(Co2Reading {
            unix_time: 1_717_268_400,
            model: "SCD30".to_string(),
            temperature_c: 21.0,
            humidity: 40.0,
            co2_concentration_ppm: 640.0,
        }));
        assert_eq!(
            line_for(&record),
            "SCD30,version=wx1 temperature_C=21,humidity=40,co2_con_ppm=640 1717268400"
        );
    }

    #[test]
    fn pressure_line_keeps_fractional_values() {
        let record = ProcessedRecord::enrich(RawRecord::Pressure(PressureReading {
            unix_time: 1_717_268_400,
            model: "BMP390".to_string(),
            temperature_c: 22.5,
            pressure_pa: 101_325.0,
        }));
        assert_eq!(
            line_for(&record),
            "BMP390,version=wx1 temperature_C=22.5,pressure_Pa=101325 1717268400"
        );
    }

    #[tokio::test]
    async fn write_posts_lines_with_auth_to_the_write_endpoint() {
        use std::sync::{Arc, Mutex};

        use axum::extract::{RawQuery, State};
        use axum::http::HeaderMap;

        #[derive(Default)]
        struct Seen {
            query: Option<String>,
            auth: Option<String>,
            content_type: Option<String>,
            body: String,
        }

        async fn capture(
            State(seen): State<Arc<Mutex<Seen>>>,
            RawQuery(query): RawQuery,
            headers: HeaderMap,
            body: String,
        ) -> axum::http::StatusCode {
            let mut seen = seen.lock().unwrap();
            seen.query = query;
            seen.auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            seen.content_type = headers
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            seen.body = body;
            axum::http::StatusCode::NO_CONTENT
        }

        let seen: Arc<Mutex<Seen>> = Arc::default();
        let app = axum::Router::new()
            .route("/api/v3/write_lp", axum::routing::post(capture))
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.unwrap();
        });

        let sink = InfluxSink::new(&format!("http://{addr}"), "s3cret", "wx");
        let batch = [
            ProcessedRecord::enrich(RawRecord::Co2(Co2Reading {
                unix_time: 1_717_268_400,
                model: "SCD30".to_string(),
                temperature_c: 21.0,
                humidity: 40.0,
                co2_concentration_ppm: 640.0,
            })),
            ProcessedRecord::enrich(RawRecord::Pressure(PressureReading {
                unix_time: 1_717_268_400,
                model: "BMP390".to_string(),
                temperature_c: 22.5,
                pressure_pa: 101_325.0,
            })),
        ];
        sink.write(&batch).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.query.as_deref(), Some("db=wx&precision=second"));
        assert_eq!(seen.auth.as_deref(), Some("Bearer s3cret"));
        assert_eq!(
            seen.content_type.as_deref(),
            Some("text/plain; charset=utf-8")
        );
        assert_eq!(
            seen.body,
            "SCD30,version=wx1 temperature_C=21,humidity=40,co2_con_ppm=640 1717268400\n\
             BMP390,version=wx1 temperature_C=22.5,pressure_Pa=101325 1717268400\n"
        );
    }

    #[tokio::test]
    async fn a_rejected_write_surfaces_status_and_body() {
        async fn reject() -> (axum::http::StatusCode, &'static str) {
            (axum::http::StatusCode::BAD_REQUEST, "parse error")
        }

        let app = axum::Router::new().route("/api/v3/write_lp", axum::routing::post(reject));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.unwrap();
        });

        let sink = InfluxSink::new(&format!("http://{addr}"), "", "wx");
        let record = ProcessedRecord::enrich(RawRecord::Co2(Co2Reading {
            unix_time: 1,
            model: "SCD30".to_string(),
            temperature_c: 21.0,
            humidity: 40.0,
            co2_concentration_ppm: 640.0,
        }));

        match sink.write(std::slice::from_ref(&record)).await {
            Err(SinkError::Rejected { status, body }) => {
                assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
                assert_eq!(body, "parse error");
            }
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[test]
    fn unresolvable_timestamps_drop_out_of_the_batch() {
        let mut bad = match station_record().raw().clone() {
            RawRecord::WeatherStation(r) => r,
            _ => unreachable!(),
        };
        bad.time = "not a time".to_string();
        let bad = ProcessedRecord::enrich(RawRecord::WeatherStation(bad));
        let good = ProcessedRecord::enrich(RawRecord::Co2(Co2Reading {
            unix_time: 1_717_268_400,
            model: "SCD30".to_string(),
            temperature_c: 21.0,
            humidity: 40.0,
            co2_concentration_ppm: 640.0,
        }));

        let sink = InfluxSink::new("http://127.0.0.1:8181", "", "wx");
        let (body, encoded) = sink.encode_batch(&[bad, good]);
        // The written-records count must follow what was encoded, not the
        // batch size.
        assert_eq!(encoded, 1);
        assert_eq!(body.lines().count(), 1);
        assert!(body.starts_with("SCD30,"));
    }
}
