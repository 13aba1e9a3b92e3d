use std::pin::Pin;
use std::time::{Duration, SystemTime};

use bytes::{Buf, BytesMut};
use futures::{Stream, StreamExt};
use serde_json::Value;
use wx_domain::{default_registry, RawRecord, RegistryError};

use crate::pipeline::{Envelope, PipelineError, Source};

/// Bridge records are a few hundred bytes; a buffer past this size means the
/// stream is not JSON we understand and gets discarded wholesale.
const MAX_ELEMENT_BYTES: usize = 1 << 20;

/// Live record stream from the SDR radio bridge.
///
/// The bridge emits whitespace-separated JSON records for every transmission
/// it demodulates, ours or not. Records that decode against the model
/// registry flow downstream; everything else is counted and skipped. A
/// dropped connection reconnects with doubling backoff until the attempt
/// budget is spent, after which the stream yields its terminal error and
/// ends. The budget resets whenever the bridge produces a decodable element.
pub struct SdrStreamSource {
    client: reqwest::Client,
    stream_url: String,
    max_retries: u32,
    base_backoff: Duration,
}

impl SdrStreamSource {
    pub fn new(stream_url: impl Into<String>, max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            stream_url: stream_url.into(),
            max_retries,
            base_backoff,
        }
    }
}

/// Takes one JSON value off the front of the buffer.
///
/// Leading whitespace and array framing bytes (`[`, `]`, `,`) are consumed
/// first. `None` means the buffer holds no complete value yet. A malformed
/// element is consumed up to the next line break, or failing that the next
/// object start, and reported so the caller can keep the stream alive.
fn take_frame(buf: &mut BytesMut) -> Option<Result<Value, serde_json::Error>> {
    let framing = buf
        .iter()
        .take_while(|b| matches!(**b, b' ' | b'\t' | b'\r' | b'\n' | b'[' | b']' | b','))
        .count();
    buf.advance(framing);
    if buf.is_empty() {
        return None;
    }

    let mut values = serde_json::Deserializer::from_slice(&buf[..]).into_iter::<Value>();
    match values.next() {
        Some(Ok(value)) => {
            let consumed = values.byte_offset();
            buf.advance(consumed);
            Some(Ok(value))
        }
        Some(Err(e)) if e.is_eof() => None,
        Some(Err(e)) => {
            let skip = buf
                .iter()
                .position(|b| *b == b'\n')
                .map(|pos| pos + 1)
                .or_else(|| buf.iter().skip(1).position(|b| *b == b'{').map(|pos| pos + 1))
                .unwrap_or(buf.len());
            buf.advance(skip);
            Some(Err(e))
        }
        None => None,
    }
}

#[async_trait::async_trait]
impl Source<RawRecord> for SdrStreamSource {
    async fn stream(
        &self,
    ) -> Pin<Box<dyn Stream<Item = Result<Envelope<RawRecord>, PipelineError>> + Send>> {
        let client = self.client.clone();
        let url = self.stream_url.clone();
        let max_retries = self.max_retries;
        let base_backoff = self.base_backoff;

        let s = async_stream::stream! {
            let mut attempt: u32 = 0;
            loop {
                let reason = match client.get(&url).send().await.and_then(|r| r.error_for_status()) {
                    Err(e) => format!("failed to open bridge stream: {e}"),
                    Ok(response) => {
                        tracing::info!(url = %url, "connected to radio bridge stream");
                        let mut chunks = response.bytes_stream();
                        let mut buf = BytesMut::new();
                        loop {
                            match chunks.next().await {
                                Some(Ok(chunk)) => {
                                    buf.extend_from_slice(&chunk);
                                    loop {
                                        match take_frame(&mut buf) {
                                            None => break,
                                            Some(Err(e)) => {
                                                metrics::counter!("stream_decode_errors_total")
                                                    .increment(1);
                                                tracing::warn!(error = %e, "skipping malformed stream element");
                                            }
                                            Some(Ok(value)) => {
                                                attempt = 0;
                                                match default_registry().decode(&value) {
                                                    Ok(record) => {
                                                        metrics::counter!("stream_records_total")
                                                            .increment(1);
                                                        yield Ok(Envelope {
                                                            payload: record,
                                                            received_at: SystemTime::now(),
                                                        });
                                                    }
                                                    Err(RegistryError::UnknownModel(model)) => {
                                                        metrics::counter!("stream_unknown_model_total")
                                                            .increment(1);
                                                        tracing::debug!(model = %model, "skipping record from unregistered model");
                                                    }
                                                    Err(e) => {
                                                        metrics::counter!("stream_decode_errors_total")
                                                            .increment(1);
                                                        tracing::warn!(error = %e, "skipping undecodable record");
                                                    }
                                                }
                                            }
                                        }
                                    }
                                    if buf.len() > MAX_ELEMENT_BYTES {
                                        metrics::counter!("stream_decode_errors_total").increment(1);
                                        tracing::warn!(buffered = buf.len(), "discarding oversized stream buffer");
                                        buf.clear();
                                    }
                                }
                                Some(Err(e)) => break format!("bridge read failed: {e}"),
                                None => break "bridge closed the stream".to_string(),
                            }
                        }
                    }
                };

                if attempt >= max_retries {
                    yield Err(PipelineError::Source(format!(
                        "{reason}; giving up after {attempt} reconnect attempts"
                    )));
                    return;
                }
                attempt += 1;
                let backoff = base_backoff * 2u32.saturating_pow(attempt - 1);
                metrics::counter!("stream_reconnects_total").increment(1);
                tracing::warn!(
                    reason = %reason,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "bridge stream lost, reconnecting"
                );
                tokio::time::sleep(backoff).await;
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf_of(text: &str) -> BytesMut {
        BytesMut::from(text.as_bytes())
    }

    fn co2_json(ts: u64) -> String {
        format!(
            r#"{{"unix_time":{ts},"model":"SCD30","temperature_C":21.0,"humidity":40.0,"co2_concentration_ppm":640.0}}"#
        )
    }

    #[test]
    fn takes_a_single_complete_value() {
        let mut buf = buf_of("{\"model\":\"X\"}\n");
        let value = take_frame(&mut buf).unwrap().unwrap();
        assert_eq!(value["model"], "X");
        assert!(take_frame(&mut buf).is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn takes_values_split_across_chunks() {
        let mut buf = buf_of("{\"model\":\"X\",\"temperature");
        assert!(take_frame(&mut buf).is_none());

        buf.extend_from_slice(b"_C\":1.5}\n{\"model\":\"Y\"}");
        let first = take_frame(&mut buf).unwrap().unwrap();
        assert_eq!(first["temperature_C"], 1.5);
        let second = take_frame(&mut buf).unwrap().unwrap();
        assert_eq!(second["model"], "Y");
    }

    #[test]
    fn consumes_array_framing_between_values() {
        let mut buf = buf_of("[{\"model\":\"X\"},\n{\"model\":\"Y\"}]");
        assert!(take_frame(&mut buf).unwrap().is_ok());
        assert!(take_frame(&mut buf).unwrap().is_ok());
        assert!(take_frame(&mut buf).is_none());
    }

    #[test]
    fn resyncs_past_a_malformed_element() {
        let mut buf = buf_of("{\"model\": }\n{\"model\":\"Y\"}\n");
        assert!(take_frame(&mut buf).unwrap().is_err());
        let next = take_frame(&mut buf).unwrap().unwrap();
        assert_eq!(next["model"], "Y");
    }

    #[test]
    fn resyncs_to_the_next_object_without_line_breaks() {
        let mut buf = buf_of("{\"model\": }{\"model\":\"Y\"}");
        assert!(take_frame(&mut buf).unwrap().is_err());
        let next = take_frame(&mut buf).unwrap().unwrap();
        assert_eq!(next["model"], "Y");
    }

    #[test]
    fn whitespace_only_input_is_not_a_frame() {
        let mut buf = buf_of("  \r\n\t");
        assert!(take_frame(&mut buf).is_none());
        assert!(buf.is_empty());
    }

    /// Decodes a buffer the way the live loop does, returning the routed
    /// records in order.
    fn route_all(buf: &mut BytesMut) -> Vec<RawRecord> {
        let mut out = Vec::new();
        while let Some(frame) = take_frame(buf) {
            if let Ok(value) = frame {
                if let Ok(record) = default_registry().decode(&value) {
                    out.push(record);
                }
            }
        }
        out
    }

    #[test]
    fn unknown_model_mid_stream_does_not_stop_the_rest() {
        let mut text = String::new();
        for i in 0..10u64 {
            if i == 4 {
                text.push_str("{\"model\":\"Acurite-606TX\",\"temperature_C\":9.5}\n");
            } else {
                text.push_str(&co2_json(1_717_268_400 + i));
                text.push('\n');
            }
        }

        let mut buf = buf_of(&text);
        let routed = route_all(&mut buf);
        assert_eq!(routed.len(), 9);
        let epochs: Vec<i64> = routed
            .iter()
            .map(|r| r.epoch_seconds().unwrap())
            .collect();
        let expected: Vec<i64> = (0..10)
            .filter(|i| *i != 4)
            .map(|i| 1_717_268_400 + i)
            .collect();
        assert_eq!(epochs, expected);
    }

    #[test]
    fn malformed_element_mid_stream_does_not_stop_the_rest() {
        let mut text = String::new();
        text.push_str(&co2_json(1));
        text.push('\n');
        text.push_str("{\"unix_time\": oops}\n");
        text.push_str(&co2_json(2));
        text.push('\n');

        let mut buf = buf_of(&text);
        let routed = route_all(&mut buf);
        assert_eq!(routed.len(), 2);
    }

    /// Serves two records on the first connection, then refuses with 500.
    async fn flaky_bridge() -> String {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        use axum::extract::State;
        use axum::http::StatusCode;
        use axum::response::IntoResponse;
        use axum::routing::get;

        async fn stream(State(hits): State<Arc<AtomicUsize>>) -> axum::response::Response {
            if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                format!("{}\n{}\n", co2_json(1), co2_json(2)).into_response()
            } else {
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }

        let app = axum::Router::new()
            .route("/stream", get(stream))
            .with_state(Arc::new(AtomicUsize::new(0)));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.unwrap();
        });
        format!("http://{addr}/stream")
    }

    #[tokio::test]
    async fn live_stream_yields_records_then_a_terminal_error() {
        let url = flaky_bridge().await;
        let source = SdrStreamSource::new(url, 1, Duration::from_millis(1));
        let mut stream = source.stream().await;

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.payload.epoch_seconds().unwrap(), 1);
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.payload.epoch_seconds().unwrap(), 2);

        // The first connection is closed after two records; the retry budget
        // of one is spent on the 500 that follows.
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, PipelineError::Source(_)));
        assert!(stream.next().await.is_none());
    }
}
