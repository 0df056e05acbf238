//! The record loop: one message at a time, in input order.
//!
//! A `STATE` message is echoed back only once every record read before it has been
//! written, so a restarted pipeline replays at most the records after the last echoed
//! state. Replayed records are safe to send again: their creates come back as duplicates
//! and turn into updates.

use crate::client::{UpsertClient, UpsertError, Upserted};
use crate::metrics_defs::{RECORDS_FAILED, RECORDS_PROCESSED};
use crate::singer::{Message, MessageError, MessageReader};
use crate::types::{EntityKind, InputRecord, UnsupportedStream};
use serde_json::{Value, json};
use shared::counter;
use std::collections::HashMap;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};

#[derive(thiserror::Error, Debug)]
pub enum TargetError {
    #[error("configuration error: {0}")]
    UnsupportedStream(#[from] UnsupportedStream),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error("could not create the API client: {0}")]
    Client(#[source] UpsertError),
    #[error("{kind} record {key} could not be written: {source}")]
    Upsert {
        kind: EntityKind,
        key: String,
        source: UpsertError,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Counters of one run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub created: u64,
    pub updated: u64,
    pub states: u64,
}

pub struct Target {
    client: UpsertClient,
    streams: HashMap<String, EntityKind>,
}

impl Target {
    pub fn new(client: UpsertClient) -> Self {
        Target {
            client,
            streams: HashMap::new(),
        }
    }

    /// Looks up the entity kind behind a stream name.
    fn resolve(&mut self, stream: &str) -> Result<EntityKind, UnsupportedStream> {
        if let Some(kind) = self.streams.get(stream) {
            return Ok(*kind);
        }
        let kind = stream.parse::<EntityKind>()?;
        tracing::info!(stream, %kind, "stream registered");
        self.streams.insert(stream.to_string(), kind);
        Ok(kind)
    }

    /// Maps and writes a single record.
    pub async fn process_record(
        &self,
        kind: EntityKind,
        record: &InputRecord,
    ) -> Result<Upserted, TargetError> {
        let mapped = kind.map(record);

        match self.client.send(kind, &mapped.payload, &mapped.key).await {
            Ok(upserted) => {
                counter!(
                    RECORDS_PROCESSED,
                    "stream" => kind.endpoint(),
                    "result" => upserted.as_str()
                )
                .increment(1);
                Ok(upserted)
            }
            Err(source) => {
                counter!(RECORDS_FAILED, "stream" => kind.endpoint(), "reason" => "api")
                    .increment(1);
                Err(TargetError::Upsert {
                    kind,
                    key: mapped.key.to_string(),
                    source,
                })
            }
        }
    }

    /// Consumes `input` until its end, writing acknowledged state messages to `output`.
    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> Result<Summary, TargetError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = MessageReader::new(input);
        let mut summary = Summary::default();

        while let Some(message) = reader.next_message().await? {
            match message {
                Message::Schema {
                    stream,
                    key_properties,
                    ..
                } => {
                    let kind = self.resolve(&stream)?;
                    tracing::debug!(%stream, %kind, ?key_properties, "schema received");
                }
                Message::Record { stream, record } => {
                    let kind = self.resolve(&stream)?;
                    match self.process_record(kind, &record).await? {
                        Upserted::Created => summary.created += 1,
                        Upserted::Updated => summary.updated += 1,
                    }
                }
                Message::State { value } => {
                    write_state(&mut output, value).await?;
                    summary.states += 1;
                }
                Message::Other => tracing::debug!("ignoring unsupported message type"),
            }
        }

        output.flush().await?;
        tracing::info!(
            created = summary.created,
            updated = summary.updated,
            states = summary.states,
            "input exhausted"
        );
        Ok(summary)
    }
}

async fn write_state<W: AsyncWrite + Unpin>(output: &mut W, value: Value) -> std::io::Result<()> {
    let mut line = json!({"type": "STATE", "value": value}).to_string();
    line.push('\n');
    output.write_all(line.as_bytes()).await?;
    output.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::retry::RetryConfig;
    use url::Url;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_target(base_url: &str) -> Target {
        let config = Config {
            api_key: "test-key".into(),
            base_url: Url::parse(base_url).unwrap(),
            request_timeout_secs: 5,
            retry: RetryConfig {
                base_delay_ms: 10,
                max_delay_ms: 100,
                budget_secs: 1,
            },
        };
        Target::new(UpsertClient::new(&config).unwrap())
    }

    fn output_lines(output: &[u8]) -> Vec<Value> {
        String::from_utf8_lossy(output)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn writes_records_and_echoes_state() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/products"))
            .and(body_partial_json(json!({"code": "123", "name": "Café", "active": true})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/prices"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"message": "duplicate key"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/prices/4/123/2"))
            .and(body_partial_json(json!({"price": "9.99", "product_unit_id": 2})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut input = Vec::new();
        input.extend_from_slice(
            b"{\"type\": \"SCHEMA\", \"stream\": \"products\", \"schema\": {}, \"key_properties\": [\"code\"]}\n",
        );
        input.extend_from_slice(
            b"{\"type\": \"RECORD\", \"stream\": \"products\", \"record\": {\"code\": 123, \"name\": \"Caf\xe9\"}}\n",
        );
        input.extend_from_slice(
            b"{\"type\": \"RECORD\", \"stream\": \"prices\", \"record\": {\"price_table_id\": 4, \"product_code\": \"123\", \"product_unit_id\": 2, \"price\": 9.99}}\n",
        );
        input.extend_from_slice(b"{\"type\": \"STATE\", \"value\": {\"bookmarks\": {\"prices\": 2}}}\n");

        let mut output = Vec::new();
        let mut target = test_target(&mock_server.uri());
        let summary = target.run(input.as_slice(), &mut output).await.unwrap();

        assert_eq!(
            summary,
            Summary {
                created: 1,
                updated: 1,
                states: 1
            }
        );
        assert_eq!(
            output_lines(&output),
            vec![json!({"type": "STATE", "value": {"bookmarks": {"prices": 2}}})]
        );
    }

    #[tokio::test]
    async fn unknown_stream_fails_before_any_request() {
        let mock_server = MockServer::start().await;

        let input: &[u8] = b"{\"type\": \"SCHEMA\", \"stream\": \"orders\", \"schema\": {}}\n\
            {\"type\": \"RECORD\", \"stream\": \"orders\", \"record\": {\"id\": 1}}\n";
        let mut output = Vec::new();
        let mut target = test_target(&mock_server.uri());
        let err = target.run(input, &mut output).await.unwrap_err();

        assert!(
            matches!(&err, TargetError::UnsupportedStream(UnsupportedStream(s)) if s == "orders"),
            "{err}"
        );
        assert!(mock_server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_record_withholds_later_state() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/customers"))
            .respond_with(ResponseTemplate::new(403).set_body_string("invalid api key"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let input: &[u8] = b"{\"type\": \"STATE\", \"value\": 1}\n\
            {\"type\": \"RECORD\", \"stream\": \"clients\", \"record\": {\"code\": \"C-1\"}}\n\
            {\"type\": \"STATE\", \"value\": 2}\n";
        let mut output = Vec::new();
        let mut target = test_target(&mock_server.uri());
        let err = target.run(input, &mut output).await.unwrap_err();

        let TargetError::Upsert { kind, key, source } = &err else {
            panic!("expected an upsert failure, got {err}");
        };
        assert_eq!(*kind, EntityKind::Customer);
        assert_eq!(key, "C-1");
        assert!(matches!(source, UpsertError::Rejected { .. }));
        assert_eq!(
            output_lines(&output),
            vec![json!({"type": "STATE", "value": 1})]
        );
    }

    #[tokio::test]
    async fn malformed_fields_do_not_stop_the_run() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/products"))
            .and(body_partial_json(json!({"code": "A", "active": true, "name": null})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/products"))
            .and(body_partial_json(json!({"code": "B"})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&mock_server)
            .await;

        let input: &[u8] = b"{\"type\": \"RECORD\", \"stream\": \"products\", \"record\": {\"code\": \"A\", \"active\": \"S\", \"name\": [\"x\"]}}\n\
            {\"type\": \"RECORD\", \"stream\": \"products\", \"record\": {\"code\": \"B\"}}\n\
            {\"type\": \"STATE\", \"value\": 3}\n";
        let mut output = Vec::new();
        let mut target = test_target(&mock_server.uri());
        let summary = target.run(input, &mut output).await.unwrap();

        assert_eq!(summary.created, 2);
        assert_eq!(
            output_lines(&output),
            vec![json!({"type": "STATE", "value": 3})]
        );
    }

    #[tokio::test]
    async fn undecodable_line_reports_its_number() {
        let mock_server = MockServer::start().await;

        let input: &[u8] = b"{\"type\": \"STATE\", \"value\": 1}\n{\"type\": \"RECORD\"\n";
        let mut output = Vec::new();
        let mut target = test_target(&mock_server.uri());
        let err = target.run(input, &mut output).await.unwrap_err();

        assert!(
            matches!(err, TargetError::Message(MessageError::Invalid { line: 2, .. })),
            "{err}"
        );
    }
}
