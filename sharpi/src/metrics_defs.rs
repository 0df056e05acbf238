//! Metrics definitions for the Sharpi target.

use shared::metrics_defs::{MetricDef, MetricType};

pub const RECORDS_PROCESSED: MetricDef = MetricDef {
    name: "records.processed",
    metric_type: MetricType::Counter,
    description: "Records written to the partner API, tagged by stream and result",
};

pub const RECORDS_FAILED: MetricDef = MetricDef {
    name: "records.failed",
    metric_type: MetricType::Counter,
    description: "Records that could not be written, tagged by stream and reason",
};

pub const FIELDS_DEFAULTED: MetricDef = MetricDef {
    name: "mapping.field_defaulted",
    metric_type: MetricType::Counter,
    description: "Malformed field values replaced by their default, tagged by field",
};

pub const DUPLICATES_PATCHED: MetricDef = MetricDef {
    name: "upsert.duplicate_patched",
    metric_type: MetricType::Counter,
    description: "Create requests rejected as duplicates and re-sent as updates",
};

pub const HTTP_REQUESTS: MetricDef = MetricDef {
    name: "http.requests",
    metric_type: MetricType::Counter,
    description: "HTTP attempts against the partner API, tagged by method and outcome",
};

pub const HTTP_RETRIES: MetricDef = MetricDef {
    name: "http.retries",
    metric_type: MetricType::Counter,
    description: "Backoff sleeps taken after a retriable failure",
};

pub const HTTP_REQUEST_DURATION: MetricDef = MetricDef {
    name: "http.request.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of a single HTTP attempt in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[
    RECORDS_PROCESSED,
    RECORDS_FAILED,
    FIELDS_DEFAULTED,
    DUPLICATES_PATCHED,
    HTTP_REQUESTS,
    HTTP_RETRIES,
    HTTP_REQUEST_DURATION,
];
