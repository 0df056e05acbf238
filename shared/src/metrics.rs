use metrics_exporter_statsd::{StatsdBuilder, StatsdError};
use serde::Deserialize;

use crate::metrics_defs::{MetricDef, describe_all};

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "sharpi".into()
}

#[derive(thiserror::Error, Debug)]
pub enum MetricsError {
    #[error("could not create statsd recorder: {0}")]
    Statsd(#[from] StatsdError),
    #[error("a metrics recorder is already installed")]
    AlreadyInstalled,
}

/// Installs a global recorder that sends to StatsD and describes `defs` on it.
///
/// Without a call to this, every metric macro is a no-op.
pub fn init(config: &MetricsConfig, defs: &[MetricDef]) -> Result<(), MetricsError> {
    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(&config.prefix))?;
    ::metrics::set_global_recorder(recorder).map_err(|_| MetricsError::AlreadyInstalled)?;
    describe_all(defs);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        prefix = %config.prefix,
        "statsd metrics enabled"
    );
    Ok(())
}
