//! Optional flow log.
//!
//! When `--flow-log` is set, the outcome of every simulated login is written
//! to a file by a dedicated task, so users never block on disk. Users send
//! [`FlowMetric`]s over an unbounded channel; `None` tells the task to flush
//! and exit.
//!
//! Three formats are available with `--flow-format`:
//!  - `json` (default): one JSON object per line;
//!  - `csv`: a header line, then one line per login;
//!  - `raw`: the `Debug` output of each [`FlowMetric`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use strum_macros::{Display, EnumString};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinHandle;

use crate::config::Configuration;
use crate::metrics::FlowMetric;
use crate::LoadTestError;

/// Flow log formats.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Csv,
    Raw,
}

impl LogFormat {
    /// Format one flow metric as a line, without the line feed.
    pub fn format(&self, metric: &FlowMetric) -> Result<String, LoadTestError> {
        Ok(match self {
            LogFormat::Json => serde_json::to_string(metric)?,
            LogFormat::Csv => metric.to_csv(),
            LogFormat::Raw => format!("{:?}", metric),
        })
    }
}

pub(crate) type FlowLogSender = flume::Sender<Option<FlowMetric>>;
pub(crate) type FlowLogHandle = JoinHandle<Result<(), LoadTestError>>;

/// Create the flow log file if configured and spawn the task writing to it.
pub(crate) async fn setup_flow_logger(
    configuration: &Configuration,
) -> Result<Option<(FlowLogHandle, FlowLogSender)>, LoadTestError> {
    if configuration.flow_log.is_empty() {
        return Ok(None);
    }
    let file = File::create(&configuration.flow_log).await?;
    info!("writing flows to flow_log: {}", configuration.flow_log);

    let (sender, receiver) = flume::unbounded();
    let handle = tokio::spawn(logger_main(
        configuration.flow_log.clone(),
        file,
        configuration.flow_format(),
        receiver,
    ));
    Ok(Some((handle, sender)))
}

/// Write each received flow metric to `file` until `None` arrives or every
/// sender hangs up.
pub(crate) async fn logger_main<P: AsRef<Path>>(
    path: P,
    file: File,
    format: LogFormat,
    receiver: flume::Receiver<Option<FlowMetric>>,
) -> Result<(), LoadTestError> {
    let path = path.as_ref();
    let mut file = BufWriter::with_capacity(64 * 1024, file);

    if format == LogFormat::Csv {
        file.write_all(format!("{}\n", FlowMetric::csv_header()).as_bytes())
            .await?;
    }

    while let Ok(message) = receiver.recv_async().await {
        let metric = match message {
            Some(metric) => metric,
            // Empty message means it's time to exit.
            None => break,
        };
        let line = format.format(&metric)?;
        if let Err(e) = file.write_all(format!("{}\n", line).as_bytes()).await {
            warn!("failed to write to {}: {}", path.display(), e);
        }
    }

    info!("flushing flow_log: {}", path.display());
    file.flush().await?;

    Ok(())
}
