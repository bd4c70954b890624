//! Optional metrics collected and aggregated during load tests.
//!
//! By default, every request a [`Session`](../session/struct.Session.html)
//! makes is sent to the parent as a [`RequestMetric`], and every simulated
//! login as a [`FlowMetric`]. The parent aggregates them into
//! [`LoadTestMetrics`], which are displayed as tables when the load test ends,
//! optionally written out as a JSON report, and returned to the caller.

use chrono::prelude::*;
use http::{Method, StatusCode};
use itertools::Itertools;
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::flow::{FlowError, FlowKind, FlowState, SessionOutcome};
use crate::util;
use crate::LoadTestError;

/// Messages sent from simulated users to the parent.
#[derive(Debug, Clone)]
pub enum LoadTestMetric {
    Request(RequestMetric),
    Flow(FlowMetric),
}

/// The request that a simulated user made, and how the server responded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetric {
    /// How many milliseconds into the session the request was made.
    pub elapsed: u64,
    /// Which simulated user made the request.
    pub user: usize,
    /// The method of the request, for example `GET`.
    pub method: String,
    /// The flow step that made the request, for example `cas service validate`.
    pub name: String,
    /// The requested URL.
    pub url: String,
    /// The URL the response came from, differs from `url` when redirects were followed.
    pub final_url: String,
    /// HTTP status code, 0 if no response was received.
    pub status_code: u16,
    /// How many milliseconds the request took, including reading the body.
    pub response_time: u64,
    /// Whether a non-error response was received.
    pub success: bool,
    /// Why the request failed, if it did.
    pub error: String,
}

impl RequestMetric {
    pub(crate) fn new(elapsed: u64, user: usize, method: Method, name: &str, url: &str) -> Self {
        RequestMetric {
            elapsed,
            user,
            method: method.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            final_url: String::new(),
            status_code: 0,
            response_time: 0,
            success: false,
            error: String::new(),
        }
    }

    pub(crate) fn set_response(&mut self, response_time: u64, status: StatusCode, final_url: &str) {
        self.response_time = response_time;
        self.status_code = status.as_u16();
        self.final_url = final_url.to_string();
        // Redirects are an expected part of every login.
        self.success = !status.is_client_error() && !status.is_server_error();
        if !self.success {
            self.error = status.to_string();
        }
    }

    pub(crate) fn set_error(&mut self, response_time: u64, error: &reqwest::Error) {
        self.response_time = response_time;
        self.success = false;
        self.error = error.to_string();
    }

    /// The key requests are aggregated under.
    pub fn key(&self) -> String {
        format!("{} {}", self.method, self.name)
    }
}

/// One simulated login, from loading the login page to logging out or aborting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowMetric {
    /// How many milliseconds into the load test the flow finished.
    pub elapsed: u64,
    /// Which simulated user ran the flow.
    pub user: usize,
    /// Which flow ran.
    pub flow: FlowKind,
    /// The username the flow logged in as.
    pub username: String,
    /// `LoggedOut` on success, otherwise `Aborted`.
    pub state: FlowState,
    /// How many milliseconds the flow took.
    pub run_time: u64,
    pub success: bool,
    /// Why the flow aborted, if it did.
    pub error: String,
}

impl FlowMetric {
    pub fn new(
        elapsed: u64,
        user: usize,
        flow: FlowKind,
        username: &str,
        run_time: u64,
        result: &Result<SessionOutcome, FlowError>,
    ) -> Self {
        let (state, success, error) = match result {
            Ok(outcome) => (outcome.state(), true, String::new()),
            Err(e) => (FlowState::Aborted, false, e.to_string()),
        };
        FlowMetric {
            elapsed,
            user,
            flow,
            username: username.to_string(),
            state,
            run_time,
            success,
            error,
        }
    }

    /// The columns written by [`FlowMetric::to_csv`].
    pub fn csv_header() -> &'static str {
        "elapsed,user,flow,username,state,run_time,success,error"
    }

    /// A single csv line, quoting the fields that may contain commas.
    pub fn to_csv(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{}",
            self.elapsed,
            self.user,
            self.flow,
            csv_quote(&self.username),
            self.state,
            self.run_time,
            self.success,
            csv_quote(&self.error),
        )
    }
}

fn csv_quote(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Response times, in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Times {
    pub counter: usize,
    pub minimum: u64,
    pub maximum: u64,
    pub total: u64,
}

impl Times {
    pub fn record(&mut self, time: u64) {
        if self.counter == 0 || time < self.minimum {
            self.minimum = time;
        }
        if time > self.maximum {
            self.maximum = time;
        }
        self.total += time;
        self.counter += 1;
    }

    pub fn average(&self) -> f32 {
        if self.counter == 0 {
            0.0
        } else {
            self.total as f32 / self.counter as f32
        }
    }
}

/// Aggregated [`RequestMetric`]s sharing a method and step name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestAggregate {
    pub method: String,
    pub name: String,
    pub success_count: usize,
    pub fail_count: usize,
    pub times: Times,
    /// How often each status code was returned, 0 counts requests without a response.
    pub status_codes: BTreeMap<u16, usize>,
}

impl RequestAggregate {
    fn record(&mut self, metric: &RequestMetric) {
        if metric.success {
            self.success_count += 1;
        } else {
            self.fail_count += 1;
        }
        self.times.record(metric.response_time);
        *self.status_codes.entry(metric.status_code).or_insert(0) += 1;
    }
}

/// Aggregated [`FlowMetric`]s of one flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowAggregate {
    pub success_count: usize,
    pub fail_count: usize,
    pub times: Times,
}

/// All metrics collected during a load test.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadTestMetrics {
    /// When the load test started.
    pub started: Option<DateTime<Local>>,
    /// How many seconds the load test ran.
    pub duration: usize,
    /// How many users were launched.
    pub users: usize,
    /// Request metrics, keyed by `METHOD name`.
    pub requests: BTreeMap<String, RequestAggregate>,
    /// Flow metrics, keyed by flow name.
    pub flows: BTreeMap<String, FlowAggregate>,
    /// How often each abort reason occurred.
    pub errors: BTreeMap<String, usize>,
    /// Whether to print the tables.
    #[serde(skip)]
    pub(crate) display_metrics: bool,
}

impl LoadTestMetrics {
    /// Fold one metric into the aggregates.
    pub fn record(&mut self, metric: &LoadTestMetric) {
        match metric {
            LoadTestMetric::Request(request) => {
                let aggregate = self
                    .requests
                    .entry(request.key())
                    .or_insert_with(|| RequestAggregate {
                        method: request.method.clone(),
                        name: request.name.clone(),
                        ..Default::default()
                    });
                aggregate.record(request);
            }
            LoadTestMetric::Flow(flow) => {
                let aggregate = self.flows.entry(flow.flow.to_string()).or_default();
                if flow.success {
                    aggregate.success_count += 1;
                } else {
                    aggregate.fail_count += 1;
                    *self.errors.entry(flow.error.clone()).or_insert(0) += 1;
                }
                aggregate.times.record(flow.run_time);
            }
        }
    }

    /// Total logins that completed and logged out.
    pub fn successful_flows(&self) -> usize {
        self.flows.values().map(|flow| flow.success_count).sum()
    }

    /// Total logins that aborted.
    pub fn failed_flows(&self) -> usize {
        self.flows.values().map(|flow| flow.fail_count).sum()
    }

    /// Consumes and display all metrics collected.
    pub fn print(&self) {
        if self.display_metrics {
            info!("printing final metrics after {} seconds...", self.duration);
            print!("{}", self);
        }
    }

    /// Write the metrics as pretty printed JSON.
    pub fn write_report<P: AsRef<Path>>(&self, path: P) -> Result<(), LoadTestError> {
        let report = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), report)?;
        info!("wrote report file to: {}", path.as_ref().display());
        Ok(())
    }

    /// Prepares a table of flow outcomes.
    pub(crate) fn fmt_flows(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        // If there's nothing to display, exit immediately.
        if self.flows.is_empty() {
            return Ok(());
        }

        writeln!(
            fmt,
            "\n === PER FLOW METRICS ===\n ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>13} | {:>14} | {:>8} | {:>7}",
            "Name", "# logins", "# aborts", "login/s", "avg ms"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        for (name, flow) in &self.flows {
            let total_count = flow.success_count + flow.fail_count;
            let (logins, _) = per_second_calculations(self.duration, flow.success_count, 0);
            writeln!(
                fmt,
                " {:<24} | {:>13} | {:>14} | {:>8.logins_p$} | {:>7.0}",
                util::truncate_string(name, 24),
                total_count.to_formatted_string(&Locale::en),
                format_failures(flow.fail_count, total_count),
                logins,
                flow.times.average(),
                logins_p = determine_precision(logins),
            )?;
        }

        Ok(())
    }

    /// Prepares a table of requests and fails.
    pub(crate) fn fmt_requests(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        // If there's nothing to display, exit immediately.
        if self.requests.is_empty() {
            return Ok(());
        }

        writeln!(
            fmt,
            "\n === PER REQUEST METRICS ===\n ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>13} | {:>14} | {:>8} | {:>7}",
            "Name", "# reqs", "# fails", "req/s", "fail/s"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        let mut aggregate_fail_count = 0;
        let mut aggregate_total_count = 0;
        for (request_key, request) in &self.requests {
            let total_count = request.success_count + request.fail_count;
            let (reqs, fails) =
                per_second_calculations(self.duration, total_count, request.fail_count);
            writeln!(
                fmt,
                " {:<24} | {:>13} | {:>14} | {:>8.reqs_p$} | {:>7.fails_p$}",
                util::truncate_string(request_key, 24),
                total_count.to_formatted_string(&Locale::en),
                format_failures(request.fail_count, total_count),
                reqs,
                fails,
                reqs_p = determine_precision(reqs),
                fails_p = determine_precision(fails),
            )?;
            aggregate_total_count += total_count;
            aggregate_fail_count += request.fail_count;
        }
        if self.requests.len() > 1 {
            writeln!(
                fmt,
                " -------------------------+---------------+----------------+----------+--------"
            )?;
            let (reqs, fails) =
                per_second_calculations(self.duration, aggregate_total_count, aggregate_fail_count);
            writeln!(
                fmt,
                " {:<24} | {:>13} | {:>14} | {:>8.reqs_p$} | {:>7.fails_p$}",
                "Aggregated",
                aggregate_total_count.to_formatted_string(&Locale::en),
                format_failures(aggregate_fail_count, aggregate_total_count),
                reqs,
                fails,
                reqs_p = determine_precision(reqs),
                fails_p = determine_precision(fails),
            )?;
        }

        Ok(())
    }

    /// Prepares a table of response times.
    pub(crate) fn fmt_response_times(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.requests.is_empty() {
            return Ok(());
        }

        writeln!(
            fmt,
            "\n === RESPONSE TIMES (ms) ===\n ------------------------------------------------------------------------------"
        )?;
        writeln!(
            fmt,
            " {:<24} | {:>11} | {:>10} | {:>11} | {:>10}",
            "Name", "Avg (ms)", "Min", "Max", "Status"
        )?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        for (request_key, request) in &self.requests {
            let status_codes = request
                .status_codes
                .iter()
                .map(|(code, count)| format!("{}:{}", code, count))
                .join(",");
            writeln!(
                fmt,
                " {:<24} | {:>11.2} | {:>10} | {:>11} | {:>10}",
                util::truncate_string(request_key, 24),
                request.times.average(),
                request.times.minimum.to_formatted_string(&Locale::en),
                request.times.maximum.to_formatted_string(&Locale::en),
                status_codes,
            )?;
        }

        Ok(())
    }

    /// Prepares a summary of why logins aborted.
    pub(crate) fn fmt_errors(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return Ok(());
        }

        writeln!(
            fmt,
            "\n === ERRORS ===\n ------------------------------------------------------------------------------"
        )?;
        writeln!(fmt, " {:<11} | Error", "Count")?;
        writeln!(
            fmt,
            " ------------------------------------------------------------------------------"
        )?;
        // Most frequent errors first.
        for (error, count) in self
            .errors
            .iter()
            .sorted_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)))
        {
            writeln!(
                fmt,
                " {:<11} | {}",
                count.to_formatted_string(&Locale::en),
                error
            )?;
        }

        Ok(())
    }

    /// Prepares an overview of the load test.
    pub(crate) fn fmt_overview(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            fmt,
            "\n === OVERVIEW ===\n ------------------------------------------------------------------------------"
        )?;
        if let Some(started) = self.started {
            writeln!(
                fmt,
                " Started: {}",
                started.format("%Y-%m-%d %H:%M:%S")
            )?;
        }
        writeln!(
            fmt,
            " Duration: {} seconds, {} users, {} logins, {} aborts",
            self.duration.to_formatted_string(&Locale::en),
            self.users.to_formatted_string(&Locale::en),
            self.successful_flows().to_formatted_string(&Locale::en),
            self.failed_flows().to_formatted_string(&Locale::en),
        )
    }
}

impl fmt::Display for LoadTestMetrics {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_flows(fmt)?;
        self.fmt_requests(fmt)?;
        self.fmt_response_times(fmt)?;
        self.fmt_errors(fmt)?;
        self.fmt_overview(fmt)
    }
}

// Render "count (percent%)", compressing 100.0 and 0.0 to 100 and 0 to save width.
fn format_failures(fail_count: usize, total_count: usize) -> String {
    let fail_percent = if fail_count > 0 {
        fail_count as f32 / total_count as f32 * 100.0
    } else {
        0.0
    };
    if fail_percent as usize == 100 || fail_percent as usize == 0 {
        format!(
            "{} ({}%)",
            fail_count.to_formatted_string(&Locale::en),
            fail_percent as usize
        )
    } else {
        format!(
            "{} ({:.1}%)",
            fail_count.to_formatted_string(&Locale::en),
            fail_percent
        )
    }
}

pub(crate) fn per_second_calculations(duration: usize, total: usize, fail: usize) -> (f32, f32) {
    if duration == 0 {
        (0.0, 0.0)
    } else {
        (
            total as f32 / duration as f32,
            fail as f32 / duration as f32,
        )
    }
}

fn determine_precision(value: f32) -> usize {
    if value < 1000.0 {
        2
    } else {
        0
    }
}
