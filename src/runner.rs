use chrono::prelude::*;
use gumdrop::Options;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Configuration;
use crate::credentials::CredentialPool;
use crate::flow::{self, LoginFlow};
use crate::logger::{self, FlowLogSender};
use crate::metrics::{FlowMetric, LoadTestMetric, LoadTestMetrics};
use crate::session::{Session, SessionOptions};
use crate::util;
use crate::LoadTestError;

/// Pauses are split up so ctrl-c and the end of the run time are noticed.
const MAX_SLEEP: Duration = Duration::from_millis(500);

/// A configured load test, ready to [`execute`](LoadTest::execute).
pub struct LoadTest {
    configuration: Configuration,
    flow: Arc<dyn LoginFlow>,
    credentials: Arc<CredentialPool>,
    canceled: Arc<AtomicBool>,
}

impl LoadTest {
    /// Load configuration from the command line, exiting with help on invalid
    /// options.
    pub fn initialize() -> Result<LoadTest, LoadTestError> {
        Self::initialize_with_config(Configuration::parse_args_default_or_exit())
    }

    /// Validate `configuration`, initialize logging, load the credential file
    /// and build the selected flow.
    pub fn initialize_with_config(configuration: Configuration) -> Result<LoadTest, LoadTestError> {
        if configuration.version {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            std::process::exit(0);
        }

        configuration.initialize_logger()?;
        configuration.validate()?;

        let credentials = Arc::new(CredentialPool::from_file(&configuration.credentials)?);
        let flow = flow::from_configuration(&configuration)?;

        Ok(LoadTest {
            configuration,
            flow,
            credentials,
            canceled: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Launch users at the configured hatch rate and run logins until every
    /// user is done, the run time expires or ctrl-c is pressed. Returns the
    /// aggregated metrics.
    pub async fn execute(self) -> Result<LoadTestMetrics, LoadTestError> {
        util::setup_ctrlc_handler(&self.canceled);

        let started = Instant::now();
        let deadline = deadline(started, self.configuration.run_time());
        let session_options = self.configuration.session_options()?;
        let wait = self.configuration.wait()?;
        let hatch_interval = self.configuration.hatch_interval()?;

        let (logger_handle, logger_tx) = match logger::setup_flow_logger(&self.configuration).await? {
            Some((handle, sender)) => (Some(handle), Some(sender)),
            None => (None, None),
        };

        let mut metrics = LoadTestMetrics {
            started: Some(Local::now()),
            display_metrics: !self.configuration.no_print_metrics,
            ..Default::default()
        };
        let (metrics_tx, metrics_rx) = flume::unbounded();

        let users = self.configuration.users();
        info!(
            "launching {} users at {} per second...",
            users,
            self.configuration.hatch_rate()?
        );
        let mut handles = Vec::with_capacity(users);
        for index in 0..users {
            if index > 0 && !pause(hatch_interval, &self.canceled, deadline).await {
                break;
            }
            let user = User {
                // Numbered from 1 as they're human-visible (in the logs).
                number: index + 1,
                flow: Arc::clone(&self.flow),
                credentials: Arc::clone(&self.credentials),
                session_options: session_options.clone(),
                iterations: self.configuration.iterations(),
                wait,
                started,
                deadline,
                canceled: Arc::clone(&self.canceled),
                metrics: metrics_tx.clone(),
                flow_log: logger_tx.clone(),
            };
            handles.push(tokio::spawn(user_main(user)));
        }
        metrics.users = handles.len();
        info!("launched {} users...", metrics.users);

        // Every user holds a sender; the channel closes once they've all exited.
        drop(metrics_tx);
        while let Ok(metric) = metrics_rx.recv_async().await {
            metrics.record(&metric);
        }
        for result in futures::future::join_all(handles).await {
            result?;
        }
        debug!("all users exited");

        if let (Some(handle), Some(sender)) = (logger_handle, logger_tx) {
            if let Err(e) = sender.send(None) {
                warn!("unexpected error telling logger thread to exit: {}", e);
            }
            handle.await??;
        }

        metrics.duration = started.elapsed().as_secs() as usize;
        if self.canceled.load(Ordering::SeqCst) {
            info!("canceled after {} seconds...", metrics.duration);
        } else {
            info!("stopping after {} seconds...", metrics.duration);
        }

        if !self.configuration.report_file.is_empty() {
            metrics.write_report(&self.configuration.report_file)?;
        }
        metrics.print();

        Ok(metrics)
    }
}

/// Everything one simulated user needs, all of it read only or a channel.
struct User {
    number: usize,
    flow: Arc<dyn LoginFlow>,
    credentials: Arc<CredentialPool>,
    session_options: SessionOptions,
    iterations: Option<usize>,
    wait: Option<(u64, u64)>,
    started: Instant,
    deadline: Option<Instant>,
    canceled: Arc<AtomicBool>,
    metrics: flume::Sender<LoadTestMetric>,
    flow_log: Option<FlowLogSender>,
}

async fn user_main(user: User) {
    info!("launching user {} running {} logins...", user.number, user.flow.kind());

    let mut completed = 0;
    while running(&user.canceled, user.deadline) {
        // A fresh session per login: no cookies carry over.
        let session = match Session::new(
            &user.session_options,
            user.number,
            Some(user.metrics.clone()),
        ) {
            Ok(session) => session,
            Err(e) => {
                warn!("[user {}] failed to build http client: {}", user.number, e);
                break;
            }
        };
        let credential = user.credentials.choose();

        let flow_started = Instant::now();
        let result = flow::simulate(&*user.flow, &session, credential).await;
        drop(session);

        let metric = FlowMetric::new(
            user.started.elapsed().as_millis() as u64,
            user.number,
            user.flow.kind(),
            &credential.username,
            flow_started.elapsed().as_millis() as u64,
            &result,
        );
        if let Some(flow_log) = user.flow_log.as_ref() {
            let _ = flow_log.send(Some(metric.clone()));
        }
        let _ = user.metrics.send(LoadTestMetric::Flow(metric));

        completed += 1;
        if user.iterations.is_some_and(|iterations| completed >= iterations) {
            break;
        }
        if let Some((min, max)) = user.wait {
            let wait = Duration::from_millis(rand::rng().random_range(min..=max));
            debug!("[user {}] waiting {:?}", user.number, wait);
            if !pause(wait, &user.canceled, user.deadline).await {
                break;
            }
        }
    }

    info!("exiting user {} after {} logins...", user.number, completed);
}

/// When the run time expires. A run time past what `Instant` can hold never
/// expires.
fn deadline(started: Instant, run_time: Option<Duration>) -> Option<Instant> {
    run_time.and_then(|run_time| started.checked_add(run_time))
}

fn running(canceled: &AtomicBool, deadline: Option<Instant>) -> bool {
    !canceled.load(Ordering::SeqCst) && deadline.map_or(true, |deadline| Instant::now() < deadline)
}

/// Sleep for `duration`, returning `false` early if the load test stops.
async fn pause(duration: Duration, canceled: &AtomicBool, deadline: Option<Instant>) -> bool {
    let until = Instant::now().checked_add(duration);
    loop {
        if !running(canceled, deadline) {
            return false;
        }
        let remaining = match until {
            Some(until) => until.saturating_duration_since(Instant::now()),
            None => MAX_SLEEP,
        };
        if remaining.is_zero() {
            return true;
        }
        tokio::time::sleep(remaining.min(MAX_SLEEP)).await;
    }
}
