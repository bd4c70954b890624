//! The HTTP context of one simulated user.
//!
//! A [`Session`] owns a cookie jar shared by two clients: one follows
//! redirects the way a browser does, the other returns redirects untouched so
//! a flow can read the `Location` header (CAS hands out service tickets that
//! way). Every request is timed and, when the session is attached to a load
//! test, reported as a [`RequestMetric`].
//!
//! A session is created when a simulated login starts and dropped when it ends,
//! taking its cookies and connections with it.

use http::{Method, StatusCode};
use reqwest::cookie::Jar;
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, RequestBuilder};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use crate::metrics::{LoadTestMetric, RequestMetric};

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Client settings applied to every [`Session`].
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Disables certificate validation, for test servers with self-signed certificates.
    pub accept_invalid_certs: bool,
    /// Sets the gzip Accept-Encoding header.
    pub gzip: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            timeout: Duration::from_secs(60),
            accept_invalid_certs: false,
            gzip: true,
        }
    }
}

/// Whether a request follows redirects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Redirects {
    Follow,
    Manual,
}

/// What a flow gets to see of a response.
#[derive(Clone, Debug)]
pub struct Page {
    pub status: StatusCode,
    /// The final URL, after any redirects were followed.
    pub url: Url,
    /// The `Location` header, only present on redirects that weren't followed.
    pub location: Option<String>,
    pub body: String,
}

/// A simulated user's HTTP client context.
pub struct Session {
    user: usize,
    follow: Client,
    manual: Client,
    metrics: Option<flume::Sender<LoadTestMetric>>,
    started: Instant,
}

impl Session {
    /// Builds a session for user number `user`. Request metrics are sent to
    /// `metrics` if set.
    pub fn new(
        options: &SessionOptions,
        user: usize,
        metrics: Option<flume::Sender<LoadTestMetric>>,
    ) -> Result<Self, reqwest::Error> {
        let jar = Arc::new(Jar::default());
        let follow = client_builder(options, &jar).build()?;
        let manual = client_builder(options, &jar)
            .redirect(Policy::none())
            .build()?;

        Ok(Session {
            user,
            follow,
            manual,
            metrics,
            started: Instant::now(),
        })
    }

    /// The number of the user this session belongs to.
    pub fn user(&self) -> usize {
        self.user
    }

    /// Make a GET request, `name` identifies the step in metrics.
    pub async fn get(
        &self,
        name: &str,
        url: &Url,
        redirects: Redirects,
    ) -> Result<Page, reqwest::Error> {
        let request = self.client(redirects).get(url.clone());
        self.send(name, Method::GET, url, request).await
    }

    /// POST `params` as an `application/x-www-form-urlencoded` body.
    pub async fn post_form(
        &self,
        name: &str,
        url: &Url,
        params: &[(&str, &str)],
        redirects: Redirects,
    ) -> Result<Page, reqwest::Error> {
        let request = self.client(redirects).post(url.clone()).form(params);
        self.send(name, Method::POST, url, request).await
    }

    fn client(&self, redirects: Redirects) -> &Client {
        match redirects {
            Redirects::Follow => &self.follow,
            Redirects::Manual => &self.manual,
        }
    }

    async fn send(
        &self,
        name: &str,
        method: Method,
        url: &Url,
        request: RequestBuilder,
    ) -> Result<Page, reqwest::Error> {
        let started = Instant::now();
        let result = read_page(request).await;
        let response_time = started.elapsed().as_millis() as u64;

        let mut metric = RequestMetric::new(
            self.started.elapsed().as_millis() as u64,
            self.user,
            method,
            name,
            url.as_str(),
        );
        match &result {
            Ok(page) => {
                debug!(
                    "[user {}] {} {} returned {}",
                    self.user, metric.method, url, page.status
                );
                metric.set_response(response_time, page.status, page.url.as_str());
            }
            Err(e) => {
                debug!(
                    "[user {}] {} {} failed: {}",
                    self.user, metric.method, url, e
                );
                metric.set_error(response_time, e);
            }
        }
        if let Some(parent) = self.metrics.as_ref() {
            // Best effort metrics, the parent only hangs up once the load test is over.
            let _ = parent.send(LoadTestMetric::Request(metric));
        }

        result
    }
}

fn client_builder(options: &SessionOptions, jar: &Arc<Jar>) -> ClientBuilder {
    Client::builder()
        .user_agent(APP_USER_AGENT)
        .cookie_provider(Arc::clone(jar))
        .timeout(options.timeout)
        .gzip(options.gzip)
        .danger_accept_invalid_certs(options.accept_invalid_certs)
}

async fn read_page(request: RequestBuilder) -> Result<Page, reqwest::Error> {
    let response = request.send().await?;
    let status = response.status();
    let url = response.url().clone();
    let location = if status.is_redirection() {
        response
            .headers()
            .get(http::header::LOCATION)
            .and_then(|location| location.to_str().ok())
            .map(|location| location.to_string())
    } else {
        None
    };
    let body = response.text().await?;

    Ok(Page {
        status,
        url,
        location,
        body,
    })
}
