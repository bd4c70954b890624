//! # cas-loadtest
//!
//! Load tests single sign-on logins against a [Central Authentication
//! Service](https://apereo.github.io/cas/) server, optionally acting as a SAML
//! identity provider for a SAML service provider.
//!
//! Every simulated user replays the requests a browser makes while logging in
//! and out: it loads the login page, scrapes the hidden form fields the server
//! expects back, submits a randomly chosen credential, validates the resulting
//! service ticket or forwards the SAML assertion, and finally logs out. The
//! outcome of each login is decided by looking for known markers in the
//! responses.
//!
//! ## Flows
//!
//! Three flows are available, selected with `--flow`:
//!
//! - `cas`: `GET /login?service=...`, `POST /login`, read the `ticket` from the
//!   redirect, `GET /serviceValidate`, `GET /logout`.
//! - `saml`: load the IdP SAML login page, `POST` the credentials, forward the
//!   `RelayState` and `SAMLResponse` to the service provider's assertion
//!   consumer, check the protected page, `GET /logout`.
//! - `combined`: start at a protected service provider page, follow the
//!   service provider's `SAMLRequest` to the IdP, then continue as `saml`.
//!
//! ## Running a load test
//!
//! ```bash
//! $ cargo run --release -- \
//!     --host https://idp.example.org/cas \
//!     --service https://app.example.org/ \
//!     --credentials users.csv \
//!     --users 50 --hatch-rate 5 --run-time 5m
//! ```
//!
//! The credential file holds one `username,password` pair per line.
//!
//! ## Library use
//!
//! ```rust,no_run
//! use cas_loadtest::config::Configuration;
//! use cas_loadtest::{LoadTest, LoadTestError};
//! use gumdrop::Options;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), LoadTestError> {
//!     let configuration = Configuration::parse_args_default(&[
//!         "--host",
//!         "https://idp.example.org/cas",
//!         "--service",
//!         "https://app.example.org/",
//!         "--credentials",
//!         "users.csv",
//!     ])
//!     .expect("valid options");
//!
//!     let metrics = LoadTest::initialize_with_config(configuration)?
//!         .execute()
//!         .await?;
//!     println!("{} successful logins", metrics.successful_flows());
//!
//!     Ok(())
//! }
//! ```

#[macro_use]
extern crate log;

pub mod config;
pub mod credentials;
pub mod extract;
pub mod flow;
pub mod logger;
pub mod metrics;
mod runner;
pub mod session;
pub mod util;

pub use crate::runner::LoadTest;

use std::{fmt, io};

/// An enumeration of all errors a [`LoadTest`] can return before or after
/// running flows. Failures inside a single simulated login are
/// [`flow::FlowError`]s and never surface here.
#[derive(Debug)]
pub enum LoadTestError {
    /// Wraps a [`std::io::Error`](https://doc.rust-lang.org/std/io/struct.Error.html).
    Io(io::Error),
    /// Wraps a [`reqwest::Error`](https://docs.rs/reqwest/*/reqwest/struct.Error.html).
    Reqwest(reqwest::Error),
    /// Wraps a [`regex::Error`](https://docs.rs/regex/*/regex/enum.Error.html).
    Regex(regex::Error),
    /// Wraps a [`serde_json::Error`](https://docs.rs/serde_json/*/serde_json/struct.Error.html).
    Json(serde_json::Error),
    /// Wraps a ['tokio::task::JoinError'](https://docs.rs/tokio/*/tokio/task/struct.JoinError.html).
    TokioJoin(tokio::task::JoinError),
    /// Failed to parse a URL.
    InvalidHost {
        /// The invalid URL that caused this error.
        host: String,
        /// An optional explanation of the error.
        detail: String,
        /// Wraps a [`url::ParseError`](https://docs.rs/url/*/url/enum.ParseError.html).
        parse_error: url::ParseError,
    },
    /// Invalid option or value specified, may only be invalid in context.
    InvalidOption {
        /// The invalid option that caused this error, may be only invalid in context.
        option: String,
        /// The invalid value that caused this error, may be only invalid in context.
        value: String,
        /// An optional explanation of the error.
        detail: String,
    },
    /// The credential file could not be used.
    InvalidCredentials {
        /// Path of the credential file.
        path: String,
        /// Line number the problem was found on, 0 if it applies to the whole file.
        line: usize,
        /// An explanation of the error.
        detail: String,
    },
}

impl LoadTestError {
    fn describe(&self) -> &str {
        match *self {
            LoadTestError::Io(_) => "io::Error",
            LoadTestError::Reqwest(_) => "reqwest::Error",
            LoadTestError::Regex(_) => "regex::Error",
            LoadTestError::Json(_) => "serde_json::Error",
            LoadTestError::TokioJoin(_) => "tokio::task::JoinError",
            LoadTestError::InvalidHost { .. } => "failed to parse url",
            LoadTestError::InvalidOption { .. } => "invalid option or value specified",
            LoadTestError::InvalidCredentials { .. } => "invalid credential file",
        }
    }
}

impl fmt::Display for LoadTestError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            LoadTestError::Io(ref source) => {
                write!(f, "LoadTestError: {} ({})", self.describe(), source)
            }
            LoadTestError::Reqwest(ref source) => {
                write!(f, "LoadTestError: {} ({})", self.describe(), source)
            }
            LoadTestError::Regex(ref source) => {
                write!(f, "LoadTestError: {} ({})", self.describe(), source)
            }
            LoadTestError::Json(ref source) => {
                write!(f, "LoadTestError: {} ({})", self.describe(), source)
            }
            LoadTestError::TokioJoin(ref source) => {
                write!(f, "LoadTestError: {} ({})", self.describe(), source)
            }
            LoadTestError::InvalidHost {
                ref host,
                ref parse_error,
                ..
            } => write!(
                f,
                "LoadTestError: {} {} ({})",
                self.describe(),
                host,
                parse_error
            ),
            LoadTestError::InvalidOption {
                ref option,
                ref detail,
                ..
            } => write!(f, "LoadTestError: {} {}: {}", self.describe(), option, detail),
            LoadTestError::InvalidCredentials {
                ref path,
                line,
                ref detail,
            } => {
                if line > 0 {
                    write!(
                        f,
                        "LoadTestError: {} {} line {}: {}",
                        self.describe(),
                        path,
                        line,
                        detail
                    )
                } else {
                    write!(f, "LoadTestError: {} {}: {}", self.describe(), path, detail)
                }
            }
        }
    }
}

impl std::error::Error for LoadTestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            LoadTestError::Io(ref source) => Some(source),
            LoadTestError::Reqwest(ref source) => Some(source),
            LoadTestError::Regex(ref source) => Some(source),
            LoadTestError::Json(ref source) => Some(source),
            LoadTestError::TokioJoin(ref source) => Some(source),
            LoadTestError::InvalidHost {
                ref parse_error, ..
            } => Some(parse_error),
            _ => None,
        }
    }
}

/// Auto-convert Reqwest errors.
impl From<reqwest::Error> for LoadTestError {
    fn from(err: reqwest::Error) -> LoadTestError {
        LoadTestError::Reqwest(err)
    }
}

/// Auto-convert IO errors.
impl From<io::Error> for LoadTestError {
    fn from(err: io::Error) -> LoadTestError {
        LoadTestError::Io(err)
    }
}

/// Auto-convert Regex errors.
impl From<regex::Error> for LoadTestError {
    fn from(err: regex::Error) -> LoadTestError {
        LoadTestError::Regex(err)
    }
}

/// Auto-convert serde_json errors.
impl From<serde_json::Error> for LoadTestError {
    fn from(err: serde_json::Error) -> LoadTestError {
        LoadTestError::Json(err)
    }
}

/// Auto-convert TokioJoin errors.
impl From<tokio::task::JoinError> for LoadTestError {
    fn from(err: tokio::task::JoinError) -> LoadTestError {
        LoadTestError::TokioJoin(err)
    }
}
