//! Simulated single sign-on logins.
//!
//! A login is a fixed sequence of steps, each one request whose response
//! provides what the next request needs:
//!
//! ```text
//! Start -> TokensExtracted -> CredentialsSubmitted -> TicketOrAssertionObtained
//!       -> Validated -> LoggedOut
//! ```
//!
//! Any step can fail to find what it expects, which aborts the login with a
//! [`FlowError`]. Nothing is retried: the session is dropped without logging
//! out, and the next login starts from scratch.
//!
//! Three flows implement [`LoginFlow`]:
//!  - [`cas::CasFlow`], a CAS protocol login validated through `/serviceValidate`;
//!  - [`saml::SamlFlow`], a login on the identity provider's SAML login page whose
//!    assertion is forwarded to the service provider;
//!  - [`combined::CombinedFlow`], a login started at the service provider that is
//!    sent to the identity provider with a `SAMLRequest`.

use async_trait::async_trait;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use strum_macros::{Display, EnumIter, EnumString};
use url::Url;

use crate::config::Configuration;
use crate::credentials::Credential;
use crate::extract::{FieldExtractor, RegexExtractor};
use crate::session::{Page, Redirects, Session};
use crate::LoadTestError;

pub mod cas;
pub mod combined;
pub mod saml;

use cas::{CasEndpoints, CasFlow};
use combined::CombinedFlow;
use saml::{IdpLogin, SamlFlow, ServiceProvider};

/// The available login flows.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FlowKind {
    /// CAS protocol login and ticket validation.
    #[default]
    Cas,
    /// Identity provider initiated SAML login.
    Saml,
    /// Service provider initiated SAML login through a CAS identity provider.
    Combined,
}

/// Where a login is at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum FlowState {
    Start,
    TokensExtracted,
    CredentialsSubmitted,
    TicketOrAssertionObtained,
    Validated,
    LoggedOut,
    Aborted,
}

/// A completed login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Who logged in.
    pub username: String,
    /// Every state the login went through, starting with `Start`.
    pub states: Vec<FlowState>,
}

impl SessionOutcome {
    /// The final state, `LoggedOut` for every completed login.
    pub fn state(&self) -> FlowState {
        self.states.last().copied().unwrap_or(FlowState::Start)
    }
}

/// Why a login aborted.
#[derive(Debug)]
pub enum FlowError {
    /// An expected hidden form field was not in the response.
    MissingToken {
        /// The step whose response lacked the field.
        step: &'static str,
        field: String,
    },
    /// A redirect didn't carry the expected query parameter, or there was no redirect.
    MissingRedirectParameter {
        step: &'static str,
        parameter: String,
        /// The status code of the response that should have redirected.
        status: StatusCode,
    },
    /// The server answered with an unexpected status code.
    UnexpectedStatusCode {
        step: &'static str,
        expected: StatusCode,
        actual: StatusCode,
    },
    /// The expected success marker was not in the response.
    ContentMismatch {
        step: &'static str,
        marker: String,
        /// What the server said instead, if anything useful.
        detail: Option<String>,
    },
    /// No response was received.
    Request {
        step: &'static str,
        source: reqwest::Error,
    },
}

impl FlowError {
    fn describe(&self) -> &str {
        match *self {
            FlowError::MissingToken { .. } => "missing token",
            FlowError::MissingRedirectParameter { .. } => "missing redirect parameter",
            FlowError::UnexpectedStatusCode { .. } => "unexpected status code",
            FlowError::ContentMismatch { .. } => "content mismatch",
            FlowError::Request { .. } => "request failed",
        }
    }

    /// The step the login aborted in.
    pub fn step(&self) -> &'static str {
        match *self {
            FlowError::MissingToken { step, .. }
            | FlowError::MissingRedirectParameter { step, .. }
            | FlowError::UnexpectedStatusCode { step, .. }
            | FlowError::ContentMismatch { step, .. }
            | FlowError::Request { step, .. } => step,
        }
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FlowError::MissingToken { step, field } => {
                write!(f, "{}: {} not found in {}", self.describe(), field, step)
            }
            FlowError::MissingRedirectParameter {
                step,
                parameter,
                status,
            } => write!(
                f,
                "{}: {} not found in {} redirect ({})",
                self.describe(),
                parameter,
                step,
                status
            ),
            FlowError::UnexpectedStatusCode {
                step,
                expected,
                actual,
            } => write!(
                f,
                "{}: {} returned {}, expected {}",
                self.describe(),
                step,
                actual,
                expected
            ),
            FlowError::ContentMismatch {
                step,
                marker,
                detail,
            } => match detail {
                Some(detail) => write!(
                    f,
                    "{}: {} not found in {} ({})",
                    self.describe(),
                    marker,
                    step,
                    detail
                ),
                None => write!(f, "{}: {} not found in {}", self.describe(), marker, step),
            },
            FlowError::Request { step, source } => {
                write!(f, "{}: {} ({})", self.describe(), step, source)
            }
        }
    }
}

impl std::error::Error for FlowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            FlowError::Request { ref source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Tracks the states a login passes through.
#[derive(Clone, Debug)]
pub struct FlowProgress {
    user: usize,
    kind: FlowKind,
    states: Vec<FlowState>,
}

impl FlowProgress {
    pub fn new(user: usize, kind: FlowKind) -> Self {
        FlowProgress {
            user,
            kind,
            states: vec![FlowState::Start],
        }
    }

    pub fn advance(&mut self, state: FlowState) {
        debug!(
            "[user {}] {} flow: {} -> {}",
            self.user,
            self.kind,
            self.state(),
            state
        );
        self.states.push(state);
    }

    pub fn state(&self) -> FlowState {
        self.states.last().copied().unwrap_or(FlowState::Start)
    }

    pub fn states(&self) -> &[FlowState] {
        &self.states
    }
}

/// A scripted login.
///
/// Implementations make their requests through the [`Session`] in order,
/// recording each state they reach in `progress`, and must end in
/// [`FlowState::LoggedOut`] when returning `Ok`.
#[async_trait]
pub trait LoginFlow: Send + Sync {
    fn kind(&self) -> FlowKind;

    async fn run(
        &self,
        session: &Session,
        credential: &Credential,
        progress: &mut FlowProgress,
    ) -> Result<(), FlowError>;
}

/// Run one login as `credential`, logging a diagnostic if it aborts.
pub async fn simulate(
    flow: &dyn LoginFlow,
    session: &Session,
    credential: &Credential,
) -> Result<SessionOutcome, FlowError> {
    let mut progress = FlowProgress::new(session.user(), flow.kind());
    match flow.run(session, credential, &mut progress).await {
        Ok(()) => Ok(SessionOutcome {
            username: credential.username.clone(),
            states: progress.states,
        }),
        Err(error) => {
            warn!(
                "[user {}] {} login as {} aborted after {}: {}",
                session.user(),
                flow.kind(),
                credential.username,
                progress.state(),
                error
            );
            Err(error)
        }
    }
}

/// Build the flow selected by `configuration`.
pub fn from_configuration(
    configuration: &Configuration,
) -> Result<Arc<dyn LoginFlow>, LoadTestError> {
    let extractor: Arc<dyn FieldExtractor> = Arc::new(RegexExtractor::new()?);
    let endpoints = CasEndpoints::new(&configuration.host)?;

    let flow: Arc<dyn LoginFlow> = match configuration.flow_kind() {
        FlowKind::Cas => Arc::new(CasFlow::new(
            endpoints,
            configuration.required_url("--service", &configuration.service)?,
            extractor,
        )),
        FlowKind::Saml => Arc::new(SamlFlow::new(
            configuration.required_url("--saml-login", &configuration.saml_login)?,
            service_provider(configuration)?,
            endpoints.logout,
            extractor,
        )),
        FlowKind::Combined => Arc::new(CombinedFlow::new(
            configuration.required_url("--sp-entry", &configuration.sp_entry)?,
            IdpLogin::new(service_provider(configuration)?, endpoints.logout, extractor),
        )),
    };
    info!("simulating {} logins", flow.kind());

    Ok(flow)
}

fn service_provider(configuration: &Configuration) -> Result<ServiceProvider, LoadTestError> {
    let acs = if configuration.sp_acs.is_empty() {
        None
    } else {
        Some(configuration.required_url("--sp-acs", &configuration.sp_acs)?)
    };
    Ok(ServiceProvider {
        acs,
        success_marker: configuration.success_marker.clone(),
    })
}

/// Returns the non-empty value of hidden field `field`, or aborts.
pub(crate) fn require_field(
    extractor: &dyn FieldExtractor,
    page: &Page,
    field: &str,
    step: &'static str,
) -> Result<String, FlowError> {
    match extractor.hidden_field(&page.body, field) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(FlowError::MissingToken {
            step,
            field: field.to_string(),
        }),
    }
}

pub(crate) fn expect_status(
    page: &Page,
    expected: StatusCode,
    step: &'static str,
) -> Result<(), FlowError> {
    if page.status == expected {
        Ok(())
    } else {
        Err(FlowError::UnexpectedStatusCode {
            step,
            expected,
            actual: page.status,
        })
    }
}

pub(crate) fn request_failed(step: &'static str) -> impl FnOnce(reqwest::Error) -> FlowError {
    move |source| FlowError::Request { step, source }
}

/// POST a credential together with the tokens scraped from the login form.
pub(crate) async fn submit_credentials(
    session: &Session,
    step: &'static str,
    url: &Url,
    credential: &Credential,
    execution: &str,
    event_id: &str,
    redirects: Redirects,
) -> Result<Page, FlowError> {
    debug!(
        "[user {}] submitting credentials for {} to {}",
        session.user(),
        credential.username,
        url
    );
    let params = [
        ("username", credential.username.as_str()),
        ("password", credential.password.as_str()),
        ("execution", execution),
        ("_eventId", event_id),
        ("geolocation", ""),
    ];
    session
        .post_form(step, url, &params, redirects)
        .await
        .map_err(request_failed(step))
}

/// GET the logout endpoint. The response doesn't matter.
pub(crate) async fn logout(session: &Session, step: &'static str, url: &Url) {
    if let Err(e) = session.get(step, url, Redirects::Follow).await {
        debug!("[user {}] ignoring failed logout: {}", session.user(), e);
    }
}
