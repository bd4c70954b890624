//! CAS protocol login.
//!
//! 1. `GET {host}/login?service=...`, scraping `execution` and `_eventId`.
//! 2. `POST` the credentials back without following the redirect, reading the
//!    service ticket from the `ticket` parameter of its `Location`.
//! 3. `GET {host}/serviceValidate?service=...&ticket=...`, which must answer
//!    `200 OK` with a `<cas:authenticationSuccess>` document.
//! 4. `GET {host}/logout`.

use async_trait::async_trait;
use http::StatusCode;
use std::sync::Arc;
use url::Url;

use super::{
    expect_status, logout, request_failed, require_field, submit_credentials, FlowError, FlowKind,
    FlowProgress, FlowState, LoginFlow,
};
use crate::credentials::Credential;
use crate::extract::{query_parameter, FieldExtractor};
use crate::session::{Redirects, Session};
use crate::LoadTestError;

/// Present in every successful `/serviceValidate` response.
pub const AUTHENTICATION_SUCCESS: &str = "<cas:authenticationSuccess>";

const AUTHENTICATION_FAILURE: &str = "<cas:authenticationFailure";

pub(crate) const LOGIN_PAGE: &str = "cas login page";
pub(crate) const LOGIN: &str = "cas login";
const SERVICE_VALIDATE: &str = "cas service validate";
pub(crate) const LOGOUT: &str = "cas logout";

/// The CAS server endpoints a login talks to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CasEndpoints {
    pub login: Url,
    pub service_validate: Url,
    pub logout: Url,
}

impl CasEndpoints {
    /// Endpoints relative to the CAS base URL, e.g. `https://idp.example.com/cas`.
    pub fn new(host: &str) -> Result<Self, LoadTestError> {
        let invalid = |parse_error, detail: &str| LoadTestError::InvalidHost {
            host: host.to_string(),
            detail: detail.to_string(),
            parse_error,
        };
        let mut base = Url::parse(host).map_err(|e| invalid(e, "invalid host"))?;
        if base.cannot_be_a_base() {
            return Err(invalid(
                url::ParseError::RelativeUrlWithCannotBeABaseBase,
                "host must be an http or https url",
            ));
        }
        // Join relative to the last path segment, not in place of it.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = |path: &str| {
            base.join(path)
                .map_err(|e| invalid(e, "failed to build endpoint"))
        };

        Ok(CasEndpoints {
            login: endpoint("login")?,
            service_validate: endpoint("serviceValidate")?,
            logout: endpoint("logout")?,
        })
    }

    /// The login page for `service`.
    pub fn login_for(&self, service: &Url) -> Url {
        let mut url = self.login.clone();
        url.query_pairs_mut().append_pair("service", service.as_str());
        url
    }

    /// Ticket validation for `service`.
    pub fn validate_for(&self, service: &Url, ticket: &str) -> Url {
        let mut url = self.service_validate.clone();
        url.query_pairs_mut()
            .append_pair("service", service.as_str())
            .append_pair("ticket", ticket);
        url
    }
}

/// The `code` attribute of a `<cas:authenticationFailure>` response, if any.
pub fn authentication_failure(body: &str) -> Option<&str> {
    let start = body.find(AUTHENTICATION_FAILURE)?;
    let tag = &body[start..];
    let tag = &tag[..tag.find('>')?];
    let code = &tag[tag.find("code=\"")? + 6..];
    Some(code[..code.find('"')?].trim())
}

/// Logs in to a service through the CAS protocol.
pub struct CasFlow {
    endpoints: CasEndpoints,
    service: Url,
    extractor: Arc<dyn FieldExtractor>,
}

impl CasFlow {
    pub fn new(endpoints: CasEndpoints, service: Url, extractor: Arc<dyn FieldExtractor>) -> Self {
        CasFlow {
            endpoints,
            service,
            extractor,
        }
    }
}

#[async_trait]
impl LoginFlow for CasFlow {
    fn kind(&self) -> FlowKind {
        FlowKind::Cas
    }

    async fn run(
        &self,
        session: &Session,
        credential: &Credential,
        progress: &mut FlowProgress,
    ) -> Result<(), FlowError> {
        let login = self.endpoints.login_for(&self.service);
        let page = session
            .get(LOGIN_PAGE, &login, Redirects::Manual)
            .await
            .map_err(request_failed(LOGIN_PAGE))?;
        let execution = require_field(&*self.extractor, &page, "execution", LOGIN_PAGE)?;
        let event_id = require_field(&*self.extractor, &page, "_eventId", LOGIN_PAGE)?;
        progress.advance(FlowState::TokensExtracted);

        let response = submit_credentials(
            session,
            LOGIN,
            &login,
            credential,
            &execution,
            &event_id,
            Redirects::Manual,
        )
        .await?;
        progress.advance(FlowState::CredentialsSubmitted);

        let ticket = response
            .location
            .as_deref()
            .and_then(|location| query_parameter(&response.url, location, "ticket"))
            .filter(|ticket| !ticket.is_empty())
            .ok_or_else(|| FlowError::MissingRedirectParameter {
                step: LOGIN,
                parameter: "ticket".to_string(),
                status: response.status,
            })?;
        debug!("[user {}] received ticket {}", session.user(), ticket);
        progress.advance(FlowState::TicketOrAssertionObtained);

        let validate = self.endpoints.validate_for(&self.service, &ticket);
        let page = session
            .get(SERVICE_VALIDATE, &validate, Redirects::Manual)
            .await
            .map_err(request_failed(SERVICE_VALIDATE))?;
        expect_status(&page, StatusCode::OK, SERVICE_VALIDATE)?;
        if !page.body.contains(AUTHENTICATION_SUCCESS) {
            return Err(FlowError::ContentMismatch {
                step: SERVICE_VALIDATE,
                marker: AUTHENTICATION_SUCCESS.to_string(),
                detail: authentication_failure(&page.body)
                    .map(|code| format!("authenticationFailure {}", code)),
            });
        }
        progress.advance(FlowState::Validated);

        logout(session, LOGOUT, &self.endpoints.logout).await;
        progress.advance(FlowState::LoggedOut);

        Ok(())
    }
}
