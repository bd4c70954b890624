//! SAML login through the identity provider's login page.
//!
//! The identity provider answers a successful login with an auto-submitting
//! form carrying `SAMLResponse` and `RelayState`. A browser would post that
//! form to the service provider's assertion consumer service; so does the
//! flow, checking the service provider's page for a success marker.

use async_trait::async_trait;
use http::StatusCode;
use std::sync::Arc;
use url::Url;

use super::{
    cas, expect_status, logout, request_failed, require_field, submit_credentials, FlowError,
    FlowKind, FlowProgress, FlowState, LoginFlow,
};
use crate::credentials::Credential;
use crate::extract::FieldExtractor;
use crate::session::{Page, Redirects, Session};

const LOGIN_PAGE: &str = "saml login page";
const LOGIN: &str = "saml login";
const ASSERTION_CONSUMER: &str = "saml assertion consumer";

/// Where assertions go, and how to recognize the service provider accepted one.
#[derive(Clone, Debug)]
pub struct ServiceProvider {
    /// The assertion consumer service. When unset, assertions are posted to
    /// the action of the form they arrived in.
    pub acs: Option<Url>,
    /// Text the service provider's page contains after a successful login.
    pub success_marker: String,
}

/// The fields of an identity provider's SAML POST binding form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SamlAssertion {
    pub saml_response: String,
    pub relay_state: String,
    /// The form's action, resolved against the page it came from.
    pub action: Option<Url>,
}

impl SamlAssertion {
    /// Scrape an assertion from `page`, aborting unless both `SAMLResponse`
    /// and `RelayState` are present.
    pub fn from_page(
        extractor: &dyn FieldExtractor,
        page: &Page,
        step: &'static str,
    ) -> Result<Self, FlowError> {
        let saml_response = require_field(extractor, page, "SAMLResponse", step)?;
        let relay_state = require_field(extractor, page, "RelayState", step)?;
        let action = extractor
            .form_action(&page.body)
            .and_then(|action| page.url.join(&action).ok());

        Ok(SamlAssertion {
            saml_response,
            relay_state,
            action,
        })
    }

    /// The form fields to post to the assertion consumer service.
    pub fn form(&self) -> [(&str, &str); 2] {
        [
            ("RelayState", self.relay_state.as_str()),
            ("SAMLResponse", self.saml_response.as_str()),
        ]
    }
}

/// The identity provider side of a SAML login: posting credentials on its
/// login page, delivering the assertion and logging out.
pub struct IdpLogin {
    provider: ServiceProvider,
    logout: Url,
    extractor: Arc<dyn FieldExtractor>,
}

impl IdpLogin {
    pub fn new(provider: ServiceProvider, logout: Url, extractor: Arc<dyn FieldExtractor>) -> Self {
        IdpLogin {
            provider,
            logout,
            extractor,
        }
    }

    pub(crate) fn extractor(&self) -> &dyn FieldExtractor {
        &*self.extractor
    }

    /// Log in on an identity provider login page already fetched in step
    /// `page_step`, then deliver the assertion and log out.
    pub(crate) async fn login_on_page(
        &self,
        session: &Session,
        page: Page,
        page_step: &'static str,
        credential: &Credential,
        progress: &mut FlowProgress,
    ) -> Result<(), FlowError> {
        let execution = require_field(self.extractor(), &page, "execution", page_step)?;
        let event_id = require_field(self.extractor(), &page, "_eventId", page_step)?;
        progress.advance(FlowState::TokensExtracted);

        let response = submit_credentials(
            session,
            LOGIN,
            &page.url,
            credential,
            &execution,
            &event_id,
            Redirects::Follow,
        )
        .await?;
        progress.advance(FlowState::CredentialsSubmitted);

        let assertion = SamlAssertion::from_page(self.extractor(), &response, LOGIN)?;
        progress.advance(FlowState::TicketOrAssertionObtained);

        let acs = self
            .provider
            .acs
            .as_ref()
            .or(assertion.action.as_ref())
            .ok_or_else(|| FlowError::MissingToken {
                step: LOGIN,
                field: "form action".to_string(),
            })?;
        let page = session
            .post_form(ASSERTION_CONSUMER, acs, &assertion.form(), Redirects::Follow)
            .await
            .map_err(request_failed(ASSERTION_CONSUMER))?;
        expect_status(&page, StatusCode::OK, ASSERTION_CONSUMER)?;
        if !page.body.contains(&self.provider.success_marker) {
            return Err(FlowError::ContentMismatch {
                step: ASSERTION_CONSUMER,
                marker: self.provider.success_marker.clone(),
                detail: None,
            });
        }
        progress.advance(FlowState::Validated);

        logout(session, cas::LOGOUT, &self.logout).await;
        progress.advance(FlowState::LoggedOut);

        Ok(())
    }
}

/// Identity provider initiated SAML login.
pub struct SamlFlow {
    login: Url,
    idp: IdpLogin,
}

impl SamlFlow {
    pub fn new(
        login: Url,
        provider: ServiceProvider,
        logout: Url,
        extractor: Arc<dyn FieldExtractor>,
    ) -> Self {
        SamlFlow {
            login,
            idp: IdpLogin::new(provider, logout, extractor),
        }
    }
}

#[async_trait]
impl LoginFlow for SamlFlow {
    fn kind(&self) -> FlowKind {
        FlowKind::Saml
    }

    async fn run(
        &self,
        session: &Session,
        credential: &Credential,
        progress: &mut FlowProgress,
    ) -> Result<(), FlowError> {
        let page = session
            .get(LOGIN_PAGE, &self.login, Redirects::Follow)
            .await
            .map_err(request_failed(LOGIN_PAGE))?;
        self.idp
            .login_on_page(session, page, LOGIN_PAGE, credential, progress)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::RegexExtractor;

    fn page(body: &str) -> Page {
        Page {
            status: StatusCode::OK,
            url: Url::parse("https://idp.example.com/cas/idp/profile/SAML2/POST/SSO").unwrap(),
            location: None,
            body: body.to_string(),
        }
    }

    #[test]
    fn post_binding_form() {
        let extractor = RegexExtractor::new().unwrap();
        let page = page(
            r#"<html><body onload="document.forms[0].submit()">
<form method="post" action="https&#x3a;&#x2f;&#x2f;sp.example.com&#x2f;Shibboleth.sso&#x2f;SAML2&#x2f;POST">
<input type="hidden" name="RelayState" value="ss&#x3a;mem&#x3a;1f2e"/>
<input type="hidden" name="SAMLResponse" value="PHNhbWxwOlJlc3BvbnNl+Pg=="/>
<noscript><input type="submit" value="Continue"/></noscript>
</form></body></html>"#,
        );
        let assertion = SamlAssertion::from_page(&extractor, &page, "saml login").unwrap();
        assert_eq!(assertion.relay_state, "ss:mem:1f2e");
        assert_eq!(assertion.saml_response, "PHNhbWxwOlJlc3BvbnNl+Pg==");
        assert_eq!(
            assertion.action.as_ref().map(Url::as_str),
            Some("https://sp.example.com/Shibboleth.sso/SAML2/POST")
        );
        assert_eq!(
            assertion.form(),
            [
                ("RelayState", "ss:mem:1f2e"),
                ("SAMLResponse", "PHNhbWxwOlJlc3BvbnNl+Pg==")
            ]
        );
    }

    #[test]
    fn relative_action() {
        let extractor = RegexExtractor::new().unwrap();
        let page = page(
            r#"<form action="/sp/acs" method="post">
<input type="hidden" name="SAMLResponse" value="abc"/>
<input type="hidden" name="RelayState" value="xyz"/></form>"#,
        );
        let assertion = SamlAssertion::from_page(&extractor, &page, "saml login").unwrap();
        assert_eq!(
            assertion.action.as_ref().map(Url::as_str),
            Some("https://idp.example.com/sp/acs")
        );
    }

    #[test]
    fn incomplete_assertion() {
        let extractor = RegexExtractor::new().unwrap();
        let no_relay_state = page(r#"<input type="hidden" name="SAMLResponse" value="abc"/>"#);
        match SamlAssertion::from_page(&extractor, &no_relay_state, "saml login") {
            Err(FlowError::MissingToken { field, .. }) => assert_eq!(field, "RelayState"),
            other => panic!("unexpected result: {:?}", other),
        }

        let no_response = page(r#"<input type="hidden" name="RelayState" value="xyz"/>"#);
        match SamlAssertion::from_page(&extractor, &no_response, "saml login") {
            Err(FlowError::MissingToken { field, .. }) => assert_eq!(field, "SAMLResponse"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
