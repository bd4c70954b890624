//! Service provider initiated SAML login.
//!
//! The login starts at a protected page of the service provider, which sends
//! the user to the identity provider either with a redirect (followed like any
//! other) or with an auto-submitting form carrying a `SAMLRequest`. Once on the
//! identity provider's login page, the login continues as a
//! [`SamlFlow`](super::saml::SamlFlow) would.

use async_trait::async_trait;
use url::Url;

use super::saml::IdpLogin;
use super::{request_failed, FlowError, FlowKind, FlowProgress, LoginFlow};
use crate::credentials::Credential;
use crate::session::{Redirects, Session};

const ENTRY: &str = "sp entry";
const SSO: &str = "idp sso";

pub struct CombinedFlow {
    entry: Url,
    idp: IdpLogin,
}

impl CombinedFlow {
    /// Start logins at `entry` and finish them with `idp`.
    pub fn new(entry: Url, idp: IdpLogin) -> Self {
        CombinedFlow { entry, idp }
    }
}

#[async_trait]
impl LoginFlow for CombinedFlow {
    fn kind(&self) -> FlowKind {
        FlowKind::Combined
    }

    async fn run(
        &self,
        session: &Session,
        credential: &Credential,
        progress: &mut FlowProgress,
    ) -> Result<(), FlowError> {
        let page = session
            .get(ENTRY, &self.entry, Redirects::Follow)
            .await
            .map_err(request_failed(ENTRY))?;

        let extractor = self.idp.extractor();
        let saml_request = extractor
            .hidden_field(&page.body, "SAMLRequest")
            .filter(|request| !request.is_empty());
        let (page, step) = match saml_request {
            Some(saml_request) => {
                let action = extractor
                    .form_action(&page.body)
                    .and_then(|action| page.url.join(&action).ok())
                    .ok_or_else(|| FlowError::MissingToken {
                        step: ENTRY,
                        field: "form action".to_string(),
                    })?;
                let relay_state = extractor.hidden_field(&page.body, "RelayState");
                let mut params = vec![("SAMLRequest", saml_request.as_str())];
                if let Some(relay_state) = relay_state.as_deref() {
                    params.push(("RelayState", relay_state));
                }
                debug!("[user {}] posting SAMLRequest to {}", session.user(), action);
                let page = session
                    .post_form(SSO, &action, &params, Redirects::Follow)
                    .await
                    .map_err(request_failed(SSO))?;
                (page, SSO)
            }
            // Redirect binding, already on the login page.
            None => (page, ENTRY),
        };

        self.idp
            .login_on_page(session, page, step, credential, progress)
            .await
    }
}
