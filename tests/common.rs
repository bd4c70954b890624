use gumdrop::Options;
use httpmock::MockServer;
use std::io::{self, BufRead};

use cas_loadtest::config::Configuration;
use cas_loadtest::metrics::LoadTestMetrics;
use cas_loadtest::LoadTest;

// Not all functions are used by all tests, so we enable allow(dead_code) to avoid
// compiler warnings during testing.

#[allow(dead_code)]
pub const LOGIN_PATH: &str = "/cas/login";
#[allow(dead_code)]
pub const VALIDATE_PATH: &str = "/cas/serviceValidate";
#[allow(dead_code)]
pub const LOGOUT_PATH: &str = "/cas/logout";
#[allow(dead_code)]
pub const SERVICE: &str = "https://app.example.org/";

/// The CAS base url on the mock server.
pub fn cas_host(server: &MockServer) -> String {
    server.url("/cas")
}

/// The following options are configured by default, if not set to a custom value:
///  --host <mock-server>/cas
///  --users 1
///  --hatch-rate 1
///  --iterations 1 (unless a run time is set)
///  --no-print-metrics
pub fn build_configuration(server: &MockServer, custom: Vec<&str>) -> Configuration {
    // Start with an empty configuration.
    let mut configuration: Vec<&str> = vec![];
    // Declare the host here, so its lifetime is sufficient when needed.
    let host = cas_host(server);

    // Merge in all custom options first.
    configuration.extend_from_slice(&custom);

    if !configuration.contains(&"--host") {
        configuration.extend_from_slice(&["--host", &host]);
    }
    if !configuration.contains(&"--users") {
        configuration.extend_from_slice(&["--users", "1"]);
    }
    if !configuration.contains(&"--hatch-rate") {
        configuration.extend_from_slice(&["--hatch-rate", "1"]);
    }
    if !configuration.contains(&"--iterations") && !configuration.contains(&"--run-time") {
        configuration.extend_from_slice(&["--iterations", "1"]);
    }
    configuration.push("--no-print-metrics");

    // Parse these options to generate a Configuration.
    Configuration::parse_args_default(&configuration)
        .expect("failed to parse options and generate a configuration")
}

/// Run the load test, returning the metrics.
#[allow(dead_code)]
pub async fn run_load_test(configuration: Configuration) -> LoadTestMetrics {
    LoadTest::initialize_with_config(configuration)
        .expect("failed to initialize load test")
        .execute()
        .await
        .expect("load test failed")
}

/// Write a credential file, returning its path.
#[allow(dead_code)]
pub fn credential_file(name: &str, contents: &str) -> String {
    let path = std::env::temp_dir().join(format!("{}-{}", std::process::id(), name));
    std::fs::write(&path, contents).expect("failed to write credential file");
    path.display().to_string()
}

/// A CAS login form.
#[allow(dead_code)]
pub fn login_page(execution: &str, event_id: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<body>
<form method="post" id="fm1" action="login">
    <input id="username" name="username" type="text" value="" autocomplete="off"/>
    <input type="password" id="password" name="password" value="" autocomplete="off"/>
    <input type="hidden" name="execution" value="{}"/>
    <input type="hidden" name="_eventId" value="{}"/>
    <input type="hidden" name="geolocation"/>
    <input class="btn-submit" name="submit" accesskey="l" value="LOGIN" type="submit"/>
</form>
</body>
</html>"#,
        execution, event_id
    )
}

/// The identity provider's auto-submitting SAML POST binding form.
#[allow(dead_code)]
pub fn saml_response_page(action: &str, relay_state: &str, saml_response: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<body onload="document.forms[0].submit()">
<noscript><p>Press Continue to proceed.</p></noscript>
<form action="{}" method="post">
<div>
<input type="hidden" name="RelayState" value="{}"/>
<input type="hidden" name="SAMLResponse" value="{}"/>
</div>
<noscript><div><input type="submit" value="Continue"/></div></noscript>
</form>
</body>
</html>"#,
        action, relay_state, saml_response
    )
}

/// The service provider's auto-submitting SAML request form.
#[allow(dead_code)]
pub fn saml_request_page(action: &str, saml_request: &str, relay_state: &str) -> String {
    format!(
        r#"<html><body onload="document.forms[0].submit()">
<form method='post' action='{}'>
<input type='hidden' name='SAMLRequest' value='{}' />
<input type='hidden' name='RelayState' value='{}' />
</form></body></html>"#,
        action, saml_request, relay_state
    )
}

/// A successful serviceValidate response.
#[allow(dead_code)]
pub fn authentication_success(username: &str) -> String {
    format!(
        r#"<cas:serviceResponse xmlns:cas="http://www.yale.edu/tp/cas">
    <cas:authenticationSuccess>
        <cas:user>{}</cas:user>
    </cas:authenticationSuccess>
</cas:serviceResponse>"#,
        username
    )
}

/// Helper to count the number of lines in a test artifact.
#[allow(dead_code)]
pub fn file_length(file_name: &str) -> usize {
    if let Ok(file) = std::fs::File::open(std::path::Path::new(file_name)) {
        io::BufReader::new(file).lines().count()
    } else {
        0
    }
}

/// Helper to delete test artifacts, if existing.
#[allow(dead_code)]
pub fn cleanup_files(files: Vec<&str>) {
    for file in files {
        if std::path::Path::new(file).exists() {
            std::fs::remove_file(file).expect("failed to remove file");
        }
    }
}
