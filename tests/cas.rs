use httpmock::Method::{GET, POST};
use httpmock::{Mock, MockServer};
use serial_test::serial;

mod common;

use cas_loadtest::credentials::Credential;
use cas_loadtest::flow::{self, FlowError, FlowState};
use cas_loadtest::metrics::LoadTestMetrics;
use cas_loadtest::session::{Session, SessionOptions};

use common::{LOGIN_PATH, LOGOUT_PATH, SERVICE, VALIDATE_PATH};

// Indexes to the mocked endpoints.
const LOGIN_PAGE_KEY: usize = 0;
const LOGIN_KEY: usize = 1;
const VALIDATE_KEY: usize = 2;
const LOGOUT_KEY: usize = 3;

// How each mocked CAS server misbehaves.
#[derive(Clone, Copy)]
enum TestType {
    // Every step succeeds.
    Success,
    // The login page has no execution token.
    NoExecution,
    // The credentials are rejected and the login form shown again.
    BadCredentials,
    // The ticket doesn't validate.
    InvalidTicket,
    // The server fails to validate.
    ValidateError,
}

// Set up a CAS server issuing service ticket `ticket`.
fn setup_mock_server_endpoints<'a>(
    server: &'a MockServer,
    test_type: TestType,
    ticket: &str,
) -> Vec<Mock<'a>> {
    let location = format!(
        "{}?service=https%3A%2F%2Fapp.example.org%2F&ticket={}",
        VALIDATE_PATH, ticket
    );
    vec![
        // The login form, store in vector at LOGIN_PAGE_KEY.
        server.mock(|when, then| {
            when.method(GET)
                .path(LOGIN_PATH)
                .query_param("service", SERVICE);
            let page = match test_type {
                TestType::NoExecution => common::login_page("", "submit"),
                _ => common::login_page("E1", "EV1"),
            };
            then.status(200)
                .header("Set-Cookie", "JSESSIONID=abc123; Path=/cas")
                .body(page);
        }),
        // Submitting credentials, store in vector at LOGIN_KEY.
        server.mock(|when, then| {
            when.method(POST)
                .path(LOGIN_PATH)
                .header("content-type", "application/x-www-form-urlencoded")
                .header("cookie", "JSESSIONID=abc123")
                // The scraped tokens are replayed verbatim.
                .form_urlencoded_tuple("execution", "E1")
                .form_urlencoded_tuple("_eventId", "EV1")
                .form_urlencoded_tuple("username", "alice")
                .form_urlencoded_tuple("password", "secret1");
            match test_type {
                TestType::BadCredentials => {
                    then.status(401).body(common::login_page("E2", "submit"));
                }
                _ => {
                    then.status(302)
                        .header("Location", location.as_str())
                        .header("Set-Cookie", "TGC=TGT-1; Path=/cas");
                }
            }
        }),
        // Validating the ticket, store in vector at VALIDATE_KEY.
        server.mock(|when, then| {
            when.method(GET)
                .path(VALIDATE_PATH)
                .query_param("service", SERVICE)
                .query_param("ticket", ticket);
            match test_type {
                TestType::InvalidTicket => {
                    then.status(200).body(
                        r#"<cas:serviceResponse xmlns:cas="http://www.yale.edu/tp/cas">
    <cas:authenticationFailure code="INVALID_TICKET">Ticket not recognized</cas:authenticationFailure>
</cas:serviceResponse>"#,
                    );
                }
                TestType::ValidateError => {
                    then.status(500).body("oops");
                }
                _ => {
                    then.status(200).body(common::authentication_success("alice"));
                }
            }
        }),
        // Logging out, store in vector at LOGOUT_KEY.
        server.mock(|when, then| {
            when.method(GET).path(LOGOUT_PATH);
            then.status(200).body("Logout successful");
        }),
    ]
}

// Run a single CAS login as alice.
async fn run_flow(server: &MockServer) -> Result<Vec<FlowState>, FlowError> {
    let configuration = common::build_configuration(
        server,
        vec!["--service", SERVICE, "--credentials", "unused.csv"],
    );
    let flow = flow::from_configuration(&configuration).unwrap();
    let session = Session::new(&SessionOptions::default(), 1, None).unwrap();
    let credential = Credential::new("alice", "secret1");
    flow::simulate(&*flow, &session, &credential)
        .await
        .map(|outcome| {
            assert_eq!(outcome.username, "alice");
            outcome.states
        })
}

// Confirm which endpoints were requested.
fn validate_hits(mock_endpoints: &[Mock], hits: [usize; 4]) {
    mock_endpoints[LOGIN_PAGE_KEY].assert_hits(hits[0]);
    mock_endpoints[LOGIN_KEY].assert_hits(hits[1]);
    mock_endpoints[VALIDATE_KEY].assert_hits(hits[2]);
    mock_endpoints[LOGOUT_KEY].assert_hits(hits[3]);
}

#[tokio::test]
#[serial]
// A complete login through the harness, from the credential file to the report.
async fn test_cas_login() {
    let server = MockServer::start();
    let mock_endpoints = setup_mock_server_endpoints(&server, TestType::Success, "ST-1");

    let credentials = common::credential_file("cas-login.csv", "alice,secret1\n");
    let report = std::env::temp_dir()
        .join(format!("{}-cas-report.json", std::process::id()))
        .display()
        .to_string();
    let configuration = common::build_configuration(
        &server,
        vec![
            "--service",
            SERVICE,
            "--credentials",
            &credentials,
            "--report-file",
            &report,
        ],
    );
    let metrics = common::run_load_test(configuration).await;

    validate_hits(&mock_endpoints, [1, 1, 1, 1]);
    assert_eq!(metrics.users, 1);
    assert_eq!(metrics.successful_flows(), 1);
    assert_eq!(metrics.failed_flows(), 0);
    assert!(metrics.errors.is_empty());

    for (key, status) in [
        ("GET cas login page", 200),
        ("POST cas login", 302),
        ("GET cas service validate", 200),
        ("GET cas logout", 200),
    ] {
        let request = metrics.requests.get(key).unwrap();
        assert_eq!(request.success_count, 1);
        assert_eq!(request.fail_count, 0);
        assert_eq!(request.status_codes.get(&status), Some(&1));
    }

    // The report holds the same metrics.
    let contents = std::fs::read_to_string(&report).unwrap();
    let written: LoadTestMetrics = serde_json::from_str(&contents).unwrap();
    assert_eq!(written.successful_flows(), 1);
    assert_eq!(written.requests.len(), 4);

    common::cleanup_files(vec![&credentials, &report]);
}

#[tokio::test]
// Every state is visited in order.
async fn test_cas_states() {
    let server = MockServer::start();
    let mock_endpoints = setup_mock_server_endpoints(&server, TestType::Success, "ST-1");

    let states = run_flow(&server).await.unwrap();
    assert_eq!(
        states,
        vec![
            FlowState::Start,
            FlowState::TokensExtracted,
            FlowState::CredentialsSubmitted,
            FlowState::TicketOrAssertionObtained,
            FlowState::Validated,
            FlowState::LoggedOut,
        ]
    );
    validate_hits(&mock_endpoints, [1, 1, 1, 1]);
}

#[tokio::test]
// The ticket is passed on exactly as received.
async fn test_ticket_verbatim() {
    let server = MockServer::start();
    let mock_endpoints = setup_mock_server_endpoints(&server, TestType::Success, "ABC123");

    assert!(run_flow(&server).await.is_ok());
    validate_hits(&mock_endpoints, [1, 1, 1, 1]);
}

#[tokio::test]
// Without an execution token, credentials are never submitted.
async fn test_missing_execution() {
    let server = MockServer::start();
    let mock_endpoints = setup_mock_server_endpoints(&server, TestType::NoExecution, "ST-1");

    match run_flow(&server).await {
        Err(FlowError::MissingToken { step, field }) => {
            assert_eq!(step, "cas login page");
            assert_eq!(field, "execution");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    validate_hits(&mock_endpoints, [1, 0, 0, 0]);
}

#[tokio::test]
// Rejected credentials don't redirect with a ticket.
async fn test_bad_credentials() {
    let server = MockServer::start();
    let mock_endpoints = setup_mock_server_endpoints(&server, TestType::BadCredentials, "ST-1");

    match run_flow(&server).await {
        Err(FlowError::MissingRedirectParameter {
            parameter, status, ..
        }) => {
            assert_eq!(parameter, "ticket");
            assert_eq!(status.as_u16(), 401);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    validate_hits(&mock_endpoints, [1, 1, 0, 0]);
}

#[tokio::test]
// An authenticationFailure aborts without logging out.
async fn test_invalid_ticket() {
    let server = MockServer::start();
    let mock_endpoints = setup_mock_server_endpoints(&server, TestType::InvalidTicket, "ST-1");

    match run_flow(&server).await {
        Err(error @ FlowError::ContentMismatch { .. }) => {
            assert!(error.to_string().contains("INVALID_TICKET"));
            assert_eq!(error.step(), "cas service validate");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    validate_hits(&mock_endpoints, [1, 1, 1, 0]);
}

#[tokio::test]
// Validation must answer 200 OK.
async fn test_validate_error() {
    let server = MockServer::start();
    let mock_endpoints = setup_mock_server_endpoints(&server, TestType::ValidateError, "ST-1");

    match run_flow(&server).await {
        Err(FlowError::UnexpectedStatusCode {
            expected, actual, ..
        }) => {
            assert_eq!(expected.as_u16(), 200);
            assert_eq!(actual.as_u16(), 500);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    validate_hits(&mock_endpoints, [1, 1, 1, 0]);
}

#[tokio::test]
// An unreachable server aborts on the first request.
async fn test_unreachable_server() {
    let server = MockServer::start();
    let configuration = common::build_configuration(
        &server,
        vec![
            "--host",
            "http://127.0.0.1:1/cas",
            "--service",
            SERVICE,
            "--credentials",
            "unused.csv",
        ],
    );
    let flow = flow::from_configuration(&configuration).unwrap();
    let session = Session::new(&SessionOptions::default(), 1, None).unwrap();
    let result = flow::simulate(&*flow, &session, &Credential::new("alice", "secret1")).await;
    match result {
        Err(error @ FlowError::Request { .. }) => {
            assert_eq!(error.step(), "cas login page");
            assert!(std::error::Error::source(&error).is_some());
        }
        other => panic!("unexpected result: {:?}", other),
    }
}
