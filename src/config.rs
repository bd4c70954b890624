//! Run time configuration.
//!
//! All options are set on the command line, see [`Configuration`] or run with
//! `-h`. [`Configuration::validate`] rejects inconsistent options before any
//! user is launched.

use gumdrop::Options;
use serde::{Deserialize, Serialize};
use simplelog::*;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::flow::cas::CasEndpoints;
use crate::flow::FlowKind;
use crate::logger::LogFormat;
use crate::session::SessionOptions;
use crate::util;
use crate::LoadTestError;

/// Runtime options available when launching a load test.
#[derive(Options, Debug, Clone, Default, Serialize, Deserialize)]
#[options(
    help = r#"Load tests CAS and SAML single sign-on logins.

The following runtime options are available:"#
)]
pub struct Configuration {
    /// Displays this help
    #[options(short = "h")]
    pub help: bool,
    /// Prints version information
    #[options(short = "V", help = "Prints version information\n\nEndpoints:")]
    pub version: bool,

    /// Defines the CAS base url (ie https://idp.example.org/cas)
    #[options(short = "H")]
    pub host: String,
    /// Defines the service to log in to (cas flow)
    #[options(no_short, meta = "URL")]
    pub service: String,
    /// Defines the IdP SAML login page (saml flow)
    #[options(no_short, meta = "URL")]
    pub saml_login: String,
    /// Defines the SP page starting a login (combined flow)
    #[options(no_short, meta = "URL")]
    pub sp_entry: String,
    /// Defines the SP assertion consumer (default: form action)
    #[options(no_short, meta = "URL")]
    pub sp_acs: String,
    /// Sets text found on the SP page after login
    #[options(no_short, meta = "TEXT", help = "Sets text found on the SP page after login\n\nLoad test:")]
    pub success_marker: String,

    /// Sets login flow (cas, saml, combined)
    #[options(short = "f", meta = "FLOW")]
    pub flow: Option<FlowKind>,
    /// Sets credential file, one username,password per line
    #[options(short = "c", meta = "NAME")]
    pub credentials: String,
    /// Sets concurrent users (default: 1)
    #[options(short = "u")]
    pub users: Option<usize>,
    /// Sets per-second user hatch rate (default: 1)
    #[options(short = "r", meta = "RATE")]
    pub hatch_rate: Option<String>,
    /// Stops load test after (30s, 20m, 3h, 1h30m, etc)
    #[options(short = "t", meta = "TIME")]
    pub run_time: String,
    /// Sets logins per user, then stops (default: unlimited)
    #[options(no_short, meta = "COUNT")]
    pub iterations: usize,
    /// Sets pause between logins in milliseconds (ie 500,1500)
    #[options(no_short, meta = "MIN,MAX")]
    pub wait: String,
    /// Sets per-request timeout, in seconds (default: 60)
    #[options(no_short, meta = "VALUE")]
    pub timeout: Option<String>,
    /// Disables certificate validation
    #[options(no_short)]
    pub accept_invalid_certs: bool,
    /// Doesn't set the gzip Accept-Encoding header
    #[options(no_short, help = "Doesn't set the gzip Accept-Encoding header\n\nLogging:")]
    pub no_gzip: bool,

    /// Enables log file and sets name
    #[options(short = "G", meta = "NAME")]
    pub log_file: String,
    /// Increases log file level (-g, -gg, etc)
    #[options(short = "g", count)]
    pub log_level: u8,
    /// Decreases verbosity (-q, -qq, etc)
    #[options(count, short = "q")]
    pub quiet: u8,
    /// Increases verbosity (-v, -vv, etc)
    #[options(count, short = "v", help = "Increases verbosity (-v, -vv, etc)\n\nMetrics:")]
    pub verbose: u8,

    /// Sets flow log file name
    #[options(no_short, meta = "NAME")]
    pub flow_log: String,
    /// Sets flow log format (json, csv, raw)
    #[options(no_short, meta = "FORMAT")]
    pub flow_format: Option<LogFormat>,
    /// Writes metrics to a json file
    #[options(no_short, meta = "NAME")]
    pub report_file: String,
    /// Doesn't display metrics at end of load test
    #[options(no_short)]
    pub no_print_metrics: bool,
}

impl Configuration {
    /// Reject invalid and conflicting options.
    pub fn validate(&self) -> Result<(), LoadTestError> {
        if self.verbose > 0 && self.quiet > 0 {
            return Err(LoadTestError::InvalidOption {
                option: "`configuration.verbose`".to_string(),
                value: self.verbose.to_string(),
                detail: "`configuration.verbose` can not be set with `configuration.quiet`."
                    .to_string(),
            });
        }

        if self.users == Some(0) {
            return Err(LoadTestError::InvalidOption {
                option: "`configuration.users`".to_string(),
                value: "0".to_string(),
                detail: "`configuration.users` must be set to at least 1.".to_string(),
            });
        }
        self.hatch_rate()?;
        self.timeout()?;
        self.wait()?;

        if !self.run_time.is_empty() && util::parse_timespan(&self.run_time).is_none() {
            return Err(LoadTestError::InvalidOption {
                option: "`configuration.run_time`".to_string(),
                value: self.run_time.clone(),
                detail: "`configuration.run_time` must be a time span (ie 30s, 20m, 1h30m)."
                    .to_string(),
            });
        }

        if self.credentials.is_empty() {
            return Err(LoadTestError::InvalidOption {
                option: "`configuration.credentials`".to_string(),
                value: String::new(),
                detail: "a credential file must be set with --credentials.".to_string(),
            });
        }

        if self.host.is_empty() {
            return Err(LoadTestError::InvalidOption {
                option: "`configuration.host`".to_string(),
                value: String::new(),
                detail: "the CAS base url must be set with --host.".to_string(),
            });
        }
        CasEndpoints::new(&self.host)?;

        match self.flow_kind() {
            FlowKind::Cas => {
                self.required_url("--service", &self.service)?;
            }
            FlowKind::Saml => {
                self.required_url("--saml-login", &self.saml_login)?;
                self.require_success_marker()?;
            }
            FlowKind::Combined => {
                self.required_url("--sp-entry", &self.sp_entry)?;
                self.require_success_marker()?;
            }
        }
        if !self.sp_acs.is_empty() {
            self.required_url("--sp-acs", &self.sp_acs)?;
        }

        Ok(())
    }

    /// Parse `value`, the url set with `option`, failing if it is not set.
    pub fn required_url(&self, option: &str, value: &str) -> Result<Url, LoadTestError> {
        if value.is_empty() {
            return Err(LoadTestError::InvalidOption {
                option: option.to_string(),
                value: String::new(),
                detail: format!("required by the {} flow.", self.flow_kind()),
            });
        }
        Url::parse(value).map_err(|e| LoadTestError::InvalidOption {
            option: option.to_string(),
            value: value.to_string(),
            detail: format!("invalid url: {}.", e),
        })
    }

    fn require_success_marker(&self) -> Result<(), LoadTestError> {
        if self.success_marker.is_empty() {
            return Err(LoadTestError::InvalidOption {
                option: "--success-marker".to_string(),
                value: String::new(),
                detail: format!("required by the {} flow.", self.flow_kind()),
            });
        }
        Ok(())
    }

    pub fn flow_kind(&self) -> FlowKind {
        self.flow.unwrap_or_default()
    }

    pub fn users(&self) -> usize {
        self.users.unwrap_or(1)
    }

    /// Users launched per second.
    pub fn hatch_rate(&self) -> Result<f32, LoadTestError> {
        let hatch_rate = match self.hatch_rate.as_deref() {
            None => return Ok(1.0),
            Some(hatch_rate) => hatch_rate,
        };
        match hatch_rate.parse::<f32>() {
            Ok(rate) if rate.is_finite() && util::seconds_to_duration(1.0 / rate).is_some() => {
                Ok(rate)
            }
            _ => Err(LoadTestError::InvalidOption {
                option: "`configuration.hatch_rate`".to_string(),
                value: hatch_rate.to_string(),
                detail: "`configuration.hatch_rate` must be a number greater than 0.".to_string(),
            }),
        }
    }

    /// Time between user launches.
    pub fn hatch_interval(&self) -> Result<Duration, LoadTestError> {
        let hatch_rate = self.hatch_rate()?;
        util::seconds_to_duration(1.0 / hatch_rate).ok_or_else(|| LoadTestError::InvalidOption {
            option: "`configuration.hatch_rate`".to_string(),
            value: hatch_rate.to_string(),
            detail: "`configuration.hatch_rate` is out of range.".to_string(),
        })
    }

    /// How long to run, `None` runs until every user is done or ctrl-c.
    pub fn run_time(&self) -> Option<Duration> {
        util::parse_timespan(&self.run_time)
            .filter(|seconds| *seconds > 0)
            .map(|seconds| Duration::from_secs(seconds as u64))
    }

    /// Logins per user, `None` for no limit.
    pub fn iterations(&self) -> Option<usize> {
        if self.iterations == 0 {
            None
        } else {
            Some(self.iterations)
        }
    }

    pub fn timeout(&self) -> Result<Duration, LoadTestError> {
        let timeout = match self.timeout.as_deref() {
            None => return Ok(SessionOptions::default().timeout),
            Some(timeout) => timeout,
        };
        timeout
            .parse::<f32>()
            .ok()
            .and_then(util::seconds_to_duration)
            .ok_or_else(|| LoadTestError::InvalidOption {
                option: "`configuration.timeout`".to_string(),
                value: timeout.to_string(),
                detail: "`configuration.timeout` must be a number of seconds greater than 0."
                    .to_string(),
            })
    }

    /// The range of milliseconds to pause between logins, if any.
    pub fn wait(&self) -> Result<Option<(u64, u64)>, LoadTestError> {
        if self.wait.is_empty() {
            return Ok(None);
        }
        let invalid = |detail: &str| LoadTestError::InvalidOption {
            option: "`configuration.wait`".to_string(),
            value: self.wait.clone(),
            detail: detail.to_string(),
        };
        let (min, max) = self
            .wait
            .split_once(',')
            .ok_or_else(|| invalid("`configuration.wait` must be set as MIN,MAX milliseconds."))?;
        let parse = |value: &str| {
            value.trim().parse::<u64>().map_err(|_| {
                invalid("`configuration.wait` must be set as MIN,MAX milliseconds.")
            })
        };
        let (min, max) = (parse(min)?, parse(max)?);
        if min > max {
            return Err(invalid(
                "`configuration.wait` minimum can not be larger than its maximum.",
            ));
        }
        Ok(Some((min, max)))
    }

    pub fn session_options(&self) -> Result<SessionOptions, LoadTestError> {
        Ok(SessionOptions {
            timeout: self.timeout()?,
            accept_invalid_certs: self.accept_invalid_certs,
            gzip: !self.no_gzip,
        })
    }

    pub fn flow_format(&self) -> LogFormat {
        self.flow_format.unwrap_or_default()
    }

    /// Initialize the logger, writing to standard out and optionally to the
    /// configured log file.
    pub(crate) fn initialize_logger(&self) -> Result<(), LoadTestError> {
        // Configure debug output level.
        let debug_level = match self.verbose {
            0 => match self.quiet {
                0 => LevelFilter::Info,
                _ => LevelFilter::Warn,
            },
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Configure log file level.
        let log_level = match self.log_level {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        let log_file: Option<PathBuf> = if !self.log_file.is_empty() {
            Some(PathBuf::from(&self.log_file))
        } else {
            None
        };

        let result = if let Some(log_to_file) = log_file.as_ref() {
            CombinedLogger::init(vec![
                SimpleLogger::new(debug_level, Config::default()),
                WriteLogger::new(
                    log_level,
                    Config::default(),
                    std::fs::File::create(log_to_file)?,
                ),
            ])
        } else {
            CombinedLogger::init(vec![SimpleLogger::new(debug_level, Config::default())])
        };
        if let Err(e) = result {
            info!("failed to initialize CombinedLogger: {}", e);
        }
        if let Some(log_to_file) = log_file {
            info!("Writing to log file: {}", log_to_file.display());
        }

        info!("Output verbosity level: {}", debug_level);
        info!("Logfile verbosity level: {}", log_level);

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn configuration(args: &[&str]) -> Configuration {
        let mut full = vec![
            "--host",
            "https://idp.example.org/cas",
            "--credentials",
            "users.csv",
        ];
        full.extend_from_slice(args);
        Configuration::parse_args_default(&full).unwrap()
    }

    #[test]
    fn defaults() {
        let configuration = configuration(&["--service", "https://app.example.org/"]);
        configuration.validate().unwrap();
        assert_eq!(configuration.flow_kind(), FlowKind::Cas);
        assert_eq!(configuration.users(), 1);
        assert_eq!(configuration.hatch_rate().unwrap(), 1.0);
        assert_eq!(configuration.run_time(), None);
        assert_eq!(configuration.iterations(), None);
        assert_eq!(configuration.wait().unwrap(), None);
        assert_eq!(configuration.flow_format(), LogFormat::Json);
        let options = configuration.session_options().unwrap();
        assert_eq!(options.timeout, Duration::from_secs(60));
        assert!(options.gzip);
        assert!(!options.accept_invalid_certs);
    }

    #[test]
    fn parse_options() {
        let configuration = configuration(&[
            "-f",
            "saml",
            "--saml-login",
            "https://idp.example.org/cas/idp/profile/SAML2/Unsolicited/SSO?providerId=sp",
            "--success-marker",
            "Welcome",
            "-u",
            "20",
            "-r",
            "2.5",
            "-t",
            "1m30s",
            "--iterations",
            "3",
            "--wait",
            "100, 250",
            "--timeout",
            "1.5",
            "--no-gzip",
            "--flow-format",
            "csv",
        ]);
        configuration.validate().unwrap();
        assert_eq!(configuration.flow_kind(), FlowKind::Saml);
        assert_eq!(configuration.users(), 20);
        assert_eq!(configuration.hatch_rate().unwrap(), 2.5);
        assert_eq!(configuration.run_time(), Some(Duration::from_secs(90)));
        assert_eq!(configuration.iterations(), Some(3));
        assert_eq!(configuration.wait().unwrap(), Some((100, 250)));
        assert_eq!(configuration.flow_format(), LogFormat::Csv);
        let options = configuration.session_options().unwrap();
        assert_eq!(options.timeout, Duration::from_millis(1500));
        assert!(!options.gzip);
    }

    #[test]
    fn unknown_flow() {
        let args = ["--flow", "oauth"];
        assert!(Configuration::parse_args_default(&args).is_err());
    }

    fn invalid(args: &[&str]) -> bool {
        matches!(
            configuration(args).validate(),
            Err(LoadTestError::InvalidOption { .. })
        )
    }

    fn with_service<'a>(args: &[&'a str]) -> Vec<&'a str> {
        let mut full = vec!["--service", "https://app.example.org/"];
        full.extend_from_slice(args);
        full
    }

    #[test]
    fn invalid_options() {
        assert!(invalid(&with_service(&["-v", "-q"])));
        assert!(invalid(&with_service(&["-u", "0"])));
        assert!(invalid(&with_service(&["-r", "0"])));
        assert!(invalid(&with_service(&["-r", "fast"])));
        assert!(invalid(&with_service(&["-r", "1e-45"])));
        assert!(invalid(&with_service(&["--timeout", "0"])));
        assert!(invalid(&with_service(&["--timeout", "never"])));
        assert!(invalid(&with_service(&["--timeout", "1e20"])));
        assert!(invalid(&with_service(&["--wait", "500,100"])));
        assert!(invalid(&with_service(&["--wait", "500"])));
        assert!(invalid(&with_service(&["-t", "soon"])));
        assert!(invalid(&with_service(&["-t", "9999999999999999h"])));
        assert!(!invalid(&with_service(&["-t", "18446744073709551615"])));
        assert!(invalid(&with_service(&["--sp-acs", "not a url"])));
        assert!(!invalid(&with_service(&["-vv", "-g"])));

        // Each flow requires its own urls.
        assert!(invalid(&[]));
        assert!(invalid(&["--service", "app.example.org"]));
        assert!(invalid(&["-f", "saml", "--success-marker", "Welcome"]));
        assert!(invalid(&[
            "-f",
            "saml",
            "--saml-login",
            "https://idp.example.org/cas/idp/profile/SAML2/Unsolicited/SSO"
        ]));
        assert!(invalid(&["-f", "combined", "--success-marker", "Welcome"]));
        assert!(!invalid(&[
            "-f",
            "combined",
            "--sp-entry",
            "https://sp.example.org/secure/",
            "--success-marker",
            "Welcome"
        ]));
    }

    #[test]
    fn missing_credentials_and_host() {
        let configuration =
            Configuration::parse_args_default(&["--service", "https://app.example.org/"]).unwrap();
        assert!(matches!(
            configuration.validate(),
            Err(LoadTestError::InvalidOption { .. })
        ));

        let configuration = Configuration::parse_args_default(&[
            "--host",
            "idp.example.org",
            "--credentials",
            "users.csv",
            "--service",
            "https://app.example.org/",
        ])
        .unwrap();
        assert!(matches!(
            configuration.validate(),
            Err(LoadTestError::InvalidHost { .. })
        ));
    }
}
