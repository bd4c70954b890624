//! The pool of credentials simulated users log in with.
//!
//! Credentials are read once, before any user launches, from a file holding one
//! `username,password` CSV record per line. Fields may be quoted. Blank lines
//! and lines starting with `#` are ignored. Unquoted commas after the first one
//! are kept as part of the password. Each simulated login picks a credential
//! uniformly at random; the pool is never modified afterwards and is shared by
//! all users.

use itertools::Itertools;
use rand::Rng;
use std::fmt;
use std::path::Path;

use crate::LoadTestError;

/// A username and password pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: &str, password: &str) -> Self {
        Credential {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

// Keep passwords out of debug logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// An immutable, never empty, collection of [`Credential`]s.
#[derive(Clone, Debug)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
}

impl CredentialPool {
    /// Load credentials from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadTestError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| LoadTestError::InvalidCredentials {
                path: path.display().to_string(),
                line: 0,
                detail: format!("failed to read file: {}", e),
            })?;
        let pool = Self::parse(&contents, &path.display().to_string())?;
        info!(
            "loaded {} credentials from {}",
            pool.len(),
            path.display()
        );
        Ok(pool)
    }

    /// Parse credentials from the contents of a credential file. `source` names
    /// the file in error messages.
    pub fn parse(contents: &str, source: &str) -> Result<Self, LoadTestError> {
        let invalid = |line: u64, detail: String| LoadTestError::InvalidCredentials {
            path: source.to_string(),
            line: line as usize,
            detail,
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(contents.as_bytes());

        let mut credentials = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| {
                invalid(e.position().map_or(0, |p| p.line()), e.to_string())
            })?;
            let line = record.position().map_or(0, |p| p.line());
            // Whitespace only.
            if record.iter().all(str::is_empty) {
                continue;
            }
            if record.len() < 2 {
                return Err(invalid(line, "expected `username,password`".to_string()));
            }
            let username = record.get(0).unwrap_or_default();
            if username.is_empty() {
                return Err(invalid(line, "username is empty".to_string()));
            }
            // Unquoted commas belong to the password.
            let password = record.iter().skip(1).join(",");
            credentials.push(Credential::new(username, &password));
        }

        Self::from_credentials(credentials)
            .map_err(|_| invalid(0, "no credentials found".to_string()))
    }

    /// Build a pool from already loaded credentials. Fails if `credentials` is
    /// empty, handing the empty vector back.
    pub fn from_credentials(credentials: Vec<Credential>) -> Result<Self, Vec<Credential>> {
        if credentials.is_empty() {
            Err(credentials)
        } else {
            Ok(CredentialPool { credentials })
        }
    }

    /// Pick a credential uniformly at random.
    pub fn choose(&self) -> &Credential {
        let index = rand::rng().random_range(0..self.credentials.len());
        &self.credentials[index]
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Always `false`, a pool can't be built without credentials.
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Credential> {
        self.credentials.iter()
    }
}
