//! Login identity used by [`Session::authenticate`](crate::session::Session::authenticate).

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

/// How the user identifies at login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identifier {
    /// Login by email address.
    Email(String),
    /// Login by username.
    Username(String),
}

/// Identifier and password pair.
#[derive(Clone)]
pub struct Credentials {
    identifier: Identifier,
    password: SecretString,
}

impl Credentials {
    pub fn new(identifier: Identifier, password: SecretString) -> Self {
        Self {
            identifier,
            password,
        }
    }

    /// Credentials that log in by email.
    pub fn email(email: impl Into<String>, password: SecretString) -> Self {
        Self::new(Identifier::Email(email.into()), password)
    }

    /// Credentials that log in by username.
    pub fn username(username: impl Into<String>, password: SecretString) -> Self {
        Self::new(Identifier::Username(username.into()), password)
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Serializes the `/auth/login` request body.
    pub(crate) fn login_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        let (email, username) = match &self.identifier {
            Identifier::Email(email) => (Some(email.as_str()), None),
            Identifier::Username(username) => (None, Some(username.as_str())),
        };
        serde_json::to_vec(&LoginRequest {
            email,
            username,
            password: self.password.expose_secret(),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    password: &'a str,
}
