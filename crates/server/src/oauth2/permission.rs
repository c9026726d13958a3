//! Client permissions.
//!
//! Stored on the client record as prefixed strings so that the set can be
//! replaced wholesale by the bootstrapper: `ept:` endpoints, `gt:` grant
//! types, `rst:` response types and `scp:` scopes.

use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Authorization,
    Token,
    Introspection,
    Revocation,
}

impl Endpoint {
    fn as_str(self) -> &'static str {
        match self {
            Endpoint::Authorization => "authorization",
            Endpoint::Token => "token",
            Endpoint::Introspection => "introspection",
            Endpoint::Revocation => "revocation",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Permission {
    Endpoint(Endpoint),
    GrantType(String),
    ResponseType(String),
    Scope(String),
}

impl Permission {
    pub const ENDPOINT_PREFIX: &'static str = "ept:";
    pub const GRANT_TYPE_PREFIX: &'static str = "gt:";
    pub const RESPONSE_TYPE_PREFIX: &'static str = "rst:";
    pub const SCOPE_PREFIX: &'static str = "scp:";

    pub fn grant_type(grant: &str) -> Self {
        Permission::GrantType(grant.to_string())
    }

    pub fn scope(scope: &str) -> Self {
        Permission::Scope(scope.to_string())
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Endpoint(e) => write!(f, "{}{}", Self::ENDPOINT_PREFIX, e.as_str()),
            Permission::GrantType(g) => write!(f, "{}{g}", Self::GRANT_TYPE_PREFIX),
            Permission::ResponseType(r) => write!(f, "{}{r}", Self::RESPONSE_TYPE_PREFIX),
            Permission::Scope(s) => write!(f, "{}{s}", Self::SCOPE_PREFIX),
        }
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(endpoint) = s.strip_prefix(Self::ENDPOINT_PREFIX) {
            let endpoint = match endpoint {
                "authorization" => Endpoint::Authorization,
                "token" => Endpoint::Token,
                "introspection" => Endpoint::Introspection,
                "revocation" => Endpoint::Revocation,
                other => return Err(format!("Unknown endpoint permission: {other}")),
            };
            return Ok(Permission::Endpoint(endpoint));
        }
        if let Some(g) = s.strip_prefix(Self::GRANT_TYPE_PREFIX) {
            return Ok(Permission::GrantType(g.to_string()));
        }
        if let Some(r) = s.strip_prefix(Self::RESPONSE_TYPE_PREFIX) {
            return Ok(Permission::ResponseType(r.to_string()));
        }
        if let Some(scope) = s.strip_prefix(Self::SCOPE_PREFIX) {
            return Ok(Permission::Scope(scope.to_string()));
        }
        Err(format!("Unknown permission: {s}"))
    }
}
