//! Principals, credentials and identity providers
//!
//! A [`Principal`] is the authenticated user on whose behalf a backend handle
//! is opened. Its [`CredentialTokenSet`] changes on re-authentication (for
//! example a Kerberos ticket renewal) while the user name stays the same.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt::{self, Display};

/// How a principal authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Simple,
    Kerberos,
    Token,
    Certificate,
    KerberosSsl,
    Proxy,
}

impl Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthMethod::Simple => "SIMPLE",
            AuthMethod::Kerberos => "KERBEROS",
            AuthMethod::Token => "TOKEN",
            AuthMethod::Certificate => "CERTIFICATE",
            AuthMethod::KerberosSsl => "KERBEROS_SSL",
            AuthMethod::Proxy => "PROXY",
        };
        f.write_str(name)
    }
}

/// One piece of opaque authentication material (ticket, delegation token, ...)
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CredentialToken {
    kind: String,
    material: Vec<u8>,
}

impl CredentialToken {
    pub fn new(kind: impl Into<String>, material: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: kind.into(),
            material: material.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn material(&self) -> &[u8] {
        &self.material
    }
}

impl fmt::Debug for CredentialToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialToken")
            .field("kind", &self.kind)
            .field("material", &format_args!("<{} bytes redacted>", self.material.len()))
            .finish()
    }
}

/// Unordered set of the credentials currently bound to a principal
///
/// Only equality is meaningful; two sets compare equal when they hold the
/// same tokens regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialTokenSet {
    tokens: HashSet<CredentialToken>,
}

impl CredentialTokenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: CredentialToken) -> bool {
        self.tokens.insert(token)
    }

    pub fn with_token(mut self, token: CredentialToken) -> Self {
        self.tokens.insert(token);
        self
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CredentialToken> {
        self.tokens.iter()
    }
}

impl FromIterator<CredentialToken> for CredentialTokenSet {
    fn from_iter<I: IntoIterator<Item = CredentialToken>>(iter: I) -> Self {
        Self {
            tokens: iter.into_iter().collect(),
        }
    }
}

/// An authenticated user, optionally acting through a real user (proxy)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    user_name: String,
    auth_method: AuthMethod,
    real_user: Option<Box<Principal>>,
    credentials: CredentialTokenSet,
}

impl Principal {
    /// A principal with no authentication material
    pub fn simple(user_name: impl Into<String>) -> Self {
        Self::with_method(user_name, AuthMethod::Simple, CredentialTokenSet::new())
    }

    /// A principal holding Kerberos credentials
    pub fn kerberos(user_name: impl Into<String>, credentials: CredentialTokenSet) -> Self {
        Self::with_method(user_name, AuthMethod::Kerberos, credentials)
    }

    /// `user_name` acting on behalf of `real_user`
    pub fn proxy(user_name: impl Into<String>, real_user: Principal) -> Self {
        Self {
            user_name: user_name.into(),
            auth_method: AuthMethod::Proxy,
            real_user: Some(Box::new(real_user)),
            credentials: CredentialTokenSet::new(),
        }
    }

    pub fn with_method(
        user_name: impl Into<String>,
        auth_method: AuthMethod,
        credentials: CredentialTokenSet,
    ) -> Self {
        Self {
            user_name: user_name.into(),
            auth_method,
            real_user: None,
            credentials,
        }
    }

    /// Replace the credentials, e.g. after a re-login
    pub fn with_credentials(mut self, credentials: CredentialTokenSet) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn auth_method(&self) -> AuthMethod {
        self.auth_method
    }

    pub fn real_user(&self) -> Option<&Principal> {
        self.real_user.as_deref()
    }

    /// Credentials held directly by this principal (not resolved through a proxy)
    pub fn credentials(&self) -> &CredentialTokenSet {
        &self.credentials
    }
}

impl Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.real_user {
            Some(real) => write!(f, "{} (auth:{}) via {}", self.user_name, self.auth_method, real),
            None => write!(f, "{} (auth:{})", self.user_name, self.auth_method),
        }
    }
}

/// Source of the principal on whose behalf the current call runs
pub trait IdentityProvider: Send + Sync {
    fn current_principal(&self) -> Result<Principal>;
}

/// Always reports the same principal
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    principal: Principal,
}

impl StaticIdentity {
    pub fn new(principal: Principal) -> Self {
        Self { principal }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_principal(&self) -> Result<Principal> {
        Ok(self.principal.clone())
    }
}

thread_local! {
    static PRINCIPAL_STACK: RefCell<Vec<Principal>> = const { RefCell::new(Vec::new()) };
}

/// Thread-local principal scoping
///
/// [`ScopedIdentity::run_as`] pushes a principal for the duration of a
/// closure; nested calls shadow outer ones. When no principal is in scope the
/// provider falls back to its default, if any.
#[derive(Debug, Clone, Default)]
pub struct ScopedIdentity {
    fallback: Option<Principal>,
}

impl ScopedIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(principal: Principal) -> Self {
        Self {
            fallback: Some(principal),
        }
    }

    /// Run `f` with `principal` as the current principal of this thread
    pub fn run_as<R>(principal: Principal, f: impl FnOnce() -> R) -> R {
        struct PopOnDrop;

        impl Drop for PopOnDrop {
            fn drop(&mut self) {
                PRINCIPAL_STACK.with(|stack| {
                    stack.borrow_mut().pop();
                });
            }
        }

        PRINCIPAL_STACK.with(|stack| stack.borrow_mut().push(principal));
        let _guard = PopOnDrop;
        f()
    }

    /// Innermost principal pushed by `run_as` on this thread
    pub fn current() -> Option<Principal> {
        PRINCIPAL_STACK.with(|stack| stack.borrow().last().cloned())
    }
}

impl IdentityProvider for ScopedIdentity {
    fn current_principal(&self) -> Result<Principal> {
        Self::current()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| Error::configuration("no principal in scope for the current thread"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(bytes: &[u8]) -> CredentialToken {
        CredentialToken::new("kerberos-ticket", bytes.to_vec())
    }

    #[test]
    fn test_token_set_equality_ignores_order() {
        let a: CredentialTokenSet = [ticket(b"a"), ticket(b"b")].into_iter().collect();
        let b: CredentialTokenSet = [ticket(b"b"), ticket(b"a")].into_iter().collect();
        assert_eq!(a, b);
        assert_ne!(a, CredentialTokenSet::new().with_token(ticket(b"a")));
    }

    #[test]
    fn test_debug_redacts_material() {
        let rendered = format!("{:?}", ticket(b"secret-ticket"));
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("13 bytes redacted"));
    }

    #[test]
    fn test_proxy_principal_keeps_real_user() {
        let real = Principal::kerberos("hive", CredentialTokenSet::new().with_token(ticket(b"t")));
        let proxy = Principal::proxy("alice", real.clone());

        assert_eq!(proxy.auth_method(), AuthMethod::Proxy);
        assert_eq!(proxy.real_user(), Some(&real));
        assert_eq!(proxy.to_string(), "alice (auth:PROXY) via hive (auth:KERBEROS)");
    }

    #[test]
    fn test_run_as_nests_and_unwinds() {
        let provider = ScopedIdentity::new();
        assert!(provider.current_principal().is_err());

        ScopedIdentity::run_as(Principal::simple("outer"), || {
            assert_eq!(provider.current_principal().unwrap().user_name(), "outer");
            ScopedIdentity::run_as(Principal::simple("inner"), || {
                assert_eq!(provider.current_principal().unwrap().user_name(), "inner");
            });
            assert_eq!(provider.current_principal().unwrap().user_name(), "outer");
        });

        assert!(ScopedIdentity::current().is_none());
    }

    #[test]
    fn test_run_as_pops_on_panic() {
        let result = std::panic::catch_unwind(|| {
            ScopedIdentity::run_as(Principal::simple("doomed"), || panic!("boom"));
        });
        assert!(result.is_err());
        assert!(ScopedIdentity::current().is_none());
    }

    #[test]
    fn test_scoped_identity_fallback() {
        let provider = ScopedIdentity::with_fallback(Principal::simple("etl"));
        assert_eq!(provider.current_principal().unwrap().user_name(), "etl");
    }
}
