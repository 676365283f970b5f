//! Request-scoped credentials for the backing OCI registry.
//!
//! Protocol frontends capture whatever credentials arrive with a request
//! (typically HTTP basic auth) and hand them to the registry facade as a
//! [`Cred`]. The facade threads the bundle through to the backend factory;
//! nothing is stored globally. An empty bundle means anonymous access.

mod secret;

pub use secret::Secret;

/// Credentials forwarded to the backing OCI registry.
#[derive(Debug, Clone, Default)]
pub struct Cred {
    /// Basic credentials, if the request carried any.
    pub basic: Option<BasicCred>,
}

/// Username and password for HTTP basic authentication.
///
/// The password is held as a [`Secret`] so it cannot leak through debug
/// output or logs.
#[derive(Debug, Clone)]
pub struct BasicCred {
    pub user: String,
    pub password: Secret,
}

impl Cred {
    /// An anonymous credential bundle.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A bundle carrying basic credentials.
    pub fn basic<U, P>(user: U, password: P) -> Self
    where
        U: Into<String>,
        P: Into<Secret>,
    {
        Cred {
            basic: Some(BasicCred {
                user: user.into(),
                password: password.into(),
            }),
        }
    }

    /// Whether the bundle carries no credentials at all.
    pub fn is_anonymous(&self) -> bool {
        self.basic.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_by_default() {
        assert!(Cred::default().is_anonymous());
        assert!(Cred::anonymous().basic.is_none());
    }

    #[test]
    fn basic_cred_masks_password() {
        let cred = Cred::basic("alice", "hunter2");
        let debug = format!("{cred:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }
}
