use std::{borrow::Cow, env::VarError, fmt, ops::Deref};

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// A password or token forwarded to the backing registry.
///
/// The wrapper keeps the value out of `Debug` output and zeroes owned
/// storage on drop. Use [`Secret::revealed`] to get the underlying value.
#[derive(Clone, Deserialize, Serialize)]
#[serde(from = "String")]
pub struct Secret(Cow<'static, str>);

impl Secret {
    pub fn from_env(var: &str) -> Result<Self, VarError> {
        let value = std::env::var(var)?;
        Ok(Secret(value.into()))
    }

    /// Expose the underlying value.
    pub fn revealed(&self) -> &str {
        self.0.deref()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        if let Cow::Owned(ref mut s) = self.0 {
            s.zeroize()
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(****)")
    }
}

impl From<Cow<'static, str>> for Secret {
    fn from(inner: Cow<'static, str>) -> Self {
        Secret(inner)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value.into())
    }
}

impl From<&'static str> for Secret {
    fn from(value: &'static str) -> Self {
        Secret(value.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_hidden_debug() {
        let secret = Secret::from("secret garden");

        assert!(!format!("{secret:?}").contains("secret garden"));
        assert_eq!(&format!("{secret:?}"), "Secret(****)");

        // The underlying value stays accessible.
        assert_eq!(secret.revealed(), "secret garden");
    }
}
