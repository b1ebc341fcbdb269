use std::path::Path;

use fleetlink_core::io::atomic_write_private;

use crate::{Result, TunnelError};

/// Principal and secret for the tunnel client's `--auth-user-pass` file.
#[derive(Clone)]
pub struct Credentials {
    pub principal: String,
    pub secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("principal", &self.principal)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Both halves must be present and non-empty.
    pub fn from_parts(principal: Option<String>, secret: Option<String>) -> Option<Self> {
        match (principal, secret) {
            (Some(p), Some(s)) if !p.is_empty() && !s.is_empty() => Some(Self {
                principal: p,
                secret: s,
            }),
            _ => None,
        }
    }

    /// The two-line file format: principal, then secret.
    pub fn render(&self) -> String {
        format!("{}\n{}\n", self.principal, self.secret)
    }
}

/// Make sure the credential file exists. With `creds`, it is (re)written
/// with mode 0600; without, an existing file is used as-is.
pub fn ensure_file(path: &Path, creds: Option<&Credentials>) -> Result<()> {
    match creds {
        Some(c) => {
            atomic_write_private(path, c.render().as_bytes())?;
            tracing::info!(path = %path.display(), "tunnel credentials written");
            Ok(())
        }
        None if path.is_file() => Ok(()),
        None => Err(TunnelError::CredentialsMissing {
            path: path.display().to_string(),
        }),
    }
}
