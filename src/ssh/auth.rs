//! Authentication method resolution for remote sessions.
//!
//! [`resolve`] turns an [`SshConfig`] into an ordered [`AuthPlan`] without
//! touching the network: identity files first (explicit, else defaults),
//! then agent identities, then the password. The plan is built per
//! connection attempt and consumed by it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::client;
use russh::keys::agent::client::AgentClient;
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg, PublicKey};

use super::SshConfig;
use crate::error::{Error, Result};

/// Identity files probed under `~/.ssh/`, in priority order.
pub const DEFAULT_KEY_NAMES: [&str; 4] = ["id_ed25519", "id_ecdsa", "id_rsa", "id_dsa"];

/// Connection to the agent advertised by `SSH_AUTH_SOCK`.
pub type AgentConnection = AgentClient<tokio::net::UnixStream>;

/// One candidate way of proving who we are.
pub enum AuthMethod {
    /// A decoded private key read from disk.
    PublicKey { key: Arc<PrivateKey>, source: PathBuf },
    /// An identity held by the SSH agent; signing happens in the agent.
    Agent(PublicKey),
    Password(String),
}

impl AuthMethod {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthMethod::PublicKey { .. } => "publickey",
            AuthMethod::Agent(_) => "agent",
            AuthMethod::Password(_) => "password",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::PublicKey { source, .. } => {
                f.debug_tuple("PublicKey").field(source).finish()
            }
            AuthMethod::Agent(_) => f.write_str("Agent"),
            AuthMethod::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

/// Ordered authentication methods for one connection attempt.
#[derive(Default)]
pub struct AuthPlan {
    methods: Vec<AuthMethod>,
    agent: Option<AgentConnection>,
}

impl AuthPlan {
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn methods(&self) -> &[AuthMethod] {
        &self.methods
    }

    /// e.g. `publickey, agent, password`
    pub fn summary(&self) -> String {
        self.methods
            .iter()
            .map(AuthMethod::kind)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Debug for AuthPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthPlan")
            .field("methods", &self.methods)
            .field("agent", &self.agent.is_some())
            .finish()
    }
}

/// Default identity file paths under `home`, in priority order.
pub fn default_key_paths(home: &Path) -> Vec<PathBuf> {
    let ssh_dir = home.join(".ssh");
    DEFAULT_KEY_NAMES.iter().map(|name| ssh_dir.join(name)).collect()
}

/// [`default_key_paths`] for the current user; empty if there is no home.
pub fn default_key_paths_for_current_user() -> Vec<PathBuf> {
    dirs::home_dir()
        .map(|home| default_key_paths(&home))
        .unwrap_or_default()
}

/// Read and decode a private key. An empty passphrase means none.
pub fn load_private_key(path: &Path, passphrase: Option<&str>) -> Result<PrivateKey> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::key(path, format!("failed to read private key: {e}")))?;
    let passphrase = passphrase.filter(|p| !p.is_empty());
    russh::keys::decode_secret_key(&contents, passphrase)
        .map_err(|e| Error::key(path, format!("failed to decode private key: {e}")))
}

/// Ask the agent behind `SSH_AUTH_SOCK` for its identities.
///
/// A missing variable, an unreachable socket, or an empty agent all yield
/// no identities and no connection; none of these is an error.
pub async fn agent_signers() -> (Vec<PublicKey>, Option<AgentConnection>) {
    if std::env::var_os("SSH_AUTH_SOCK").is_none() {
        log::debug!("SSH_AUTH_SOCK not set, agent unavailable");
        return (Vec::new(), None);
    }

    let mut agent = match AgentClient::connect_env().await {
        Ok(agent) => agent,
        Err(e) => {
            log::debug!("cannot reach SSH agent: {}", e);
            return (Vec::new(), None);
        }
    };

    match agent.request_identities().await {
        Ok(identities) if !identities.is_empty() => {
            log::debug!("SSH agent offers {} identities", identities.len());
            (identities, Some(agent))
        }
        Ok(_) => {
            log::debug!("SSH agent has no identities");
            (Vec::new(), None)
        }
        Err(e) => {
            log::debug!("failed to list SSH agent identities: {}", e);
            (Vec::new(), None)
        }
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Build the ordered method list for `config`.
///
/// An explicit identity file that cannot be read or decoded is an error;
/// default identity files that fail are skipped. The result may be empty;
/// callers must check before dialing.
pub async fn resolve(config: &SshConfig) -> Result<AuthPlan> {
    let credentials = &config.credentials;
    let passphrase = credentials.passphrase.as_deref();
    let mut methods = Vec::new();

    if let Some(key_path) = &credentials.key_path {
        let path = expand_tilde(key_path);
        let key = load_private_key(&path, passphrase)?;
        log::debug!("using identity file {}", path.display());
        methods.push(AuthMethod::PublicKey {
            key: Arc::new(key),
            source: path,
        });
    } else {
        for path in default_key_paths_for_current_user() {
            if !path.exists() {
                continue;
            }
            match load_private_key(&path, passphrase) {
                Ok(key) => {
                    log::debug!("using default identity {}", path.display());
                    methods.push(AuthMethod::PublicKey {
                        key: Arc::new(key),
                        source: path,
                    });
                }
                Err(e) => log::debug!("skipping default identity: {}", e),
            }
        }
    }

    let (identities, agent) = agent_signers().await;
    methods.extend(identities.into_iter().map(AuthMethod::Agent));

    if let Some(password) = &credentials.password {
        methods.push(AuthMethod::Password(password.clone()));
    }

    Ok(AuthPlan { methods, agent })
}

/// Try each method of `plan` in order until the server accepts one.
pub(crate) async fn authenticate<H: client::Handler>(
    handle: &mut client::Handle<H>,
    user: &str,
    plan: AuthPlan,
) -> anyhow::Result<()> {
    let AuthPlan { methods, mut agent } = plan;
    let rsa_hash = handle.best_supported_rsa_hash().await?.flatten();

    for method in methods {
        let kind = method.kind();
        let accepted = match method {
            AuthMethod::PublicKey { key, source } => {
                log::debug!("trying identity {}", source.display());
                handle
                    .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, rsa_hash))
                    .await?
                    .success()
            }
            AuthMethod::Agent(public_key) => match agent.as_mut() {
                Some(agent) => match handle
                    .authenticate_publickey_with(user, public_key, rsa_hash, agent)
                    .await
                {
                    Ok(result) => result.success(),
                    Err(e) => {
                        log::debug!("agent signing failed: {:?}", e);
                        false
                    }
                },
                None => false,
            },
            AuthMethod::Password(password) => {
                handle.authenticate_password(user, password).await?.success()
            }
        };

        if accepted {
            log::debug!("authenticated as {} via {}", user, kind);
            return Ok(());
        }
        log::debug!("{} authentication rejected for {}", kind, user);
    }

    anyhow::bail!("all authentication methods were rejected")
}
