//! Server host key verification.

use std::path::{Path, PathBuf};

use russh::client;
use russh::keys::PublicKey;
use serde::{Deserialize, Serialize};

/// How to treat the server's host key. There is no implicit default
/// behaviour beyond what is chosen here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// The key must already be in known_hosts and match.
    Strict,
    /// Unknown hosts are recorded in known_hosts (trust on first use);
    /// a changed key is rejected.
    #[default]
    AcceptNew,
    /// Accept any key without checking. For tests and throwaway hosts.
    AcceptAny,
}

/// `~/.ssh/known_hosts`
pub fn default_known_hosts_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
}

/// russh client handler applying a [`HostKeyPolicy`].
pub(crate) struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts: Option<PathBuf>,
}

impl ClientHandler {
    pub(crate) fn new(host: &str, port: u16, policy: HostKeyPolicy) -> Self {
        Self {
            host: host.to_string(),
            port,
            policy,
            known_hosts: default_known_hosts_path(),
        }
    }

    #[cfg(test)]
    fn with_known_hosts(mut self, path: PathBuf) -> Self {
        self.known_hosts = Some(path);
        self
    }

    fn verify(&self, server_key: &PublicKey) -> bool {
        if self.policy == HostKeyPolicy::AcceptAny {
            log::warn!(
                "accepting host key for {}:{} without verification",
                self.host,
                self.port
            );
            return true;
        }

        let Some(path) = self.known_hosts.as_ref() else {
            return match self.policy {
                HostKeyPolicy::Strict => {
                    log::warn!("no known_hosts file available, rejecting {}", self.host);
                    false
                }
                _ => {
                    log::warn!("no known_hosts file available, accepting {} unrecorded", self.host);
                    true
                }
            };
        };

        let known = if path.exists() {
            match russh::keys::check_known_hosts_path(&self.host, self.port, server_key, path) {
                Ok(known) => known,
                Err(russh::keys::Error::KeyChanged { line }) => {
                    log::error!(
                        "host key for {}:{} does not match {}:{}",
                        self.host,
                        self.port,
                        path.display(),
                        line
                    );
                    return false;
                }
                Err(e) => {
                    log::warn!("cannot check {}: {}", path.display(), e);
                    return false;
                }
            }
        } else {
            false
        };

        if known {
            return true;
        }

        match self.policy {
            HostKeyPolicy::Strict => {
                log::warn!("{}:{} is not in {}", self.host, self.port, path.display());
                false
            }
            _ => {
                self.record(server_key, path);
                true
            }
        }
    }

    fn record(&self, server_key: &PublicKey, path: &Path) {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        match russh::keys::known_hosts::learn_known_hosts_path(
            &self.host,
            self.port,
            server_key,
            path,
        ) {
            Ok(()) => log::info!("added {}:{} to {}", self.host, self.port, path.display()),
            Err(e) => log::warn!("could not record host key in {}: {}", path.display(), e),
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(self.verify(server_public_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST_KEY: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl";

    fn host_key() -> PublicKey {
        russh::keys::parse_public_key_base64(HOST_KEY).unwrap()
    }

    #[test]
    fn test_policy_serde_names() {
        assert_eq!(serde_json::to_string(&HostKeyPolicy::AcceptNew).unwrap(), "\"accept-new\"");
        let policy: HostKeyPolicy = serde_json::from_str("\"accept-any\"").unwrap();
        assert_eq!(policy, HostKeyPolicy::AcceptAny);
    }

    #[test]
    fn test_strict_rejects_unknown_host() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        let handler = ClientHandler::new("example.com", 22, HostKeyPolicy::Strict)
            .with_known_hosts(path.clone());
        assert!(!handler.verify(&host_key()));
        assert!(!path.exists());
    }

    #[test]
    fn test_accept_new_records_then_strict_accepts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ssh").join("known_hosts");

        let tofu = ClientHandler::new("example.com", 2222, HostKeyPolicy::AcceptNew)
            .with_known_hosts(path.clone());
        assert!(tofu.verify(&host_key()));
        assert!(path.exists());

        let strict =
            ClientHandler::new("example.com", 2222, HostKeyPolicy::Strict).with_known_hosts(path);
        assert!(strict.verify(&host_key()));
    }

    #[test]
    fn test_accept_any() {
        let handler = ClientHandler::new("example.com", 22, HostKeyPolicy::AcceptAny);
        assert!(handler.verify(&host_key()));
    }
}
