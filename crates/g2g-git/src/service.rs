//! Git services and the stream protocol identifiers that carry them.
//!
//! A stream protocol identifier is `<service-prefix>/<repository-id>`, e.g.
//! `/g2g/upload-pack/1.0.0/dotfiles.git`. Servers register one handler per
//! prefix and recover the repository from the last segment.

use crate::{GitError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// Protocol prefix for fetches (git-upload-pack).
pub const UPLOAD_PACK_PROTOCOL: &str = "/g2g/upload-pack/1.0.0";

/// Protocol prefix for pushes (git-receive-pack).
pub const RECEIVE_PACK_PROTOCOL: &str = "/g2g/receive-pack/1.0.0";

/// Valid repository identifiers: word characters, hyphen, underscore, `.git`.
static REPOSITORY_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+\.git$").expect("Invalid regex"));

/// One of the two git services g2g relays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GitService {
    /// Serves fetches and clones.
    UploadPack,
    /// Accepts pushes.
    ReceivePack,
}

impl GitService {
    /// Both services, in registration order.
    pub const ALL: [GitService; 2] = [GitService::UploadPack, GitService::ReceivePack];

    /// Subcommand name passed to `git`, e.g. `upload-pack`.
    pub fn subcommand(self) -> &'static str {
        match self {
            Self::UploadPack => "upload-pack",
            Self::ReceivePack => "receive-pack",
        }
    }

    /// Service name used by the transport-helper `connect` command.
    pub fn command_name(self) -> &'static str {
        match self {
            Self::UploadPack => "git-upload-pack",
            Self::ReceivePack => "git-receive-pack",
        }
    }

    /// Stream protocol prefix for this service.
    pub fn protocol_prefix(self) -> &'static str {
        match self {
            Self::UploadPack => UPLOAD_PACK_PROTOCOL,
            Self::ReceivePack => RECEIVE_PACK_PROTOCOL,
        }
    }

    /// Looks up a service by its `git-*` command name.
    pub fn from_command_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.command_name() == name)
    }
}

impl fmt::Display for GitService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command_name())
    }
}

/// A repository name as served from the repository root, e.g. `r.git`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryId(String);

impl RepositoryId {
    /// Validates a repository identifier.
    pub fn parse(s: &str) -> Result<Self> {
        if REPOSITORY_ID_REGEX.is_match(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(GitError::InvalidRepository(s.to_string()))
        }
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RepositoryId {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<std::path::Path> for RepositoryId {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

/// A stream protocol identifier naming a service and a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProtocolId {
    /// The git service.
    pub service: GitService,
    /// The repository it operates on.
    pub repository: RepositoryId,
}

impl ProtocolId {
    /// Creates a protocol identifier.
    pub fn new(service: GitService, repository: RepositoryId) -> Self {
        Self {
            service,
            repository,
        }
    }

    /// Parses `<service-prefix>/<repository-id>`.
    pub fn parse(s: &str) -> Result<Self> {
        for service in GitService::ALL {
            let Some(rest) = s.strip_prefix(service.protocol_prefix()) else {
                continue;
            };
            let Some(repository) = rest.strip_prefix('/') else {
                continue;
            };
            let repository = RepositoryId::parse(repository)
                .map_err(|_| GitError::InvalidProtocol(s.to_string()))?;
            return Ok(Self::new(service, repository));
        }

        Err(GitError::InvalidProtocol(s.to_string()))
    }
}

impl FromStr for ProtocolId {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service.protocol_prefix(), self.repository)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_service_names() {
        assert_eq!(GitService::UploadPack.subcommand(), "upload-pack");
        assert_eq!(GitService::ReceivePack.command_name(), "git-receive-pack");
        assert_eq!(
            GitService::from_command_name("git-upload-pack"),
            Some(GitService::UploadPack)
        );
        assert_eq!(GitService::from_command_name("git-archive"), None);
    }

    #[test]
    fn test_repository_id_valid() {
        for name in ["r.git", "my-repo.git", "my_repo.git", "Repo42.git"] {
            assert_eq!(RepositoryId::parse(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn test_repository_id_invalid() {
        for name in [
            "", ".git", "repo", "repo.git/", "../repo.git", "a/b.git", "re po.git", "..git",
        ] {
            assert!(RepositoryId::parse(name).is_err(), "{name:?} should be rejected");
        }
    }

    #[test]
    fn test_protocol_id_roundtrip() {
        let id = ProtocolId::new(GitService::ReceivePack, RepositoryId::parse("r.git").unwrap());
        let s = id.to_string();
        assert_eq!(s, "/g2g/receive-pack/1.0.0/r.git");
        assert_eq!(ProtocolId::parse(&s).unwrap(), id);
    }

    #[test]
    fn test_protocol_id_matches_service_by_prefix() {
        let id: ProtocolId = "/g2g/upload-pack/1.0.0/dotfiles.git".parse().unwrap();
        assert_eq!(id.service, GitService::UploadPack);
        assert_eq!(id.repository.as_str(), "dotfiles.git");
    }

    #[test]
    fn test_protocol_id_invalid() {
        for s in [
            "/g2g/upload-pack/1.0.0",
            "/g2g/upload-pack/1.0.0/",
            "/g2g/upload-pack/1.0.0r.git",
            "/g2g/upload-pack/1.0.0/../r.git",
            "/g2g/upload-pack/1.0.0/a/r.git",
            "/g2g/archive/1.0.0/r.git",
        ] {
            assert!(ProtocolId::parse(s).is_err(), "{s:?} should be rejected");
        }
    }
}
