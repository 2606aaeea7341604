//! Configuration loader (C7): resolves a connection profile from a TOML
//! file. Mirrors the optional-field staging struct, validated into a strict
//! type, pattern this stack's config readers use elsewhere.

use crate::error::{AmiError, ConfigError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const DEFAULT_PORT: u16 = 5038;

/// A fully resolved connection: where to dial and which credentials to
/// present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    pub name: String,
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    general: Option<RawGeneral>,
    #[serde(default)]
    connections: BTreeMap<String, RawConnection>,
}

#[derive(Debug, Deserialize, Default)]
struct RawGeneral {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct RawConnection {
    username: Option<String>,
    secret: Option<String>,
}

/// Search order: an explicit path, then `./.asterisk.toml`, then
/// `$HOME/.asterisk.toml`, then `/etc/asterisk/ami.toml`.
pub fn search_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(p) = explicit {
        paths.push(p.to_path_buf());
    }
    paths.push(PathBuf::from("./.asterisk.toml"));
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".asterisk.toml"));
    }
    paths.push(PathBuf::from("/etc/asterisk/ami.toml"));
    paths
}

/// Resolve and parse a connection profile. `connection_name` selects the
/// `[connections.<name>]` table to use; `None` falls back to the
/// alphabetically-first declared connection (TOML table deserialization
/// does not preserve source order without extra tooling, so "first" is
/// defined here as "first by name" rather than "first in the file").
pub fn load(explicit_path: Option<&Path>, connection_name: Option<&str>) -> Result<ConnectionProfile> {
    let candidates = search_paths(explicit_path);
    let (path, contents) = find_first_readable(&candidates)?;

    let raw: RawConfig = toml::from_str(&contents).map_err(|source| {
        AmiError::Config(ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    })?;

    let general = raw.general.unwrap_or_default();
    let host = general
        .host
        .ok_or(AmiError::Config(ConfigError::MissingField("general.host")))?;
    let port = general.port.unwrap_or(DEFAULT_PORT);

    if raw.connections.is_empty() {
        return Err(AmiError::Config(ConfigError::NoConnections));
    }

    let (name, conn) = match connection_name {
        Some(wanted) => {
            let conn = raw
                .connections
                .get(wanted)
                .ok_or_else(|| AmiError::Config(ConfigError::UnknownConnection(wanted.to_owned())))?;
            (wanted.to_owned(), conn)
        }
        None => {
            let (name, conn) = raw.connections.iter().next().expect("checked non-empty above");
            (name.clone(), conn)
        }
    };

    let username = conn
        .username
        .clone()
        .ok_or(AmiError::Config(ConfigError::MissingField("username")))?;
    let secret = conn
        .secret
        .clone()
        .ok_or(AmiError::Config(ConfigError::MissingField("secret")))?;

    Ok(ConnectionProfile {
        host,
        port,
        username,
        secret,
        name,
    })
}

fn find_first_readable(candidates: &[PathBuf]) -> Result<(PathBuf, String)> {
    for path in candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => return Ok((path.clone(), contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(source) => {
                return Err(AmiError::Config(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                }))
            }
        }
    }
    Err(AmiError::Config(ConfigError::NotFound {
        searched: candidates.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_named_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ami.toml");
        std::fs::write(
            &path,
            r#"
            [general]
            host = "10.0.0.1"
            port = 5038

            [connections.admin]
            username = "admin"
            secret = "topsecret"
            "#,
        )
        .unwrap();

        let profile = load(Some(&path), Some("admin")).unwrap();
        assert_eq!(profile.host, "10.0.0.1");
        assert_eq!(profile.port, 5038);
        assert_eq!(profile.username, "admin");
        assert_eq!(profile.name, "admin");
    }

    #[test]
    fn defaults_port_and_first_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ami.toml");
        std::fs::write(
            &path,
            r#"
            [general]
            host = "127.0.0.1"

            [connections.ops]
            username = "ops"
            secret = "s3cr3t"
            "#,
        )
        .unwrap();

        let profile = load(Some(&path), None).unwrap();
        assert_eq!(profile.port, 5038);
        assert_eq!(profile.name, "ops");
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = load(Some(Path::new("/nonexistent/path/ami.toml")), None).unwrap_err();
        assert!(matches!(err, AmiError::Config(ConfigError::NotFound { .. })));
    }

    #[test]
    fn unknown_connection_name_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ami.toml");
        std::fs::write(
            &path,
            r#"
            [general]
            host = "127.0.0.1"

            [connections.ops]
            username = "ops"
            secret = "s3cr3t"
            "#,
        )
        .unwrap();

        let err = load(Some(&path), Some("missing")).unwrap_err();
        assert!(matches!(err, AmiError::Config(ConfigError::UnknownConnection(_))));
    }
}
