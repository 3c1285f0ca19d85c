//! iOS code-signing identity and provisioning-profile lookup.
//!
//! Lookups validate the requested type, fetch every record of that type from
//! a [`SigningStore`] and scan for a name match. Certificates match when the
//! name *contains* the search term; profiles match on *exact* name. When
//! several records match, the last one wins.
//!
//! Signing material only exists on macOS. On any other host the lookups
//! return `Ok(None)` instead of failing.
//!
//! # Example
//!
//! ```no_run
//! use mobrig_core::command::SystemRunner;
//! use mobrig_core::signing::{KeychainStore, SigningLookup};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let lookup = SigningLookup::new(KeychainStore::new(SystemRunner));
//! if let Some(cert) = lookup.find_certificate("developer", "Jane Appleseed").await? {
//!     println!("{} ({})", cert.name, cert.fingerprint);
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::command::{CommandError, CommandRunner, CommandSpec};
use crate::host::HostOs;

/// Errors from signing lookups.
#[derive(Error, Debug)]
pub enum SigningError {
    /// The requested certificate or profile type is not recognised.
    #[error("'{value}' is not a valid type for {kind} lookup (expected one of: {expected})")]
    InvalidType {
        kind: &'static str,
        value: String,
        expected: &'static str,
    },

    /// No certificate name contained the search term.
    #[error("no certificate found matching '{term}' of type {kind}")]
    CertificateNotFound { kind: CertificateType, term: String },

    /// No profile name equalled the search term.
    #[error("no provisioning profile found named '{name}' of type {kind}")]
    ProfileNotFound { kind: ProfileType, name: String },

    /// The `security` tool failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Reading the profiles directory failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Kind of code-signing certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateType {
    Developer,
    Distribution,
}

impl CertificateType {
    /// Classifies an identity by its common-name prefix.
    pub fn classify(name: &str) -> Option<Self> {
        if name.starts_with("Apple Development") || name.starts_with("iPhone Developer") {
            Some(CertificateType::Developer)
        } else if name.starts_with("Apple Distribution") || name.starts_with("iPhone Distribution")
        {
            Some(CertificateType::Distribution)
        } else {
            None
        }
    }
}

impl fmt::Display for CertificateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CertificateType::Developer => "developer",
            CertificateType::Distribution => "distribution",
        })
    }
}

impl FromStr for CertificateType {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "developer" => Ok(CertificateType::Developer),
            "distribution" => Ok(CertificateType::Distribution),
            other => Err(SigningError::InvalidType {
                kind: "certificate",
                value: other.to_string(),
                expected: "developer, distribution",
            }),
        }
    }
}

/// Kind of provisioning profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileType {
    AdHoc,
    Development,
    Distribution,
}

impl fmt::Display for ProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProfileType::AdHoc => "adhoc",
            ProfileType::Development => "development",
            ProfileType::Distribution => "distribution",
        })
    }
}

impl FromStr for ProfileType {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adhoc" => Ok(ProfileType::AdHoc),
            "development" => Ok(ProfileType::Development),
            "distribution" => Ok(ProfileType::Distribution),
            other => Err(SigningError::InvalidType {
                kind: "provisioning profile",
                value: other.to_string(),
                expected: "adhoc, development, distribution",
            }),
        }
    }
}

/// A code-signing identity in the keychain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// SHA-1 fingerprint as printed by `security`.
    pub fingerprint: String,
    /// Common name, e.g. "Apple Development: Jane Appleseed (ABCDE12345)".
    pub name: String,
}

/// An installed provisioning profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningProfile {
    pub uuid: String,
    pub name: String,
    pub team_id: Option<String>,
    pub profile_type: ProfileType,
    pub expires: Option<DateTime<Utc>>,
    pub path: PathBuf,
}

/// Source of signing records.
#[async_trait]
pub trait SigningStore: Send + Sync {
    async fn certificates(&self, kind: CertificateType) -> Result<Vec<Certificate>, SigningError>;
    async fn profiles(&self, kind: ProfileType) -> Result<Vec<ProvisioningProfile>, SigningError>;
}

/// Certificate and profile lookup over a [`SigningStore`].
pub struct SigningLookup<S> {
    store: S,
    host: HostOs,
}

impl<S: SigningStore> SigningLookup<S> {
    pub fn new(store: S) -> Self {
        Self::with_host(store, HostOs::current())
    }

    pub fn with_host(store: S, host: HostOs) -> Self {
        Self { store, host }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn supported(&self) -> bool {
        self.host == HostOs::MacOs
    }

    /// Finds the certificate of `kind` whose name contains `term`.
    ///
    /// Returns `Ok(None)` on hosts without a keychain.
    pub async fn find_certificate(
        &self,
        kind: &str,
        term: &str,
    ) -> Result<Option<Certificate>, SigningError> {
        if !self.supported() {
            debug!(host = ?self.host, "certificate lookup unsupported on this host");
            return Ok(None);
        }
        let kind: CertificateType = kind.parse()?;
        let found = self
            .store
            .certificates(kind)
            .await?
            .into_iter()
            .filter(|c| c.name.contains(term))
            .last();
        match found {
            Some(cert) => {
                debug!(name = %cert.name, "certificate found");
                Ok(Some(cert))
            }
            None => Err(SigningError::CertificateNotFound {
                kind,
                term: term.to_string(),
            }),
        }
    }

    /// Finds the profile of `kind` named exactly `name`.
    ///
    /// Returns `Ok(None)` on hosts without provisioning profiles.
    pub async fn find_profile(
        &self,
        kind: &str,
        name: &str,
    ) -> Result<Option<ProvisioningProfile>, SigningError> {
        if !self.supported() {
            debug!(host = ?self.host, "profile lookup unsupported on this host");
            return Ok(None);
        }
        let kind: ProfileType = kind.parse()?;
        let found = self
            .store
            .profiles(kind)
            .await?
            .into_iter()
            .filter(|p| p.name == name)
            .last();
        match found {
            Some(profile) => {
                debug!(uuid = %profile.uuid, "provisioning profile found");
                Ok(Some(profile))
            }
            None => Err(SigningError::ProfileNotFound {
                kind,
                name: name.to_string(),
            }),
        }
    }
}

/// Parses `security find-identity -v -p codesigning` output.
///
/// Lines look like `  1) 0123ABCD... "Apple Development: Jane (TEAMID)"`.
pub fn parse_identities(output: &str) -> Vec<Certificate> {
    output
        .lines()
        .filter_map(|line| {
            let (_, rest) = line.trim().split_once(')')?;
            let (fingerprint, quoted) = rest.trim().split_once(' ')?;
            let name = quoted.trim().strip_prefix('"')?.strip_suffix('"')?;
            Some(Certificate {
                fingerprint: fingerprint.to_string(),
                name: name.to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProfilePlist {
    name: String,
    #[serde(rename = "UUID")]
    uuid: String,
    #[serde(default)]
    team_identifier: Vec<String>,
    expiration_date: Option<plist::Date>,
    provisioned_devices: Option<Vec<String>>,
    #[serde(default)]
    provisions_all_devices: bool,
    #[serde(default)]
    entitlements: ProfileEntitlements,
}

#[derive(Debug, Default, Deserialize)]
struct ProfileEntitlements {
    #[serde(rename = "get-task-allow", default)]
    get_task_allow: bool,
}

/// Decodes a `.mobileprovision` file.
///
/// The file is a CMS envelope around an XML plist; the plist is cut out of
/// the envelope rather than verifying the signature.
pub fn parse_profile(bytes: &[u8], path: &Path) -> Option<ProvisioningProfile> {
    let start = find(bytes, b"<?xml")?;
    let end = find(&bytes[start..], b"</plist>")? + start + b"</plist>".len();
    let plist: ProfilePlist = plist::from_bytes(&bytes[start..end]).ok()?;

    let has_devices = plist
        .provisioned_devices
        .as_ref()
        .is_some_and(|d| !d.is_empty());
    let profile_type = match (has_devices, plist.entitlements.get_task_allow) {
        (true, true) => ProfileType::Development,
        (true, false) => ProfileType::AdHoc,
        (false, _) => ProfileType::Distribution,
    };
    if plist.provisions_all_devices {
        debug!(name = %plist.name, "enterprise profile");
    }

    Some(ProvisioningProfile {
        uuid: plist.uuid,
        name: plist.name,
        team_id: plist.team_identifier.into_iter().next(),
        profile_type,
        expires: plist
            .expiration_date
            .map(|d| DateTime::<Utc>::from(std::time::SystemTime::from(d))),
        path: path.to_path_buf(),
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// [`SigningStore`] backed by the macOS keychain and the user's installed
/// provisioning profiles.
pub struct KeychainStore<R> {
    runner: R,
    profiles_dir: PathBuf,
}

impl<R: CommandRunner> KeychainStore<R> {
    pub fn new(runner: R) -> Self {
        let profiles_dir = dirs::home_dir()
            .unwrap_or_default()
            .join("Library/MobileDevice/Provisioning Profiles");
        Self::with_profiles_dir(runner, profiles_dir)
    }

    pub fn with_profiles_dir(runner: R, profiles_dir: PathBuf) -> Self {
        Self {
            runner,
            profiles_dir,
        }
    }
}

#[async_trait]
impl<R: CommandRunner> SigningStore for KeychainStore<R> {
    async fn certificates(&self, kind: CertificateType) -> Result<Vec<Certificate>, SigningError> {
        let spec = CommandSpec::new("security").args(["find-identity", "-v", "-p", "codesigning"]);
        let output = self.runner.output(&spec).await?.into_result(&spec)?;
        Ok(parse_identities(&output.stdout)
            .into_iter()
            .filter(|c| CertificateType::classify(&c.name) == Some(kind))
            .collect())
    }

    async fn profiles(&self, kind: ProfileType) -> Result<Vec<ProvisioningProfile>, SigningError> {
        let mut entries = match tokio::fs::read_dir(&self.profiles_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut profiles = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("mobileprovision") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match parse_profile(&bytes, &path) {
                Some(profile) if profile.profile_type == kind => profiles.push(profile),
                Some(_) => {}
                None => warn!(path = %path.display(), "skipping unreadable provisioning profile"),
            }
        }
        // Directory order is arbitrary; keep "last match" deterministic.
        profiles.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(profiles)
    }
}
