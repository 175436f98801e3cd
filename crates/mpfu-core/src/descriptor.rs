//! Destination descriptor grammar.
//!
//! ```text
//! <protocol>:<host-or-ip>:/<remote-path>/:<username>:<password>   # ftp, sftp, scp, smb
//! s3:<bucket-name>                                                 # object storage
//! ```
//!
//! Fields are split on `:` with no escaping and trimmed. Batches come either
//! comma-joined on one line or one descriptor per line in a list file; each
//! entry is parsed on its own so one bad entry never hides the others.

use crate::error::{UploadError, UploadResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

const FIELD_DELIMITER: char = ':';
const INLINE_DELIMITER: char = ',';

/// Transfer protocol named by the first descriptor field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Protocol {
    Ftp,
    Sftp,
    Scp,
    Smb,
    ObjectStorage,
}

impl Protocol {
    pub const ALL: [Protocol; 5] = [
        Protocol::Ftp,
        Protocol::Sftp,
        Protocol::Scp,
        Protocol::Smb,
        Protocol::ObjectStorage,
    ];

    /// Scheme token used in descriptor lines.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Ftp => "ftp",
            Self::Sftp => "sftp",
            Self::Scp => "scp",
            Self::Smb => "smb",
            Self::ObjectStorage => "s3",
        }
    }

    /// SFTP and SCP share the key-then-password resolution path.
    pub fn is_ssh_family(&self) -> bool {
        matches!(self, Self::Sftp | Self::Scp)
    }

    /// Number of fields a descriptor line needs, counting the protocol.
    fn required_fields(&self) -> usize {
        match self {
            Self::ObjectStorage => 2,
            _ => 4,
        }
    }

    fn max_fields(&self) -> usize {
        match self {
            Self::ObjectStorage => 2,
            _ => 5,
        }
    }

    fn field_name(&self, index: usize) -> &'static str {
        match (self, index) {
            (Self::ObjectStorage, 1) => "bucket name",
            (_, 1) => "host",
            (_, 2) => "remote path",
            (_, 3) => "username",
            (_, 4) => "password",
            _ => "protocol",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Protocol::ALL
            .iter()
            .copied()
            .find(|p| p.scheme() == lower)
            .ok_or_else(|| format!("unknown protocol '{}' (expected ftp, sftp, scp, smb or s3)", s.trim()))
    }
}

/// One destination. For object storage `host`, `user` and `secret` are empty
/// and `remote_path` holds the bucket name.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationDescriptor {
    pub protocol: Protocol,
    pub host: String,
    pub remote_path: String,
    pub user: String,
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
}

impl DestinationDescriptor {
    pub fn object_storage(bucket: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::ObjectStorage,
            host: String::new(),
            remote_path: bucket.into(),
            user: String::new(),
            secret: None,
        }
    }

    /// Bucket name for object-storage destinations.
    pub fn bucket(&self) -> Option<&str> {
        match self.protocol {
            Protocol::ObjectStorage => Some(&self.remote_path),
            _ => None,
        }
    }

    /// Remote path for `name` inside this destination's directory.
    pub fn remote_file_path(&self, name: &str) -> String {
        if self.remote_path.is_empty() || self.remote_path.ends_with('/') {
            format!("{}{}", self.remote_path, name)
        } else {
            format!("{}/{}", self.remote_path, name)
        }
    }

    /// Descriptor rendered without the secret, for logs and diagnostics.
    pub fn display_name(&self) -> String {
        match self.protocol {
            Protocol::ObjectStorage => format!("{}:{}", self.protocol, self.remote_path),
            _ => format!(
                "{}:{}:{}:{}",
                self.protocol, self.host, self.remote_path, self.user
            ),
        }
    }

    /// Serialise back into the line grammar, secret included when present.
    pub fn to_line(&self) -> String {
        match (&self.protocol, &self.secret) {
            (Protocol::ObjectStorage, _) => self.display_name(),
            (_, Some(secret)) => format!("{}:{}", self.display_name(), secret),
            (_, None) => self.display_name(),
        }
    }

    /// `user@host` shorthand naming a host to run commands on. It becomes an
    /// SFTP destination in the login directory.
    pub fn from_login(line: usize, input: &str) -> Result<Self, MalformedDescriptor> {
        let reject = |reason: &str| MalformedDescriptor {
            line,
            input: input.trim().to_string(),
            reason: reason.to_string(),
        };
        let (user, host) = input
            .trim()
            .split_once('@')
            .ok_or_else(|| reject("expected user@host"))?;
        let (user, host) = (user.trim(), host.trim());
        if user.is_empty() || host.is_empty() || host.contains('@') {
            return Err(reject("expected user@host"));
        }
        Ok(Self {
            protocol: Protocol::Sftp,
            host: host.to_string(),
            remote_path: String::new(),
            user: user.to_string(),
            secret: None,
        })
    }

    /// Parse a single descriptor. `line` is the 1-indexed position used in
    /// diagnostics.
    pub fn parse(line: usize, input: &str) -> Result<Self, MalformedDescriptor> {
        let fields: Vec<&str> = input.split(FIELD_DELIMITER).map(str::trim).collect();
        let reject = |reason: String| MalformedDescriptor {
            line,
            input: redact(input),
            reason,
        };

        let protocol = Protocol::from_str(fields[0]).map_err(reject)?;

        if fields.len() < protocol.required_fields() {
            return Err(reject(format!(
                "missing {} field",
                protocol.field_name(fields.len())
            )));
        }
        if fields.len() > protocol.max_fields() {
            return Err(reject(format!(
                "expected at most {} fields for {}, found {}",
                protocol.max_fields(),
                protocol,
                fields.len()
            )));
        }

        if protocol == Protocol::ObjectStorage {
            if fields[1].is_empty() {
                return Err(reject("empty bucket name field".into()));
            }
            return Ok(Self::object_storage(fields[1]));
        }

        for index in 1..=2 {
            if fields[index].is_empty() {
                return Err(reject(format!("empty {} field", protocol.field_name(index))));
            }
        }

        let secret = fields
            .get(4)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        Ok(Self {
            protocol,
            host: fields[1].to_string(),
            remote_path: fields[2].to_string(),
            user: fields[3].to_string(),
            secret,
        })
    }
}

impl fmt::Debug for DestinationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationDescriptor")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("remote_path", &self.remote_path)
            .field("user", &self.user)
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .finish()
    }
}

impl fmt::Display for DestinationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// Keep the protocol/host/path/user part of a rejected line, drop any secret.
fn redact(input: &str) -> String {
    let trimmed = input.trim();
    let fields: Vec<&str> = trimmed.splitn(5, FIELD_DELIMITER).collect();
    if fields.len() == 5 {
        format!("{}:***", fields[..4].join(":"))
    } else {
        trimmed.to_string()
    }
}

/// A descriptor entry that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MalformedDescriptor {
    /// 1-indexed position in the batch.
    pub line: usize,
    /// Offending entry with any secret redacted.
    pub input: String,
    pub reason: String,
}

impl fmt::Display for MalformedDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {} ('{}')", self.line, self.reason, self.input)
    }
}

impl From<MalformedDescriptor> for UploadError {
    fn from(m: MalformedDescriptor) -> Self {
        UploadError::malformed(m.to_string())
    }
}

/// Parsed batch of destinations plus the entries that were rejected.
#[derive(Debug, Clone, Default)]
pub struct ServerList {
    pub destinations: Vec<DestinationDescriptor>,
    pub rejected: Vec<MalformedDescriptor>,
}

impl ServerList {
    /// Parse comma-joined descriptors typed on one line.
    pub fn from_inline(input: &str) -> Self {
        Self::collect(input.split(INLINE_DELIMITER))
    }

    /// Parse one descriptor per line (list-file contents).
    pub fn from_lines(input: &str) -> Self {
        Self::collect(input.lines())
    }

    /// Read and parse a descriptor-list file.
    pub fn from_file(path: &Path) -> UploadResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            UploadError::invalid_local_path(format!(
                "cannot read server list '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self::from_lines(&contents))
    }

    /// Parse either an existing list file or an inline comma-joined list.
    pub fn from_arg(arg: &str) -> UploadResult<Self> {
        let path = Path::new(arg);
        if path.is_file() {
            Self::from_file(path)
        } else {
            Ok(Self::from_inline(arg))
        }
    }

    /// Comma-joined shell targets: full descriptors or `user@host` logins.
    pub fn from_shell_targets(input: &str) -> Self {
        Self::collect_with(input.split(INLINE_DELIMITER), |line, entry| {
            if entry.contains('@') && !entry.contains(FIELD_DELIMITER) {
                DestinationDescriptor::from_login(line, entry)
            } else {
                DestinationDescriptor::parse(line, entry)
            }
        })
    }

    fn collect<'a>(entries: impl Iterator<Item = &'a str>) -> Self {
        Self::collect_with(entries, DestinationDescriptor::parse)
    }

    fn collect_with<'a>(
        entries: impl Iterator<Item = &'a str>,
        parse: impl Fn(usize, &str) -> Result<DestinationDescriptor, MalformedDescriptor>,
    ) -> Self {
        let mut list = ServerList::default();
        for (idx, entry) in entries.enumerate() {
            if entry.trim().is_empty() {
                continue;
            }
            match parse(idx + 1, entry) {
                Ok(d) => list.destinations.push(d),
                Err(m) => {
                    log::warn!("Rejected destination {}", m);
                    list.rejected.push(m);
                }
            }
        }
        list
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Append another batch, renumbering nothing.
    pub fn extend(&mut self, other: ServerList) {
        self.destinations.extend(other.destinations);
        self.rejected.extend(other.rejected);
    }
}
