//! Share path and account parsing.

use mpfu_core::{UploadError, UploadResult};

/// Share and directory taken from a destination's remote path.
///
/// `share/dir/sub`, `/share/dir/sub` and `\share\dir\sub` all name share
/// `share` with directory `dir/sub`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharePath {
    pub share: String,
    pub directory: String,
}

impl SharePath {
    pub fn parse(remote_path: &str) -> UploadResult<Self> {
        let normalized = remote_path.replace('\\', "/");
        let mut segments = normalized.split('/').filter(|s| !s.is_empty());
        let share = segments
            .next()
            .ok_or_else(|| UploadError::protocol(format!("No share name in '{}'", remote_path)))?
            .to_string();
        let directory = segments.collect::<Vec<_>>().join("/");
        Ok(Self { share, directory })
    }

    /// `//host/share` argument for smbclient.
    pub fn service(&self, host: &str) -> String {
        format!("//{}/{}", host, self.share)
    }

    pub fn unc(&self, host: &str) -> String {
        if self.directory.is_empty() {
            self.service(host)
        } else {
            format!("{}/{}", self.service(host), self.directory)
        }
    }
}

/// `DOMAIN\user` split into its parts. A bare name has no domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub domain: Option<String>,
    pub user: String,
}

impl Account {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('\\') {
            Some((domain, user)) if !domain.is_empty() => Self {
                domain: Some(domain.to_string()),
                user: user.to_string(),
            },
            Some((_, user)) => Self {
                domain: None,
                user: user.to_string(),
            },
            None => Self {
                domain: None,
                user: raw.to_string(),
            },
        }
    }
}

/// Quote an argument for smbclient's `-c` command string.
pub fn quote_arg(arg: &str) -> UploadResult<String> {
    if arg.contains('"') || arg.contains(';') {
        return Err(UploadError::protocol(format!(
            "'{}' cannot be passed to smbclient (contains '\"' or ';')",
            arg
        )));
    }
    Ok(format!("\"{}\"", arg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_and_directory() {
        let p = SharePath::parse("/public/reports/2024/").unwrap();
        assert_eq!(p.share, "public");
        assert_eq!(p.directory, "reports/2024");
        assert_eq!(p.service("fs01"), "//fs01/public");
        assert_eq!(p.unc("fs01"), "//fs01/public/reports/2024");
    }

    #[test]
    fn share_only_and_backslashes() {
        let p = SharePath::parse("\\\\public").unwrap();
        assert_eq!(p.share, "public");
        assert_eq!(p.directory, "");
        assert_eq!(p.unc("fs01"), "//fs01/public");
    }

    #[test]
    fn empty_path_has_no_share() {
        let err = SharePath::parse("//").unwrap_err();
        assert_eq!(err.kind, mpfu_core::UploadErrorKind::Protocol);
    }

    #[test]
    fn account_with_domain() {
        let a = Account::parse("CORP\\dave");
        assert_eq!(a.domain.as_deref(), Some("CORP"));
        assert_eq!(a.user, "dave");
        assert_eq!(Account::parse("dave").domain, None);
        assert_eq!(Account::parse("\\dave").user, "dave");
    }

    #[test]
    fn quoting_rejects_separators() {
        assert_eq!(quote_arg("a b.txt").unwrap(), "\"a b.txt\"");
        assert!(quote_arg("a;rm").is_err());
        assert!(quote_arg("a\"b").is_err());
    }
}
