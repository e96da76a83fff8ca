//! Idempotent creation of, and navigation into, remote archive directories.

use std::fmt;

use thiserror::Error;

use super::ftp::{FtpSession, SessionError};

/// An ordered list of remote directory names.
///
/// Built from a rendered template by splitting on `/`. Empty segments are
/// dropped; a leading `/` makes the path absolute, which resets the session
/// to the root once before traversal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemotePath {
    absolute: bool,
    segments: Vec<String>,
}

impl RemotePath {
    pub fn parse(path: &str) -> Self {
        RemotePath {
            absolute: path.starts_with('/'),
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The top-level directory this path lives under.
    pub fn root(&self) -> RemotePath {
        RemotePath {
            absolute: self.absolute,
            segments: self.segments.iter().take(1).cloned().collect(),
        }
    }

    /// The path of `name` inside this directory.
    pub fn file(&self, name: &str) -> String {
        if self.segments.is_empty() {
            return if self.absolute { format!("/{name}") } else { name.to_string() };
        }
        format!("{self}/{name}")
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            f.write_str("/")?;
        }
        f.write_str(&self.segments.join("/"))
    }
}

#[derive(Debug, Error)]
#[error("cannot provision `{segment}` of remote path `{path}`")]
pub struct RemoteDirectoryError {
    pub path: String,
    pub segment: String,
    pub source: SessionError,
}

/// Whether a `LIST` line describes a directory called `name`.
///
/// The last whitespace token is taken as the entry name and a leading `d`
/// (either case) on the first token marks a directory. This only holds for
/// Unix-style listings; other listing formats are not recognised.
pub fn is_directory_entry(line: &str, name: &str) -> bool {
    let mut tokens = line.split_whitespace();
    let first = tokens.next();
    let last = tokens.next_back().or(first);

    match (first, last) {
        (Some(first), Some(last)) => last == name && first.starts_with(['d', 'D']),
        _ => false,
    }
}

/// Walks `path` segment by segment, creating any directory that is missing,
/// and leaves the session inside the last one.
///
/// A failed `MKD` is followed by a `CWD` into the segment anyway, since
/// another session may have created it after our `LIST`; only when that also
/// fails is the `MKD` error reported.
///
/// Nothing is rolled back: on error the session stays in the last directory
/// entered and callers must reset to the root before reusing it.
pub fn ensure_and_enter<S: FtpSession + ?Sized>(
    session: &mut S,
    path: &RemotePath,
) -> Result<(), RemoteDirectoryError> {
    let fail = |segment: &str, source| RemoteDirectoryError {
        path: path.to_string(),
        segment: segment.to_string(),
        source,
    };

    if path.is_absolute() {
        session.cwd("/").map_err(|e| fail("/", e))?;
    }

    for segment in &path.segments {
        let listing = session.list().map_err(|e| fail(segment, e))?;
        if !listing.iter().any(|line| is_directory_entry(line, segment)) {
            tracing::debug!(%segment, "creating remote directory");
            if let Err(e) = session.mkdir(segment) {
                tracing::debug!(%segment, error = %e, "MKD failed, entering anyway");
                session.cwd(segment).map_err(|_| fail(segment, e))?;
                continue;
            }
        }
        session.cwd(segment).map_err(|e| fail(segment, e))?;
    }

    Ok(())
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ftp::testing::MemorySession;

    #[test]
    fn should_parse_remote_path() {
        let p = RemotePath::parse("project//20240101/META/");
        assert!(!p.is_absolute());
        assert_eq!(p.segments(), &["project", "20240101", "META"]);
        assert_eq!(p.to_string(), "project/20240101/META");
        assert_eq!(p.file("a.jpg"), "project/20240101/META/a.jpg");

        assert_eq!(p.root(), RemotePath::parse("project"));
        assert_eq!(RemotePath::parse("/a/b").root().to_string(), "/a");

        let root = RemotePath::parse("/");
        assert!(root.is_absolute());
        assert!(root.segments().is_empty());
        assert_eq!(root.file("a.jpg"), "/a.jpg");
    }

    #[test]
    fn should_detect_directory_lines() {
        let line = "drwxr-xr-x    2 ftp      ftp          4096 Jan 01 00:00 20240101";
        assert!(is_directory_entry(line, "20240101"));
        assert!(!is_directory_entry(line, "2024"));

        let file = "-rw-r--r--    1 ftp      ftp         51234 Jan 01 00:00 20240101";
        assert!(!is_directory_entry(file, "20240101"));

        assert!(is_directory_entry("D 20240101", "20240101"));
        assert!(!is_directory_entry("", "x"));
    }

    #[test]
    fn should_create_missing_directories() {
        let mut session = MemorySession::default();
        session.add_dir("project");

        ensure_and_enter(&mut session, &RemotePath::parse("project/20240101/META")).unwrap();

        assert_eq!(session.cwd_path(), "/project/20240101/META");
        assert_eq!(session.mkdir_calls, vec!["20240101", "META"]);
    }

    #[test]
    fn should_be_idempotent() {
        let mut session = MemorySession::default();
        let path = RemotePath::parse("project/20240101/META");

        ensure_and_enter(&mut session, &path).unwrap();
        let first = session.cwd_path();
        let created = session.mkdir_calls.len();

        session.cwd("/").unwrap();
        ensure_and_enter(&mut session, &path).unwrap();

        assert_eq!(session.cwd_path(), first);
        assert_eq!(session.mkdir_calls.len(), created);
        assert_eq!(session.dir_count(), 3);
    }

    #[test]
    fn should_reset_to_root_for_absolute_paths() {
        let mut session = MemorySession::default();
        ensure_and_enter(&mut session, &RemotePath::parse("elsewhere")).unwrap();

        ensure_and_enter(&mut session, &RemotePath::parse("/project")).unwrap();

        assert_eq!(session.cwd_path(), "/project");
    }

    #[test]
    fn should_enter_directory_created_after_listing() {
        let mut session = MemorySession::default();
        session.add_dir("project");
        // A sibling upload creates the day directory between our LIST and MKD.
        session.create_after_listing("/project", "project/20240101");

        ensure_and_enter(&mut session, &RemotePath::parse("project/20240101/META")).unwrap();

        assert_eq!(session.cwd_path(), "/project/20240101/META");
        assert_eq!(session.mkdir_calls, vec!["20240101", "META"]);
    }

    #[test]
    fn should_provision_sibling_trees_in_turn() {
        let mut session = MemorySession::default();
        session.create_after_listing("/project", "project/20240101");

        ensure_and_enter(&mut session, &RemotePath::parse("project/20240101/METB")).unwrap();
        session.cwd("/").unwrap();
        ensure_and_enter(&mut session, &RemotePath::parse("project/20240101/META")).unwrap();

        assert_eq!(session.cwd_path(), "/project/20240101/META");
        assert_eq!(session.dir_count(), 4);
    }

    #[test]
    fn should_stop_at_failed_segment() {
        let mut session = MemorySession::default();
        session.deny_mkdir("META");

        let err = ensure_and_enter(&mut session, &RemotePath::parse("project/META/x")).unwrap_err();

        assert_eq!(err.segment, "META");
        assert_eq!(err.path, "project/META/x");
        assert_eq!(session.cwd_path(), "/project");
    }
}
