//! Query validation and argument-vector construction.
//!
//! A request selects one executable with `e` and supplies zero or more
//! arguments with `a`, each tagged by a two-byte prefix:
//!
//! | prefix | token                          | passed as                 |
//! |--------|--------------------------------|---------------------------|
//! | `d_`   | existing directory             | cleaned relative path     |
//! | `f_`   | existing non-directory         | cleaned relative path     |
//! | `o_`   | option permitted for `e`       | verbatim                  |
//! | `t_`   | text enclosed in `'` quotes    | text without the quotes   |
//!
//! Validation only reads the filesystem; the same request always yields the
//! same outcome for an unchanged directory.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use tokio::fs;
use url::form_urlencoded;

use super::Rejection;
use crate::config::Whitelist;

/// Query key selecting the executable.
pub const EXECUTABLE_KEY: &str = "e";
/// Query key carrying one argument.
pub const ARGUMENT_KEY: &str = "a";

/// One validated argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentToken {
    /// Existing directory, relative to the base directory.
    Directory(PathBuf),
    /// Existing non-directory entry, relative to the base directory.
    File(PathBuf),
    /// Whitelisted option.
    Option(String),
    /// Free text, quotes removed.
    Text(String),
}

impl ArgumentToken {
    /// Validate one raw `a` value.
    ///
    /// `base` anchors path lookups, `options` are the executable's permitted
    /// option tokens.
    ///
    /// # Errors
    ///
    /// Returns the [`Rejection`] naming the first broken rule.
    pub async fn parse(raw: &str, base: &Path, options: &[String]) -> Result<Self, Rejection> {
        if raw.len() < 3 {
            return Err(Rejection::ArgumentsInvalid);
        }

        if let Some(path) = raw.strip_prefix("d_") {
            let path = clean_path(path);
            let meta = fs::metadata(base.join(&path))
                .await
                .map_err(|_| Rejection::TargetNotFound)?;
            if !meta.is_dir() {
                return Err(Rejection::TargetNotDirectory);
            }
            Ok(Self::Directory(path))
        } else if let Some(path) = raw.strip_prefix("f_") {
            let path = clean_path(path);
            let meta = fs::metadata(base.join(&path))
                .await
                .map_err(|_| Rejection::TargetNotFound)?;
            if meta.is_dir() {
                return Err(Rejection::TargetNotFile);
            }
            Ok(Self::File(path))
        } else if let Some(option) = raw.strip_prefix("o_") {
            if !options.iter().any(|o| o == option) {
                return Err(Rejection::OptionNotFound);
            }
            Ok(Self::Option(option.to_string()))
        } else if let Some(text) = raw.strip_prefix("t_") {
            text.strip_prefix('\'')
                .and_then(|t| t.strip_suffix('\''))
                .map(|t| Self::Text(t.to_string()))
                .ok_or(Rejection::TextInvalid)
        } else {
            Err(Rejection::ArgumentsInvalid)
        }
    }

    /// The argument as handed to the executable.
    #[must_use]
    pub fn into_arg(self) -> OsString {
        match self {
            Self::Directory(path) | Self::File(path) => path.into_os_string(),
            Self::Option(s) | Self::Text(s) => OsString::from(s),
        }
    }
}

/// A validated command: whitelisted executable and its arguments in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Executable name, as listed in the whitelist.
    pub executable: String,
    /// Validated arguments.
    pub arguments: Vec<ArgumentToken>,
}

impl Invocation {
    /// Validate a raw query string against the whitelist.
    ///
    /// # Errors
    ///
    /// Returns the [`Rejection`] for the first check that fails, in this
    /// order: empty query, executable count, whitelist membership, then each
    /// argument in request order.
    pub async fn from_query(
        query: Option<&str>,
        whitelist: &Whitelist,
        base: &Path,
    ) -> Result<Self, Rejection> {
        let pairs: Vec<(String, String)> = form_urlencoded::parse(query.unwrap_or("").as_bytes())
            .into_owned()
            .collect();
        if pairs.is_empty() {
            return Err(Rejection::QueryInvalid);
        }

        let mut executables = pairs.iter().filter(|(k, _)| k == EXECUTABLE_KEY);
        let executable = match (executables.next(), executables.next()) {
            (Some((_, name)), None) => name,
            _ => return Err(Rejection::OneExecutableAllowed),
        };
        let options = whitelist
            .options(executable)
            .ok_or(Rejection::ExecutableNotFound)?;

        let mut arguments = Vec::new();
        for (_, raw) in pairs.iter().filter(|(k, _)| k == ARGUMENT_KEY) {
            arguments.push(ArgumentToken::parse(raw, base, options).await?);
        }

        Ok(Self {
            executable: executable.clone(),
            arguments,
        })
    }

    /// Argument vector without the executable.
    #[must_use]
    pub fn argv(&self) -> Vec<OsString> {
        self.arguments.iter().cloned().map(ArgumentToken::into_arg).collect()
    }
}

/// Lexically clean `raw` into a relative path.
///
/// Root and `.` components are dropped, `..` removes the preceding normal
/// component when there is one, and an empty result is `.`. Leading `..`
/// components are kept.
#[must_use]
pub fn clean_path(raw: &str) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in Path::new(raw).components() {
        match component {
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                if matches!(parts.last(), Some(Component::Normal(_))) {
                    parts.pop();
                } else {
                    parts.push(component);
                }
            }
            Component::Normal(_) => parts.push(component),
        }
    }

    if parts.is_empty() {
        PathBuf::from(".")
    } else {
        parts.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("logs")).unwrap();
        std::fs::write(dir.path().join("logs/app.log"), "line\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello\n").unwrap();
        dir
    }

    fn whitelist() -> Whitelist {
        [("ls", vec!["-l", "-a"]), ("echo", vec![])].into_iter().collect()
    }

    fn opts() -> Vec<String> {
        vec!["-l".to_string(), "-a".to_string()]
    }

    #[test]
    fn clean_path_is_lexical() {
        assert_eq!(clean_path("."), PathBuf::from("."));
        assert_eq!(clean_path(""), PathBuf::from("."));
        assert_eq!(clean_path("/"), PathBuf::from("."));
        assert_eq!(clean_path("/etc/passwd"), PathBuf::from("etc/passwd"));
        assert_eq!(clean_path("logs/./app.log"), PathBuf::from("logs/app.log"));
        assert_eq!(clean_path("logs/../notes.txt"), PathBuf::from("notes.txt"));
        assert_eq!(clean_path("a//b/"), PathBuf::from("a/b"));
        assert_eq!(clean_path("../x"), PathBuf::from("../x"));
        assert_eq!(clean_path("a/../../x"), PathBuf::from("../x"));
    }

    #[tokio::test]
    async fn short_arguments_are_invalid() {
        let dir = fixture();
        for raw in ["", "d_", "o", "t'"] {
            assert_eq!(
                ArgumentToken::parse(raw, dir.path(), &opts()).await,
                Err(Rejection::ArgumentsInvalid),
                "{raw:?}"
            );
        }
    }

    #[tokio::test]
    async fn unknown_prefix_is_invalid() {
        let dir = fixture();
        assert_eq!(
            ArgumentToken::parse("x_foo", dir.path(), &opts()).await,
            Err(Rejection::ArgumentsInvalid)
        );
        assert_eq!(
            ArgumentToken::parse("-rf", dir.path(), &opts()).await,
            Err(Rejection::ArgumentsInvalid)
        );
    }

    #[tokio::test]
    async fn directory_tokens() {
        let dir = fixture();
        let base = dir.path();
        assert_eq!(
            ArgumentToken::parse("d_.", base, &opts()).await,
            Ok(ArgumentToken::Directory(PathBuf::from(".")))
        );
        assert_eq!(
            ArgumentToken::parse("d_/logs/", base, &opts()).await,
            Ok(ArgumentToken::Directory(PathBuf::from("logs")))
        );
        assert_eq!(
            ArgumentToken::parse("d_notes.txt", base, &opts()).await,
            Err(Rejection::TargetNotDirectory)
        );
        assert_eq!(
            ArgumentToken::parse("d_missing", base, &opts()).await,
            Err(Rejection::TargetNotFound)
        );
    }

    #[tokio::test]
    async fn file_tokens() {
        let dir = fixture();
        let base = dir.path();
        assert_eq!(
            ArgumentToken::parse("f_logs/app.log", base, &opts()).await,
            Ok(ArgumentToken::File(PathBuf::from("logs/app.log")))
        );
        assert_eq!(
            ArgumentToken::parse("f_logs", base, &opts()).await,
            Err(Rejection::TargetNotFile)
        );
        assert_eq!(
            ArgumentToken::parse("f_nope.txt", base, &opts()).await,
            Err(Rejection::TargetNotFound)
        );
    }

    #[tokio::test]
    async fn option_tokens() {
        let dir = fixture();
        assert_eq!(
            ArgumentToken::parse("o_-l", dir.path(), &opts()).await,
            Ok(ArgumentToken::Option("-l".to_string()))
        );
        assert_eq!(
            ArgumentToken::parse("o_-R", dir.path(), &opts()).await,
            Err(Rejection::OptionNotFound)
        );
    }

    #[tokio::test]
    async fn text_tokens_need_enclosing_quotes() {
        let dir = fixture();
        let base = dir.path();
        assert_eq!(
            ArgumentToken::parse("t_'hello world'", base, &opts()).await,
            Ok(ArgumentToken::Text("hello world".to_string()))
        );
        assert_eq!(
            ArgumentToken::parse("t_''", base, &opts()).await,
            Ok(ArgumentToken::Text(String::new()))
        );
        for raw in ["t_'", "t_hello", "t_'hello", "t_hello'"] {
            assert_eq!(
                ArgumentToken::parse(raw, base, &opts()).await,
                Err(Rejection::TextInvalid),
                "{raw:?}"
            );
        }
    }

    #[tokio::test]
    async fn query_builds_argv_in_order() {
        let dir = fixture();
        let inv = Invocation::from_query(
            Some("e=ls&a=o_-l&a=d_.&a=f_logs%2Fapp.log&a=t_%27x%20y%27"),
            &whitelist(),
            dir.path(),
        )
        .await
        .unwrap();

        assert_eq!(inv.executable, "ls");
        assert_eq!(
            inv.argv(),
            vec![
                OsString::from("-l"),
                OsString::from("."),
                OsString::from("logs/app.log"),
                OsString::from("x y"),
            ]
        );
    }

    #[tokio::test]
    async fn query_rules() {
        let dir = fixture();
        let wl = whitelist();
        let cases = [
            (None, Rejection::QueryInvalid),
            (Some(""), Rejection::QueryInvalid),
            (Some("a=o_-l"), Rejection::OneExecutableAllowed),
            (Some("e=ls&e=echo"), Rejection::OneExecutableAllowed),
            (Some("e=cat"), Rejection::ExecutableNotFound),
            (Some("e=ls&a=o_-l&a=d_notes.txt"), Rejection::TargetNotDirectory),
            (Some("e=echo&a=o_-l"), Rejection::OptionNotFound),
        ];

        for (query, expected) in cases {
            let rejection = Invocation::from_query(query, &wl, dir.path()).await.unwrap_err();
            assert_eq!(rejection, expected, "{query:?}");
        }
    }

    #[tokio::test]
    async fn validation_is_repeatable() {
        let dir = fixture();
        let wl = whitelist();
        let first = Invocation::from_query(Some("e=ls&a=f_logs"), &wl, dir.path()).await;
        let second = Invocation::from_query(Some("e=ls&a=f_logs"), &wl, dir.path()).await;
        assert_eq!(first, Err(Rejection::TargetNotFile));
        assert_eq!(first, second);
    }
}
