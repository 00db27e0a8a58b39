//! # Configuration
//!
//! Control files are a tiny Forth-like language: whitespace separated words,
//! `#` comments, UTF-8, with `\ ` counting as an escaped space inside a
//! token. The same scanner also tokenizes manifests, which share the
//! grammar.
//!
//! Recognized directives: `target PATH`, `include PATH`, `exclude GLOB`,
//! `hash NAME` and `load_config PATH`. Paths are expanded for `~` and
//! environment variables; relative paths resolve against the directory of
//! the file containing them.

use crate::error::{BackupError, Result};
use crate::hashes::HashKind;
use log::warn;
use std::path::{Component, Path, PathBuf};

/// A token annotated with the line it was read from.
#[derive(Debug, Clone)]
pub struct Word {
    pub text: String,
    pub line: u32,
}

/// Tokenizer for control files and manifests.
///
/// Comments run from `#` to end of line. Escaped spaces are folded to
/// `\x20` before splitting so they survive tokenization; `unescape`
/// restores them later.
pub struct WordScanner {
    file: PathBuf,
    words: std::vec::IntoIter<Word>,
}

impl WordScanner {
    pub fn open(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| BackupError::file(path, e))?;
        Ok(Self::from_content(path, &content))
    }

    pub fn from_content(path: &Path, content: &str) -> Self {
        let mut words = Vec::new();
        for (n, line) in content.lines().enumerate() {
            let line = line.replace("\\ ", "\\x20");
            let line = match line.find('#') {
                Some(pos) => &line[..pos],
                None => &line[..],
            };
            for token in line.split_whitespace() {
                words.push(Word {
                    text: token.to_string(),
                    line: n as u32 + 1,
                });
            }
        }
        WordScanner {
            file: path.to_path_buf(),
            words: words.into_iter(),
        }
    }

    pub fn next_word(&mut self) -> Option<Word> {
        self.words.next()
    }

    /// Fetch the argument of `directive`, failing with a located parse
    /// error when the stream ends early.
    pub fn next_arg(&mut self, directive: &Word) -> Result<Word> {
        self.words.next().ok_or_else(|| {
            BackupError::parse(
                &self.file,
                directive.line,
                format!("missing argument after {:?}", directive.text),
            )
        })
    }

    pub fn error(&self, word: &Word, message: impl Into<String>) -> BackupError {
        BackupError::parse(&self.file, word.line, message)
    }
}

/// Everything a control file can configure.
#[derive(Debug, Default, Clone)]
pub struct Settings {
    pub target: Option<PathBuf>,
    pub includes: Vec<PathBuf>,
    pub excludes: Vec<String>,
    pub hash: Option<HashKind>,
}

impl Settings {
    /// Load a control file, following `load_config` splices.
    pub fn load(path: &Path) -> Result<Settings> {
        let mut settings = Settings::default();
        settings.load_file(path)?;
        Ok(settings)
    }

    fn load_file(&mut self, path: &Path) -> Result<()> {
        // contained relative paths resolve against the file's directory
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        };
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        let mut scanner = WordScanner::open(&path)?;
        while let Some(word) = scanner.next_word() {
            match word.text.to_lowercase().as_str() {
                "target" => {
                    let arg = scanner.next_arg(&word)?;
                    self.target = Some(resolve_path(&arg.text, &base));
                }
                "include" => {
                    let arg = scanner.next_arg(&word)?;
                    self.includes.push(resolve_path(&arg.text, &base));
                }
                "exclude" => {
                    let arg = scanner.next_arg(&word)?;
                    self.excludes.push(crate::escape::unescape(&arg.text));
                }
                "hash" => {
                    let arg = scanner.next_arg(&word)?;
                    if self.hash.is_some() {
                        warn!("hash directive found multiple times");
                    }
                    self.hash = Some(HashKind::by_name(&arg.text)?);
                }
                "load_config" => {
                    let arg = scanner.next_arg(&word)?;
                    let spliced = resolve_path(&arg.text, &base);
                    self.load_file(&spliced)?;
                }
                other => {
                    return Err(scanner.error(&word, format!("unknown word: {other:?}")));
                }
            }
        }
        Ok(())
    }
}

/// Expand `~` and `$VAR`/`${VAR}`, resolve against `base` when relative,
/// and normalize the result.
pub fn resolve_path(raw: &str, base: &Path) -> PathBuf {
    let raw = crate::escape::unescape(raw);
    let expanded = expand_vars(&expand_user(&raw));
    let path = PathBuf::from(expanded);
    let abs = if path.is_absolute() {
        path
    } else {
        base.join(path)
    };
    normalize_path(&abs)
}

fn expand_user(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if rest.is_empty() || rest.starts_with('/') {
            if let Some(home) = dirs::home_dir() {
                return format!("{}{}", home.display(), rest);
            }
        }
    }
    path.to_string()
}

fn expand_vars(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let mut name = String::new();
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
        }
        match std::env::var(&name) {
            Ok(value) if !name.is_empty() => out.push_str(&value),
            _ => {
                // leave unknown references untouched
                out.push('$');
                if braced {
                    out.push('{');
                    out.push_str(&name);
                    out.push('}');
                } else {
                    out.push_str(&name);
                }
            }
        }
    }
    out
}

/// Lexical path normalization: resolves `.` and `..` components without
/// touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

// ─── Profiles ───────────────────────────────────────────────────────────────

const PROFILE_DIR_NAME: &str = "link-to-the-past-backup";
const DEFAULT_PROFILE: &str = "default";

fn profile_directory() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(PROFILE_DIR_NAME))
}

/// Locate a named profile in the configuration directory.
pub fn named_profile(name: &str) -> Result<PathBuf> {
    if let Some(dir) = profile_directory() {
        let path = dir.join(format!("{name}.profile"));
        if path.exists() {
            return Ok(path);
        }
    }
    Err(BackupError::Config(format!("profile {name:?} not found")))
}

/// The implicit profile: `default.profile` in the current directory, then
/// the named profile `default`.
pub fn default_profile() -> Result<PathBuf> {
    let local = PathBuf::from("default.profile");
    if local.exists() {
        return Ok(local);
    }
    named_profile(DEFAULT_PROFILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn parses_all_directives() {
        let dir = tempfile::tempdir().unwrap();
        let control = write_file(
            dir.path(),
            "control",
            "# a comment\n\
             target /backups/main\n\
             include /home/user # trailing comment\n\
             exclude *.bak\n\
             hash SHA-256\n",
        );
        let settings = Settings::load(&control).unwrap();
        assert_eq!(settings.target.as_deref(), Some(Path::new("/backups/main")));
        assert_eq!(settings.includes, vec![PathBuf::from("/home/user")]);
        assert_eq!(settings.excludes, vec!["*.bak".to_string()]);
        assert_eq!(settings.hash, Some(HashKind::Sha256));
    }

    #[test]
    fn escaped_spaces_stay_in_token() {
        let dir = tempfile::tempdir().unwrap();
        let control = write_file(dir.path(), "control", "include /home/My\\ Documents\n");
        let settings = Settings::load(&control).unwrap();
        assert_eq!(
            settings.includes,
            vec![PathBuf::from("/home/My Documents")]
        );
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let control = write_file(dir.path(), "control", "target backups\ninclude src\n");
        let settings = Settings::load(&control).unwrap();
        assert_eq!(settings.target, Some(dir.path().join("backups")));
        assert_eq!(settings.includes, vec![dir.path().join("src")]);
    }

    #[test]
    fn load_config_splices_relative_to_included_file() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        write_file(&sub, "extra", "include data\n");
        let control = write_file(dir.path(), "control", "target t\nload_config sub/extra\n");
        let settings = Settings::load(&control).unwrap();
        assert_eq!(settings.includes, vec![sub.join("data")]);
    }

    #[test]
    fn unknown_word_is_located_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let control = write_file(dir.path(), "control", "target /t\nfrobnicate\n");
        match Settings::load(&control) {
            Err(BackupError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_hash_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let control = write_file(dir.path(), "control", "hash whirlpool\n");
        assert!(matches!(
            Settings::load(&control),
            Err(BackupError::Config(_))
        ));
    }

    #[test]
    fn missing_argument_reports_directive() {
        let dir = tempfile::tempdir().unwrap();
        let control = write_file(dir.path(), "control", "include\n");
        assert!(matches!(
            Settings::load(&control),
            Err(BackupError::Parse { .. })
        ));
    }

    #[test]
    fn normalize_collapses_dots() {
        assert_eq!(
            normalize_path(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
        assert_eq!(normalize_path(Path::new("a/..")), PathBuf::from("."));
    }

    #[test]
    fn env_expansion() {
        std::env::set_var("LTTP_TEST_VAR", "value");
        assert_eq!(expand_vars("/x/$LTTP_TEST_VAR/y"), "/x/value/y");
        assert_eq!(expand_vars("/x/${LTTP_TEST_VAR}/y"), "/x/value/y");
        assert_eq!(expand_vars("/x/$LTTP_UNSET_VAR"), "/x/$LTTP_UNSET_VAR");
    }
}
