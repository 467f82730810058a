//! Org setup forms run before exports.
//!
//! Exports that follow `id:` links need Org to know where every ID lives, and
//! exporters often need a site file loaded first. [`Initialization`] collects
//! both and runs them once against a started daemon.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::emacs::{Emacs, EmacsError};
use crate::list;
use crate::sexp::{quote, symbol, Sexp};

/// `(progn (require 'org) (require 'org-id) (org-id-update-id-locations '(files...)))`
pub fn update_id_locations<P: AsRef<Path>>(files: &[P]) -> Sexp {
    let files: Vec<Sexp> = files
        .iter()
        .map(|file| Sexp::from(file.as_ref().to_string_lossy().into_owned()))
        .collect();

    list![
        symbol("progn"),
        list![symbol("require"), quote(symbol("org"))],
        list![symbol("require"), quote(symbol("org-id"))],
        list![symbol("org-id-update-id-locations"), quote(files)]
    ]
}

/// `(load "path" nil t)`: load an Emacs Lisp file quietly, failing if it is
/// missing.
pub fn load_file(path: &Path) -> Sexp {
    list![
        symbol("load"),
        path.to_string_lossy().into_owned(),
        Sexp::Nil,
        true
    ]
}

/// Expand glob patterns into absolute paths of existing files.
///
/// Matches are deduplicated, keeping the first occurrence. Patterns that
/// match nothing are not an error.
///
/// # Errors
///
/// Returns an error for a malformed pattern, an unreadable match or when the
/// working directory is needed and unavailable.
pub fn expand_id_locations<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for pattern in patterns {
        let pattern = pattern.as_ref();
        let paths = glob::glob(pattern)
            .with_context(|| format!("Invalid ID location pattern {}", pattern))?;

        for entry in paths {
            let path = entry.with_context(|| format!("Failed to expand {}", pattern))?;
            if !path.is_file() {
                continue;
            }
            let path = absolute(&path)?;
            if seen.insert(path.clone()) {
                files.push(path);
            }
        }
    }

    debug!("ID location patterns matched {} files", files.len());
    Ok(files)
}

/// Resolve `path` against the current directory when it is relative.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(path))
}

/// One-time setup for a daemon: extra forms, then an ID location update.
///
/// ```ignore
/// let files = org::expand_id_locations(&["notes/**/*.org"])?;
/// Initialization::new()
///     .forms([org::load_file(Path::new("/etc/orgmacs/site.el"))])
///     .id_locations(files)
///     .run(&emacs)
///     .await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Initialization {
    forms: Vec<Sexp>,
    id_locations: Vec<PathBuf>,
}

impl Initialization {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forms evaluated together in one `progn`, before the ID update.
    pub fn forms<I>(mut self, forms: I) -> Self
    where
        I: IntoIterator<Item = Sexp>,
    {
        self.forms.extend(forms);
        self
    }

    /// Org files whose IDs should be registered.
    pub fn id_locations<I>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.id_locations.extend(files);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.forms.is_empty() && self.id_locations.is_empty()
    }

    /// Run the setup. Each non-empty part is one `emacsclient` call; empty
    /// parts are skipped and their output is discarded.
    ///
    /// # Errors
    ///
    /// Fails like [`Emacs::evaluate`], including `EmacsError::NotStarted`
    /// when there is work to do and the daemon is not running.
    pub async fn run(&self, emacs: &Emacs) -> Result<(), EmacsError> {
        if !self.forms.is_empty() {
            info!("Running {} initialization forms", self.forms.len());
            emacs
                .request()
                .progn(self.forms.iter().cloned())
                .run()
                .await?;
        }

        if !self.id_locations.is_empty() {
            info!(
                "Updating Org ID locations from {} files",
                self.id_locations.len()
            );
            emacs
                .evaluate(&update_id_locations(&self.id_locations), None)
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmacsConfig;
    use crate::sexp::{atom, stringify};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_update_id_locations_form() {
        let files = [PathBuf::from("/notes/a.org"), PathBuf::from("/notes/b c.org")];
        assert_eq!(
            stringify(&update_id_locations(&files)).unwrap(),
            concat!(
                "(progn (require 'org) (require 'org-id) ",
                r#"(org-id-update-id-locations '("/notes/a.org" "/notes/b c.org")))"#
            )
        );
    }

    #[test]
    fn test_load_file_form() {
        assert_eq!(
            stringify(&load_file(Path::new("/etc/orgmacs/site.el"))).unwrap(),
            r#"(load "/etc/orgmacs/site.el" nil t)"#
        );
    }

    #[test]
    fn test_expand_id_locations() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(dir.path().join("a.org"), "* A").unwrap();
        std::fs::write(nested.join("b.org"), "* B").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();

        let all = format!("{}/**/*.org", dir.path().display());
        let top = format!("{}/a.org", dir.path().display());
        let files = expand_id_locations(&[all, top]).unwrap();

        assert_eq!(
            files,
            vec![dir.path().join("a.org"), nested.join("b.org")]
        );
        assert!(files.iter().all(|file| file.is_absolute()));
    }

    #[test]
    fn test_expand_id_locations_no_matches() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/*.org", dir.path().display());
        assert!(expand_id_locations(&[pattern]).unwrap().is_empty());
    }

    #[test]
    fn test_expand_id_locations_invalid_pattern() {
        let err = expand_id_locations(&["notes/[.org"]).unwrap_err();
        assert!(err.to_string().contains("Invalid ID location pattern"));
    }

    #[test]
    fn test_absolute_keeps_absolute_paths() {
        let path = Path::new("/already/absolute.el");
        assert_eq!(absolute(path).unwrap(), path);
        assert!(absolute(Path::new("site.el")).unwrap().is_absolute());
    }

    #[tokio::test]
    async fn test_empty_initialization_needs_no_daemon() {
        let emacs = Emacs::new(EmacsConfig::default());
        let init = Initialization::new();

        assert!(init.is_empty());
        init.run(&emacs).await.unwrap();
    }

    #[tokio::test]
    async fn test_initialization_requires_started_daemon() {
        let emacs = Emacs::new(EmacsConfig::default());
        let init = Initialization::new().forms([list![atom("ignore").unwrap()]]);

        assert!(!init.is_empty());
        assert!(matches!(init.run(&emacs).await, Err(EmacsError::NotStarted)));
    }
}
