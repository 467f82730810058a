//! Fluent builder for a single evaluation.

use std::iter;

use super::daemon::{Emacs, EmacsError};
use crate::sexp::{list, quote, symbol, Atom, Sexp};

/// Forms and stdin payload collected for one `emacsclient` call.
///
/// All forms run inside a single `progn`, in the order they were added.
///
/// ```ignore
/// let svelte = emacs
///     .request()
///     .require(&atom("ox-svelte")?, Some("/path/to/ox-svelte.el"))
///     .progn([org_export_program(&atom("org-svelte-export-as-svelte")?)])
///     .minibuffer(document)
///     .run()
///     .await?;
/// ```
pub struct Request<'a> {
    emacs: &'a Emacs,
    forms: Vec<Sexp>,
    input: Option<String>,
}

impl<'a> Request<'a> {
    pub(crate) fn new(emacs: &'a Emacs) -> Self {
        Self {
            emacs,
            forms: Vec::new(),
            input: None,
        }
    }

    /// Add `(require 'feature)`, or `(require 'feature "path")` to load it
    /// from a specific file.
    pub fn require(mut self, feature: &Atom, path: Option<&str>) -> Self {
        let mut form = vec![Sexp::from(symbol("require")), quote(feature)];
        if let Some(path) = path {
            form.push(Sexp::from(path));
        }
        self.forms.push(list(form));
        self
    }

    /// Append forms to the body.
    pub fn progn<I>(mut self, forms: I) -> Self
    where
        I: IntoIterator<Item = Sexp>,
    {
        self.forms.extend(forms);
        self
    }

    /// Text streamed to the client's stdin, read back with `read-string`.
    pub fn minibuffer(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn forms(&self) -> &[Sexp] {
        &self.forms
    }

    /// The `(progn ...)` expression `run` will evaluate.
    pub fn to_sexp(&self) -> Sexp {
        list(iter::once(Sexp::from(symbol("progn"))).chain(self.forms.iter().cloned()))
    }

    /// Evaluate the request and return the client's stdout.
    pub async fn run(self) -> Result<String, EmacsError> {
        self.emacs
            .evaluate(&self.to_sexp(), self.input.as_deref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmacsConfig;
    use crate::list;
    use crate::sexp::{atom, stringify};
    use pretty_assertions::assert_eq;

    fn handle() -> Emacs {
        Emacs::new(EmacsConfig {
            client_program: "/nonexistent/emacsclient".to_string(),
            ..EmacsConfig::default()
        })
    }

    #[test]
    fn test_empty_request_is_bare_progn() {
        let emacs = handle();
        let request = emacs.request();
        assert!(request.forms().is_empty());
        assert_eq!(stringify(&request.to_sexp()).unwrap(), "(progn)");
    }

    #[test]
    fn test_require_and_progn_order() {
        let emacs = handle();
        let request = emacs
            .request()
            .require(&atom("org").unwrap(), None)
            .require(&atom("ox-svelte").unwrap(), Some("/opt/ox-svelte.el"))
            .progn([list![atom("org-id-update-id-locations").unwrap()]])
            .progn([
                list![atom("setq").unwrap(), atom("x").unwrap(), 1],
                list![atom("princ").unwrap(), atom("x").unwrap()],
            ]);

        assert_eq!(request.forms().len(), 5);
        assert_eq!(
            stringify(&request.to_sexp()).unwrap(),
            concat!(
                "(progn (require 'org) ",
                r#"(require 'ox-svelte "/opt/ox-svelte.el") "#,
                "(org-id-update-id-locations) (setq x 1) (princ x))"
            )
        );
    }

    #[tokio::test]
    async fn test_run_requires_started_daemon() {
        let emacs = handle();
        let result = emacs
            .request()
            .progn([list![atom("princ").unwrap(), "hi"]])
            .minibuffer("ignored")
            .run()
            .await;
        assert!(matches!(result, Err(EmacsError::NotStarted)));
    }
}
