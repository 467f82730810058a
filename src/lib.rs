//! orgmacs library
//!
//! Build Emacs Lisp expressions in Rust and evaluate them in a dedicated
//! Emacs daemon:
//!
//! - `sexp` - S-expression values and their textual form
//! - `emacs` - daemon lifecycle, per-call `emacsclient` evaluation and stdin
//!   framing for large payloads
//! - `config` - program names, socket prefix and init directory root
//! - `org` - setup run before exports (init forms, Org ID locations)
//!
//! # Example
//!
//! ```ignore
//! use orgmacs::{atom, list, Emacs};
//!
//! let emacs = Emacs::from_env();
//! emacs.startup().await?;
//! let version = emacs
//!     .evaluate(&list![atom("princ")?, atom("emacs-version")?], None)
//!     .await?;
//! ```

pub mod config;
pub mod emacs;
pub mod org;
pub mod sexp;

pub use config::EmacsConfig;
pub use emacs::{Emacs, EmacsError, Request, WorkerState};
pub use sexp::{
    atom, cons, keyword, list, quote, stringify, Atom, Cell, Keyword, Number, Sexp, SexpError,
};
