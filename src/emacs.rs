//! Evaluation of S-expressions in a dedicated Emacs daemon.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  spawn per call   ┌──────────────┐  socket  ┌────────────────────┐
//! │   Emacs      │ ────────────────► │ emacsclient  │ ───────► │ emacs --fg-daemon  │
//! │   (handle)   │ ◄──── stdout ──── │  --eval ...  │          │ (one per handle)   │
//! └──────────────┘ ──── stdin ─────► └──────────────┘          └────────────────────┘
//! ```
//!
//! The daemon is started once per handle and reused. Each evaluation is an
//! independent client process, so concurrent evaluations never see each
//! other's output. Nothing here serializes access to global state inside the
//! daemon: two evaluations that both `setq` the same variable race.
//!
//! # Protocol
//!
//! - Daemon: `emacs --fg-daemon=<socket> --init-directory=<tmp>`, ready once
//!   stderr shows [`DAEMON_READY_MARKER`]
//! - Client: `emacsclient --socket-name=<socket> --eval <expr>`
//! - Large payloads go over the client's stdin, see [`framing`]
//! - Client stderr is diagnostic only and never fails a call
//!
//! # Usage
//!
//! ```ignore
//! use orgmacs::emacs::{framing, Emacs};
//! use orgmacs::atom;
//!
//! let emacs = Emacs::from_env();
//! emacs.startup().await?;
//! let html = emacs
//!     .request()
//!     .require(&atom("ox-html")?, None)
//!     .progn([framing::org_export_program(&atom("org-html-export-as-html")?)])
//!     .minibuffer("* Hello")
//!     .run()
//!     .await?;
//! ```

mod daemon;
pub mod framing;
mod request;

pub use daemon::{Emacs, EmacsError, WorkerState, DAEMON_READY_MARKER};
pub use request::Request;
