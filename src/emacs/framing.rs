//! Line framing for payloads streamed to `emacsclient` over stdin.
//!
//! Command-line arguments are size-limited and the payload would otherwise
//! have to survive the Lisp reader, so documents travel on the client's stdin
//! instead. The daemon side is an Emacs Lisp read loop generated here:
//!
//! ```text
//! (let ((orgmacs--chunks nil) (orgmacs--line nil))
//!   (while (setq orgmacs--line (ignore-errors (read-string "")))
//!     (push "\n" orgmacs--chunks)
//!     (push orgmacs--line orgmacs--chunks))
//!   (let ((<content> (apply 'concat (nreverse orgmacs--chunks))))
//!     <body>...))
//! ```
//!
//! `read-string` signals at end of input; `ignore-errors` turns that into
//! `nil`, which ends the loop. Lines are pushed onto a list and joined once,
//! so reassembly is linear in the payload size.

use anyhow::{Context, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::list;
use crate::sexp::{quote, symbol, Atom, Sexp};

/// Token placed before every line read back, written as the two characters
/// `\` and `n`. The Lisp reader decodes it inside the string literal.
pub const STDIN_JOINER: &str = "\\n";

const CHUNKS_VAR: &str = "orgmacs--chunks";
const LINE_VAR: &str = "orgmacs--line";
const CONTENT_VAR: &str = "orgmacs--content";

/// Build the read loop that binds the streamed payload to `content` and then
/// evaluates `body` in that scope.
pub fn read_stdin_program<I>(content: &Atom, body: I) -> Sexp
where
    I: IntoIterator<Item = Sexp>,
{
    let chunks = symbol(CHUNKS_VAR);
    let line = symbol(LINE_VAR);

    let read_loop = list![
        symbol("while"),
        list![
            symbol("setq"),
            &line,
            list![symbol("ignore-errors"), list![symbol("read-string"), ""]]
        ],
        list![symbol("push"), STDIN_JOINER, &chunks],
        list![symbol("push"), &line, &chunks]
    ];

    let joined = list![
        symbol("apply"),
        quote(symbol("concat")),
        list![symbol("nreverse"), &chunks]
    ];

    let mut delivery = vec![
        Sexp::from(symbol("let")),
        list![list![content, joined]],
    ];
    delivery.extend(body);

    list![
        symbol("let"),
        list![list![&chunks, Sexp::Nil], list![&line, Sexp::Nil]],
        read_loop,
        Sexp::from(delivery)
    ]
}

/// Read an Org document from stdin, run `exporter` in an Org buffer holding
/// it, and print the buffer that results.
pub fn org_export_program(exporter: &Atom) -> Sexp {
    let content = symbol(CONTENT_VAR);
    let body = list![
        symbol("with-temp-buffer"),
        list![symbol("org-mode")],
        list![symbol("insert"), &content],
        list![exporter],
        list![symbol("princ"), list![symbol("buffer-string")]]
    ];
    read_stdin_program(&content, [body])
}

/// Stream `payload` to the reader and signal end of input.
///
/// A trailing newline is added when missing so the final line is read as a
/// whole line. An empty payload sends nothing.
///
/// # Errors
///
/// Returns an error if the write, flush or shutdown fails, typically because
/// the client closed its stdin early.
pub async fn write_payload<W>(writer: &mut W, payload: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if !payload.is_empty() {
        writer
            .write_all(payload.as_bytes())
            .await
            .context("Failed to write payload")?;

        if !payload.ends_with('\n') {
            writer
                .write_all(b"\n")
                .await
                .context("Failed to terminate payload")?;
        }
    }

    writer.flush().await.context("Failed to flush payload")?;
    writer
        .shutdown()
        .await
        .context("Failed to close payload stream")?;

    Ok(())
}
