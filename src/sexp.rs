//! S-expression values and their Emacs Lisp text form.
//!
//! `Sexp` is a closed sum type: every producer of Emacs Lisp text in this
//! crate goes through [`stringify`], which matches on it exhaustively. A new
//! variant cannot be added without teaching the serializer about it.
//!
//! # Example
//!
//! ```
//! use orgmacs::{atom, list, stringify};
//!
//! let form = list![atom("princ")?, "hello world"];
//! assert_eq!(stringify(&form)?, r#"(princ "hello world")"#);
//! # Ok::<(), orgmacs::SexpError>(())
//! ```

use std::fmt;

use thiserror::Error;

/// Characters that end or reinterpret a symbol in the Emacs Lisp reader.
const RESERVED_CHARS: &[char] = &['(', ')', '[', ']', '"', '\'', ';', '`', ',', '\\', '#'];

/// Errors raised while building or serializing S-expressions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SexpError {
    /// A symbol or keyword name would break the surrounding syntax.
    #[error("Invalid {kind} name {name:?}: {reason}")]
    InvalidName {
        kind: NameKind,
        name: String,
        reason: &'static str,
    },

    /// A value has no textual form in Emacs Lisp notation.
    #[error("Cannot serialize S-expression: {0}")]
    Serialization(String),
}

/// Which kind of name failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Atom,
    Keyword,
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameKind::Atom => f.write_str("atom"),
            NameKind::Keyword => f.write_str("keyword"),
        }
    }
}

/// An unquoted symbol, rendered verbatim.
///
/// Names are validated on construction. Caller-controlled text that reaches
/// [`Atom::new`] crosses a trust boundary: a symbol is evaluated by the daemon,
/// so only names the caller is willing to have called or dereferenced belong
/// here. Use a string value for data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Atom(String);

impl Atom {
    pub fn new(name: impl Into<String>) -> Result<Self, SexpError> {
        let name = name.into();
        validate_name(NameKind::Atom, &name)?;
        Ok(Self(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// A self-quoting keyword, rendered as `:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Keyword(String);

impl Keyword {
    /// Create a keyword from its name, without the leading colon.
    pub fn new(name: impl Into<String>) -> Result<Self, SexpError> {
        let name = name.into();
        validate_name(NameKind::Keyword, &name)?;
        Ok(Self(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Numeric literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(i64),
    Float(f64),
}

/// A cons cell. Fields are read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    car: Sexp,
    cdr: Sexp,
}

impl Cell {
    pub fn car(&self) -> &Sexp {
        &self.car
    }

    pub fn cdr(&self) -> &Sexp {
        &self.cdr
    }
}

/// A symbolic expression.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Sexp {
    /// The empty list, also false.
    #[default]
    Nil,
    Bool(bool),
    Number(Number),
    /// A string literal. The text is embedded without escaping.
    String(String),
    Atom(Atom),
    Keyword(Keyword),
    Quote(Box<Sexp>),
    Cell(Box<Cell>),
}

impl Sexp {
    pub fn is_nil(&self) -> bool {
        matches!(self, Sexp::Nil)
    }

    pub fn as_cell(&self) -> Option<&Cell> {
        match self {
            Sexp::Cell(cell) => Some(cell),
            _ => None,
        }
    }

    /// Whether this is `nil` or a chain of cells ending in `nil`.
    pub fn is_proper_list(&self) -> bool {
        let mut current = self;
        loop {
            match current {
                Sexp::Nil => return true,
                Sexp::Cell(cell) => current = &cell.cdr,
                _ => return false,
            }
        }
    }
}

// =============================================================================
// Constructors
// =============================================================================

/// Build a cons cell.
pub fn cons(car: impl Into<Sexp>, cdr: impl Into<Sexp>) -> Sexp {
    Sexp::Cell(Box::new(Cell {
        car: car.into(),
        cdr: cdr.into(),
    }))
}

/// Build a proper list; an empty input gives `nil`.
pub fn list<I>(items: I) -> Sexp
where
    I: IntoIterator,
    I::Item: Into<Sexp>,
    I::IntoIter: DoubleEndedIterator,
{
    items
        .into_iter()
        .rev()
        .fold(Sexp::Nil, |tail, item| cons(item, tail))
}

/// Build a list from heterogeneous items, each converted with `Sexp::from`.
///
/// ```
/// use orgmacs::{atom, list, stringify};
///
/// let form = list![atom("setq")?, atom("fill-column")?, 80];
/// assert_eq!(stringify(&form)?, "(setq fill-column 80)");
/// # Ok::<(), orgmacs::SexpError>(())
/// ```
#[macro_export]
macro_rules! list {
    () => {
        $crate::sexp::Sexp::Nil
    };
    ($($item:expr),+ $(,)?) => {
        $crate::sexp::list([$($crate::sexp::Sexp::from($item)),+])
    };
}

/// Build a validated atom.
pub fn atom(name: impl Into<String>) -> Result<Atom, SexpError> {
    Atom::new(name)
}

/// Build a validated keyword.
pub fn keyword(name: impl Into<String>) -> Result<Keyword, SexpError> {
    Keyword::new(name)
}

/// Quote an expression. Keywords evaluate to themselves and come back as is.
pub fn quote(sexp: impl Into<Sexp>) -> Sexp {
    match sexp.into() {
        keyword @ Sexp::Keyword(_) => keyword,
        other => Sexp::Quote(Box::new(other)),
    }
}

/// Atom for names fixed in this crate's source.
pub(crate) fn symbol(name: &'static str) -> Atom {
    debug_assert!(
        validate_name(NameKind::Atom, name).is_ok(),
        "invalid built-in symbol {name:?}"
    );
    Atom(name.to_string())
}

fn validate_name(kind: NameKind, name: &str) -> Result<(), SexpError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name == "." {
        Some("a lone dot is reserved for dotted pairs")
    } else if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        Some("name contains whitespace or control characters")
    } else if name.contains(RESERVED_CHARS) {
        Some("name contains a reserved character")
    } else if kind == NameKind::Keyword && name.starts_with(':') {
        Some("keyword names are given without the leading colon")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(SexpError::InvalidName {
            kind,
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<bool> for Sexp {
    fn from(value: bool) -> Self {
        Sexp::Bool(value)
    }
}

impl From<i64> for Sexp {
    fn from(value: i64) -> Self {
        Sexp::Number(Number::Integer(value))
    }
}

impl From<i32> for Sexp {
    fn from(value: i32) -> Self {
        Sexp::Number(Number::Integer(value.into()))
    }
}

impl From<u32> for Sexp {
    fn from(value: u32) -> Self {
        Sexp::Number(Number::Integer(value.into()))
    }
}

impl From<f64> for Sexp {
    fn from(value: f64) -> Self {
        Sexp::Number(Number::Float(value))
    }
}

impl From<&str> for Sexp {
    fn from(value: &str) -> Self {
        Sexp::String(value.to_string())
    }
}

impl From<String> for Sexp {
    fn from(value: String) -> Self {
        Sexp::String(value)
    }
}

impl From<Atom> for Sexp {
    fn from(value: Atom) -> Self {
        Sexp::Atom(value)
    }
}

impl From<&Atom> for Sexp {
    fn from(value: &Atom) -> Self {
        Sexp::Atom(value.clone())
    }
}

impl From<Keyword> for Sexp {
    fn from(value: Keyword) -> Self {
        Sexp::Keyword(value)
    }
}

impl<T: Into<Sexp>> From<Option<T>> for Sexp {
    fn from(value: Option<T>) -> Self {
        value.map_or(Sexp::Nil, Into::into)
    }
}

impl<T: Into<Sexp>> From<Vec<T>> for Sexp {
    fn from(value: Vec<T>) -> Self {
        list(value)
    }
}

/// JSON arrays become lists and objects become association lists of
/// `("key" . value)` pairs.
impl From<&serde_json::Value> for Sexp {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Sexp::Nil,
            Value::Bool(b) => Sexp::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Sexp::Number(Number::Integer(i)),
                None => Sexp::Number(Number::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            Value::String(s) => Sexp::String(s.clone()),
            Value::Array(items) => list(items.iter().map(Sexp::from)),
            Value::Object(map) => list(
                map.iter()
                    .map(|(key, val)| cons(key.as_str(), Sexp::from(val))),
            ),
        }
    }
}

// =============================================================================
// Serializer
// =============================================================================

/// Render an expression in Emacs Lisp notation.
///
/// # Errors
///
/// Returns `SexpError::Serialization` for non-finite floats, which have no
/// decimal form.
pub fn stringify(sexp: &Sexp) -> Result<String, SexpError> {
    let mut out = String::new();
    write_sexp(&mut out, sexp)?;
    Ok(out)
}

fn write_sexp(out: &mut String, sexp: &Sexp) -> Result<(), SexpError> {
    match sexp {
        Sexp::Cell(cell) => {
            out.push('(');
            write_list(out, cell)?;
            out.push(')');
        }
        Sexp::Nil => out.push_str("nil"),
        Sexp::String(text) => {
            out.push('"');
            out.push_str(text);
            out.push('"');
        }
        Sexp::Number(number) => write_number(out, *number)?,
        Sexp::Bool(true) => out.push('t'),
        Sexp::Bool(false) => out.push_str("nil"),
        Sexp::Atom(atom) => out.push_str(atom.name()),
        Sexp::Keyword(keyword) => {
            out.push(':');
            out.push_str(keyword.name());
        }
        Sexp::Quote(inner) => {
            out.push('\'');
            write_sexp(out, inner)?;
        }
    }
    Ok(())
}

/// Write the elements of a list without the outer parentheses.
fn write_list(out: &mut String, head: &Cell) -> Result<(), SexpError> {
    let mut cell = head;
    loop {
        // A cell in car position is parenthesized by write_sexp.
        write_sexp(out, &cell.car)?;

        match &cell.cdr {
            Sexp::Cell(next) => {
                out.push(' ');
                cell = next;
            }
            Sexp::Nil => return Ok(()),
            tail => {
                out.push_str(" . ");
                return write_sexp(out, tail);
            }
        }
    }
}

fn write_number(out: &mut String, number: Number) -> Result<(), SexpError> {
    match number {
        Number::Integer(i) => out.push_str(&i.to_string()),
        Number::Float(f) if f.is_finite() => write_float(out, f),
        Number::Float(f) => {
            return Err(SexpError::Serialization(format!(
                "{} has no decimal form",
                f
            )))
        }
    }
    Ok(())
}

/// Plain decimal in the common range, exponent form outside it.
///
/// `1e21` written out in full would read back as an integer.
fn write_float(out: &mut String, f: f64) {
    let magnitude = f.abs();
    if magnitude != 0.0 && !(1e-6..1e21).contains(&magnitude) {
        let text = format!("{:e}", f);
        match text.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                out.push_str(mantissa);
                out.push_str("e+");
                out.push_str(exponent);
            }
            _ => out.push_str(&text),
        }
    } else {
        out.push_str(&f.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn render(sexp: &Sexp) -> String {
        stringify(sexp).expect("serializable")
    }

    #[test]
    fn test_list_matches_nested_cons() {
        let a = list(["a", "b", "c"]);
        let b = cons("a", cons("b", cons("c", Sexp::Nil)));
        assert_eq!(a, b);

        let mixed = list![atom("x").unwrap(), 1, true];
        let expected = cons(
            atom("x").unwrap(),
            cons(1, cons(true, Sexp::Nil)),
        );
        assert_eq!(mixed, expected);
    }

    #[test]
    fn test_empty_list_is_nil() {
        assert_eq!(list(Vec::<Sexp>::new()), Sexp::Nil);
        assert_eq!(list![], Sexp::Nil);
    }

    #[test]
    fn test_stringify_atoms_of_truth() {
        assert_eq!(render(&Sexp::Nil), "nil");
        assert_eq!(render(&Sexp::from(true)), "t");
        assert_eq!(render(&Sexp::from(false)), "nil");
    }

    #[test]
    fn test_stringify_dotted_pair() {
        assert_eq!(render(&cons("a", "b")), r#"("a" . "b")"#);
    }

    #[test]
    fn test_stringify_proper_list() {
        assert_eq!(render(&list(["a", "b", "c"])), r#"("a" "b" "c")"#);
    }

    #[test]
    fn test_stringify_improper_tail() {
        assert_eq!(render(&cons("a", cons("b", "c"))), r#"("a" "b" . "c")"#);
    }

    #[test]
    fn test_stringify_nested_lists() {
        let sexp = list![
            "a",
            list(["b", "c", "d"]),
            "e"
        ];
        assert_eq!(render(&sexp), r#"("a" ("b" "c" "d") "e")"#);
    }

    #[test]
    fn test_stringify_nested_list_in_first_position() {
        let bindings = list![list![atom("x").unwrap(), 1], list![atom("y").unwrap(), 2]];
        assert_eq!(render(&bindings), "((x 1) (y 2))");
    }

    #[test]
    fn test_stringify_atom_and_keyword() {
        assert_eq!(render(&atom("a").unwrap().into()), "a");
        assert_eq!(render(&keyword("a").unwrap().into()), ":a");
    }

    #[test]
    fn test_quote() {
        assert_eq!(render(&quote(atom("a").unwrap())), "'a");
        assert_eq!(
            render(&quote(list(["a", "b", "c"]))),
            r#"'("a" "b" "c")"#
        );
        assert_eq!(render(&quote(quote(atom("a").unwrap()))), "''a");
    }

    #[test]
    fn test_quoted_keyword_is_keyword() {
        let k = Sexp::from(keyword("a").unwrap());
        assert_eq!(quote(k.clone()), k);
        assert_eq!(render(&quote(k)), ":a");
    }

    #[test]
    fn test_stringify_numbers() {
        assert_eq!(render(&Sexp::from(42)), "42");
        assert_eq!(render(&Sexp::from(-7i64)), "-7");
        assert_eq!(render(&Sexp::from(0.5)), "0.5");
        assert_eq!(render(&Sexp::from(2.0)), "2");
    }

    #[test]
    fn test_stringify_float_magnitudes() {
        assert_eq!(render(&Sexp::from(1e21)), "1e+21");
        assert_eq!(render(&Sexp::from(-1.5e22)), "-1.5e+22");
        assert_eq!(render(&Sexp::from(1e20)), "100000000000000000000");
        assert_eq!(render(&Sexp::from(0.000001)), "0.000001");
        assert_eq!(render(&Sexp::from(1e-7)), "1e-7");
        assert_eq!(render(&Sexp::from(0.0)), "0");
    }

    #[test]
    fn test_non_finite_float_fails() {
        let err = stringify(&list![1, f64::NAN]).unwrap_err();
        assert!(matches!(err, SexpError::Serialization(_)));
        assert!(stringify(&Sexp::from(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_strings_are_embedded_verbatim() {
        assert_eq!(render(&Sexp::from("a\\nb")), r#""a\nb""#);
    }

    #[test]
    fn test_stringify_does_not_mutate() {
        let sexp = list!["a", cons("b", "c")];
        let before = sexp.clone();
        let _ = render(&sexp);
        assert_eq!(sexp, before);
    }

    #[test]
    fn test_proper_string_lists_are_balanced() {
        for len in 0..50 {
            let items: Vec<String> = (0..len).map(|i| format!("item{}", i)).collect();
            let text = render(&list(items.clone()));
            if len == 0 {
                assert_eq!(text, "nil");
                continue;
            }
            assert!(text.starts_with('(') && text.ends_with(')'));
            let inner = &text[1..text.len() - 1];
            let parts: Vec<&str> = inner.split(' ').collect();
            assert_eq!(parts.len(), len);
            for (part, item) in parts.iter().zip(&items) {
                assert_eq!(*part, format!("\"{}\"", item));
            }
        }
    }

    #[test]
    fn test_long_list_renders_iteratively() {
        let sexp = list((0..1000).map(Sexp::from).collect::<Vec<_>>());
        let text = render(&sexp);
        assert!(text.starts_with("(0 1 2"));
        assert!(text.ends_with("998 999)"));
        assert!(sexp.is_proper_list());
        assert!(!cons(1, 2).is_proper_list());
    }

    #[test]
    fn test_name_validation() {
        assert!(atom("org-svelte-export-as-svelte").is_ok());
        assert!(atom("1+").is_ok());
        assert!(atom("").is_err());
        assert!(atom(".").is_err());
        assert!(atom("two words").is_err());
        assert!(atom("(evil)").is_err());
        assert!(atom("a\"b").is_err());
        assert!(atom("x;comment").is_err());
        assert!(keyword(":double").is_err());

        let err = keyword("bad name").unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"Invalid keyword name "bad name": name contains whitespace or control characters"#
        );
    }

    #[test]
    fn test_option_and_vec_conversions() {
        assert_eq!(Sexp::from(None::<i64>), Sexp::Nil);
        assert_eq!(Sexp::from(Some("x")), Sexp::from("x"));
        assert_eq!(Sexp::from(vec![1, 2]), list![1, 2]);
    }

    #[test]
    fn test_json_conversion() {
        let value = serde_json::json!({
            "Button": "$lib/Button.svelte",
            "flags": [true, null, 3, 1.5]
        });
        let sexp = Sexp::from(&value);
        assert_eq!(
            render(&sexp),
            r#"(("Button" . "$lib/Button.svelte") ("flags" t nil 3 1.5))"#
        );
    }
}
