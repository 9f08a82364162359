//! `nom` plumbing for the parts of an ELF image that are parsed before the
//! container's byte order is known (the identification bytes).

use std::fmt;

/// Implements `parse` for a fieldless enum that derives `TryFromPrimitive`.
///
/// `$number_parser` names one of the parsers in `nom::number::complete`
/// (`le_u8`, `be_u16`, ...). A number with no matching variant is reported
/// as a `nom::Err::Failure` naming the enum and the offending value.
#[macro_export]
macro_rules! impl_parse_for_enum {
    ($type: ident, $number_parser: ident) => {
        impl $type {
            doc_comment::doc_comment! {
                concat!(
                    "Parse a [`",
                    stringify!($type),
                    "`] using [`nom::number::complete::",
                    stringify!($number_parser),
                    "`].",
                ),
                pub fn parse(full_input: $crate::parse::Input) -> $crate::parse::Result<Self> {
                    use nom::number::complete::$number_parser;

                    let (i, val) = $number_parser(full_input)?;
                    match Self::try_from(val) {
                        Ok(val) => Ok((i, val)),
                        Err(_) => Err(nom::Err::Failure($crate::parse::Error::from_string(
                            full_input,
                            format!("Unknown {} {} (0x{:x})", stringify!($type), val, val),
                        ))),
                    }
                }
            }
        }
    };
}

/// The type of parsing error.
#[derive(Debug, Clone)]
pub enum ErrorKind {
    Nom(nom::error::ErrorKind),
    Context(&'static str),
    String(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nom(n) => fmt::Display::fmt(n.description(), f),
            Self::Context(c) => fmt::Display::fmt(c, f),
            Self::String(s) => fmt::Display::fmt(s, f),
        }
    }
}

/// A stack of parsing errors, innermost first.
pub struct Error<I> {
    pub errors: Vec<(I, ErrorKind)>,
}

impl<I> Error<I> {
    pub fn from_string<S: Into<String>>(input: I, s: S) -> Self {
        let errors = vec![(input, ErrorKind::String(s.into()))];
        Self { errors }
    }
}

impl<I> nom::error::ParseError<I> for Error<I> {
    fn from_error_kind(input: I, kind: nom::error::ErrorKind) -> Self {
        let errors = vec![(input, ErrorKind::Nom(kind))];
        Self { errors }
    }

    fn append(input: I, kind: nom::error::ErrorKind, mut other: Self) -> Self {
        other.errors.push((input, ErrorKind::Nom(kind)));
        other
    }

    fn add_context(input: I, ctx: &'static str, mut other: Self) -> Self {
        other.errors.push((input, ErrorKind::Context(ctx)));
        other
    }
}

/// Parsers consume byte slices.
pub type Input<'a> = &'a [u8];

/// Result type shared by every parser in this crate.
pub type Result<'a, O> = nom::IResult<Input<'a>, O, Error<Input<'a>>>;

/// Wraps byte buffers so they can be formatted with [`std::fmt::Debug`].
pub struct HexDump<'a>(pub &'a [u8]);

impl<'a> fmt::Debug for HexDump<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &x in self.0.iter().take(20) {
            write!(f, "{:02x} ", x)?;
        }

        Ok(())
    }
}

/// A flattened, owned rendering of a `nom` failure, with the byte offset of
/// every frame in the error stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileParseError(String);

impl FileParseError {
    pub(crate) fn new(original_input: Input, nom_err: Error<Input>) -> Self {
        use nom::Offset;

        let mut out = vec!["Parsing failed:".to_string()];

        for (input, err) in nom_err.errors {
            let offset = original_input.offset(input);

            out.push(format!(
                "\t{0} at position {1}:\n\t\t{1:>08x}: {2:?}",
                err,
                offset,
                HexDump(input)
            ));
        }

        Self(out.join("\n"))
    }

    /// A parse failure that is not tied to a `nom` error stack, such as a
    /// header field pointing outside of the image.
    pub(crate) fn message<S: Into<String>>(s: S) -> Self {
        Self(s.into())
    }

    /// Converts the outcome of a top-level parser into an owned error.
    pub(crate) fn from_nom(original_input: Input, err: nom::Err<Error<Input>>) -> Self {
        match err {
            nom::Err::Error(e) | nom::Err::Failure(e) => Self::new(original_input, e),
            nom::Err::Incomplete(_) => Self::message("Parsing failed: unexpected end of input"),
        }
    }
}

impl fmt::Display for FileParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for FileParseError {}
