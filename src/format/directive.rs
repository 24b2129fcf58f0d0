//! printf format-string tokenizer.

use crate::error::FormatError;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Flags {
    pub left: bool,
    pub plus: bool,
    pub space: bool,
    pub alt: bool,
    pub zero: bool,
}

/// Width or precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Count {
    Fixed(usize),
    /// `*`: taken from the next argument.
    FromArg,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Length {
    #[default]
    Int,
    Char,
    Short,
    Long,
    LongLong,
    Size,
    Max,
    PtrDiff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Directive {
    pub flags: Flags,
    pub width: Option<Count>,
    pub precision: Option<Count>,
    pub length: Length,
    pub conversion: char,
}

impl Directive {
    /// `%s` and `%p` carry pointers the registry has to vet.
    pub fn takes_pointer(&self) -> bool {
        matches!(self.conversion, 's' | 'p')
    }

    /// A `%` conversion with flags or a width (`%5%`) prints a percent sign
    /// and reads nothing beyond its `*` counts.
    pub fn takes_value(&self) -> bool {
        self.conversion != '%'
    }
}

/// Largest width or precision C can represent; anything past it is an
/// overflow, as for glibc's `EOVERFLOW`.
pub(crate) const MAX_COUNT: usize = i32::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Piece<'f> {
    Literal(&'f str),
    /// `%%`
    Percent,
    Directive(Directive),
}

/// Splits a format string into literal runs and conversions.
#[derive(Debug, Clone)]
pub(crate) struct Pieces<'f> {
    rest: &'f str,
}

impl<'f> Pieces<'f> {
    pub fn new(format: &'f str) -> Self {
        Self { rest: format }
    }
}

impl<'f> Iterator for Pieces<'f> {
    type Item = Result<Piece<'f>, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        match self.rest.find('%') {
            Some(0) => {}
            Some(at) => {
                let (literal, rest) = self.rest.split_at(at);
                self.rest = rest;
                return Some(Ok(Piece::Literal(literal)));
            }
            None => {
                let literal = self.rest;
                self.rest = "";
                return Some(Ok(Piece::Literal(literal)));
            }
        }

        let body = &self.rest[1..];
        if let Some(rest) = body.strip_prefix('%') {
            self.rest = rest;
            return Some(Ok(Piece::Percent));
        }
        match parse(body) {
            Ok((directive, used)) => {
                self.rest = &body[used..];
                Some(Ok(Piece::Directive(directive)))
            }
            Err(err) => {
                self.rest = "";
                Some(Err(err))
            }
        }
    }
}

/// Parse one conversion following a `%`. Returns the directive and the
/// number of bytes it spans.
fn parse(body: &str) -> Result<(Directive, usize), FormatError> {
    let bytes = body.as_bytes();
    let mut at = 0;

    let mut flags = Flags::default();
    while let Some(&b) = bytes.get(at) {
        match b {
            b'-' => flags.left = true,
            b'+' => flags.plus = true,
            b' ' => flags.space = true,
            b'#' => flags.alt = true,
            b'0' => flags.zero = true,
            _ => break,
        }
        at += 1;
    }

    let width = count(bytes, &mut at)?;
    let precision = if bytes.get(at) == Some(&b'.') {
        at += 1;
        Some(count(bytes, &mut at)?.unwrap_or(Count::Fixed(0)))
    } else {
        None
    };

    let length = match (bytes.get(at), bytes.get(at + 1)) {
        (Some(b'h'), Some(b'h')) => (Length::Char, 2),
        (Some(b'h'), _) => (Length::Short, 1),
        (Some(b'l'), Some(b'l')) => (Length::LongLong, 2),
        (Some(b'l'), _) => (Length::Long, 1),
        (Some(b'z'), _) => (Length::Size, 1),
        (Some(b'j'), _) => (Length::Max, 1),
        (Some(b't'), _) => (Length::PtrDiff, 1),
        _ => (Length::Int, 0),
    };
    at += length.1;

    let conversion = body[at..].chars().next().ok_or(FormatError::Incomplete)?;
    Ok((
        Directive {
            flags,
            width,
            precision,
            length: length.0,
            conversion,
        },
        at + conversion.len_utf8(),
    ))
}

fn count(bytes: &[u8], at: &mut usize) -> Result<Option<Count>, FormatError> {
    if bytes.get(*at) == Some(&b'*') {
        *at += 1;
        return Ok(Some(Count::FromArg));
    }
    let start = *at;
    let mut value = 0usize;
    while let Some(digit) = bytes.get(*at).filter(|b| b.is_ascii_digit()) {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(usize::from(digit - b'0')))
            .filter(|&v| v <= MAX_COUNT)
            .ok_or(FormatError::Overflow)?;
        *at += 1;
    }
    Ok((*at > start).then_some(Count::Fixed(value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directives(format: &str) -> Vec<Directive> {
        Pieces::new(format)
            .filter_map(|piece| match piece.unwrap() {
                Piece::Directive(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn splits_literals_and_conversions() {
        let pieces: Vec<_> = Pieces::new("a%db%%c").map(Result::unwrap).collect();
        assert_eq!(pieces.len(), 5);
        assert_eq!(pieces[0], Piece::Literal("a"));
        assert!(matches!(pieces[1], Piece::Directive(d) if d.conversion == 'd'));
        assert_eq!(pieces[2], Piece::Literal("b"));
        assert_eq!(pieces[3], Piece::Percent);
        assert_eq!(pieces[4], Piece::Literal("c"));
    }

    #[test]
    fn parses_flags_width_precision_and_length() {
        let d = directives("%-+ #012.5llx")[0];
        assert_eq!(
            d.flags,
            Flags {
                left: true,
                plus: true,
                space: true,
                alt: true,
                zero: true,
            }
        );
        assert_eq!(d.width, Some(Count::Fixed(12)));
        assert_eq!(d.precision, Some(Count::Fixed(5)));
        assert_eq!(d.length, Length::LongLong);
        assert_eq!(d.conversion, 'x');
    }

    #[test]
    fn star_counts_and_bare_precision() {
        let d = directives("%*.*s")[0];
        assert_eq!(d.width, Some(Count::FromArg));
        assert_eq!(d.precision, Some(Count::FromArg));

        let d = directives("%.f")[0];
        assert_eq!(d.precision, Some(Count::Fixed(0)));
    }

    #[test]
    fn length_modifiers() {
        let lengths: Vec<_> = directives("%hhd%hd%ld%zu%jd%td%d")
            .iter()
            .map(|d| d.length)
            .collect();
        assert_eq!(
            lengths,
            [
                Length::Char,
                Length::Short,
                Length::Long,
                Length::Size,
                Length::Max,
                Length::PtrDiff,
                Length::Int,
            ]
        );
    }

    #[test]
    fn dangling_percent_is_incomplete() {
        let last = Pieces::new("abc%-5").last().unwrap();
        assert_eq!(last, Err(FormatError::Incomplete));
    }

    #[test]
    fn counts_past_int_max_overflow() {
        let last = Pieces::new("%.99999999999999999999d").last().unwrap();
        assert_eq!(last, Err(FormatError::Overflow));
        let last = Pieces::new("%2147483648d").last().unwrap();
        assert_eq!(last, Err(FormatError::Overflow));

        let d = directives("%2147483647d")[0];
        assert_eq!(d.width, Some(Count::Fixed(MAX_COUNT)));
    }

    #[test]
    fn percent_with_width_is_a_directive() {
        let d = directives("%5%")[0];
        assert_eq!(d.width, Some(Count::Fixed(5)));
        assert!(!d.takes_value());
        assert!(directives("%d")[0].takes_value());
    }

    #[test]
    fn pointer_conversions_are_flagged() {
        let flagged: Vec<_> = directives("%s%p%d%c")
            .iter()
            .map(Directive::takes_pointer)
            .collect();
        assert_eq!(flagged, [true, true, false, false]);
    }
}
