use crate::errors::{TimelogError, TimelogResult};

/// Delimiter for the target file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Delimiter {
    /// Use the default delimiter (comma)
    #[default]
    Default,

    /// Use the specified delimiter
    Character(u8),
}

impl Delimiter {
    /// Create a Delimiter by parsing the command line argument for the delimiter
    pub fn from_arg(delimiter_arg: &Option<String>, tab_separation: bool) -> TimelogResult<Self> {
        if tab_separation {
            return Ok(Delimiter::Character(b'\t'));
        }

        if let Some(s) = delimiter_arg {
            if s == r"\t" {
                return Ok(Delimiter::Character(b'\t'));
            }
            let mut chars = s.chars();
            let c = chars.next().ok_or(TimelogError::DelimiterEmpty)?;
            if !c.is_ascii() {
                return Err(TimelogError::DelimiterNotAscii(c));
            }
            if chars.next().is_some() {
                return Err(TimelogError::DelimiterMultipleCharacters(s.clone()));
            }
            Delimiter::Character(c as u8).validated()
        } else {
            Ok(Delimiter::Default)
        }
    }

    /// Reject delimiters that would collide with quoting or row termination
    pub fn validated(self) -> TimelogResult<Self> {
        match self {
            Delimiter::Character(b @ (b'"' | b'\r' | b'\n')) => {
                Err(TimelogError::DelimiterReserved(b as char))
            }
            Delimiter::Character(b) if !b.is_ascii() => {
                Err(TimelogError::DelimiterNotAscii(b as char))
            }
            _ => Ok(self),
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            Delimiter::Default => b',',
            Delimiter::Character(b) => *b,
        }
    }
}
