//! Directed relations between typed entity ids (`C:3->D:7`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FormatError, FormatResult};
use crate::{FIELD_SEPARATOR, LINK_ARROW};

/// An entity id qualified by its type prefix, e.g. `C:12`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypedId {
    pub prefix: String,
    pub id: u64,
}

impl TypedId {
    pub fn new(prefix: impl Into<String>, id: u64) -> Self {
        Self {
            prefix: prefix.into(),
            id,
        }
    }
}

impl fmt::Display for TypedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.prefix, self.id)
    }
}

impl FromStr for TypedId {
    type Err = FormatError;

    fn from_str(s: &str) -> FormatResult<Self> {
        let malformed = || FormatError::MalformedTypedId {
            input: s.to_string(),
        };
        let (prefix, id) = s.trim().split_once(':').ok_or_else(malformed)?;
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(malformed());
        }
        let id = id.parse::<u64>().map_err(|_| malformed())?;
        Ok(Self::new(prefix, id))
    }
}

/// A directed, additive-only relation between two entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    pub from: TypedId,
    pub to: TypedId,
}

impl Link {
    pub fn new(from: TypedId, to: TypedId) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{LINK_ARROW}{}", self.from, self.to)
    }
}

impl FromStr for Link {
    type Err = FormatError;

    fn from_str(s: &str) -> FormatResult<Self> {
        let (from, to) = s
            .trim()
            .split_once(LINK_ARROW)
            .ok_or_else(|| FormatError::MalformedLink {
                input: s.to_string(),
                reason: format!("missing '{LINK_ARROW}'"),
            })?;
        let wrap = |e: FormatError| FormatError::MalformedLink {
            input: s.to_string(),
            reason: e.to_string(),
        };
        Ok(Self {
            from: from.parse().map_err(wrap)?,
            to: to.parse().map_err(wrap)?,
        })
    }
}

/// One line of a LINKS section; holds one or more separator-delimited links.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkLine {
    pub links: Vec<Link>,
}

impl LinkLine {
    pub fn new(links: Vec<Link>) -> Self {
        Self { links }
    }

    pub fn parse(line: &str) -> FormatResult<Self> {
        let links = line
            .split(FIELD_SEPARATOR)
            .filter(|p| !p.trim().is_empty())
            .map(str::parse)
            .collect::<FormatResult<Vec<Link>>>()?;
        Ok(Self { links })
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl fmt::Display for LinkLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, link) in self.links.iter().enumerate() {
            if i > 0 {
                write!(f, "{FIELD_SEPARATOR}")?;
            }
            write!(f, "{link}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multi_link_line() {
        let line = LinkLine::parse("C:1->D:2|C:1->T:3").unwrap();
        assert_eq!(line.links.len(), 2);
        assert_eq!(line.links[1].to, TypedId::new("T", 3));
        assert_eq!(line.to_string(), "C:1->D:2|C:1->T:3");
    }

    #[test]
    fn test_reject_missing_arrow() {
        let err = "C:1=>D:2".parse::<Link>().unwrap_err();
        assert!(matches!(err, FormatError::MalformedLink { .. }));
    }

    #[test]
    fn test_reject_non_numeric_id() {
        assert!("C:x".parse::<TypedId>().is_err());
        assert!(":4".parse::<TypedId>().is_err());
        assert!("C:1->D:two".parse::<Link>().is_err());
    }
}
