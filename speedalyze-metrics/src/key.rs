use std::fmt;

use crate::{Error, Result};

/// How tags are written inside the braces of a series key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TagEncoding {
    /// `name{type:list}`, the form k6 uses in summaries.
    #[default]
    Colon,
    /// `name{type=list}`
    Equals,
}

impl TagEncoding {
    fn separator(self) -> char {
        match self {
            TagEncoding::Colon => ':',
            TagEncoding::Equals => '=',
        }
    }
}

/// A metric series key: a metric name plus an ordered list of tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricKey {
    name: String,
    tags: Vec<(String, String)>,
    encoding: TagEncoding,
}

impl MetricKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
            encoding: TagEncoding::default(),
        }
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn encoded(mut self, encoding: TagEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn encoding(&self) -> TagEncoding {
        self.encoding
    }

    /// Parses `name`, `name{k:v}` or `name{k=v,k2=v2}`. Whitespace around
    /// names and values is ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason| Error::InvalidKey {
            key: raw.to_string(),
            reason,
        };

        let s = raw.trim();
        let (name, rest) = match s.find('{') {
            Some(i) => (&s[..i], Some(&s[i + 1..])),
            None => (s, None),
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(invalid("empty metric name"));
        }
        if name.contains('}') {
            return Err(invalid("unbalanced braces"));
        }

        let mut key = MetricKey::new(name);
        let Some(rest) = rest else {
            return Ok(key);
        };
        let Some(inner) = rest.strip_suffix('}') else {
            return Err(invalid("missing closing brace"));
        };
        if inner.contains(['{', '}']) {
            return Err(invalid("unbalanced braces"));
        }

        let mut encoding = None;
        for pair in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let Some(sep_at) = pair.find([':', '=']) else {
                return Err(invalid("tag without separator"));
            };
            let (k, v) = (pair[..sep_at].trim(), pair[sep_at + 1..].trim());
            if k.is_empty() || v.is_empty() {
                return Err(invalid("empty tag name or value"));
            }
            if encoding.is_none() {
                encoding = Some(if pair.as_bytes()[sep_at] == b'=' {
                    TagEncoding::Equals
                } else {
                    TagEncoding::Colon
                });
            }
            key.tags.push((k.to_string(), v.to_string()));
        }
        key.encoding = encoding.unwrap_or_default();
        Ok(key)
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.tags.is_empty() {
            return Ok(());
        }
        let sep = self.encoding.separator();
        f.write_str("{")?;
        for (i, (k, v)) in self.tags.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}{sep}{v}")?;
        }
        f.write_str("}")
    }
}

impl std::str::FromStr for MetricKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
