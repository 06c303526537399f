//! Records held by the registry and the syntax rules REGISTER enforces.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// The record kinds the registry understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Mx,
    Cname,
}

impl RecordType {
    /// Canonical uppercase spelling, as written to the wire and the backing file.
    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Mx => "MX",
            RecordType::Cname => "CNAME",
        }
    }

    fn accepts_value(self, value: &str) -> bool {
        match self {
            RecordType::A => non_empty_all(value, |c| c.is_ascii_digit() || c == '.'),
            RecordType::Mx | RecordType::Cname => non_empty_all(value, |c| {
                c.is_ascii_alphanumeric() || c == '-' || c == '.'
            }),
        }
    }
}

impl FromStr for RecordType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "MX" => Ok(RecordType::Mx),
            "CNAME" => Ok(RecordType::Cname),
            _ => Err(ValidationError::UnknownType(s.to_string())),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a REGISTER request was refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid domain '{0}'")]
    Domain(String),
    #[error("invalid value '{value}' for {record_type} record")]
    Value {
        record_type: RecordType,
        value: String,
    },
    #[error("unknown record type '{0}'")]
    UnknownType(String),
}

/// One domain/type/value triple. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    domain: String,
    record_type: RecordType,
    value: String,
}

impl Record {
    /// Builds a record without syntax checks. Used when replaying the backing file.
    pub fn new(
        domain: impl Into<String>,
        record_type: RecordType,
        value: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            record_type,
            value: value.into(),
        }
    }

    /// Builds a record from untrusted REGISTER arguments.
    ///
    /// The type is matched case-insensitively. The domain must be a single
    /// label followed by one dot and an alphabetic TLD; deeper names such as
    /// `mail.example.com` are refused.
    pub fn parse(domain: &str, record_type: &str, value: &str) -> Result<Self, ValidationError> {
        if !is_valid_domain(domain) {
            return Err(ValidationError::Domain(domain.to_string()));
        }

        let record_type: RecordType = record_type.parse()?;
        if !record_type.accepts_value(value) {
            return Err(ValidationError::Value {
                record_type,
                value: value.to_string(),
            });
        }

        Ok(Self::new(domain, record_type, value))
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// `<domain> <type> <value>`, the layout shared by LIST bodies and the backing file.
impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.domain, self.record_type, self.value)
    }
}

fn is_valid_domain(domain: &str) -> bool {
    let Some((label, tld)) = domain.split_once('.') else {
        return false;
    };

    non_empty_all(label, |c| c.is_ascii_alphanumeric() || c == '-')
        && non_empty_all(tld, |c| c.is_ascii_alphabetic())
}

fn non_empty_all(s: &str, allowed: impl Fn(char) -> bool) -> bool {
    !s.is_empty() && s.chars().all(allowed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_record_types_case_insensitively() {
        assert_eq!("a".parse::<RecordType>(), Ok(RecordType::A));
        assert_eq!("Mx".parse::<RecordType>(), Ok(RecordType::Mx));
        assert_eq!("cname".parse::<RecordType>(), Ok(RecordType::Cname));
        assert!(matches!(
            "TXT".parse::<RecordType>(),
            Err(ValidationError::UnknownType(t)) if t == "TXT"
        ));
    }

    #[test]
    fn normalizes_type_to_uppercase() {
        let record = Record::parse("example.com", "cname", "alias.example.com").expect("valid");
        assert_eq!(record.record_type(), RecordType::Cname);
        assert_eq!(record.to_string(), "example.com CNAME alias.example.com");
    }

    #[test]
    fn accepts_single_label_domains() {
        assert!(is_valid_domain("example.com"));
        assert!(is_valid_domain("my-host1.io"));
        assert!(is_valid_domain("123.org"));
    }

    #[test]
    fn rejects_domains_outside_the_label_tld_pattern() {
        assert!(!is_valid_domain("bad_domain"));
        assert!(!is_valid_domain("example"));
        assert!(!is_valid_domain(".com"));
        assert!(!is_valid_domain("example."));
        assert!(!is_valid_domain("mail.example.com"));
        assert!(!is_valid_domain("example.c0m"));
        assert!(!is_valid_domain("ex_ample.com"));
    }

    #[test]
    fn a_records_take_digits_and_dots_only() {
        assert!(Record::parse("example.com", "A", "10.0.0.1").is_ok());
        // No octet range checking.
        assert!(Record::parse("example.com", "A", "999.1").is_ok());
        assert!(matches!(
            Record::parse("example.com", "A", "10.0.0.x"),
            Err(ValidationError::Value { record_type: RecordType::A, .. })
        ));
    }

    #[test]
    fn mx_and_cname_values_allow_hostnames() {
        assert!(Record::parse("example.com", "MX", "mx1.example.com").is_ok());
        assert!(Record::parse("example.com", "CNAME", "web-1.example.com").is_ok());
        assert!(Record::parse("example.com", "MX", "mx_1.example.com").is_err());
    }

    #[test]
    fn domain_is_checked_before_type() {
        assert_eq!(
            Record::parse("bad_domain", "TXT", "x"),
            Err(ValidationError::Domain("bad_domain".into()))
        );
    }
}
