//! X.509 Distinguished Names
//!
//! Accepts both RFC 2253 (`CN=usera,DC=example,DC=org`) and the OpenSSL
//! slash form (`/DC=org/DC=example/CN=usera`). Both produce the same value.
//!
//! Equality and hashing use the canonical form: attribute types upper-cased
//! with aliases and OIDs resolved, values case-folded with whitespace runs
//! collapsed, members of multi-valued RDNs sorted, RFC 2253 order.

use crate::error::{MappingError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Characters that must be escaped inside an RFC 2253 value
const SPECIALS: &[char] = &[',', '+', '"', '\\', '<', '>', ';', '='];

/// Single attribute type and value pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ava {
    attribute: String,
    value: String,
    folded: String,
}

impl Ava {
    fn new(input: &str, attribute: &str, value: String) -> Result<Self> {
        let attribute = canonical_attribute(input, attribute)?;
        if value.is_empty() {
            return Err(MappingError::malformed(
                input,
                format!("empty value for {}", attribute),
            ));
        }
        let folded = fold(&value);
        Ok(Ava {
            attribute,
            value,
            folded,
        })
    }

    /// Canonical attribute type (`CN`, `DC`, `EMAILADDRESS`, ...)
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Unescaped value as written
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Case-folded, whitespace-collapsed value
    pub fn folded(&self) -> &str {
        &self.folded
    }
}

/// Relative distinguished name (one or more AVAs joined by `+`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdn {
    avas: Vec<Ava>,
}

impl Rdn {
    fn new(mut avas: Vec<Ava>) -> Self {
        avas.sort_by(|a, b| {
            a.attribute
                .cmp(&b.attribute)
                .then_with(|| a.folded.cmp(&b.folded))
        });
        Rdn { avas }
    }

    pub fn avas(&self) -> &[Ava] {
        &self.avas
    }
}

/// Parsed distinguished name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DistinguishedName {
    /// Most specific RDN first (RFC 2253 order)
    rdns: Vec<Rdn>,
    canonical: String,
}

impl DistinguishedName {
    /// Parse a DN in RFC 2253 or OpenSSL slash form
    ///
    /// # Examples
    ///
    /// ```
    /// use gridmap_rs::DistinguishedName;
    ///
    /// let a = DistinguishedName::parse("CN=usera,DC=example,DC=org").unwrap();
    /// let b = DistinguishedName::parse("/dc=org/dc=example/cn=UserA").unwrap();
    /// assert_eq!(a, b);
    /// assert_eq!(a.canonical(), "CN=usera,DC=example,DC=org");
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(MappingError::malformed(input, "empty string"));
        }

        let rdns = if trimmed.starts_with('/') {
            let mut rdns = parse_slash(input, trimmed)?;
            rdns.reverse();
            rdns
        } else {
            parse_rfc2253(input, trimmed)?
        };

        let canonical = render(&rdns, |ava| &ava.folded);
        Ok(DistinguishedName { rdns, canonical })
    }

    /// RDNs, most specific first
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// Canonical string used for equality, hashing and lease names
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// OpenSSL slash form with values as written (`/DC=org/CN=usera`)
    pub fn to_slash_form(&self) -> String {
        let mut out = String::new();
        for rdn in self.rdns.iter().rev() {
            out.push('/');
            let parts: Vec<String> = rdn
                .avas
                .iter()
                .map(|ava| format!("{}={}", ava.attribute, ava.value))
                .collect();
            out.push_str(&parts.join("+"));
        }
        out
    }
}

impl PartialEq for DistinguishedName {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for DistinguishedName {}

impl Hash for DistinguishedName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(&self.rdns, |ava| &ava.value))
    }
}

impl FromStr for DistinguishedName {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self> {
        DistinguishedName::parse(s)
    }
}

impl TryFrom<String> for DistinguishedName {
    type Error = MappingError;

    fn try_from(s: String) -> Result<Self> {
        DistinguishedName::parse(&s)
    }
}

impl From<DistinguishedName> for String {
    fn from(dn: DistinguishedName) -> String {
        dn.to_string()
    }
}

fn render<'a>(rdns: &'a [Rdn], value: impl Fn(&'a Ava) -> &'a str) -> String {
    rdns.iter()
        .map(|rdn| {
            rdn.avas
                .iter()
                .map(|ava| format!("{}={}", ava.attribute, escape_value(value(ava))))
                .collect::<Vec<_>>()
                .join("+")
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        let edge_space = c == ' ' && (i == 0 || i == last);
        if SPECIALS.contains(&c) || edge_space || (i == 0 && c == '#') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn fold(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn canonical_attribute(input: &str, attribute: &str) -> Result<String> {
    let attribute = attribute.trim();
    let attribute = attribute
        .strip_prefix("OID.")
        .or_else(|| attribute.strip_prefix("oid."))
        .unwrap_or(attribute);
    if attribute.is_empty() {
        return Err(MappingError::malformed(input, "empty attribute type"));
    }
    if !attribute
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Err(MappingError::malformed(
            input,
            format!("invalid attribute type '{}'", attribute),
        ));
    }

    let upper = attribute.to_ascii_uppercase();
    let canonical = match upper.as_str() {
        "2.5.4.3" => "CN",
        "2.5.4.6" => "C",
        "2.5.4.7" => "L",
        "2.5.4.8" => "ST",
        "2.5.4.10" => "O",
        "2.5.4.11" => "OU",
        "0.9.2342.19200300.100.1.25" | "DOMAINCOMPONENT" => "DC",
        "0.9.2342.19200300.100.1.1" | "USERID" => "UID",
        "1.2.840.113549.1.9.1" | "E" | "EMAIL" => "EMAILADDRESS",
        _ => return Ok(upper),
    };
    Ok(canonical.to_string())
}

/// Parse the OpenSSL slash form. A segment without `=` belongs to the
/// previous value (`/CN=host/login.example.org`).
fn parse_slash(input: &str, trimmed: &str) -> Result<Vec<Rdn>> {
    let mut segments: Vec<String> = Vec::new();
    for segment in trimmed[1..].split('/') {
        if segment.contains('=') {
            segments.push(segment.to_string());
        } else if let Some(prev) = segments.last_mut() {
            prev.push('/');
            prev.push_str(segment);
        } else {
            return Err(MappingError::malformed(
                input,
                "first component has no attribute type",
            ));
        }
    }

    segments
        .iter()
        .map(|segment| {
            let parts: Vec<&str> = segment.split('+').collect();
            let members: Vec<&str> = if parts.iter().all(|p| p.contains('=')) {
                parts
            } else {
                vec![segment.as_str()]
            };
            let avas = members
                .into_iter()
                .map(|member| {
                    let (attr, value) = member
                        .split_once('=')
                        .ok_or_else(|| MappingError::malformed(input, "missing '='"))?;
                    Ava::new(input, attr, value.trim().to_string())
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Rdn::new(avas))
        })
        .collect()
}

/// Parse RFC 2253 syntax with backslash escapes and quoted values
fn parse_rfc2253(input: &str, trimmed: &str) -> Result<Vec<Rdn>> {
    let mut rdns = Vec::new();
    let mut avas = Vec::new();
    let mut attr = String::new();
    let mut value: Vec<u8> = Vec::new();
    let mut in_value = false;
    let mut quoted = false;
    // Trailing spaces that were escaped and must survive trimming
    let mut protected_len = 0usize;

    let mut chars = trimmed.chars().peekable();
    while let Some(c) = chars.next() {
        if !in_value {
            match c {
                '=' => in_value = true,
                ',' | ';' | '+' => {
                    return Err(MappingError::malformed(
                        input,
                        format!("attribute type without value before '{}'", c),
                    ))
                }
                _ => attr.push(c),
            }
            continue;
        }

        match c {
            '\\' => {
                let next = chars
                    .next()
                    .ok_or_else(|| MappingError::malformed(input, "dangling escape"))?;
                if next.is_ascii_hexdigit() {
                    let low = chars
                        .next()
                        .filter(|c| c.is_ascii_hexdigit())
                        .ok_or_else(|| MappingError::malformed(input, "bad hex escape"))?;
                    let byte = u8::from_str_radix(&format!("{}{}", next, low), 16)
                        .map_err(|_| MappingError::malformed(input, "bad hex escape"))?;
                    value.push(byte);
                } else if SPECIALS.contains(&next) || next == ' ' || next == '#' {
                    let mut buf = [0u8; 4];
                    value.extend_from_slice(next.encode_utf8(&mut buf).as_bytes());
                } else {
                    return Err(MappingError::malformed(
                        input,
                        format!("invalid escape '\\{}'", next),
                    ));
                }
                protected_len = value.len();
            }
            '"' if value.iter().all(|b| *b == b' ') && !quoted => {
                value.clear();
                quoted = true;
                for q in chars.by_ref() {
                    if q == '"' {
                        quoted = false;
                        break;
                    }
                    let mut buf = [0u8; 4];
                    value.extend_from_slice(q.encode_utf8(&mut buf).as_bytes());
                }
                if quoted {
                    return Err(MappingError::malformed(input, "unterminated quote"));
                }
                protected_len = value.len();
            }
            ',' | ';' | '+' => {
                avas.push(finish_ava(input, &attr, &value, protected_len)?);
                attr.clear();
                value.clear();
                protected_len = 0;
                in_value = false;
                if c != '+' {
                    rdns.push(Rdn::new(std::mem::take(&mut avas)));
                }
            }
            _ => {
                let mut buf = [0u8; 4];
                value.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }

    if !in_value {
        return Err(MappingError::malformed(input, "missing '='"));
    }
    avas.push(finish_ava(input, &attr, &value, protected_len)?);
    rdns.push(Rdn::new(avas));
    Ok(rdns)
}

fn finish_ava(input: &str, attr: &str, value: &[u8], protected_len: usize) -> Result<Ava> {
    let text = String::from_utf8(value.to_vec())
        .map_err(|_| MappingError::malformed(input, "value is not valid UTF-8"))?;
    let keep = protected_len.min(text.len());
    let (head, tail) = text.split_at(keep);
    let head = head.trim_start();
    let value = if tail.is_empty() {
        head.to_string()
    } else {
        format!("{}{}", head, tail.trim_end())
    };
    let value = if keep == 0 {
        value.trim().to_string()
    } else {
        value
    };
    Ava::new(input, attr, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc2253_basic() {
        let dn = DistinguishedName::parse("CN=usera,DC=example,DC=org").unwrap();
        assert_eq!(dn.rdns().len(), 3);
        assert_eq!(dn.rdns()[0].avas()[0].attribute(), "CN");
        assert_eq!(dn.rdns()[0].avas()[0].value(), "usera");
        assert_eq!(dn.to_string(), "CN=usera,DC=example,DC=org");
    }

    #[test]
    fn test_slash_form_equals_rfc2253() {
        let a = DistinguishedName::parse("/DC=org/DC=example/CN=usera").unwrap();
        let b = DistinguishedName::parse("CN=usera,DC=example,DC=org").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_slash_form(), "/DC=org/DC=example/CN=usera");
    }

    #[test]
    fn test_case_and_whitespace_folding() {
        let a = DistinguishedName::parse("cn=User  A, dc=Example,dc=ORG").unwrap();
        let b = DistinguishedName::parse("CN=user a,DC=example,DC=org").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.canonical(), "CN=user a,DC=example,DC=org");
        assert_eq!(a.to_string(), "CN=User  A,DC=Example,DC=ORG");
    }

    #[test]
    fn test_attribute_aliases() {
        let a = DistinguishedName::parse("E=a@b.org,CN=x").unwrap();
        let b = DistinguishedName::parse("emailAddress=A@B.org,2.5.4.3=x").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.canonical(), "EMAILADDRESS=a@b.org,CN=x");
    }

    #[test]
    fn test_multivalued_rdn_sorted() {
        let a = DistinguishedName::parse("CN=x+UID=7,O=grid").unwrap();
        let b = DistinguishedName::parse("UID=7+CN=x,O=grid").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.rdns()[0].avas().len(), 2);
    }

    #[test]
    fn test_component_order_matters() {
        let a = DistinguishedName::parse("CN=x,O=grid").unwrap();
        let b = DistinguishedName::parse("O=grid,CN=x").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_escapes() {
        let dn = DistinguishedName::parse(r"CN=Smith\, John,O=a\+b,OU=\41x").unwrap();
        assert_eq!(dn.rdns()[0].avas()[0].value(), "Smith, John");
        assert_eq!(dn.rdns()[1].avas()[0].value(), "a+b");
        assert_eq!(dn.rdns()[2].avas()[0].value(), "Ax");
        assert_eq!(dn.to_string(), r"CN=Smith\, John,O=a\+b,OU=Ax");

        let reparsed = DistinguishedName::parse(&dn.to_string()).unwrap();
        assert_eq!(reparsed, dn);
    }

    #[test]
    fn test_quoted_value() {
        let dn = DistinguishedName::parse(r#"CN="Smith, John",O=grid"#).unwrap();
        assert_eq!(dn.rdns()[0].avas()[0].value(), "Smith, John");
    }

    #[test]
    fn test_slash_form_value_with_slash() {
        let dn = DistinguishedName::parse("/DC=org/CN=host/login.example.org").unwrap();
        assert_eq!(dn.rdns()[0].avas()[0].value(), "host/login.example.org");
    }

    #[test]
    fn test_malformed() {
        assert!(DistinguishedName::parse("").is_err());
        assert!(DistinguishedName::parse("   ").is_err());
        assert!(DistinguishedName::parse("usera").is_err());
        assert!(DistinguishedName::parse("CN=usera,").is_err());
        assert!(DistinguishedName::parse("=usera").is_err());
        assert!(DistinguishedName::parse("CN=").is_err());
        assert!(DistinguishedName::parse(r"CN=a\").is_err());
        assert!(DistinguishedName::parse(r"CN=a\zz").is_err());
        assert!(DistinguishedName::parse(r"CN=a\4").is_err());
        assert!(DistinguishedName::parse("/usera/CN=x").is_err());
        assert!(DistinguishedName::parse("C N=x").is_err());
        assert!(DistinguishedName::parse(r#"CN="open"#).is_err());
    }
}
