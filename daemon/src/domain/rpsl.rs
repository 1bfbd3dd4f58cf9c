//! RPSL object text handling.
//!
//! Full RPSL validation lives in the registry proper; the mirror only needs
//! to split dumps into objects, find attributes, and redact sensitive values
//! before publishing.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, BufRead};

use serde::{Deserialize, Serialize};

/// Column at which attribute values start in rewritten lines.
const VALUE_COLUMN: usize = 16;

/// Password hash schemes that must never leave the registry.
const HASHED_AUTH_SCHEMES: [&str; 3] = ["MD5-PW", "CRYPT-PW", "BCRYPT-PW"];

/// A parsed RPSL object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RpslObject {
    /// Object class (the first attribute name), lowercase.
    pub object_class: String,
    /// Primary key.
    pub pk: String,
    /// Upper-case source name from the `source:` attribute.
    pub source: String,
    /// Object text, normalised to end with a newline.
    pub text: String,
}

/// Redaction rules applied to objects before they are published.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DummifyPolicy {
    /// Object classes subject to redaction.
    pub object_classes: BTreeSet<String>,
    /// Attribute name to replacement value; `%s` expands to the primary key.
    pub attributes: BTreeMap<String, String>,
    /// `remarks:` lines appended to redacted objects.
    pub remarks: Vec<String>,
}

impl DummifyPolicy {
    /// Whether the policy redacts anything at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.object_classes.is_empty() || self.attributes.is_empty()
    }
}

/// One attribute with its continuation lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute<'a> {
    /// Lowercase attribute name.
    pub name: String,
    /// Value with continuation lines joined by single spaces and comments removed.
    pub value: String,
    /// Raw lines making up the attribute.
    pub lines: Vec<&'a str>,
}

fn is_continuation(line: &str) -> bool {
    line.starts_with([' ', '\t', '+'])
}

fn strip_comment(value: &str) -> &str {
    value.split_once('#').map_or(value, |(head, _)| head).trim()
}

/// Split object text into attributes, honouring continuation lines.
///
/// Lines before the first attribute and lines without a colon are ignored.
#[must_use]
pub fn attributes(text: &str) -> Vec<Attribute<'_>> {
    let mut attributes: Vec<Attribute<'_>> = Vec::new();
    for line in text.lines() {
        if is_continuation(line) {
            if let Some(current) = attributes.last_mut() {
                let extra = strip_comment(line.trim_start_matches('+'));
                if !extra.is_empty() {
                    if !current.value.is_empty() {
                        current.value.push(' ');
                    }
                    current.value.push_str(extra);
                }
                current.lines.push(line);
            }
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        attributes.push(Attribute {
            name: name.trim().to_ascii_lowercase(),
            value: strip_comment(value).to_owned(),
            lines: vec![line],
        });
    }
    attributes
}

/// First value of `name`, if present.
#[must_use]
pub fn first_value(text: &str, name: &str) -> Option<String> {
    attributes(text)
        .into_iter()
        .find(|attribute| attribute.name == name)
        .map(|attribute| attribute.value)
}

fn format_attribute(name: &str, value: &str) -> String {
    let key = format!("{name}:");
    format!("{key:<VALUE_COLUMN$}{value}")
}

/// Streaming splitter yielding the object paragraphs of a dump.
///
/// Paragraphs are separated by blank lines. Paragraphs made only of `%` or
/// `#` comment lines are dropped. Invalid UTF-8 is replaced rather than
/// rejected, since legacy dumps are not always clean.
#[derive(Debug)]
pub struct Paragraphs<R> {
    reader: R,
    line: Vec<u8>,
}

impl<R: BufRead> Paragraphs<R> {
    /// Wrap a buffered reader.
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
        }
    }

    fn next_paragraph(&mut self) -> io::Result<Option<String>> {
        let mut current = String::new();
        loop {
            self.line.clear();
            let read = self.reader.read_until(b'\n', &mut self.line)?;
            let text = String::from_utf8_lossy(&self.line);
            let text = text.trim_end_matches(['\r', '\n']);
            if read == 0 || text.trim().is_empty() {
                let has_content = current
                    .lines()
                    .any(|line| !line.starts_with('%') && !line.starts_with('#'));
                if has_content {
                    return Ok(Some(current));
                }
                current.clear();
                if read == 0 {
                    return Ok(None);
                }
                continue;
            }
            current.push_str(text);
            current.push('\n');
        }
    }
}

impl<R: BufRead> Iterator for Paragraphs<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_paragraph().transpose()
    }
}

/// Split a dump held in memory into object paragraphs.
#[must_use]
pub fn split_paragraphs(text: &str) -> Vec<String> {
    Paragraphs::new(text.as_bytes())
        .filter_map(Result::ok)
        .collect()
}

/// Replace hashed `auth:` values with a placeholder naming the scheme.
#[must_use]
pub fn remove_auth_hashes(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    for line in text.lines() {
        let redacted = line.split_once(':').and_then(|(name, value)| {
            if !name.trim().eq_ignore_ascii_case("auth") {
                return None;
            }
            let scheme = value.split_whitespace().next()?.to_ascii_uppercase();
            HASHED_AUTH_SCHEMES
                .contains(&scheme.as_str())
                .then(|| format_attribute("auth", &format!("{scheme} DummyValue  # Filtered for security")))
        });
        output.push_str(redacted.as_deref().unwrap_or(line));
        output.push('\n');
    }
    output
}

/// Redact configured attributes of objects in the configured classes.
///
/// Each matching attribute keeps its name but gets the replacement value,
/// and its continuation lines are dropped. Objects that changed get the
/// policy remarks appended.
#[must_use]
pub fn dummify_object_text(
    text: &str,
    object_class: &str,
    pk: &str,
    policy: &DummifyPolicy,
) -> String {
    if policy.is_empty() || !policy.object_classes.contains(object_class) {
        return text.to_owned();
    }

    let mut output = String::with_capacity(text.len());
    let mut changed = false;
    let mut skipping_continuation = false;
    for line in text.lines() {
        if is_continuation(line) {
            if !skipping_continuation {
                output.push_str(line);
                output.push('\n');
            }
            continue;
        }
        skipping_continuation = false;
        let replacement = line.split_once(':').and_then(|(name, _)| {
            let name = name.trim().to_ascii_lowercase();
            policy
                .attributes
                .get(&name)
                .map(|value| format_attribute(&name, &value.replace("%s", pk)))
        });
        match replacement {
            Some(replaced) => {
                changed |= replaced != line;
                skipping_continuation = true;
                output.push_str(&replaced);
            }
            None => output.push_str(line),
        }
        output.push('\n');
    }

    if changed {
        for remark in &policy.remarks {
            output.push_str(&format_attribute("remarks", remark));
            output.push('\n');
        }
    }
    output
}

/// Apply every publication filter to an object.
#[must_use]
pub fn prepare_for_publication(
    text: &str,
    object_class: &str,
    pk: &str,
    policy: &DummifyPolicy,
) -> String {
    dummify_object_text(&remove_auth_hashes(text), object_class, pk, policy)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const PERSON: &str = "person:         Test Person\naddress:        Line one\n                Line two\nphone:          +31 20 000 0000\nnic-hdl:        PERSON-TEST\nsource:         TEST\n";

    fn policy() -> DummifyPolicy {
        DummifyPolicy {
            object_classes: BTreeSet::from(["person".to_owned()]),
            attributes: BTreeMap::from([
                ("address".to_owned(), "Dummy address for %s".to_owned()),
                ("phone".to_owned(), "+31205354444".to_owned()),
            ]),
            remarks: vec!["Dummified for privacy".to_owned()],
        }
    }

    #[test]
    fn attributes_join_continuations() {
        let attrs = attributes(PERSON);
        let address = attrs.iter().find(|a| a.name == "address").expect("address");
        assert_eq!(address.value, "Line one Line two");
        assert_eq!(address.lines.len(), 2);
        assert_eq!(first_value(PERSON, "nic-hdl").as_deref(), Some("PERSON-TEST"));
    }

    #[rstest]
    #[case("auth:           MD5-PW $1$abc$def", "auth:           MD5-PW DummyValue  # Filtered for security")]
    #[case("auth:   bcrypt-pw $2b$12$xyz", "auth:           BCRYPT-PW DummyValue  # Filtered for security")]
    #[case("auth:           CRYPT-PW LEuuhsBJNFV0Q", "auth:           CRYPT-PW DummyValue  # Filtered for security")]
    #[case("auth:           PGPKEY-80F238C6", "auth:           PGPKEY-80F238C6")]
    #[case("remarks:        MD5-PW is mentioned", "remarks:        MD5-PW is mentioned")]
    fn auth_hashes_are_filtered(#[case] line: &str, #[case] expected: &str) {
        let filtered = remove_auth_hashes(&format!("mntner: TEST-MNT\n{line}\n"));
        assert_eq!(filtered, format!("mntner: TEST-MNT\n{expected}\n"));
    }

    #[test]
    fn dummify_replaces_attributes_and_drops_continuations() {
        let dummified = dummify_object_text(PERSON, "person", "PERSON-TEST", &policy());
        assert!(dummified.contains("address:        Dummy address for PERSON-TEST\n"));
        assert!(!dummified.contains("Line two"));
        assert!(dummified.contains("phone:          +31205354444\n"));
        assert!(dummified.ends_with("remarks:        Dummified for privacy\n"));
        assert!(dummified.contains("nic-hdl:        PERSON-TEST\n"));
    }

    #[test]
    fn dummify_ignores_other_classes() {
        let route = "route:          192.0.2.0/24\norigin:         AS65530\nsource:         TEST\n";
        assert_eq!(dummify_object_text(route, "route", "192.0.2.0/24AS65530", &policy()), route);
    }

    #[test]
    fn split_paragraphs_skips_comment_blocks() {
        let dump = "% header comment\n\nmntner: A-MNT\nsource: TEST\n\n\n# trailing\n\nroute: 192.0.2.0/24\r\norigin: AS1\n";
        let paragraphs = split_paragraphs(dump);
        assert_eq!(
            paragraphs,
            vec![
                "mntner: A-MNT\nsource: TEST\n".to_owned(),
                "route: 192.0.2.0/24\norigin: AS1\n".to_owned(),
            ]
        );
    }
}
