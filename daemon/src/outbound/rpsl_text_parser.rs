//! Lightweight RPSL parser.
//!
//! Extracts only what mirroring needs (class, primary key, source) and keeps
//! the text as received. Attribute syntax is not validated.

use crate::domain::ports::{RpslParseError, RpslParser};
use crate::domain::rpsl::attributes;
use crate::domain::RpslObject;

/// [`RpslParser`] deriving keys from attribute values.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpslTextParser;

/// Attributes forming the primary key of classes that are not keyed by their
/// first attribute.
fn key_attributes(object_class: &str) -> Option<&'static [&'static str]> {
    match object_class {
        "route" => Some(&["route", "origin"]),
        "route6" => Some(&["route6", "origin"]),
        "person" | "role" => Some(&["nic-hdl"]),
        _ => None,
    }
}

impl RpslParser for RpslTextParser {
    fn parse(&self, text: &str) -> Result<RpslObject, RpslParseError> {
        let attributes = attributes(text);
        let first = attributes.first().ok_or_else(RpslParseError::empty)?;
        let object_class = first.name.clone();
        let value_of = |name: &str| {
            attributes
                .iter()
                .find(|attribute| attribute.name == name)
                .map(|attribute| attribute.value.clone())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| RpslParseError::missing_attribute(&object_class, name))
        };

        let pk = match key_attributes(&object_class) {
            Some(names) => names
                .iter()
                .map(|name| value_of(name).map(|value| value.replace(' ', "")))
                .collect::<Result<Vec<_>, _>>()?
                .concat(),
            None => value_of(&object_class)?,
        };
        let source = value_of("source")?.to_ascii_uppercase();

        let mut text = text.trim_end().to_owned();
        text.push('\n');
        Ok(RpslObject {
            object_class,
            pk: pk.to_ascii_uppercase(),
            source,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("mntner:  test-mnt\nsource: test\n", "mntner", "TEST-MNT")]
    #[case("route: 192.0.2.0/24\norigin: AS65530\nsource: TEST\n", "route", "192.0.2.0/24AS65530")]
    #[case("route6: 2001:db8::/32\norigin: AS65530\nsource: TEST\n", "route6", "2001:DB8::/32AS65530")]
    #[case("person: A Person\nnic-hdl: ap1-test\nsource: TEST\n", "person", "AP1-TEST")]
    #[case("aut-num: AS65530\nas-name: EXAMPLE # comment\nsource: TEST\n", "aut-num", "AS65530")]
    fn derives_class_and_key(#[case] text: &str, #[case] class: &str, #[case] pk: &str) {
        let object = RpslTextParser.parse(text).expect("parse");
        assert_eq!(object.object_class, class);
        assert_eq!(object.pk, pk);
        assert_eq!(object.source, "TEST");
    }

    #[test]
    fn normalises_trailing_whitespace() {
        let object = RpslTextParser
            .parse("mntner: A-MNT\nsource: TEST\n\n\n")
            .expect("parse");
        assert_eq!(object.text, "mntner: A-MNT\nsource: TEST\n");
    }

    #[rstest]
    #[case("", "empty RPSL object")]
    #[case("mntner: A-MNT\n", "has no source attribute")]
    #[case("route: 192.0.2.0/24\nsource: TEST\n", "has no origin attribute")]
    fn rejects_incomplete_objects(#[case] text: &str, #[case] message: &str) {
        let err = RpslTextParser.parse(text).expect_err("must fail");
        assert!(err.to_string().contains(message), "{err}");
    }
}
