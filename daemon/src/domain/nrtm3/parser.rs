//! Parser for NRTM v3 responses.
//!
//! A response looks like:
//!
//! ```text
//! %START Version: 3 TEST 100-102
//!
//! ADD 100
//!
//! mntner: TEST-MNT
//! source: TEST
//!
//! DEL 102
//!
//! route: 192.0.2.0/24
//! origin: AS65530
//! source: TEST
//!
//! %END TEST
//! ```
//!
//! The parser is a small state machine over paragraphs. Serials may skip
//! ahead but never go back, and the last serial seen must be the one the
//! START line announced.

use thiserror::Error;

use crate::domain::journal::DatabaseOperation;
use crate::domain::MirrorError;

/// Protocol versions this parser understands.
const SUPPORTED_VERSIONS: [u8; 2] = [1, 3];

/// Fatal problems in an NRTM v3 response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Nrtm3ParseError {
    /// The server answered with an error line.
    #[error("NRTM server returned an error: {message}")]
    ServerError {
        /// The error line.
        message: String,
    },
    /// A START line could not be parsed.
    #[error("malformed START line: {line}")]
    MalformedStart {
        /// Offending line.
        line: String,
    },
    /// A second START line appeared.
    #[error("encountered a second START line: {line}")]
    DuplicateStart {
        /// Offending line.
        line: String,
    },
    /// The START line names an unsupported protocol version.
    #[error("unsupported NRTM version {version}")]
    UnsupportedVersion {
        /// Version found.
        version: String,
    },
    /// The START line names another source.
    #[error("NRTM stream is for source {found}, expected {expected}")]
    SourceMismatch {
        /// Expected source.
        expected: String,
        /// Source found.
        found: String,
    },
    /// Content appeared before the START line.
    #[error("encountered {content} before a valid START line")]
    BeforeStart {
        /// Description of the content.
        content: String,
    },
    /// The response has no START line and no "no updates" notice.
    #[error("NRTM response has no START line")]
    MissingStart,
    /// An operation serial went backwards.
    #[error("serial {serial} is lower than the expected next serial {expected}")]
    SerialRegression {
        /// Serial found.
        serial: u64,
        /// Lowest acceptable serial.
        expected: u64,
    },
    /// An operation serial lies beyond the announced range.
    #[error("serial {serial} exceeds the announced last serial {last}")]
    SerialOutOfRange {
        /// Serial found.
        serial: u64,
        /// Announced last serial.
        last: u64,
    },
    /// An operation followed the largest representable serial.
    #[error("operation follows serial {serial}, which has no successor")]
    SerialOverflow {
        /// Serial of the preceding operation.
        serial: u64,
    },
    /// The stream ended on a different serial than announced.
    #[error("stream ended at serial {actual:?}, but START announced {expected}")]
    SerialMismatch {
        /// Announced last serial.
        expected: u64,
        /// Last serial seen.
        actual: Option<u64>,
    },
    /// An ADD or DEL line carries something other than a serial.
    #[error("malformed operation line: {line}")]
    MalformedOperation {
        /// Offending line.
        line: String,
    },
    /// An ADD or DEL line was not followed by an object.
    #[error("operation at serial {serial} has no object text")]
    MissingObject {
        /// Serial of the operation.
        serial: u64,
    },
    /// An object paragraph appeared without a preceding ADD or DEL.
    #[error("object text without ADD or DEL: {excerpt}")]
    UnexpectedObject {
        /// First line of the paragraph.
        excerpt: String,
    },
}

impl From<Nrtm3ParseError> for MirrorError {
    fn from(err: Nrtm3ParseError) -> Self {
        Self::protocol(err.to_string())
    }
}

/// Values announced by the START line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nrtm3Header {
    /// Protocol version.
    pub version: u8,
    /// Source name.
    pub source: String,
    /// First serial in the response.
    pub first_serial: u64,
    /// Last serial in the response.
    pub last_serial: u64,
}

/// One ADD or DEL with its object text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NrtmOperation {
    /// Serial assigned to the operation.
    pub serial: u64,
    /// Add or delete.
    pub operation: DatabaseOperation,
    /// Object paragraph.
    pub object_text: String,
}

/// A parsed response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Nrtm3Stream {
    /// START line values; `None` when the server had nothing newer.
    pub header: Option<Nrtm3Header>,
    /// Operations in stream order.
    pub operations: Vec<NrtmOperation>,
}

impl Nrtm3Stream {
    /// Whether the response carries no updates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

enum ParserState {
    AwaitingStart { no_updates: bool },
    InBody(Body),
    Done(Body),
}

struct Body {
    header: Nrtm3Header,
    last_serial: Option<u64>,
    pending: Option<(DatabaseOperation, u64)>,
    operations: Vec<NrtmOperation>,
}

impl Body {
    fn next_expected(&self) -> Result<u64, Nrtm3ParseError> {
        match self.last_serial {
            None => Ok(self.header.first_serial),
            Some(serial) => serial
                .checked_add(1)
                .ok_or(Nrtm3ParseError::SerialOverflow { serial }),
        }
    }

    fn open_operation(
        &mut self,
        operation: DatabaseOperation,
        explicit: Option<u64>,
    ) -> Result<(), Nrtm3ParseError> {
        if let Some((_, serial)) = self.pending {
            return Err(Nrtm3ParseError::MissingObject { serial });
        }
        let expected = self.next_expected()?;
        let serial = match explicit {
            Some(serial) if serial < expected => {
                return Err(Nrtm3ParseError::SerialRegression { serial, expected });
            }
            Some(serial) => serial,
            None => expected,
        };
        if serial > self.header.last_serial {
            return Err(Nrtm3ParseError::SerialOutOfRange {
                serial,
                last: self.header.last_serial,
            });
        }
        self.last_serial = Some(serial);
        self.pending = Some((operation, serial));
        Ok(())
    }

    fn attach_object(&mut self, text: String) -> Result<(), Nrtm3ParseError> {
        let Some((operation, serial)) = self.pending.take() else {
            return Err(Nrtm3ParseError::UnexpectedObject {
                excerpt: text.lines().next().unwrap_or_default().to_owned(),
            });
        };
        self.operations.push(NrtmOperation {
            serial,
            operation,
            object_text: text,
        });
        Ok(())
    }

    fn finish(self) -> Result<Nrtm3Stream, Nrtm3ParseError> {
        if let Some((_, serial)) = self.pending {
            return Err(Nrtm3ParseError::MissingObject { serial });
        }
        if self.last_serial != Some(self.header.last_serial) {
            return Err(Nrtm3ParseError::SerialMismatch {
                expected: self.header.last_serial,
                actual: self.last_serial,
            });
        }
        Ok(Nrtm3Stream {
            header: Some(self.header),
            operations: self.operations,
        })
    }
}

fn strip_comment_marker(line: &str) -> Option<&str> {
    line.strip_prefix('%')
        .or_else(|| line.strip_prefix('#'))
        .map(str::trim_start)
}

fn parse_start(line: &str, expected_source: &str) -> Result<Nrtm3Header, Nrtm3ParseError> {
    let malformed = || Nrtm3ParseError::MalformedStart {
        line: line.to_owned(),
    };
    let rest = strip_comment_marker(line)
        .and_then(|rest| rest.strip_prefix("START"))
        .ok_or_else(malformed)?;
    let mut words = rest.split_whitespace();
    if words.next() != Some("Version:") {
        return Err(malformed());
    }
    let version_text = words.next().ok_or_else(malformed)?;
    let source = words.next().ok_or_else(malformed)?;
    let range = words.next().ok_or_else(malformed)?;
    if let Some(extra) = words.next()
        && extra != "FILTERED"
    {
        return Err(malformed());
    }

    let version = version_text
        .parse::<u8>()
        .ok()
        .filter(|version| SUPPORTED_VERSIONS.contains(version))
        .ok_or_else(|| Nrtm3ParseError::UnsupportedVersion {
            version: version_text.to_owned(),
        })?;
    if !source.eq_ignore_ascii_case(expected_source) {
        return Err(Nrtm3ParseError::SourceMismatch {
            expected: expected_source.to_owned(),
            found: source.to_owned(),
        });
    }
    let (first, last) = range.split_once('-').ok_or_else(malformed)?;
    let first_serial = first.parse().map_err(|_| malformed())?;
    let last_serial = last.parse().map_err(|_| malformed())?;
    if first_serial > last_serial {
        return Err(malformed());
    }
    Ok(Nrtm3Header {
        version,
        source: source.to_ascii_uppercase(),
        first_serial,
        last_serial,
    })
}

fn parse_operation_line(line: &str) -> Option<(DatabaseOperation, Option<Option<u64>>)> {
    let mut words = line.split_whitespace();
    let operation = words.next()?.parse::<DatabaseOperation>().ok()?;
    let serial = match (words.next(), words.next()) {
        (None, _) => Some(None),
        (Some(serial), None) => serial.parse().ok().map(Some),
        _ => None,
    };
    Some((operation, serial))
}

fn is_no_updates_notice(comment: &str) -> bool {
    let lower = comment.to_ascii_lowercase();
    lower.contains("no newer updates") || lower.starts_with("warning: 4")
}

fn is_error_line(comment: &str) -> bool {
    comment.to_ascii_uppercase().starts_with("ERROR")
}

/// Parse a complete NRTM v3 response for `expected_source`.
///
/// # Errors
///
/// Returns [`Nrtm3ParseError`] for every protocol violation; parsing never
/// recovers.
pub fn parse_stream(text: &str, expected_source: &str) -> Result<Nrtm3Stream, Nrtm3ParseError> {
    let mut state = ParserState::AwaitingStart { no_updates: false };

    for paragraph in split_paragraphs_with_comments(text) {
        let mut lines = paragraph.lines().peekable();
        while let Some(line) = lines.next_if(|line| strip_comment_marker(line).is_some()) {
            let comment = strip_comment_marker(line).unwrap_or_default();
            if is_error_line(comment) {
                return Err(Nrtm3ParseError::ServerError {
                    message: line.to_owned(),
                });
            }
            if comment.starts_with("START") {
                state = match state {
                    ParserState::AwaitingStart { .. } => ParserState::InBody(Body {
                        header: parse_start(line, expected_source)?,
                        last_serial: None,
                        pending: None,
                        operations: Vec::new(),
                    }),
                    ParserState::InBody(_) | ParserState::Done(_) => {
                        return Err(Nrtm3ParseError::DuplicateStart {
                            line: line.to_owned(),
                        });
                    }
                };
            } else if comment.starts_with("END") {
                state = match state {
                    ParserState::InBody(body) => ParserState::Done(body),
                    other => other,
                };
            } else if is_no_updates_notice(comment)
                && let ParserState::AwaitingStart { no_updates } = &mut state
            {
                *no_updates = true;
            }
        }

        let content: Vec<&str> = lines.collect();
        let Some(first) = content.first() else {
            continue;
        };
        let body = match &mut state {
            ParserState::InBody(body) => body,
            ParserState::Done(_) => continue,
            ParserState::AwaitingStart { .. } => {
                return Err(Nrtm3ParseError::BeforeStart {
                    content: format!("`{first}`"),
                });
            }
        };

        match parse_operation_line(first) {
            Some((_, None)) => {
                return Err(Nrtm3ParseError::MalformedOperation {
                    line: (*first).to_owned(),
                });
            }
            Some((operation, Some(serial))) => {
                body.open_operation(operation, serial)?;
                if content.len() > 1 {
                    body.attach_object(join_lines(&content[1..]))?;
                }
            }
            None => body.attach_object(join_lines(&content))?,
        }
    }

    match state {
        ParserState::AwaitingStart { no_updates: true } => Ok(Nrtm3Stream::default()),
        ParserState::AwaitingStart { no_updates: false } => Err(Nrtm3ParseError::MissingStart),
        ParserState::InBody(body) | ParserState::Done(body) => body.finish(),
    }
}

fn join_lines(lines: &[&str]) -> String {
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// Paragraphs including comment-only ones, which carry START and END.
fn split_paragraphs_with_comments(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    paragraphs
}
