//! NRTM v3: the legacy streamed text mirroring protocol.

mod import;
mod parser;

pub use import::{Nrtm3ImportOutcome, Nrtm3ImportPorts, Nrtm3ImportRunner};
pub use parser::{Nrtm3Header, Nrtm3ParseError, Nrtm3Stream, NrtmOperation, parse_stream};
