//! Ports connecting the mirroring domain to storage, transport and parsing.

mod macros;
pub(crate) use macros::define_port_error;

mod database_handler;
mod file_retriever;
mod nrtm_stream_source;
mod publication_directory;
mod rpsl_parser;

#[cfg(test)]
pub use database_handler::MockDatabaseHandler;
pub use database_handler::{DatabaseHandler, DatabaseHandlerError, DatabaseTransaction};
#[cfg(test)]
pub use file_retriever::MockFileRetriever;
pub use file_retriever::{BufferedFile, FileRetriever, LocalFile, RetrievalError};
#[cfg(test)]
pub use nrtm_stream_source::MockNrtmStreamSource;
pub use nrtm_stream_source::{NrtmStreamError, NrtmStreamSource};
pub use publication_directory::{
    PendingFile, PublicationDirectory, PublicationError, PublishedEntry,
};
#[cfg(test)]
pub use rpsl_parser::MockRpslParser;
pub use rpsl_parser::{RpslParseError, RpslParser};
