//! Rules shared by every import path for accepting mirrored objects and
//! for replacing a source wholesale.

use tracing::{info, warn};

use super::ports::{DatabaseTransaction, RpslParser};
use super::{MirrorError, RpslObject, SourceConfig};

/// Parse mirrored object text and decide whether to keep it.
///
/// Unparseable objects and objects claiming another source are skipped with
/// a warning; classes outside the source's filter are skipped silently.
pub(crate) fn admit_object(
    parser: &dyn RpslParser,
    source: &SourceConfig,
    text: &str,
) -> Option<RpslObject> {
    let object = match parser.parse(text) {
        Ok(object) => object,
        Err(err) => {
            warn!(source = %source.name, error = %err, "skipping unparseable mirrored object");
            return None;
        }
    };
    if !object.source.eq_ignore_ascii_case(&source.name) {
        warn!(
            source = %source.name,
            object_source = %object.source,
            pk = %object.pk,
            "skipping mirrored object for another source"
        );
        return None;
    }
    source.accepts_class(&object.object_class).then_some(object)
}

/// End the NRTM v4 session published for `source` after a full reload.
///
/// A reload deletes the old objects through the journal but loads the new
/// ones with journaling off, so the journal no longer leads from the
/// published version to the stored objects. Dropping the server status makes
/// the next publication run start a new session from a fresh snapshot.
pub(crate) async fn end_published_session(
    txn: &mut dyn DatabaseTransaction,
    source: &str,
) -> Result<(), MirrorError> {
    let published = txn
        .status_for(source)
        .await?
        .and_then(|status| status.nrtm4_server);
    if let Some(server) = published {
        info!(
            source,
            session = %server.session_id,
            version = server.version,
            "full reload ends the published NRTM v4 session"
        );
        txn.update_server_status(source, None).await?;
    }
    Ok(())
}
