use tracing::{debug, instrument, warn};

use crate::consts;
use crate::instance::Instance;
use crate::note::Document;
use crate::store::{DocReference, FILES_REFERENCED_BY_VIEW, MAX_STRING, ViewRequest};
use crate::vfs::{self, CozyMetadata, DirDoc};

impl Document {
    /// The directory the note file goes in.
    pub(crate) async fn parent_dir_id(&self, inst: &Instance) -> vfs::Result<String> {
        if !self.dir_id.is_empty() {
            return Ok(self.dir_id.clone());
        }
        ensure_notes_dir(inst).await
    }
}

fn notes_reference() -> DocReference {
    DocReference {
        doc_type: consts::APPS.to_string(),
        id: format!("{}/{}", consts::APPS, consts::NOTES_SLUG),
    }
}

/// Returns the id of the directory referenced by the notes app, creating it
/// under the root when there is none.
///
/// When several directories carry the reference, the first one in key order
/// wins. A directory created concurrently at the same path is reused; if
/// attaching the reference to it fails, it is still returned.
#[instrument(skip(inst), fields(domain = %inst.domain()))]
pub async fn ensure_notes_dir(inst: &Instance) -> vfs::Result<String> {
    let reference = notes_reference();
    let key = vec![reference.doc_type.clone(), reference.id.clone()];
    let mut end = key.clone();
    end.push(MAX_STRING.to_string());
    let req = ViewRequest {
        start_key: key,
        end_key: end,
        include_docs: true,
    };
    let res = inst.store().exec_view(&FILES_REFERENCED_BY_VIEW, &req)?;
    if let Some(row) = res.rows.first() {
        let path = row.doc.as_ref().and_then(|d| d.get("path")).and_then(|p| p.as_str());
        debug!("Using notes directory {} ({})", row.id, path.unwrap_or("?"));
        return Ok(row.id.clone());
    }

    let fs = inst.vfs();
    let dirname = inst.translate(consts::NOTES_DIR_NAME);
    let mut dir = DirDoc::new_with_path(dirname, consts::ROOT_DIR_ID, "/")?;
    dir.add_referenced_by(reference.clone());
    dir.cozy_metadata = Some(CozyMetadata::new(inst.page_url("/").as_str()));
    match fs.create_dir(&mut dir).await {
        Ok(()) => {
            debug!("Created notes directory {}", dir.doc_id);
            Ok(dir.doc_id)
        }
        Err(e) if e.is_conflict() => {
            debug!("Notes directory {} already exists", dir.fullpath);
            let old = fs.dir_by_path(&dir.fullpath).await?;
            let mut new = old.clone();
            new.add_referenced_by(reference);
            if let Err(e) = fs.update_dir_doc(&old, &mut new).await {
                warn!("Cannot attach the notes reference to {}: {}", old.doc_id, e);
            }
            Ok(old.doc_id)
        }
        Err(e) => Err(e),
    }
}
