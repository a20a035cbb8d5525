//! Attachment storage behind the `FileStore` seam. Uploads are gated per
//! conversation so only callers with `can_manage_files` can attach or remove
//! content; the returned `Attachment` is what message senders embed.

use uuid::Uuid;

use crate::capabilities::require;
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::middleware::guards::ConversationAccess;
use crate::models::Attachment;
use crate::services::collaborators::StoredFile;
use crate::state::AppState;

/// Uploads above this size are rejected before touching the store.
const MAX_FILE_BYTES: usize = 25 * 1024 * 1024;

pub struct FileService;

impl FileService {
    pub async fn upload(
        state: &AppState,
        auth: &AuthContext,
        conversation_id: Uuid,
        file_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<Attachment, AppError> {
        if file_name.trim().is_empty() || file_name.len() > 255 {
            return Err(AppError::validation(
                "file_name",
                "file name must be 1-255 characters",
            ));
        }
        if bytes.is_empty() {
            return Err(AppError::validation("file", "file content is empty"));
        }
        if bytes.len() > MAX_FILE_BYTES {
            return Err(AppError::validation("file", "file exceeds the size limit"));
        }

        let access = ConversationAccess::verify(&state.db, auth, conversation_id).await?;
        require(access.caps.can_manage_files, "can_manage_files")?;

        let stored = state.files.store(file_name, mime_type, bytes).await?;
        Ok(Self::attachment(file_name, stored))
    }

    pub async fn download(
        state: &AppState,
        _auth: &AuthContext,
        file_id: Uuid,
    ) -> Result<Vec<u8>, AppError> {
        state.files.retrieve(file_id).await
    }

    pub async fn delete(
        state: &AppState,
        auth: &AuthContext,
        conversation_id: Uuid,
        file_id: Uuid,
    ) -> Result<(), AppError> {
        let access = ConversationAccess::verify(&state.db, auth, conversation_id).await?;
        require(access.caps.can_manage_files, "can_manage_files")?;
        state.files.delete(file_id).await
    }

    /// The caller supplies the display name; everything else comes from the
    /// store's receipt.
    fn attachment(file_name: &str, stored: StoredFile) -> Attachment {
        Attachment {
            file_id: stored.file_id,
            file_name: file_name.to_string(),
            mime_type: stored.mime_type,
            size: stored.size,
            url: stored.url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_carries_the_store_receipt() {
        let file_id = Uuid::new_v4();
        let stored = StoredFile {
            file_id,
            url: format!("/files/{file_id}/scan.pdf"),
            size: 2048,
            mime_type: "application/pdf".to_string(),
        };
        let attachment = FileService::attachment("scan.pdf", stored);
        assert_eq!(attachment.file_id, file_id);
        assert_eq!(attachment.file_name, "scan.pdf");
        assert_eq!(attachment.size, 2048);
        assert_eq!(attachment.url, format!("/files/{file_id}/scan.pdf"));
    }
}
