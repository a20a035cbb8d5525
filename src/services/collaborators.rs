//! External collaborator seams: content encryption, file storage, and the
//! notification/audit sink. The service depends on these traits only; real
//! backends live outside this crate. Notifier failures are logged and
//! swallowed, cipher/store failures surface as `Unavailable`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppError;

/// Sealed content produced by the cipher at the persistence boundary.
#[derive(Debug, Clone)]
pub struct SealedContent {
    pub ciphertext: String,
    pub key_id: String,
}

#[async_trait]
pub trait ContentCipher: Send + Sync {
    async fn encrypt(&self, plaintext: &str, conversation_id: Uuid)
        -> Result<SealedContent, AppError>;
    async fn decrypt(&self, ciphertext: &str, key_id: &str) -> Result<String, AppError>;
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub file_id: Uuid,
    pub url: String,
    pub size: i64,
    pub mime_type: String,
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn store(
        &self,
        file_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredFile, AppError>;
    async fn retrieve(&self, file_id: Uuid) -> Result<Vec<u8>, AppError>;
    async fn delete(&self, file_id: Uuid) -> Result<(), AppError>;
}

/// Fire-and-forget notification/audit sink. Implementations must not block
/// the primary mutation; callers never propagate failures from here.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: Uuid, payload: Value);
    async fn notify_urgent(&self, user_id: Uuid, payload: Value);
    async fn log_event(&self, event: Value);
}

/// Default cipher: marks content with a key id without transforming it.
/// Stands in for the external encryption service in dev and tests.
pub struct PassthroughCipher;

#[async_trait]
impl ContentCipher for PassthroughCipher {
    async fn encrypt(
        &self,
        plaintext: &str,
        conversation_id: Uuid,
    ) -> Result<SealedContent, AppError> {
        Ok(SealedContent {
            ciphertext: plaintext.to_string(),
            key_id: format!("local-{conversation_id}"),
        })
    }

    async fn decrypt(&self, ciphertext: &str, _key_id: &str) -> Result<String, AppError> {
        Ok(ciphertext.to_string())
    }
}

/// In-memory file store for dev and tests.
#[derive(Default)]
pub struct LocalFileStore {
    files: RwLock<HashMap<Uuid, (StoredFile, Vec<u8>)>>,
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn store(
        &self,
        file_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredFile, AppError> {
        let file_id = Uuid::new_v4();
        let stored = StoredFile {
            file_id,
            url: format!("/files/{file_id}/{file_name}"),
            size: bytes.len() as i64,
            mime_type: mime_type.to_string(),
        };
        self.files
            .write()
            .await
            .insert(file_id, (stored.clone(), bytes));
        Ok(stored)
    }

    async fn retrieve(&self, file_id: Uuid) -> Result<Vec<u8>, AppError> {
        self.files
            .read()
            .await
            .get(&file_id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or(AppError::NotFound)
    }

    async fn delete(&self, file_id: Uuid) -> Result<(), AppError> {
        self.files
            .write()
            .await
            .remove(&file_id)
            .map(|_| ())
            .ok_or(AppError::NotFound)
    }
}

/// Default sink: structured log lines only.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, user_id: Uuid, payload: Value) {
        tracing::info!(%user_id, %payload, "notification");
    }

    async fn notify_urgent(&self, user_id: Uuid, payload: Value) {
        tracing::warn!(%user_id, %payload, "urgent notification");
    }

    async fn log_event(&self, event: Value) {
        tracing::info!(%event, "audit event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_file_store_round_trip() {
        let store = LocalFileStore::default();
        let stored = store
            .store("scan.pdf", "application/pdf", vec![1, 2, 3])
            .await
            .unwrap();
        assert_eq!(stored.size, 3);

        let bytes = store.retrieve(stored.file_id).await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);

        store.delete(stored.file_id).await.unwrap();
        assert!(matches!(
            store.retrieve(stored.file_id).await,
            Err(AppError::NotFound)
        ));
    }
}
