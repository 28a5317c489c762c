//! A token store backed by a local file

use std::{collections::HashMap, io, path::PathBuf};

use async_trait::async_trait;
use tokio::{fs::OpenOptions, sync::Mutex};

use super::{StoreError, TokenStore};
use crate::OAuthToken;

/// A token store that keeps all tokens in a single JSON file
///
/// The file maps each key to its token. It is created on first write,
/// readable only by its owner on unix systems. A missing file is treated
/// as an empty store.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileTokenStore {
    /// Constructs a new file token store
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_tokens(&self) -> Result<HashMap<String, OAuthToken>, StoreError> {
        use tokio::io::AsyncReadExt;

        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                tracing::trace!(path = %self.path.display(), "token file does not exist yet");
                return Ok(HashMap::new());
            }
            Err(error) => return Err(error.into()),
        };

        let mut data = String::new();
        file.read_to_string(&mut data).await?;

        if data.trim().is_empty() {
            return Ok(HashMap::new());
        }

        Ok(serde_json::from_str(&data)?)
    }

    async fn write_tokens(&self, tokens: &HashMap<String, OAuthToken>) -> Result<(), StoreError> {
        use tokio::io::AsyncWriteExt;

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&self.path).await?;
        let data = serde_json::to_string_pretty(tokens)?;
        file.write_all(data.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn get(&self, key: &str) -> Result<OAuthToken, StoreError> {
        let _guard = self.lock.lock().await;
        let mut tokens = self.read_tokens().await?;

        Ok(tokens.remove(key).unwrap_or_default())
    }

    async fn set(&self, key: &str, token: &OAuthToken) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }

        let _guard = self.lock.lock().await;
        let mut tokens = self.read_tokens().await?;
        tokens.insert(key.to_owned(), token.clone());
        self.write_tokens(&tokens).await?;

        tracing::trace!(path = %self.path.display(), "persisted token to file");
        Ok(())
    }
}
