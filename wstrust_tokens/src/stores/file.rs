//! A file-backed token store

use std::{
    error, io,
    path::{Path, PathBuf},
};

use aliri_base64::Base64Url;
use async_trait::async_trait;
use tokio::{
    fs::{self, OpenOptions},
    sync::Mutex,
};
use wstrust::{CacheKeyRef, SecurityToken, TokenId, TokenIdRef};

use super::{association_property, TokenStore};

/// A token store keeping one JSON file per record in a directory
///
/// Records are written to a temporary file, then moved into place, so a reader never sees a
/// partially written record. Writes through a single store are serialized.
#[derive(Debug)]
pub struct FileTokenStore {
    directory: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    /// Constructs a store in `directory`, which is created on first write
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// The directory holding the records
    #[inline]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn record_path(&self, id: &TokenIdRef) -> PathBuf {
        let name = Base64Url::from_raw(id.as_str().as_bytes()).to_string();
        self.directory.join(format!("{}.json", name))
    }

    async fn read_record(&self, id: &TokenIdRef) -> Result<Option<SecurityToken>, io::Error> {
        let data = match fs::read_to_string(self.record_path(id)).await {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let token = serde_json::from_str(&data)?;
        Ok(Some(token))
    }

    async fn write_record(&self, token: &SecurityToken) -> Result<(), io::Error> {
        use tokio::io::AsyncWriteExt;

        fs::create_dir_all(&self.directory).await?;

        let path = self.record_path(token.id());
        let temp_path = path.with_extension("json.tmp");

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&temp_path).await?;
        let data = serde_json::to_string_pretty(token)?;
        file.write_all(data.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &path).await
    }

    async fn remove_record(&self, id: &TokenIdRef) -> Result<(), io::Error> {
        match fs::remove_file(self.record_path(id)).await {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn get(
        &self,
        id: &TokenIdRef,
    ) -> Result<Option<SecurityToken>, Box<dyn error::Error + Send + Sync + 'static>> {
        Ok(self.read_record(id).await?)
    }

    async fn put(
        &self,
        token: &SecurityToken,
    ) -> Result<(), Box<dyn error::Error + Send + Sync + 'static>> {
        let _guard = self.write_lock.lock().await;
        Ok(self.write_record(token).await?)
    }

    async fn remove(
        &self,
        id: &TokenIdRef,
    ) -> Result<(), Box<dyn error::Error + Send + Sync + 'static>> {
        let _guard = self.write_lock.lock().await;
        Ok(self.remove_record(id).await?)
    }

    async fn put_association(
        &self,
        delegation_id: &TokenIdRef,
        cache_key: &CacheKeyRef,
        issued_id: &TokenIdRef,
    ) -> Result<(), Box<dyn error::Error + Send + Sync + 'static>> {
        let _guard = self.write_lock.lock().await;
        let mut placeholder = self
            .read_record(delegation_id)
            .await?
            .unwrap_or_else(|| SecurityToken::new(TokenId::from(delegation_id)));
        placeholder.set_property(association_property(cache_key), issued_id.as_str());
        Ok(self.write_record(&placeholder).await?)
    }
}
