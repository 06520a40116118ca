//! Storage of uploaded files (courier avatars and delivery signatures).

use crate::{
    error::Error,
    schema::{self, File},
    sql::db::Connection,
    Context,
};
use async_std::fs;
use clap::Args;
use rand::RngCore;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// File storage options.
#[derive(Clone, Debug, Args)]
pub struct Options {
    /// Directory where uploaded files are stored.
    #[clap(long, env = "COURIER_UPLOAD_DIR", default_value = "tmp/uploads")]
    pub upload_dir: PathBuf,

    /// Public base URL of this server, used to build links to uploaded files.
    #[clap(long, env = "COURIER_APP_URL", default_value = "http://localhost:3333")]
    pub app_url: String,
}

impl Options {
    /// Open the upload directory, creating it if necessary.
    pub async fn storage(&self) -> Result<Storage, Error> {
        Storage::open(&self.upload_dir, &self.app_url).await
    }
}

/// The directory holding uploaded files.
#[derive(Clone, Debug)]
pub struct Storage {
    dir: PathBuf,
    app_url: String,
}

impl Storage {
    pub async fn open(dir: impl Into<PathBuf>, app_url: &str) -> Result<Self, Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            app_url: app_url.trim_end_matches('/').to_string(),
        })
    }

    /// The public URL of a stored file.
    pub fn url(&self, path: &str) -> String {
        format!("{}/files/{path}", self.app_url)
    }

    /// Store `contents` under a fresh random name which keeps the extension of `original_name`.
    async fn save(&self, original_name: &str, contents: &[u8]) -> Result<String, Error> {
        let mut bytes = [0; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let mut path = hex::encode(bytes);
        if let Some(ext) = Path::new(original_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        {
            path = format!("{path}.{}", ext.to_ascii_lowercase());
        }
        fs::write(self.dir.join(&path), contents).await?;
        Ok(path)
    }

    /// Resolve the stored name of a file to its location on disk.
    ///
    /// Returns [`None`] for names we could not have generated, so that requests cannot escape the
    /// upload directory.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let valid = !path.is_empty()
            && !path.starts_with('.')
            && path.chars().all(|c| c.is_ascii_alphanumeric() || c == '.');
        valid.then(|| self.dir.join(path))
    }
}

/// A file as shown to API clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileView {
    pub id: i32,
    pub name: String,
    pub path: String,
    pub url: String,
}

impl FileView {
    pub fn new(file: File, storage: &Storage) -> Self {
        Self {
            url: storage.url(&file.path),
            id: file.id,
            name: file.name,
            path: file.path,
        }
    }
}

/// A file attached to another entity, such as a courier's avatar.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Avatar {
    pub name: String,
    pub path: String,
    pub url: String,
}

impl Avatar {
    pub fn new(file: File, storage: &Storage) -> Self {
        Self {
            url: storage.url(&file.path),
            name: file.name,
            path: file.path,
        }
    }
}

/// Store an uploaded file and record it.
pub async fn upload<C: Connection>(
    ctx: &Context<C>,
    name: Option<String>,
    contents: &[u8],
) -> Result<FileView, Error> {
    let name = crate::validate::required_text(name)?;
    if contents.is_empty() {
        return Err(Error::validation_fails());
    }
    let path = ctx.storage.save(&name, contents).await?;
    let file: File = schema::create(
        &ctx.conn,
        vec![("name", name.into()), ("path", path.into())],
    )
    .await?;
    tracing::info!(id = file.id, path = %file.path, "stored file");
    Ok(FileView::new(file, &ctx.storage))
}

/// Locate a stored file for download.
pub async fn locate<C: Connection>(ctx: &Context<C>, path: &str) -> Result<PathBuf, Error> {
    let not_found = || Error::not_found("File not found!");
    let location = ctx.storage.resolve(path).ok_or_else(not_found)?;
    if !async_std::path::Path::new(&location).is_file().await {
        return Err(not_found());
    }
    Ok(location)
}
