use std::path::Path;

use anyhow::{Context, Result};
use cnidarium::Storage;

use crate::feeds::store::WATERMARK_PREFIX;
use crate::verify::store::EMAIL_PREFIX;

/// Open the cnidarium database shared by the feed watermarks and the
/// verified-email directory. Each gets its own substore prefix.
pub async fn open(data_dir: &Path) -> Result<Storage> {
    std::fs::create_dir_all(data_dir)?;
    let prefixes = vec![WATERMARK_PREFIX.to_string(), EMAIL_PREFIX.to_string()];
    Storage::load(data_dir.to_path_buf(), prefixes)
        .await
        .context("Failed to init cnidarium storage")
}

#[cfg(test)]
pub async fn scratch(tag: &str) -> (Storage, std::path::PathBuf) {
    let dir = std::env::temp_dir().join(format!(
        "feedrelay-{}-{}",
        tag,
        blake3::hash(format!("{:?}", std::time::SystemTime::now()).as_bytes()).to_hex()
    ));
    let storage = open(&dir).await.expect("scratch storage");
    (storage, dir)
}
