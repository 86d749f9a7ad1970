//! Out-of-line storage for large index entry ciphertext

use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::Result;

/// Ciphertext files sharded by the first two characters of the file name
///
/// ```text
/// blobs/
///   ab/
///     abXz...%3D%3D_9f0c2a7e11d4b356.bin
///   cd/
///     cd78..._03aa41be9c07f2d8.bin
/// ```
///
/// The content is already compressed and encrypted, so it is written as is.
pub struct BlobDir {
    root: PathBuf,
}

impl BlobDir {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// File name for one sealed version of a message. IDs may contain `/`
    /// and `=`, so encode. The IV prefix gives each version its own file,
    /// so a rewrite never touches the file a committed row points at.
    pub fn file_name(message_id: &str, iv: &[u8]) -> String {
        let version: String = iv.iter().take(8).map(|b| format!("{b:02x}")).collect();
        format!("{}_{}.bin", urlencoding::encode(message_id), version)
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.path(file_name).is_file()
    }

    fn path(&self, file_name: &str) -> PathBuf {
        let shard = file_name.get(..2).unwrap_or("xx");
        self.root.join(shard).join(file_name)
    }

    /// Write atomically (temp file, then rename)
    pub fn put(&self, file_name: &str, data: &[u8]) -> Result<()> {
        let path = self.path(file_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, data)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    pub fn get(&self, file_name: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path(file_name)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete(&self, file_name: &str) -> Result<()> {
        match fs::remove_file(self.path(file_name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Move every blob out of the way, then remove them. A crash between
    /// the two steps leaves a tombstone that [`BlobDir::sweep`] finishes.
    pub fn clear(&self) -> Result<()> {
        let tombstone = self.tombstone();
        if self.root.exists() {
            if tombstone.exists() {
                fs::remove_dir_all(&tombstone)?;
            }
            fs::rename(&self.root, &tombstone)?;
        }
        fs::create_dir_all(&self.root)?;
        self.sweep();
        Ok(())
    }

    /// Remove a leftover tombstone from an interrupted clear
    pub fn sweep(&self) {
        let tombstone = self.tombstone();
        if tombstone.exists() {
            if let Err(e) = fs::remove_dir_all(&tombstone) {
                warn!("Failed to remove blob tombstone {:?}: {}", tombstone, e);
            }
        }
    }

    /// Bytes on disk across all shards
    pub fn total_bytes(&self) -> Result<u64> {
        let mut total = 0;
        for shard in fs::read_dir(&self.root)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for file in fs::read_dir(shard.path())? {
                total += file?.metadata()?.len();
            }
        }
        Ok(total)
    }

    fn tombstone(&self) -> PathBuf {
        tombstone_path(&self.root)
    }
}

/// Where `dir` is moved before it is removed. Appends to the whole file
/// name: per-user directories can differ only after their last `.`.
pub(crate) fn tombstone_path(dir: &Path) -> PathBuf {
    let mut name = dir.file_name().map(OsString::from).unwrap_or_default();
    name.push(".deleting");
    dir.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_put_get_delete() {
        let dir = tempdir().unwrap();
        let blobs = BlobDir::new(dir.path().join("blobs")).unwrap();
        let name = BlobDir::file_name("abc/def==", &[0xAB; 24]);

        assert!(!name.contains('/'));
        assert!(name.ends_with("_abababababababab.bin"));
        assert!(!blobs.contains(&name));
        blobs.put(&name, b"ciphertext").unwrap();
        assert!(blobs.contains(&name));
        assert_eq!(blobs.get(&name).unwrap().unwrap(), b"ciphertext");
        assert_eq!(blobs.total_bytes().unwrap(), 10);

        blobs.delete(&name).unwrap();
        assert!(blobs.get(&name).unwrap().is_none());
        // Deleting twice is fine
        blobs.delete(&name).unwrap();
    }

    #[test]
    fn test_clear_removes_everything() {
        let dir = tempdir().unwrap();
        let blobs = BlobDir::new(dir.path().join("blobs")).unwrap();
        blobs.put(&BlobDir::file_name("m1", &[1; 24]), b"one").unwrap();
        blobs.put(&BlobDir::file_name("m2", &[2; 24]), b"two").unwrap();

        blobs.clear().unwrap();

        assert_eq!(blobs.total_bytes().unwrap(), 0);
        assert!(!dir.path().join("blobs.deleting").exists());
    }

    #[test]
    fn test_versions_get_separate_files() {
        assert_ne!(
            BlobDir::file_name("m1", &[1; 24]),
            BlobDir::file_name("m1", &[2; 24])
        );
    }

    #[test]
    fn test_tombstone_keeps_full_name() {
        let root = Path::new("/data/encryptedSearchIndex_alice%40example.com");
        assert_eq!(
            tombstone_path(root),
            Path::new("/data/encryptedSearchIndex_alice%40example.com.deleting")
        );
        assert_ne!(
            tombstone_path(root),
            tombstone_path(Path::new("/data/encryptedSearchIndex_alice%40example.org"))
        );
    }
}
