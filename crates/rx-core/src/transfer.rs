//! Directory trees as tar streams
//!
//! Every entry path is checked before anything touches the filesystem: it
//! must be relative and must not climb out of the destination with `..`.
//! Symlink targets may not contain `..` at all, and nothing is written
//! beneath a symlink that already exists in the destination. Offending
//! entries are skipped and listed in [`UploadAck::rejected`].
//!
//! All functions here are blocking; async callers run them on
//! `spawn_blocking` behind a `SyncIoBridge`.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use tar::{Archive, Builder, EntryType};

use rx_protocol::UploadAck;

use crate::error::TransferError;

/// Returns true if `path` stays beneath the directory it is joined onto.
///
/// Absolute paths, drive prefixes and any `..` component are refused.
pub fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && path.components().any(|c| matches!(c, Component::Normal(_)))
}

/// Returns true if a symlink target cannot leave the directory the link is
/// written into.
///
/// Targets must be relative and free of `..`. Resolution then only moves
/// down, even through other links from the same archive.
fn link_target_contained(target: &Path) -> bool {
    !target.as_os_str().is_empty()
        && target
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Shell-style wildcard match supporting `*` and `?`
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();

    let (mut p, mut n) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            mark = n;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            mark += 1;
            n = mark;
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Destination for entries read from an archive
pub trait TarReceiver {
    /// A directory entry
    fn on_directory(&mut self, path: &Path) -> Result<(), TransferError>;

    /// A regular file entry; `reader` yields exactly `size` bytes
    fn on_file(&mut self, path: &Path, size: u64, reader: &mut dyn Read)
        -> Result<(), TransferError>;

    /// A symlink entry whose target has already been checked.
    ///
    /// Returns false if the receiver does not store links.
    fn on_symlink(&mut self, _path: &Path, _target: &Path) -> Result<bool, TransferError> {
        Ok(false)
    }
}

/// Writes archive entries under a local root directory
#[derive(Debug, Clone)]
pub struct DirectoryReceiver {
    root: PathBuf,
}

impl DirectoryReceiver {
    /// Create a receiver rooted at `root`. The directory is created on demand.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join `path` onto the root, refusing paths whose existing parents
    /// include a symlink.
    fn resolve(&self, path: &Path) -> Result<PathBuf, TransferError> {
        if !is_contained(path) {
            return Err(TransferError::TraversalRejected(path.to_path_buf()));
        }

        let mut current = self.root.clone();
        if let Some(parent) = path.parent() {
            for component in parent.components() {
                current.push(component);
                match current.symlink_metadata() {
                    Ok(meta) if meta.file_type().is_symlink() => {
                        return Err(TransferError::TraversalRejected(path.to_path_buf()));
                    }
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(self.root.join(path))
    }
}

impl TarReceiver for DirectoryReceiver {
    fn on_directory(&mut self, path: &Path) -> Result<(), TransferError> {
        fs::create_dir_all(self.resolve(path)?)?;
        Ok(())
    }

    fn on_file(
        &mut self,
        path: &Path,
        _size: u64,
        reader: &mut dyn Read,
    ) -> Result<(), TransferError> {
        let dest = self.resolve(path)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        // Replace rather than write through an existing link
        if dest.symlink_metadata().is_ok_and(|m| m.file_type().is_symlink()) {
            fs::remove_file(&dest)?;
        }
        let mut file = File::create(&dest)?;
        io::copy(reader, &mut file)?;
        Ok(())
    }

    #[cfg(unix)]
    fn on_symlink(&mut self, path: &Path, target: &Path) -> Result<bool, TransferError> {
        let dest = self.resolve(path)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        if dest.symlink_metadata().is_ok() {
            fs::remove_file(&dest)?;
        }
        std::os::unix::fs::symlink(target, &dest)?;
        Ok(true)
    }
}

/// Read an archive and hand each safe entry to `receiver`
pub fn receive_tar<R: Read>(
    reader: R,
    receiver: &mut dyn TarReceiver,
) -> Result<UploadAck, TransferError> {
    let mut archive = Archive::new(reader);
    let mut ack = UploadAck::default();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();

        if path.components().all(|c| c == Component::CurDir) {
            continue;
        }
        if !is_contained(&path) {
            tracing::warn!("Rejected archive entry outside base path: {:?}", path);
            ack.rejected.push(path.display().to_string());
            continue;
        }

        let entry_type = entry.header().entry_type();
        let written = match entry_type {
            EntryType::Directory => receiver.on_directory(&path).map(|_| true),
            EntryType::Regular | EntryType::Continuous => {
                let size = entry.size();
                receiver.on_file(&path, size, &mut entry).map(|_| true)
            }
            EntryType::Symlink => {
                let target = entry
                    .link_name()?
                    .map(|t| t.into_owned())
                    .unwrap_or_default();
                if !link_target_contained(&target) {
                    tracing::warn!("Rejected symlink {:?} -> {:?}", path, target);
                    ack.rejected.push(path.display().to_string());
                    continue;
                }
                let stored = receiver.on_symlink(&path, &target);
                if let Ok(false) = stored {
                    tracing::debug!("Receiver does not store symlinks, skipped {:?}", path);
                }
                stored
            }
            EntryType::XGlobalHeader | EntryType::XHeader | EntryType::GNULongName => Ok(false),
            other => {
                tracing::warn!("Skipping unsupported archive entry {:?} ({:?})", path, other);
                Ok(false)
            }
        };

        match written {
            Ok(true) => ack.written += 1,
            Ok(false) => {}
            Err(TransferError::TraversalRejected(rejected)) => {
                tracing::warn!("Rejected archive entry through a symlink: {:?}", rejected);
                ack.rejected.push(path.display().to_string());
            }
            Err(e) => return Err(e),
        }
    }

    Ok(ack)
}

/// Unpack an archive beneath `base`, creating it if missing
pub fn unpack_tar<R: Read>(reader: R, base: &Path) -> Result<UploadAck, TransferError> {
    fs::create_dir_all(base)?;
    let mut receiver = DirectoryReceiver::new(base);
    let ack = receive_tar(reader, &mut receiver)?;
    tracing::info!(
        "Unpacked archive into {:?}: {} written, {} rejected",
        base,
        ack.written,
        ack.rejected.len()
    );
    Ok(ack)
}

/// Write `dir` as a tar archive to `writer`.
///
/// With a pattern, only files whose name matches are included and
/// directories are implied by file paths. Symlinks are not followed.
/// Returns the number of files written.
pub fn pack_tar<W: Write>(
    writer: W,
    dir: &Path,
    pattern: Option<&str>,
) -> Result<u64, TransferError> {
    if !dir.is_dir() {
        return Err(TransferError::NotADirectory(dir.to_path_buf()));
    }

    let mut builder = Builder::new(writer);
    builder.follow_symlinks(false);

    let mut count = 0;
    pack_dir(&mut builder, dir, Path::new(""), pattern, &mut count)?;
    builder.into_inner()?.flush()?;

    tracing::debug!("Packed {} files from {:?}", count, dir);
    Ok(count)
}

fn pack_dir<W: Write>(
    builder: &mut Builder<W>,
    dir: &Path,
    relative: &Path,
    pattern: Option<&str>,
    count: &mut u64,
) -> Result<(), TransferError> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        let path = entry.path();
        let rel = relative.join(&name);
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            if pattern.is_none() {
                builder.append_dir(&rel, &path)?;
            }
            pack_dir(builder, &path, &rel, pattern, count)?;
        } else if file_type.is_file() {
            let matches = pattern
                .map(|p| wildcard_match(p, &name.to_string_lossy()))
                .unwrap_or(true);
            if matches {
                builder.append_path_with_name(&path, &rel)?;
                *count += 1;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tar::Header;
    use tempfile::TempDir;

    /// Append a regular file entry without the builder's path validation
    fn append_raw(builder: &mut Builder<Vec<u8>>, name: &str, data: &[u8]) {
        let mut header = Header::new_old();
        {
            let raw = &mut header.as_old_mut().name;
            raw[..name.len()].copy_from_slice(name.as_bytes());
        }
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        header.set_cksum();
        builder.append(&header, data).unwrap();
    }

    fn append_file(builder: &mut Builder<Vec<u8>>, name: &str, data: &[u8]) {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data).unwrap();
    }

    #[test]
    fn test_is_contained() {
        assert!(is_contained(Path::new("a/b.txt")));
        assert!(is_contained(Path::new("./a")));
        assert!(!is_contained(Path::new("../a")));
        assert!(!is_contained(Path::new("a/../../b")));
        assert!(!is_contained(Path::new("/etc/passwd")));
        assert!(!is_contained(Path::new("")));
        assert!(!is_contained(Path::new(".")));
    }

    #[test]
    fn test_link_target_contained() {
        assert!(link_target_contained(Path::new("b/c")));
        assert!(link_target_contained(Path::new(".")));
        assert!(!link_target_contained(Path::new("../b")));
        assert!(!link_target_contained(Path::new("a/../b")));
        assert!(!link_target_contained(Path::new("/etc")));
        assert!(!link_target_contained(Path::new("")));
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("*.log", "server.log"));
        assert!(!wildcard_match("*.log", "server.txt"));
        assert!(wildcard_match("file?.txt", "file1.txt"));
        assert!(!wildcard_match("file?.txt", "file10.txt"));
        assert!(wildcard_match("a*b*c", "aXXbYYc"));
        assert!(!wildcard_match("a*b*c", "aXXbYY"));
        assert!(wildcard_match("", ""));
    }

    #[test]
    fn test_unpack_rejects_traversal() {
        let outer = TempDir::new().unwrap();
        let base = outer.path().join("upload");

        let mut builder = Builder::new(Vec::new());
        append_file(&mut builder, "good/hello.txt", b"hello");
        append_raw(&mut builder, "../../etc/passwd", b"root::0:0");
        append_raw(&mut builder, "../escape.txt", b"nope");
        append_file(&mut builder, "top.txt", b"top");
        let archive = builder.into_inner().unwrap();

        let ack = unpack_tar(archive.as_slice(), &base).unwrap();
        assert_eq!(ack.written, 2);
        assert_eq!(ack.rejected, vec!["../../etc/passwd", "../escape.txt"]);

        assert_eq!(fs::read(base.join("good/hello.txt")).unwrap(), b"hello");
        assert_eq!(fs::read(base.join("top.txt")).unwrap(), b"top");
        assert!(!outer.path().join("escape.txt").exists());
        assert!(!outer.path().join("etc").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_unpack_rejects_escaping_symlink() {
        let outer = TempDir::new().unwrap();
        let base = outer.path().join("upload");

        let mut builder = Builder::new(Vec::new());
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        header.set_cksum();
        builder
            .append_link(&mut header, "evil", "../../etc")
            .unwrap();

        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        header.set_cksum();
        builder
            .append_link(&mut header, "dir/ok", "target.txt")
            .unwrap();

        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        header.set_cksum();
        builder
            .append_link(&mut header, "dir/up", "../target.txt")
            .unwrap();
        let archive = builder.into_inner().unwrap();

        let ack = unpack_tar(archive.as_slice(), &base).unwrap();
        assert_eq!(ack.rejected, vec!["evil", "dir/up"]);
        assert_eq!(ack.written, 1);
        assert!(base.join("evil").symlink_metadata().is_err());
        assert!(base.join("dir/ok").symlink_metadata().is_ok());
    }

    fn append_symlink(builder: &mut Builder<Vec<u8>>, name: &str, target: &str) {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        header.set_cksum();
        builder.append_link(&mut header, name, target).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_unpack_rejects_chained_symlinks() {
        let outer = TempDir::new().unwrap();
        let base = outer.path().join("upload");

        let mut builder = Builder::new(Vec::new());
        append_symlink(&mut builder, "a", ".");
        append_symlink(&mut builder, "a/b", "..");
        append_file(&mut builder, "a/b/pwned.txt", b"pwned");
        append_file(&mut builder, "a/inside.txt", b"no");
        let archive = builder.into_inner().unwrap();

        let ack = unpack_tar(archive.as_slice(), &base).unwrap();
        assert_eq!(ack.written, 1);
        assert_eq!(ack.rejected, vec!["a/b", "a/b/pwned.txt", "a/inside.txt"]);
        assert!(!outer.path().join("pwned.txt").exists());
        assert!(!base.join("pwned.txt").exists());
        assert!(base.join("a").symlink_metadata().unwrap().file_type().is_symlink());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_replaces_existing_symlink() {
        let outer = TempDir::new().unwrap();
        let base = outer.path().join("upload");
        fs::create_dir_all(&base).unwrap();
        fs::write(outer.path().join("victim.txt"), "keep").unwrap();
        std::os::unix::fs::symlink("../victim.txt", base.join("link")).unwrap();

        let mut builder = Builder::new(Vec::new());
        append_file(&mut builder, "link", b"overwrite");
        let archive = builder.into_inner().unwrap();

        let ack = unpack_tar(archive.as_slice(), &base).unwrap();
        assert_eq!(ack.written, 1);
        assert_eq!(fs::read_to_string(outer.path().join("victim.txt")).unwrap(), "keep");
        assert_eq!(fs::read_to_string(base.join("link")).unwrap(), "overwrite");
    }

    #[test]
    fn test_pack_and_receive() {
        let src = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("logs/old")).unwrap();
        fs::write(src.path().join("readme.md"), "docs").unwrap();
        fs::write(src.path().join("logs/a.log"), "a").unwrap();
        fs::write(src.path().join("logs/old/b.log"), "b").unwrap();
        fs::create_dir(src.path().join("empty")).unwrap();

        let mut archive = Vec::new();
        let count = pack_tar(&mut archive, src.path(), None).unwrap();
        assert_eq!(count, 3);

        let dest = TempDir::new().unwrap();
        let mut receiver = DirectoryReceiver::new(dest.path());
        let ack = receive_tar(archive.as_slice(), &mut receiver).unwrap();
        assert!(ack.rejected.is_empty());

        assert_eq!(fs::read_to_string(dest.path().join("readme.md")).unwrap(), "docs");
        assert_eq!(fs::read_to_string(dest.path().join("logs/old/b.log")).unwrap(), "b");
        assert!(dest.path().join("empty").is_dir());
    }

    #[test]
    fn test_pack_with_pattern() {
        let src = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("logs")).unwrap();
        fs::write(src.path().join("readme.md"), "docs").unwrap();
        fs::write(src.path().join("logs/a.log"), "a").unwrap();

        let mut archive = Vec::new();
        assert_eq!(pack_tar(&mut archive, src.path(), Some("*.log")).unwrap(), 1);

        let dest = TempDir::new().unwrap();
        unpack_tar(archive.as_slice(), dest.path()).unwrap();
        assert!(dest.path().join("logs/a.log").exists());
        assert!(!dest.path().join("readme.md").exists());
    }

    #[test]
    fn test_pack_missing_directory() {
        let dir = TempDir::new().unwrap();
        let result = pack_tar(Vec::new(), &dir.path().join("missing"), None);
        assert!(matches!(result, Err(TransferError::NotADirectory(_))));
    }

    #[test]
    fn test_receiver_refuses_escaping_path() {
        let dir = TempDir::new().unwrap();
        let mut receiver = DirectoryReceiver::new(dir.path());
        let result = receiver.on_file(Path::new("../x"), 1, &mut &b"x"[..]);
        assert!(matches!(result, Err(TransferError::TraversalRejected(_))));
    }
}
