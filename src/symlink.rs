//! Linking a placed keg into the prefix.
//!
//! Files in `<keg>/bin` and `<keg>/share` get relative symlinks in
//! `<prefix>/bin` and `<prefix>/share`. `libexec` stays private to the keg.
//! Each link is created under a temporary name and renamed into place, so a
//! link path either does not exist or points at a complete keg.

use crate::cellar::Prefix;
use std::fs;
use std::io;
use std::os::unix::fs as unix_fs;
use std::path::{Path, PathBuf};

/// Keg directories that are linked into the prefix
const LINKABLE_DIRS: &[&str] = &["bin", "share"];

/// A link created by [`link_keg`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub path: PathBuf,
    /// Target of the link this one replaced
    pub previous: Option<PathBuf>,
}

/// Link every file of `keg` (which belongs to formula `name`) into the prefix
///
/// Existing links into another version of the same formula are replaced. Any
/// other existing file is a conflict and nothing is overwritten. On error, the
/// links created so far are rolled back.
pub fn link_keg(prefix: &Prefix, name: &str, keg: &Path) -> io::Result<Vec<Link>> {
    let mut linked = Vec::new();
    if let Err(e) = link_dirs(prefix, name, keg, &mut linked) {
        unlink(&linked);
        return Err(e);
    }
    Ok(linked)
}

fn link_dirs(prefix: &Prefix, name: &str, keg: &Path, linked: &mut Vec<Link>) -> io::Result<()> {
    let rack = prefix.rack(name);

    for dir_name in LINKABLE_DIRS {
        let source_dir = keg.join(dir_name);
        if !source_dir.is_dir() {
            continue;
        }

        let target_dir = prefix.root().join(dir_name);
        fs::create_dir_all(&target_dir)?;

        let mut entries: Vec<_> = fs::read_dir(&source_dir)?.collect::<io::Result<_>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let target = target_dir.join(entry.file_name());
            let relative = relative_source(prefix, &entry.path());

            let previous = match fs::read_link(&target) {
                Ok(existing) if existing == relative => continue,
                Ok(existing) => {
                    if !resolve_link(&target, &existing).starts_with(&rack) {
                        return Err(conflict(&target));
                    }
                    Some(existing)
                }
                Err(_) if target.symlink_metadata().is_ok() => return Err(conflict(&target)),
                Err(_) => None,
            };

            replace_symlink(&relative, &target)?;
            linked.push(Link {
                path: target,
                previous,
            });
        }
    }

    Ok(())
}

/// Undo links previously returned by [`link_keg`]
///
/// A link that replaced another one is pointed back at the old target.
pub fn unlink(links: &[Link]) {
    for link in links.iter().rev() {
        let path = &link.path;
        let is_symlink = path
            .symlink_metadata()
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if !is_symlink {
            continue;
        }
        let result = match &link.previous {
            Some(previous) => replace_symlink(previous, path),
            None => fs::remove_file(path),
        };
        if let Err(e) = result {
            tracing::warn!(link = %path.display(), error = %e, "failed to roll back link");
        }
    }
}

/// `../Cellar/<name>/<version>/bin/<file>` when the keg lives under the prefix
fn relative_source(prefix: &Prefix, source: &Path) -> PathBuf {
    match source.strip_prefix(prefix.root()) {
        Ok(rel) => Path::new("..").join(rel),
        Err(_) => source.to_path_buf(),
    }
}

/// Where `link_target` (read from `link`) points, without touching the filesystem
fn resolve_link(link: &Path, link_target: &Path) -> PathBuf {
    if link_target.is_relative() {
        let parent = link.parent().unwrap_or(Path::new("/"));
        normalize_path(&parent.join(link_target))
    } else {
        link_target.to_path_buf()
    }
}

/// Lexically resolve `.` and `..` components
pub fn normalize_path(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

fn replace_symlink(source: &Path, target: &Path) -> io::Result<()> {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = target.with_file_name(format!(".{}.keg-link-{}", file_name, std::process::id()));

    let _ = fs::remove_file(&tmp);
    unix_fs::symlink(source, &tmp)?;
    if let Err(e) = fs::rename(&tmp, target) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

fn conflict(target: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("refusing to overwrite {}", target.display()),
    )
}
