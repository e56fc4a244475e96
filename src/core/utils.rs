use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use flate2::read::GzDecoder;
use zip::ZipArchive;

pub fn extract_zip<R: Read + Seek>(data: R, dest: &Path) -> anyhow::Result<()> {
    let mut archive = ZipArchive::new(data)?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;

        // ZIP Slip vulnerability protection
        let file_path = match file.enclosed_name() {
            Some(path) => path.to_owned(),
            None => continue,
        };

        let outpath = dest.join(&file_path);

        if file.is_dir() {
            std::fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&outpath)?;
            std::io::copy(&mut file, &mut outfile)?;
            #[cfg(unix)]
            if let Some(mode) = file.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))?;
            }
        }
    }

    Ok(())
}

/// Extract a zip archive from a file on disk
pub fn extract_zip_file(source: &Path, dest: &Path) -> anyhow::Result<()> {
    let file = File::open(source).with_context(|| format!("Failed to open {:?}", source))?;
    extract_zip(file, dest)
}

/// Extract a gzipped tarball from a file on disk
pub fn extract_tar_gz_file(source: &Path, dest: &Path) -> anyhow::Result<()> {
    let file = File::open(source).with_context(|| format!("Failed to open {:?}", source))?;
    std::fs::create_dir_all(dest)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);
    archive
        .unpack(dest)
        .with_context(|| format!("Failed to unpack {:?}", source))
}

/// Copy a file creating missing parent directories; permission bits are kept
pub async fn copy_file_rec(source: &Path, target: &Path) -> anyhow::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(source, target)
        .await
        .with_context(|| format!("Failed to copy {:?} to {:?}", source, target))?;
    Ok(())
}

/// Current unix time in seconds
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Random 128-bit name encoded as lowercase hex
pub fn random_name() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Lexically normalize a path: drop `.`, resolve `..` and never climb above the root
pub fn clean_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match result.components().next_back() {
                Some(Component::Normal(_)) => {
                    result.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => result.push(".."),
            },
            other => result.push(other.as_os_str()),
        }
    }
    if result.as_os_str().is_empty() {
        result.push(".");
    }
    result
}

/// Join a path that may be absolute onto `base`, treating it as relative to `base`
pub fn join_rooted(base: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix("/") {
        Ok(relative) => base.join(relative),
        Err(_) => base.join(path),
    }
}
