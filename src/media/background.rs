use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

use crate::error::{Result, SkitError};

const VIDEO_EXTENSIONS: [&str; 7] = ["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"];

/// All video files under `pool_dir`, sorted by path
pub fn list_backgrounds<P: AsRef<Path>>(pool_dir: P) -> Vec<PathBuf> {
    let mut videos: Vec<PathBuf> = WalkDir::new(pool_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .map(|entry| entry.path().to_path_buf())
        .collect();

    videos.sort();
    videos
}

/// Pick a background clip; the same run id always gets the same clip
pub fn select_background<P: AsRef<Path>>(pool_dir: P, run_id: &str) -> Result<PathBuf> {
    let pool_dir = pool_dir.as_ref();
    let videos = list_backgrounds(pool_dir);
    if videos.is_empty() {
        return Err(SkitError::Render(format!(
            "No background videos found in {}",
            pool_dir.display()
        )));
    }

    let chosen = videos[(fnv1a(run_id.as_bytes()) % videos.len() as u64) as usize].clone();

    info!("Selected background {} from {} candidates", chosen.display(), videos.len());
    Ok(chosen)
}

/// 64-bit FNV-1a; fixed so a choice survives toolchain upgrades
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}
