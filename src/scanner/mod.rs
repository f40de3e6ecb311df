mod exif;

pub use self::exif::{extract_meta, PhotoMeta};

use crate::error::{PhotoStoryError, Result};
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use photo_story_common::{ImageSource, UploadedImage};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

pub fn scan_folder(folder: &Path) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        return Err(PhotoStoryError::FolderNotFound(folder.display().to_string()));
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(folder)
        .max_depth(1) // 直下のみ（再帰しない）
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .map(|ext| is_image_extension(&ext.to_string_lossy()))
                .unwrap_or(false)
        })
        .collect();

    // ファイル名でソート
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    Ok(paths)
}

/// フォルダ内の写真を読み込む
pub fn load_folder(folder: &Path, max_size: u32) -> Result<Vec<UploadedImage>> {
    let paths = scan_folder(folder)?;
    if paths.is_empty() {
        return Err(PhotoStoryError::NoImagesFound(folder.display().to_string()));
    }
    paths.iter().map(|p| load_image(p, max_size)).collect()
}

pub fn load_image(path: &Path, max_size: u32) -> Result<UploadedImage> {
    let bytes = std::fs::read(path)
        .map_err(|e| PhotoStoryError::ImageLoad(format!("{}: {}", path.display(), e)))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let meta = extract_meta(&bytes).unwrap_or_default();
    let id = image_id(&bytes);

    let (mime_type, data) = match downsize(&bytes, max_size) {
        Ok(Some(jpeg)) => ("image/jpeg".to_string(), jpeg),
        Ok(None) => (mime_from_path(path).to_string(), bytes),
        Err(e) => {
            warn!(file = %file_name, error = %e, "画像を縮小できないため原寸で送信");
            (mime_from_path(path).to_string(), bytes)
        }
    };
    debug!(file = %file_name, id = %id, bytes = data.len(), "画像を読み込み");

    Ok(UploadedImage {
        id,
        file_name,
        mime_type,
        data,
        taken_at: meta.taken_at,
        location: meta.location,
        source: ImageSource::User,
        description: None,
    })
}

/// 内容から決まるID（SHA-256 先頭12桁）
pub fn image_id(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)[..12].to_string()
}

/// 長辺が max_size を超える場合だけ縮小して JPEG にする
fn downsize(bytes: &[u8], max_size: u32) -> std::result::Result<Option<Vec<u8>>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    if img.width().max(img.height()) <= max_size {
        return Ok(None);
    }

    let resized = img.resize(max_size, max_size, FilterType::Triangle);
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(Some(out.into_inner()))
}

fn mime_from_path(path: &Path) -> &'static str {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

fn is_image_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_is_image_extension() {
        assert!(is_image_extension("jpg"));
        assert!(is_image_extension("JPG"));
        assert!(is_image_extension("jpeg"));
        assert!(is_image_extension("png"));
        assert!(is_image_extension("webp"));
        assert!(!is_image_extension("txt"));
        assert!(!is_image_extension("gif"));
    }

    #[test]
    fn test_scan_folder_not_found() {
        let result = scan_folder(Path::new("/nonexistent/folder"));
        assert!(matches!(result, Err(PhotoStoryError::FolderNotFound(_))));
    }

    #[test]
    fn test_scan_folder_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("c.jpg")).unwrap().write_all(b"dummy").unwrap();
        File::create(dir.path().join("a.PNG")).unwrap().write_all(b"dummy").unwrap();
        File::create(dir.path().join("b.webp")).unwrap().write_all(b"dummy").unwrap();
        File::create(dir.path().join("readme.txt")).unwrap().write_all(b"text").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        File::create(dir.path().join("sub").join("d.jpg")).unwrap();

        let names: Vec<String> = scan_folder(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.PNG", "b.webp", "c.jpg"]);
    }

    #[test]
    fn test_load_folder_empty() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load_folder(dir.path(), 1568),
            Err(PhotoStoryError::NoImagesFound(_))
        ));
    }

    #[test]
    fn test_load_image_downsizes_large_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wide.png");
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(400, 100, Rgb([200, 100, 50]));
        img.save(&path).unwrap();

        let loaded = load_image(&path, 200).unwrap();
        assert_eq!(loaded.mime_type, "image/jpeg");
        let decoded = image::load_from_memory(&loaded.data).unwrap();
        assert_eq!(decoded.width(), 200);
        assert_eq!(decoded.height(), 50);
        assert_eq!(loaded.id.len(), 12);
        assert_eq!(loaded.source, ImageSource::User);
    }

    #[test]
    fn test_load_image_small_keeps_original() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("small.png");
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(10, 10, Rgb([0, 0, 0]));
        img.save(&path).unwrap();

        let loaded = load_image(&path, 200).unwrap();
        assert_eq!(loaded.mime_type, "image/png");
        assert_eq!(loaded.data, fs::read(&path).unwrap());
    }

    #[test]
    fn test_image_id_is_stable() {
        assert_eq!(image_id(b"abc"), image_id(b"abc"));
        assert_ne!(image_id(b"abc"), image_id(b"abd"));
        assert_eq!(image_id(b"abc"), "ba7816bf8f01");
    }
}
