// ABOUTME: Attachment storage helpers: on-disk layout, kind mapping, base64 framing
// ABOUTME: Files live at <storage_dir>/<type>/<id>/<id>.<ext> with a JSON metadata sidecar

pub mod downloader;
pub mod uploader;

pub use downloader::Downloader;
pub use uploader::Uploader;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::Path;

use crate::cache::attachment::CachedAttachment;
use crate::error::{AdapterError, Result};

/// File extension groups used for the on-disk type directories.
const EXTENSION_KINDS: &[(&str, &[&str])] = &[
    ("image", &["jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff", "tif", "svg", "heic", "heif"]),
    ("video", &["mp4", "mov", "avi", "mkv", "wmv", "flv", "webm", "3gp", "m4v", "mpeg", "mpg", "ts"]),
    ("audio", &["mp3", "wav", "ogg", "flac", "m4a", "aac", "wma", "opus", "aiff"]),
    ("document", &["pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp", "txt", "rtf", "csv"]),
    ("archive", &["zip", "rar", "7z", "tar", "gz", "bz2", "xz", "iso"]),
    ("code", &["py", "js", "rs", "html", "css", "java", "c", "cpp", "h", "php", "rb", "json", "xml", "sql", "sh", "bat"]),
    ("ebook", &["epub", "mobi", "azw", "azw3", "fb2"]),
    ("font", &["ttf", "otf", "woff", "woff2", "eot"]),
    ("3d_model", &["obj", "stl", "fbx", "3ds", "blend"]),
    ("executable", &["exe", "dll", "app", "msi", "apk", "deb", "rpm"]),
    ("sticker", &["tgs"]),
];

/// Determine the attachment type directory for a file extension.
pub fn kind_for_extension(extension: Option<&str>) -> &'static str {
    let Some(extension) = extension else {
        return "document";
    };
    let lowered = extension.to_lowercase();
    for (kind, extensions) in EXTENSION_KINDS {
        if extensions.contains(&lowered.as_str()) {
            return kind;
        }
    }
    "document"
}

/// Extract a usable extension from a filename.
pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Strip a filename down to safe characters.
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '.' || *c == '-' || *c == '_')
        .collect()
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_base64(content: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(content)
        .map_err(|e| AdapterError::Attachment(format!("invalid base64 content: {}", e)))
}

/// Write an attachment's bytes and metadata sidecar under the storage dir.
pub async fn store_attachment(
    storage_dir: &Path,
    attachment: &CachedAttachment,
    bytes: &[u8],
) -> Result<()> {
    let dir = storage_dir.join(attachment.dir_path());
    tokio::fs::create_dir_all(&dir).await?;

    tokio::fs::write(storage_dir.join(attachment.file_path()), bytes).await?;

    let metadata = serde_json::to_string_pretty(attachment)
        .map_err(|e| AdapterError::Attachment(format!("failed to serialize metadata: {}", e)))?;
    tokio::fs::write(storage_dir.join(attachment.metadata_path()), metadata).await?;

    tracing::info!(
        attachment_id = %attachment.attachment_id,
        size = bytes.len(),
        "Stored attachment"
    );
    Ok(())
}

/// Read an attachment's bytes back from disk.
pub async fn load_attachment(storage_dir: &Path, attachment: &CachedAttachment) -> Result<Vec<u8>> {
    let path = storage_dir.join(attachment.file_path());
    tokio::fs::read(&path).await.map_err(|e| {
        AdapterError::Attachment(format!(
            "failed to read attachment {}: {}",
            attachment.attachment_id, e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_for_extension() {
        assert_eq!(kind_for_extension(Some("jpg")), "image");
        assert_eq!(kind_for_extension(Some("PNG")), "image");
        assert_eq!(kind_for_extension(Some("mp4")), "video");
        assert_eq!(kind_for_extension(Some("tgs")), "sticker");
        assert_eq!(kind_for_extension(Some("weird")), "document");
        assert_eq!(kind_for_extension(None), "document");
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("photo.JPG").as_deref(), Some("jpg"));
        assert_eq!(extension_of("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension_of("noext"), None);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("my file (1).png"), "myfile1.png");
        assert_eq!(sanitize_filename("../../../etc/passwd"), "......etcpasswd");
    }

    #[test]
    fn test_base64_round_trip() {
        let bytes = b"attachment payload";
        let encoded = encode_base64(bytes);
        assert_eq!(decode_base64(&encoded).unwrap(), bytes);
    }

    #[test]
    fn test_decode_base64_rejects_garbage() {
        assert!(decode_base64("not base64 at all!!!").is_err());
    }
}
