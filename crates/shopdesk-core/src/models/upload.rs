use std::fmt;
use std::path::Path;

use crate::api::ApiError;

/// Largest profile picture the backend accepts (5 MB)
pub const MAX_PROFILE_PICTURE_BYTES: usize = 5 * 1024 * 1024;

/// Extensions the backend accepts for profile pictures
const PROFILE_PICTURE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

/// An image file ready to be sent as a multipart part.
#[derive(Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    /// Wrap image bytes. The MIME type comes from the file extension and
    /// anything that is not an image is rejected.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, ApiError> {
        let file_name = file_name.into();
        let mime_type = image_mime_type(&file_name).ok_or_else(|| {
            ApiError::InvalidRequest(format!("{} is not a supported image file", file_name))
        })?;
        Ok(Self {
            file_name,
            mime_type: mime_type.to_string(),
            bytes,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ApiError::InvalidRequest(format!("Invalid file path: {}", path.display())))?;
        // Check the extension before reading a possibly large file
        if image_mime_type(file_name).is_none() {
            return Err(ApiError::InvalidRequest(format!(
                "{} is not a supported image file",
                file_name
            )));
        }
        let bytes = std::fs::read(path).map_err(|e| {
            ApiError::InvalidRequest(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::new(file_name, bytes)
    }

    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Apply the backend's profile picture limits: jpg/jpeg/png/gif, at most 5 MB
    pub fn check_profile_picture(&self) -> Result<(), ApiError> {
        let allowed = self
            .extension()
            .map(|ext| PROFILE_PICTURE_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false);
        if !allowed {
            return Err(ApiError::InvalidRequest(format!(
                "Profile picture must be one of: {}",
                PROFILE_PICTURE_EXTENSIONS.join(", ")
            )));
        }
        if self.len() > MAX_PROFILE_PICTURE_BYTES {
            return Err(ApiError::InvalidRequest(
                "Profile picture cannot exceed 5MB.".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageUpload")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

fn image_mime_type(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}
