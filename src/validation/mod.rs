//! File validation
//!
//! The whitelist and size bound shared by the issuance service and the
//! upload controller. Both sides call into this module so the two checks
//! can never drift apart.
//!
//! # Example
//!
//! ```
//! use tsubame_uploadr::validation::{validate, Rejection};
//!
//! assert!(validate("report.pdf", "application/pdf", 1024).is_ok());
//! assert_eq!(
//!     validate("malware.exe", "application/x-msdownload", 1024),
//!     Err(Rejection::InvalidType)
//! );
//! ```

use thiserror::Error;

/// Maximum accepted file size (100 MiB)
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// MIME type -> accepted extensions (lowercase, with leading dot)
pub const ALLOWED_FILE_TYPES: &[(&str, &[&str])] = &[
    ("image/jpeg", &[".jpg", ".jpeg"]),
    ("image/png", &[".png"]),
    ("application/pdf", &[".pdf"]),
    ("text/plain", &[".txt"]),
    ("application/msword", &[".doc"]),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        &[".docx"],
    ),
    ("application/vnd.ms-excel", &[".xls"]),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        &[".xlsx"],
    ),
];

/// Why a file was rejected
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    #[error("File exceeds maximum size (100MB)")]
    SizeExceeded,

    #[error("Invalid file type or extension")]
    InvalidType,
}

/// Decide whether a file may be uploaded.
///
/// The size bound is checked before the type, so a file violating both is
/// reported as [`Rejection::SizeExceeded`].
pub fn validate(name: &str, content_type: &str, size: u64) -> Result<(), Rejection> {
    if size > MAX_FILE_SIZE {
        return Err(Rejection::SizeExceeded);
    }
    if !validate_type(name, content_type) {
        return Err(Rejection::InvalidType);
    }
    Ok(())
}

/// Check the file's extension against the extensions whitelisted for `content_type`.
///
/// The extension comparison is case-insensitive; the MIME type must match exactly.
pub fn validate_type(name: &str, content_type: &str) -> bool {
    let extension = extension(name).to_lowercase();
    allowed_extensions(content_type)
        .map(|allowed| allowed.contains(&extension.as_str()))
        .unwrap_or(false)
}

/// Extensions accepted for a MIME type, if the type is whitelisted
pub fn allowed_extensions(content_type: &str) -> Option<&'static [&'static str]> {
    ALLOWED_FILE_TYPES
        .iter()
        .find(|(mime, _)| *mime == content_type)
        .map(|(_, extensions)| *extensions)
}

/// Infer a whitelisted MIME type from a file name's extension
pub fn content_type_for(name: &str) -> Option<&'static str> {
    let extension = extension(name).to_lowercase();
    if extension.is_empty() {
        return None;
    }
    ALLOWED_FILE_TYPES
        .iter()
        .find(|(_, extensions)| extensions.contains(&extension.as_str()))
        .map(|(mime, _)| *mime)
}

/// Final path component of a file name (`/` and `\` both separate)
pub fn basename(name: &str) -> &str {
    let trimmed = name.trim_end_matches(['/', '\\']);
    match trimmed.rfind(['/', '\\']) {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Split a file name into base and extension.
///
/// The extension keeps its leading dot. A name whose only dot is the first
/// character (`.txt`, `.env`) has no extension; a trailing dot is an
/// extension of its own (`file.` -> `("file", ".")`).
pub fn split_extension(name: &str) -> (&str, &str) {
    let base = basename(name);
    match base.rfind('.') {
        Some(0) | None => (base, ""),
        Some(idx) => base.split_at(idx),
    }
}

/// Extension of a file name including the leading dot, or `""`
pub fn extension(name: &str) -> &str {
    split_extension(name).1
}

/// Coarse file kind used for icons and previews
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Image,
    Pdf,
    Spreadsheet,
    Document,
    Other,
}

impl FileCategory {
    pub fn from_content_type(content_type: &str) -> Self {
        if content_type.starts_with("image/") {
            Self::Image
        } else if content_type.starts_with("application/pdf") {
            Self::Pdf
        } else if content_type.starts_with("application/vnd.ms-excel")
            || content_type
                .starts_with("application/vnd.openxmlformats-officedocument.spreadsheetml")
        {
            Self::Spreadsheet
        } else if content_type.starts_with("application/msword")
            || content_type
                .starts_with("application/vnd.openxmlformats-officedocument.wordprocessingml")
        {
            Self::Document
        } else {
            Self::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_accepts_every_whitelisted_pair() {
        for (mime, extensions) in ALLOWED_FILE_TYPES {
            for ext in *extensions {
                let name = format!("file{}", ext);
                assert_eq!(validate(&name, mime, 10 * MB), Ok(()), "{} {}", name, mime);
            }
        }
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        assert!(validate_type("PHOTO.JPG", "image/jpeg"));
        assert!(validate_type("Report.Pdf", "application/pdf"));
    }

    #[test]
    fn test_size_boundary() {
        assert_eq!(validate("a.png", "image/png", MAX_FILE_SIZE), Ok(()));
        assert_eq!(
            validate("a.png", "image/png", MAX_FILE_SIZE + 1),
            Err(Rejection::SizeExceeded)
        );
        assert_eq!(
            validate("bigfile.png", "image/png", 150 * MB),
            Err(Rejection::SizeExceeded)
        );
    }

    #[test]
    fn test_rejects_unknown_type() {
        assert_eq!(
            validate("malware.exe", "application/x-msdownload", MB),
            Err(Rejection::InvalidType)
        );
    }

    #[test]
    fn test_rejects_extension_type_mismatch() {
        assert_eq!(
            validate("photo.png", "image/jpeg", MB),
            Err(Rejection::InvalidType)
        );
        assert_eq!(validate("notes", "text/plain", MB), Err(Rejection::InvalidType));
        assert_eq!(validate(".pdf", "application/pdf", MB), Err(Rejection::InvalidType));
    }

    #[test]
    fn test_size_reported_before_type() {
        assert_eq!(
            validate("malware.exe", "application/x-msdownload", 200 * MB),
            Err(Rejection::SizeExceeded)
        );
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("report.pdf"), ("report", ".pdf"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension("README"), ("README", ""));
        assert_eq!(split_extension(".txt"), (".txt", ""));
        assert_eq!(split_extension("file."), ("file", "."));
        assert_eq!(split_extension("dir/sub/photo.png"), ("photo", ".png"));
        assert_eq!(split_extension("C:\\docs\\a.docx"), ("a", ".docx"));
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a.JPEG"), Some("image/jpeg"));
        assert_eq!(content_type_for("sheet.xlsx"), ALLOWED_FILE_TYPES.last().map(|(m, _)| *m));
        assert_eq!(content_type_for("a.exe"), None);
        assert_eq!(content_type_for("noext"), None);
    }

    #[test]
    fn test_file_category() {
        assert_eq!(FileCategory::from_content_type("image/png"), FileCategory::Image);
        assert_eq!(FileCategory::from_content_type("application/pdf"), FileCategory::Pdf);
        assert_eq!(
            FileCategory::from_content_type("application/vnd.ms-excel"),
            FileCategory::Spreadsheet
        );
        assert_eq!(
            FileCategory::from_content_type("application/msword"),
            FileCategory::Document
        );
        assert_eq!(FileCategory::from_content_type("text/plain"), FileCategory::Other);
    }
}
