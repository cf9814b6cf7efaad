use infoengine_core::EncodeError;
use infoengine_store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the enroll / identify / remove workflows.
///
/// Everything except `Storage` leaves the stores untouched.
#[derive(Error, Debug)]
pub enum FaceError {
    #[error("{0} is required")]
    Validation(&'static str),
    #[error("cannot read image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no face found in {0}")]
    NoFaceFound(PathBuf),
    #[error("storage: {0}")]
    Storage(StoreError),
    #[error("face model: {0}")]
    Encoder(#[from] EncodeError),
}

impl From<StoreError> for FaceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Validation(field) => FaceError::Validation(field),
            other => FaceError::Storage(other),
        }
    }
}

impl FaceError {
    /// Short text for the person at the keyboard.
    pub fn user_message(&self) -> String {
        match self {
            FaceError::Validation(field) => format!("Missing data: please provide a {field}."),
            FaceError::ImageDecode { path, .. } => {
                format!("Could not open {} as an image.", path.display())
            }
            FaceError::NoFaceFound(_) => "No recognizable face found.".to_string(),
            FaceError::Storage(e) => {
                format!("Storage failure ({e}). The face data may need manual inspection.")
            }
            FaceError::Encoder(e) => format!("Face model failure: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_validation_maps_to_validation() {
        let err: FaceError = StoreError::Validation("name").into();
        assert!(matches!(err, FaceError::Validation("name")));
        assert_eq!(err.user_message(), "Missing data: please provide a name.");
    }

    #[test]
    fn test_other_store_errors_are_storage() {
        let err: FaceError = StoreError::InvalidPhotoName("/".into()).into();
        assert!(matches!(err, FaceError::Storage(_)));
        assert!(err.user_message().contains("manual inspection"));
    }
}
