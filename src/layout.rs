use std::path::{Component, Path, PathBuf};


/// Where each artifact of one prediction lives, locally and in the bucket.
///
/// Every path is scoped by the prediction id, so concurrent requests for the
/// same image never share a file or an object key.
#[derive(Clone, Debug)]
pub struct PredictionLayout {
    root: PathBuf,
}

impl PredictionLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn request_dir(&self, prediction_id: &str) -> PathBuf {
        self.root.join(prediction_id)
    }

    pub fn original_image(&self, prediction_id: &str, img_name: &str) -> PathBuf {
        self.request_dir(prediction_id).join(img_name)
    }

    /// Directory handed to the model as its output location.
    pub fn output_dir(&self, prediction_id: &str) -> PathBuf {
        self.request_dir(prediction_id).join("predicted")
    }

    pub fn annotated_image(&self, prediction_id: &str, img_name: &str) -> PathBuf {
        self.output_dir(prediction_id).join(img_name)
    }

    pub fn labels_dir(&self, prediction_id: &str) -> PathBuf {
        self.output_dir(prediction_id).join("labels")
    }

    /// The model writes `labels/<image stem>.txt` next to the annotated image.
    pub fn label_file(&self, prediction_id: &str, img_name: &str) -> PathBuf {
        let stem = Path::new(img_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| img_name.to_string());
        self.labels_dir(prediction_id).join(format!("{}.txt", stem))
    }

    pub fn predicted_key(prediction_id: &str, img_name: &str) -> String {
        format!("predictions/{}/{}", prediction_id, img_name)
    }
}


/// An image name must be one plain path segment.
pub fn is_valid_image_name(img_name: &str) -> bool {
    if img_name.is_empty() || img_name.contains('/') || img_name.contains('\\') {
        return false;
    }
    let mut components = Path::new(img_name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
