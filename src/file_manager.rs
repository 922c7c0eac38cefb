use std::fmt;
use std::fs::{self, OpenOptions};
use std::io;
use std::io::ErrorKind::InvalidData;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One uploaded medical image. Created with `prediction` empty, updated
/// exactly once after classification, never deleted.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MedicalImageRecord {
    pub id: u32,
    pub image: String,
    pub uploaded_at: DateTime<Utc>,
    pub prediction: Option<String>,
}

impl fmt::Display for MedicalImageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.prediction.as_deref().unwrap_or("Pending");
        write!(f, "Image {} - {}", self.id, state)
    }
}

/// File-backed store for image records: raw uploads under `images/`, one JSON
/// metadata file per record under `records/`, ids assigned monotonically.
pub struct FileManager {
    base_path: PathBuf,
    next_id: u32,
}

impl FileManager {
    pub fn new(base_path: impl Into<PathBuf>) -> io::Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(base_path.join("images"))?;
        fs::create_dir_all(base_path.join("records"))?;

        let mut max_id = 0;
        for entry in fs::read_dir(base_path.join("records"))?.filter_map(|o| o.ok()) {
            let name = entry.file_name();
            let name = name.to_str();
            if let Some(name) = name {
                if !name.ends_with(".json") {
                    continue;
                }
                let id = name.strip_suffix(".json").unwrap();
                if let Ok(id) = id.parse() {
                    max_id = max_id.max(id);
                }
            }
        }

        Ok(Self {
            base_path,
            next_id: max_id + 1,
        })
    }

    /// Stores the upload and its metadata with `prediction` still empty.
    pub fn create_pending(
        &mut self,
        image_bytes: &[u8],
        extension: &str,
    ) -> io::Result<MedicalImageRecord> {
        let id = self.next_id;
        let image = format!("images/{}.{}", id, extension);
        fs::write(self.base_path.join(&image), image_bytes)?;

        let record = MedicalImageRecord {
            id,
            image,
            uploaded_at: Utc::now(),
            prediction: None,
        };
        self.write_record(&record)?;
        self.next_id += 1;
        Ok(record)
    }

    /// The single post-classification update a record ever receives.
    pub fn set_prediction(&mut self, id: u32, prediction: String) -> io::Result<MedicalImageRecord> {
        let mut record = self.get(id)?;
        record.prediction = Some(prediction);
        self.write_record(&record)?;
        Ok(record)
    }

    pub fn get(&self, id: u32) -> io::Result<MedicalImageRecord> {
        let file = OpenOptions::new().read(true).open(self.record_path(id))?;
        serde_json::from_reader(file).map_err(|e| io::Error::new(InvalidData, e))
    }

    pub fn image_path(&self, record: &MedicalImageRecord) -> PathBuf {
        self.base_path.join(&record.image)
    }

    fn write_record(&self, record: &MedicalImageRecord) -> io::Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.record_path(record.id))?;
        serde_json::to_writer(file, record).map_err(|e| io::Error::new(InvalidData, e))
    }

    fn record_path(&self, id: u32) -> PathBuf {
        self.base_path.join("records").join(format!("{}.json", id))
    }
}

/// Extension for the stored copy of an upload, taken from the client filename
/// when it looks sane.
pub fn extension_of(filename: Option<&str>) -> String {
    filename
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "img".to_owned())
}

#[cfg(test)]
mod tests {
    use super::{extension_of, FileManager};

    #[test]
    fn record_is_pending_until_the_prediction_lands() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut manager = FileManager::new(dir.path()).unwrap();

        let record = manager.create_pending(b"fake image bytes", "png").unwrap();
        assert_eq!(record.prediction, None);
        assert_eq!(record.to_string(), "Image 1 - Pending");
        assert_eq!(manager.get(record.id).unwrap().prediction, None);

        let updated = manager
            .set_prediction(record.id, "Healthy (93.42%)".to_owned())
            .unwrap();
        assert_eq!(updated.prediction.as_deref(), Some("Healthy (93.42%)"));
        assert_eq!(updated.uploaded_at, record.uploaded_at);

        let reread = manager.get(record.id).unwrap();
        assert_eq!(reread.prediction.as_deref(), Some("Healthy (93.42%)"));
    }

    #[test]
    fn uploads_land_on_disk_and_ids_survive_restart() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut manager = FileManager::new(dir.path()).unwrap();

        let first = manager.create_pending(b"aaa", "jpg").unwrap();
        let second = manager.create_pending(b"bbb", "png").unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(std::fs::read(manager.image_path(&first)).unwrap(), b"aaa");

        // A fresh manager over the same directory continues the sequence.
        let mut reopened = FileManager::new(dir.path()).unwrap();
        let third = reopened.create_pending(b"ccc", "png").unwrap();
        assert_eq!(third.id, 3);
    }

    #[test]
    fn extensions_are_sanitized() {
        assert_eq!(extension_of(Some("cells.PNG")), "png");
        assert_eq!(extension_of(Some("archive.tar.gz")), "gz");
        assert_eq!(extension_of(Some("noext")), "img");
        assert_eq!(extension_of(Some("bad.<script>")), "img");
        assert_eq!(extension_of(None), "img");
    }
}
