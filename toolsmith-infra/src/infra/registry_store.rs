use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use toolsmith_core::{is_valid_tool_name, RegistryStore, StoreError, ToolRecord};
use tracing::warn;

const RECORD_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// One JSON document per tool name under `base_path`.
///
/// A save writes `<name>.tmp`, syncs it, renames it over `<name>.json` and
/// syncs the directory, so a crash leaves either the old or the new document.
pub struct FileRegistryStore {
    base_path: PathBuf,
}

impl FileRegistryStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StoreError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn record_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_tool_name(name) {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.base_path.join(format!("{name}.{RECORD_EXTENSION}")))
    }

    fn load_file(path: &Path) -> Result<ToolRecord, StoreError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    #[cfg(unix)]
    fn sync_dir(&self) -> Result<(), StoreError> {
        File::open(&self.base_path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl RegistryStore for FileRegistryStore {
    fn load_all(&self) -> Result<Vec<ToolRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }

            let record = Self::load_file(&path)?;
            let stem = path.file_stem().and_then(|s| s.to_str());
            if stem != Some(record.name.as_str()) {
                warn!("Skipping registry file {:?}: holds record {:?}", path.file_name(), record.name);
                continue;
            }
            records.push(record);
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    fn save(&self, record: &ToolRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.name)?;
        let temp_path = path.with_extension(TEMP_EXTENSION);

        {
            let mut file = File::create(&temp_path)?;
            serde_json::to_writer_pretty(&mut file, record)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, &path)?;
        self.sync_dir()
    }
}
