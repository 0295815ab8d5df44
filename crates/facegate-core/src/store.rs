//! Directory of accepted enrollment samples, one file per accepted image.

use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::FaceError;
use crate::sample::SampleImage;
use crate::scan::list_image_files;

const SAMPLE_PREFIX: &str = "user";
const MAX_NAME_ATTEMPTS: usize = 4;

pub struct EnrollmentStore {
    dir: PathBuf,
}

impl EnrollmentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of stored samples.
    pub fn count(&self) -> Result<usize, FaceError> {
        Ok(list_image_files(&self.dir)?.len())
    }

    /// Persist the original bytes of an accepted sample and return its file name.
    ///
    /// The sample is written to a hidden temp file and then hard-linked into
    /// place, so readers never see a partial image and an existing name is
    /// never overwritten.
    pub fn save(&self, sample: &SampleImage) -> Result<String, FaceError> {
        std::fs::create_dir_all(&self.dir)?;

        let staging = self.dir.join(format!(".incoming-{}", Uuid::new_v4().simple()));
        let written = write_staging(&staging, sample.bytes());
        let linked = written.and_then(|()| self.link_unique(&staging, sample.extension()));
        let _ = std::fs::remove_file(&staging);
        let name = linked?;

        tracing::info!(
            dir = %self.dir.display(),
            file = %name,
            bytes = sample.bytes().len(),
            "sample stored"
        );
        Ok(name)
    }

    fn link_unique(&self, staging: &Path, extension: &str) -> Result<String, FaceError> {
        let mut last_err = None;
        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = sample_file_name(Utc::now(), extension);
            match std::fs::hard_link(staging, self.dir.join(&name)) {
                Ok(()) => return Ok(name),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => last_err = Some(e),
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_err
            .unwrap_or_else(|| std::io::Error::from(std::io::ErrorKind::AlreadyExists))
            .into())
    }
}

fn write_staging(path: &Path, bytes: &[u8]) -> Result<(), FaceError> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// `user_YYYYMMDD_HHMMSS_<micros>_<random>.<ext>`
fn sample_file_name(now: DateTime<Utc>, extension: &str) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!(
        "{SAMPLE_PREFIX}_{}_{:06}_{}.{extension}",
        now.format("%Y%m%d_%H%M%S"),
        now.timestamp_subsec_micros(),
        &random[..8]
    )
}
