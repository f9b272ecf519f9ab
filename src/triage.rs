//! Routes every image of a source tree to the kept or rejected directory.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use image::{DynamicImage, ImageDecoder, ImageReader, RgbImage};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::{
    classifier::{Judgement, Policy, Rule},
    config::Paths,
    ocr::OcrProvider,
    Detection, ImageFrame, OcrError, TriageError,
};

/// Extensions (lowercase) of files considered candidate images.
pub const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

const PROGRESS_EVERY: usize = 100;

/// Why an image was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectCause {
    /// The policy found disqualifying text.
    ContentRejected,
    /// The file could not be read, decoded or copied.
    IoError,
    /// The OCR provider failed on every attempt.
    OcrError,
}

/// What happened to one source file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub kept: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<RejectCause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judgement: Option<Judgement>,
    /// False when the destination already existed or no destination is configured.
    pub copied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileRecord {
    pub fn rule(&self) -> Option<Rule> {
        self.judgement.and_then(|it| it.decision).map(|it| it.rule)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TriageSummary {
    pub scanned: usize,
    pub kept: usize,
    pub content_rejected: usize,
    pub io_errors: usize,
    pub ocr_errors: usize,
}

impl TriageSummary {
    pub fn rejected(&self) -> usize {
        self.content_rejected + self.io_errors + self.ocr_errors
    }

    fn record(&mut self, record: &FileRecord) {
        self.scanned += 1;
        match record.cause {
            None => self.kept += 1,
            Some(RejectCause::ContentRejected) => self.content_rejected += 1,
            Some(RejectCause::IoError) => self.io_errors += 1,
            Some(RejectCause::OcrError) => self.ocr_errors += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TriageReport {
    pub summary: TriageSummary,
    pub records: Vec<FileRecord>,
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

/// Lists candidate images under `root`, recursively and in sorted order.
///
/// Only a failure to read `root` itself is an error; unreadable subdirectories
/// are logged and skipped.
pub fn collect_images(root: &Path) -> Result<Vec<PathBuf>, TriageError> {
    let entries = fs::read_dir(root).map_err(|source| TriageError::SourceDir {
        path: root.to_path_buf(),
        source,
    })?;

    let mut images = Vec::new();
    let mut pending = vec![entries];
    while let Some(entries) = pending.pop() {
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable directory entry");
                    continue;
                }
            };
            let path = entry.path();
            // Symlinked directories are not followed, so link cycles cannot recurse.
            let is_dir = match entry.file_type() {
                Ok(file_type) => file_type.is_dir(),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if is_dir {
                match fs::read_dir(&path) {
                    Ok(sub) => pending.push(sub),
                    Err(err) => warn!(path = %path.display(), error = %err, "skipping directory"),
                }
            } else if path.is_file() && is_image(&path) {
                images.push(path);
            }
        }
    }
    images.sort();
    Ok(images)
}

/// Decodes `path` upright (EXIF orientation applied) as RGB.
pub fn load_image(path: &Path) -> image::ImageResult<RgbImage> {
    let mut decoder = ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image.to_rgb8())
}

/// Copies `path` into `dir` under its own file name unless that name is taken.
/// The copy keeps the source modification time.
///
/// Returns whether a copy was made.
fn copy_into(path: &Path, dir: &Path) -> io::Result<bool> {
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let destination = dir.join(name);
    if destination.exists() {
        return Ok(false);
    }
    fs::copy(path, &destination)?;
    let modified = fs::metadata(path)?.modified()?;
    fs::OpenOptions::new()
        .write(true)
        .open(&destination)?
        .set_modified(modified)?;
    Ok(true)
}

/// Batch driver: OCR, judge and route each image of the source tree.
pub struct Triage<'p, P: OcrProvider + ?Sized> {
    provider: &'p P,
    policy: Policy,
    paths: Paths,
    ocr_retries: u32,
}

impl<'p, P: OcrProvider + ?Sized> Triage<'p, P> {
    pub fn new(provider: &'p P, policy: Policy, paths: Paths) -> Self {
        Self {
            provider,
            policy,
            paths,
            ocr_retries: 0,
        }
    }

    pub fn ocr_retries(mut self, retries: u32) -> Self {
        self.ocr_retries = retries;
        self
    }

    #[instrument(skip(self), fields(source = %self.paths.source.display()))]
    pub fn run(&self) -> Result<TriageReport, TriageError> {
        if self.policy.needs_rejected_dir() && self.paths.rejected.is_none() {
            return Err(TriageError::MissingRejectedDir);
        }
        let images = collect_images(&self.paths.source)?;
        for dir in std::iter::once(&self.paths.kept).chain(&self.paths.rejected) {
            fs::create_dir_all(dir).map_err(|source| TriageError::DestinationDir {
                path: dir.clone(),
                source,
            })?;
        }
        info!(candidates = images.len(), "starting triage");

        let mut summary = TriageSummary::default();
        let mut records = Vec::with_capacity(images.len());
        for path in images {
            let record = self.process(path);
            summary.record(&record);
            debug!(
                kept = summary.kept,
                rejected = summary.rejected(),
                "{}",
                record.path.display()
            );
            if summary.scanned % PROGRESS_EVERY == 0 {
                info!(
                    scanned = summary.scanned,
                    kept = summary.kept,
                    rejected = summary.rejected(),
                    "progress"
                );
            }
            records.push(record);
        }

        info!(
            kept = summary.kept,
            content_rejected = summary.content_rejected,
            io_errors = summary.io_errors,
            ocr_errors = summary.ocr_errors,
            "triage finished"
        );
        Ok(TriageReport { summary, records })
    }

    fn process(&self, path: PathBuf) -> FileRecord {
        let image = match load_image(&path) {
            Ok(image) => image,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unreadable image");
                return self.reject(path, RejectCause::IoError, None, Some(err.to_string()));
            }
        };
        let frame = match ImageFrame::new(image.width(), image.height()) {
            Ok(frame) => frame,
            Err(err) => {
                return self.reject(path, RejectCause::IoError, None, Some(err.to_string()));
            }
        };

        let detections = match self.detect_with_retries(&path, &image) {
            Ok(detections) => detections,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ocr failed");
                return self.reject(path, RejectCause::OcrError, None, Some(err.to_string()));
            }
        };

        let judgement = self.policy.judge(&detections, frame);
        match judgement.decision {
            Some(decision) => debug!(
                path = %path.display(),
                verdict = %decision.verdict,
                rule = decision.rule.as_str(),
                total_chars = decision.metrics.total_chars,
                total_area_ratio = decision.metrics.total_area_ratio,
                max_region_area_ratio = decision.metrics.max_region_area_ratio,
                max_region_width_ratio = decision.metrics.max_region_width_ratio,
                "classified"
            ),
            None => debug!(path = %path.display(), verdict = judgement.label, "classified"),
        }

        if !judgement.keep {
            return self.reject(path, RejectCause::ContentRejected, Some(judgement), None);
        }
        match copy_into(&path, &self.paths.kept) {
            Ok(copied) => FileRecord {
                path,
                kept: true,
                cause: None,
                judgement: Some(judgement),
                copied,
                error: None,
            },
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to copy kept image");
                self.reject(path, RejectCause::IoError, Some(judgement), Some(err.to_string()))
            }
        }
    }

    fn detect_with_retries(
        &self,
        path: &Path,
        image: &RgbImage,
    ) -> Result<Vec<Detection>, OcrError> {
        let mut attempt = 0;
        loop {
            match self.provider.detect(image) {
                Ok(detections) => return Ok(detections),
                Err(err) if attempt < self.ocr_retries => {
                    attempt += 1;
                    debug!(path = %path.display(), attempt, error = %err, "retrying ocr");
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn reject(
        &self,
        path: PathBuf,
        cause: RejectCause,
        judgement: Option<Judgement>,
        error: Option<String>,
    ) -> FileRecord {
        let copied = match &self.paths.rejected {
            Some(dir) => copy_into(&path, dir).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "failed to copy rejected image");
                false
            }),
            None => false,
        };
        FileRecord {
            path,
            kept: false,
            cause: Some(cause),
            judgement,
            copied,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_image_extensions() {
        assert!(is_image(Path::new("a/b.png")));
        assert!(is_image(Path::new("photo.JPG")));
        assert!(is_image(Path::new("x.jpeg")));
        assert!(is_image(Path::new("x.WebP")));
        assert!(!is_image(Path::new("x.gif")));
        assert!(!is_image(Path::new("png")));
        assert!(!is_image(Path::new("notes.txt")));
    }

    #[test]
    fn missing_source_is_fatal() {
        let err = collect_images(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, TriageError::SourceDir { .. }));
    }
}
