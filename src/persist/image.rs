//! Image writer: encode, stage, atomically publish.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::FixedOffset;
use image::{GrayImage, RgbImage};
use serde_json::{Map, Value};

use crate::persist::{format_stamp, sanitize_file_id, staging_name, PersistError};
use crate::route::ImageFrame;

/// On-disk image format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageEncoding {
    Jpeg { quality: u8 },
    Bmp,
}

impl ImageEncoding {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageEncoding::Jpeg { .. } => ".jpg",
            ImageEncoding::Bmp => ".bmp",
        }
    }
}

/// Writes one image file per persisted frame.
///
/// The base name is `<timestamp>_<id><ext>` where the id is resolved from
/// the annotation via a configured dot-separated key path, falling back to
/// the source id. The name is a pure function of `(frame_time, id)`; two
/// frames in the same millisecond with the same id collide and the later
/// rename wins. Accepted as a rare case, matching the external contract.
pub struct ImageWriter {
    dir: PathBuf,
    encoding: ImageEncoding,
    /// Dot-separated key path segments; empty means always use the source id.
    id_path: Vec<String>,
    utc_offset: Option<FixedOffset>,
}

impl ImageWriter {
    pub fn new(
        dir: impl Into<PathBuf>,
        encoding: ImageEncoding,
        id_path: Vec<String>,
        utc_offset: Option<FixedOffset>,
    ) -> Self {
        Self {
            dir: dir.into(),
            encoding,
            id_path,
            utc_offset,
        }
    }

    /// Encode and publish one frame, returning the final path.
    pub fn write(
        &self,
        frame_time: f64,
        source_id: &str,
        annotation: &Map<String, Value>,
        image: &ImageFrame,
    ) -> Result<PathBuf, PersistError> {
        let id = sanitize_file_id(&self.resolve_file_id(annotation, source_id));
        let name = format!(
            "{}_{}{}",
            format_stamp(frame_time, self.utc_offset),
            id,
            self.encoding.extension()
        );
        let final_path = self.dir.join(&name);
        let staging_path = self.dir.join(staging_name(&name));

        let bytes = encode_image(image, self.encoding)?;
        if let Err(e) = fs::write(&staging_path, &bytes) {
            discard_staging(&staging_path);
            return Err(PersistError::WriteFailed(format!(
                "{}: {}",
                staging_path.display(),
                e
            )));
        }
        if let Err(e) = fs::rename(&staging_path, &final_path) {
            discard_staging(&staging_path);
            return Err(PersistError::RenameFailed(format!(
                "{}: {}",
                final_path.display(),
                e
            )));
        }
        Ok(final_path)
    }

    /// Walk the configured key path into the (possibly nested) annotation.
    /// Any missing segment or non-string leaf falls back to the source id.
    fn resolve_file_id(&self, annotation: &Map<String, Value>, source_id: &str) -> String {
        if self.id_path.is_empty() {
            return source_id.to_string();
        }
        let mut cursor = Value::Object(annotation.clone());
        for segment in &self.id_path {
            match cursor {
                Value::Object(mut map) => match map.remove(segment) {
                    Some(next) => cursor = next,
                    None => return source_id.to_string(),
                },
                _ => return source_id.to_string(),
            }
        }
        match cursor {
            Value::String(id) => id,
            _ => source_id.to_string(),
        }
    }
}

fn encode_image(frame: &ImageFrame, encoding: ImageEncoding) -> Result<Vec<u8>, PersistError> {
    if frame.dtype != "uint8" {
        return Err(PersistError::WriteFailed(format!(
            "unsupported pixel dtype '{}'",
            frame.dtype
        )));
    }
    let Some((height, width)) = frame.dimensions() else {
        return Err(PersistError::WriteFailed(format!(
            "unsupported image shape {:?}",
            frame.shape
        )));
    };
    let (width, height) = (width as u32, height as u32);

    enum PixelBuf {
        Rgb(RgbImage),
        Gray(GrayImage),
    }

    let buf = match frame.channels() {
        3 => RgbImage::from_raw(width, height, frame.data.clone()).map(PixelBuf::Rgb),
        1 => GrayImage::from_raw(width, height, frame.data.clone()).map(PixelBuf::Gray),
        other => {
            return Err(PersistError::WriteFailed(format!(
                "unsupported channel count {}",
                other
            )))
        }
    };
    let Some(buf) = buf else {
        return Err(PersistError::WriteFailed(
            "pixel buffer does not match shape".to_string(),
        ));
    };

    let mut out = Cursor::new(Vec::new());
    let result = match (encoding, &buf) {
        (ImageEncoding::Jpeg { quality }, PixelBuf::Rgb(img)) => {
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality).encode_image(img)
        }
        (ImageEncoding::Jpeg { quality }, PixelBuf::Gray(img)) => {
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality).encode_image(img)
        }
        (ImageEncoding::Bmp, PixelBuf::Rgb(img)) => img.write_to(&mut out, image::ImageFormat::Bmp),
        (ImageEncoding::Bmp, PixelBuf::Gray(img)) => {
            img.write_to(&mut out, image::ImageFormat::Bmp)
        }
    };
    result.map_err(|e| PersistError::WriteFailed(format!("image encode: {}", e)))?;
    Ok(out.into_inner())
}

fn discard_staging(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::debug!("could not remove staging file {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rgb_frame() -> ImageFrame {
        ImageFrame {
            dtype: "uint8".to_string(),
            shape: vec![4, 6, 3],
            data: vec![128u8; 72],
        }
    }

    fn annotation(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn writes_bmp_and_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ImageWriter::new(dir.path(), ImageEncoding::Bmp, Vec::new(), None);

        let path = writer
            .write(100.5, "cam0", &Map::new(), &rgb_frame())
            .unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_cam0.bmp"), "unexpected name {}", name);
        assert!(fs::metadata(&path).unwrap().len() > 0);

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("transferring."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn writes_jpeg_with_configured_quality() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ImageWriter::new(
            dir.path(),
            ImageEncoding::Jpeg { quality: 80 },
            Vec::new(),
            None,
        );
        let path = writer
            .write(100.5, "cam0", &Map::new(), &rgb_frame())
            .unwrap();
        assert!(path.to_string_lossy().ends_with(".jpg"));
    }

    #[test]
    fn file_id_resolves_nested_key_path() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ImageWriter::new(
            dir.path(),
            ImageEncoding::Bmp,
            vec!["meta".to_string(), "camera".to_string()],
            None,
        );
        let ann = annotation(json!({"meta": {"camera": "front door"}}));
        let path = writer.write(1.0, "cam0", &ann, &rgb_frame()).unwrap();
        // Resolved id, sanitized: whitespace removed.
        assert!(path.to_string_lossy().ends_with("_frontdoor.bmp"));
    }

    #[test]
    fn file_id_falls_back_to_source_on_missing_or_non_string() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ImageWriter::new(
            dir.path(),
            ImageEncoding::Bmp,
            vec!["meta".to_string(), "camera".to_string()],
            None,
        );

        let missing = annotation(json!({"meta": {}}));
        let path = writer.write(1.0, "cam0", &missing, &rgb_frame()).unwrap();
        assert!(path.to_string_lossy().ends_with("_cam0.bmp"));

        let non_string = annotation(json!({"meta": {"camera": 7}}));
        let path = writer
            .write(2.0, "cam0", &non_string, &rgb_frame())
            .unwrap();
        assert!(path.to_string_lossy().ends_with("_cam0.bmp"));
    }

    #[test]
    fn unsupported_dtype_reports_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ImageWriter::new(dir.path(), ImageEncoding::Bmp, Vec::new(), None);
        let frame = ImageFrame {
            dtype: "float32".to_string(),
            shape: vec![2, 2],
            data: vec![0u8; 16],
        };
        assert!(matches!(
            writer.write(1.0, "cam0", &Map::new(), &frame),
            Err(PersistError::WriteFailed(_))
        ));
    }
}
