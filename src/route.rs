//! Topic router: turns decoded envelopes into display/storage-ready frames.
//!
//! JPEG buffers are decoded here into the same raw pixel representation used
//! for raw video frames, so downstream components never see the wire
//! encoding. Unknown topics never reach this module; the codec rejects them.

use serde_json::{Map, Value};

use crate::wire::{DecodeError, Envelope, WireEncoding, WirePayload};

/// Raw pixel frame: `data` reinterpreted per `dtype` and row-major `shape`.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageFrame {
    pub dtype: String,
    pub shape: Vec<usize>,
    pub data: Vec<u8>,
}

impl ImageFrame {
    /// Height/width for the common `[h, w, channels]` and `[h, w]` layouts.
    pub fn dimensions(&self) -> Option<(usize, usize)> {
        match self.shape.as_slice() {
            [h, w] | [h, w, _] => Some((*h, *w)),
            _ => None,
        }
    }

    pub fn channels(&self) -> usize {
        match self.shape.as_slice() {
            [_, _, c] => *c,
            _ => 1,
        }
    }
}

/// A routed frame, ready for persistence or display.
#[derive(Clone, Debug, PartialEq)]
pub struct Routed {
    pub source_id: String,
    pub frame_time: f64,
    pub payload: RoutedPayload,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RoutedPayload {
    Image {
        image: ImageFrame,
        annotation: Map<String, Value>,
    },
    Log {
        annotation: Map<String, Value>,
    },
}

/// Byte width of a pixel element, for buffer validation.
fn dtype_size(dtype: &str) -> Option<usize> {
    match dtype {
        "uint8" | "int8" | "bool" => Some(1),
        "uint16" | "int16" | "float16" => Some(2),
        "uint32" | "int32" | "float32" => Some(4),
        "uint64" | "int64" | "float64" => Some(8),
        _ => None,
    }
}

/// Route a decoded envelope, decoding JPEG payloads to raw pixels.
pub fn route(envelope: Envelope) -> Result<Routed, DecodeError> {
    let Envelope {
        source_id,
        frame_time,
        payload,
        ..
    } = envelope;

    let payload = match payload {
        WirePayload::Log { annotation } => RoutedPayload::Log { annotation },
        WirePayload::Image { image, annotation } => {
            let frame = match image.encoding {
                WireEncoding::Raw => {
                    let frame = ImageFrame {
                        dtype: image.meta.dtype,
                        shape: image.meta.shape,
                        data: image.data,
                    };
                    validate_buffer(&frame)?;
                    frame
                }
                WireEncoding::Jpeg => decode_jpeg(&image.data)?,
            };
            RoutedPayload::Image {
                image: frame,
                annotation,
            }
        }
    };

    Ok(Routed {
        source_id,
        frame_time,
        payload,
    })
}

fn validate_buffer(frame: &ImageFrame) -> Result<(), DecodeError> {
    let Some(elem) = dtype_size(&frame.dtype) else {
        // Unrecognized dtypes pass through unvalidated; display and JPEG
        // encoding reject them later if they need pixel access.
        return Ok(());
    };
    let expected = frame
        .shape
        .iter()
        .try_fold(elem, |acc, &dim| acc.checked_mul(dim));
    let Some(expected) = expected else {
        // Hostile shapes must be dropped, not allowed to overflow.
        return Err(DecodeError::BadEncoding {
            stage: "pixels",
            reason: format!(
                "shape {:?} of {} overflows the buffer size",
                frame.shape, frame.dtype
            ),
        });
    };
    if frame.data.len() != expected {
        return Err(DecodeError::BadEncoding {
            stage: "pixels",
            reason: format!(
                "buffer is {} bytes, shape {:?} of {} requires {}",
                frame.data.len(),
                frame.shape,
                frame.dtype,
                expected
            ),
        });
    }
    Ok(())
}

fn decode_jpeg(data: &[u8]) -> Result<ImageFrame, DecodeError> {
    let decoded = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .map_err(|e| DecodeError::BadEncoding {
            stage: "jpeg",
            reason: e.to_string(),
        })?;
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(ImageFrame {
        dtype: "uint8".to_string(),
        shape: vec![height as usize, width as usize, 3],
        data: rgb.into_raw(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{ImageMeta, Topic, WireImage};

    fn image_envelope(encoding: WireEncoding, meta: ImageMeta, data: Vec<u8>) -> Envelope {
        Envelope {
            topic: if encoding == WireEncoding::Jpeg {
                Topic::Jpeg
            } else {
                Topic::Video
            },
            source_id: "cam0".to_string(),
            frame_time: 10.0,
            payload: WirePayload::Image {
                image: WireImage {
                    encoding,
                    meta,
                    data,
                },
                annotation: Map::new(),
            },
        }
    }

    #[test]
    fn raw_frame_passes_through() {
        let meta = ImageMeta {
            dtype: "uint8".to_string(),
            shape: vec![4, 5, 3],
        };
        let routed = route(image_envelope(WireEncoding::Raw, meta, vec![1u8; 60])).unwrap();
        match routed.payload {
            RoutedPayload::Image { image, .. } => {
                assert_eq!(image.shape, vec![4, 5, 3]);
                assert_eq!(image.dimensions(), Some((4, 5)));
                assert_eq!(image.channels(), 3);
            }
            other => panic!("expected image payload, got {:?}", other),
        }
    }

    #[test]
    fn raw_buffer_size_mismatch_is_rejected() {
        let meta = ImageMeta {
            dtype: "uint8".to_string(),
            shape: vec![4, 5, 3],
        };
        assert!(matches!(
            route(image_envelope(WireEncoding::Raw, meta, vec![1u8; 59])),
            Err(DecodeError::BadEncoding { stage: "pixels", .. })
        ));
    }

    #[test]
    fn element_count_overflow_is_bad_encoding() {
        let meta = ImageMeta {
            dtype: "uint8".to_string(),
            shape: vec![4_294_967_296, 4_294_967_296, 2],
        };
        assert!(matches!(
            route(image_envelope(WireEncoding::Raw, meta, vec![0u8; 4])),
            Err(DecodeError::BadEncoding { stage: "pixels", .. })
        ));
    }

    #[test]
    fn jpeg_frame_decodes_to_raw_pixels() {
        let src = image::RgbImage::from_fn(8, 6, |x, y| image::Rgb([x as u8, y as u8, 0]));
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90)
            .encode_image(&src)
            .unwrap();

        let meta = ImageMeta {
            dtype: "uint8".to_string(),
            shape: vec![6, 8, 3],
        };
        let routed = route(image_envelope(WireEncoding::Jpeg, meta, jpeg)).unwrap();
        match routed.payload {
            RoutedPayload::Image { image, .. } => {
                assert_eq!(image.shape, vec![6, 8, 3]);
                assert_eq!(image.data.len(), 6 * 8 * 3);
            }
            other => panic!("expected image payload, got {:?}", other),
        }
    }

    #[test]
    fn corrupt_jpeg_is_bad_encoding() {
        let meta = ImageMeta {
            dtype: "uint8".to_string(),
            shape: vec![6, 8, 3],
        };
        assert!(matches!(
            route(image_envelope(WireEncoding::Jpeg, meta, vec![0xFF, 0xD8, 0x00])),
            Err(DecodeError::BadEncoding { stage: "jpeg", .. })
        ));
    }
}
