//! The record codec: one (image, label, path) example to and from its
//! serialized form.

use crate::{
    common::*,
    error::{DecodeError, EncodeError},
};

/// One serialized example as laid out inside a record container.
///
/// `image_raw` holds raw 8-bit HWC pixel bytes, never a recompressed
/// image; `file_path` is kept for provenance and is otherwise opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedExample {
    pub image_raw: Vec<u8>,
    pub file_path: String,
    pub target_label: i64,
}

/// One example with pixels restored to the declared shape.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedExample {
    pub pixels: Array3<u8>,
    pub label: i64,
    pub path: String,
}

pub(crate) fn load_image(path: &Path) -> Result<image::DynamicImage, EncodeError> {
    let reader = image::io::Reader::open(path)
        .map_err(|source| EncodeError::Io {
            path: path.to_owned(),
            source,
        })?
        .with_guessed_format()
        .map_err(|source| EncodeError::Io {
            path: path.to_owned(),
            source,
        })?;
    reader.decode().map_err(|source| EncodeError::Image {
        path: path.to_owned(),
        source,
    })
}

/// Load one image file and pack it into a record.
///
/// The image is forced to exactly 3 channels: an alpha or extra
/// channel is dropped, while anything narrower than 3 channels is
/// rejected. The caller is responsible for the label range.
pub fn encode(path: &Path, label: i64) -> Result<EncodedExample, EncodeError> {
    let image = load_image(path)?;

    let channels = image.color().channel_count();
    if channels < 3 {
        return Err(EncodeError::ChannelCount {
            path: path.to_owned(),
            channels,
        });
    }

    Ok(EncodedExample {
        image_raw: image.to_rgb8().into_raw(),
        file_path: path.to_string_lossy().into_owned(),
        target_label: label,
    })
}

/// Reinterpret a record's raw bytes as an 8-bit image of the declared
/// `(height, width, channels)` shape. The label passes through as a
/// 64-bit integer and the path is untouched.
pub fn decode(example: EncodedExample, shape: [usize; 3]) -> Result<DecodedExample, DecodeError> {
    let EncodedExample {
        image_raw,
        file_path,
        target_label,
    } = example;

    let [height, width, channels] = shape;
    let expected = height * width * channels;
    let actual = image_raw.len();
    let pixels = Array3::from_shape_vec((height, width, channels), image_raw).map_err(|_| {
        DecodeError::ShapeMismatch {
            shape,
            expected,
            actual,
        }
    })?;

    Ok(DecodedExample {
        pixels,
        label: target_label,
        path: file_path,
    })
}
