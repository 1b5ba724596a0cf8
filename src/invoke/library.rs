use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::foundation::error::{JobFailure, JobOutcome};

/// One named input buffer handed to a [`LibraryCodec`].
#[derive(Clone, Copy, Debug)]
pub struct CodecInput<'a> {
    /// Workspace file name the bytes were read from.
    pub name: &'a str,
    /// File contents.
    pub bytes: &'a [u8],
}

/// In-process codec invoked by a library-call stage.
///
/// Implementations are synchronous and never touch the filesystem: they receive the stage's
/// inputs as buffers and return the single output buffer.
pub trait LibraryCodec: Send + Sync + fmt::Debug {
    /// Registry name referenced by stages.
    fn name(&self) -> &str;

    /// Reject malformed options before any work starts. Defaults to accepting anything.
    fn check_options(&self, _options: &serde_json::Value) -> JobOutcome<()> {
        Ok(())
    }

    /// Transform `inputs` according to `options`.
    fn call(
        &self,
        inputs: &[CodecInput<'_>],
        options: &serde_json::Value,
    ) -> anyhow::Result<Vec<u8>>;
}

/// Name-indexed set of codecs available to library-call stages.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: BTreeMap<String, Arc<dyn LibraryCodec>>,
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("codecs", &self.codecs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CodecRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `copy` and `image` codecs.
    pub fn with_builtin() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(CopyCodec));
        reg.register(Arc::new(ImageCodec));
        reg
    }

    /// Add or replace a codec under its own name.
    pub fn register(&mut self, codec: Arc<dyn LibraryCodec>) {
        self.codecs.insert(codec.name().to_string(), codec);
    }

    /// Look up a codec by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn LibraryCodec>> {
        self.codecs.get(name).cloned()
    }

    /// Registered codec names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.codecs.keys().map(String::as_str).collect()
    }
}

/// Returns its first input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyCodec;

impl LibraryCodec for CopyCodec {
    fn name(&self) -> &str {
        "copy"
    }

    fn call(
        &self,
        inputs: &[CodecInput<'_>],
        _options: &serde_json::Value,
    ) -> anyhow::Result<Vec<u8>> {
        let first = inputs.first().context("copy codec needs one input")?;
        Ok(first.bytes.to_vec())
    }
}

/// Target container for [`ImageCodec`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageTarget {
    /// PNG.
    Png,
    /// Baseline JPEG (alpha is dropped).
    Jpeg,
    /// Single-frame GIF.
    Gif,
    /// BMP.
    Bmp,
    /// TIFF.
    Tiff,
    /// Lossless WebP.
    Webp,
}

impl ImageTarget {
    fn format(self) -> image::ImageFormat {
        match self {
            Self::Png => image::ImageFormat::Png,
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Gif => image::ImageFormat::Gif,
            Self::Bmp => image::ImageFormat::Bmp,
            Self::Tiff => image::ImageFormat::Tiff,
            Self::Webp => image::ImageFormat::WebP,
        }
    }
}

/// Resampling filter used when [`ImageCodec`] shrinks an image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    /// Nearest neighbour.
    Nearest,
    /// Bilinear.
    Triangle,
    /// Catmull-Rom.
    CatmullRom,
    /// Gaussian.
    Gaussian,
    /// Lanczos with window 3.
    #[default]
    Lanczos3,
}

impl From<ResizeFilter> for image::imageops::FilterType {
    fn from(f: ResizeFilter) -> Self {
        match f {
            ResizeFilter::Nearest => Self::Nearest,
            ResizeFilter::Triangle => Self::Triangle,
            ResizeFilter::CatmullRom => Self::CatmullRom,
            ResizeFilter::Gaussian => Self::Gaussian,
            ResizeFilter::Lanczos3 => Self::Lanczos3,
        }
    }
}

/// Options accepted by [`ImageCodec`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageCodecOptions {
    /// Output container.
    pub format: ImageTarget,
    /// JPEG quality, 1..=100. Ignored for other targets.
    #[serde(default)]
    pub quality: Option<u8>,
    /// Shrink to fit this width, keeping aspect ratio.
    #[serde(default)]
    pub max_width: Option<u32>,
    /// Shrink to fit this height, keeping aspect ratio.
    #[serde(default)]
    pub max_height: Option<u32>,
    /// Resampling filter.
    #[serde(default)]
    pub filter: ResizeFilter,
}

impl ImageCodecOptions {
    fn parse(options: &serde_json::Value) -> JobOutcome<Self> {
        let opts: Self = serde_json::from_value(options.clone())
            .map_err(|e| JobFailure::validation(format!("invalid image codec options: {e}")))?;
        if let Some(q) = opts.quality
            && !(1..=100).contains(&q)
        {
            return Err(JobFailure::validation("jpeg quality must be within 1..=100"));
        }
        if opts.max_width == Some(0) || opts.max_height == Some(0) {
            return Err(JobFailure::validation(
                "max_width/max_height must be non-zero",
            ));
        }
        Ok(opts)
    }
}

/// Raster convert/resize codec backed by the `image` crate. Registered as `image`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCodec;

impl LibraryCodec for ImageCodec {
    fn name(&self) -> &str {
        "image"
    }

    fn check_options(&self, options: &serde_json::Value) -> JobOutcome<()> {
        ImageCodecOptions::parse(options).map(|_| ())
    }

    fn call(
        &self,
        inputs: &[CodecInput<'_>],
        options: &serde_json::Value,
    ) -> anyhow::Result<Vec<u8>> {
        let opts = ImageCodecOptions::parse(options)?;
        let input = inputs.first().context("image codec needs one input")?;
        let mut img = image::load_from_memory(input.bytes)
            .with_context(|| format!("decode '{}'", input.name))?;

        let (w, h) = (img.width(), img.height());
        let max_w = opts.max_width.unwrap_or(w);
        let max_h = opts.max_height.unwrap_or(h);
        if w > max_w || h > max_h {
            img = img.resize(max_w, max_h, opts.filter.into());
        }

        let mut out = Cursor::new(Vec::new());
        match opts.format {
            ImageTarget::Jpeg => {
                let rgb = image::DynamicImage::ImageRgb8(img.to_rgb8());
                let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                    &mut out,
                    opts.quality.unwrap_or(85),
                );
                rgb.write_with_encoder(encoder).context("encode jpeg")?;
            }
            ImageTarget::Gif | ImageTarget::Webp => {
                image::DynamicImage::ImageRgba8(img.to_rgba8())
                    .write_to(&mut out, opts.format.format())
                    .with_context(|| format!("encode {:?}", opts.format))?;
            }
            target => {
                img.write_to(&mut out, target.format())
                    .with_context(|| format!("encode {target:?}"))?;
            }
        }
        Ok(out.into_inner())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/invoke/library.rs"]
mod tests;
