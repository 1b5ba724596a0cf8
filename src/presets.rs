//! Declarative stage lists for common conversions.
//!
//! Presets only arrange files and argument order. Every format-specific choice (filter chains,
//! codec flags, quality levels) is a parameter supplied by the caller.

use crate::foundation::error::{JobFailure, JobOutcome};
use crate::invoke::library::ImageCodecOptions;
use crate::job::spec::Stage;
use crate::workspace::materialize::validate_file_name;

/// Intermediate palette file written by [`gif_two_pass`].
pub const PALETTE_FILE: &str = "palette.png";

/// Two-pass GIF encode: `palettegen` over `filters`, then `paletteuse` with the same chain.
///
/// `filters` is an ffmpeg filter chain such as `fps=10,scale=320:-1:flags=lanczos`; pass an
/// empty string for none.
pub fn gif_two_pass(input: &str, output: &str, filters: &str) -> Vec<Stage> {
    let gen_filter = if filters.is_empty() {
        "palettegen".to_string()
    } else {
        format!("{filters},palettegen")
    };
    let use_filter = if filters.is_empty() {
        "[0:v][1:v]paletteuse".to_string()
    } else {
        format!("{filters}[x];[x][1:v]paletteuse")
    };

    vec![
        Stage::tool(
            "palettegen",
            [
                "ffmpeg", "-v", "error", "-y", "-i", input, "-vf", gen_filter.as_str(), PALETTE_FILE,
            ],
        )
        .reads([input])
        .writes([PALETTE_FILE]),
        Stage::tool(
            "paletteuse",
            [
                "ffmpeg",
                "-v",
                "error",
                "-y",
                "-i",
                input,
                "-i",
                PALETTE_FILE,
                "-lavfi",
                use_filter.as_str(),
                output,
            ],
        )
        .reads([input, PALETTE_FILE])
        .writes([output]),
    ]
}

/// Single ffmpeg pass from `input` to `output` with caller-chosen codec arguments.
pub fn ffmpeg_transcode(input: &str, output: &str, codec_args: &[&str]) -> Stage {
    let mut argv = vec!["ffmpeg", "-v", "error", "-y", "-i", input];
    argv.extend_from_slice(codec_args);
    argv.push(output);
    Stage::tool("transcode", argv)
        .reads([input])
        .writes([output])
}

/// Ghostscript `pdfwrite` pass with the caller's `-dPDFSETTINGS` preset
/// (`screen`, `ebook`, `printer`, `prepress` or `default`).
pub fn ghostscript_pdf(input: &str, output: &str, pdf_settings: &str) -> JobOutcome<Stage> {
    validate_file_name(input)?;
    validate_file_name(output)?;
    if !matches!(
        pdf_settings,
        "screen" | "ebook" | "printer" | "prepress" | "default"
    ) {
        return Err(JobFailure::validation(format!(
            "unknown PDFSETTINGS preset '{pdf_settings}'"
        )));
    }
    let settings = format!("-dPDFSETTINGS=/{pdf_settings}");
    let out_arg = format!("-sOutputFile={output}");
    Ok(Stage::tool(
        "pdfwrite",
        [
            "gs",
            "-sDEVICE=pdfwrite",
            "-dCompatibilityLevel=1.4",
            settings.as_str(),
            "-dNOPAUSE",
            "-dQUIET",
            "-dBATCH",
            "-dSAFER",
            out_arg.as_str(),
            input,
        ],
    )
    .reads([input])
    .writes([output]))
}

/// In-process raster conversion through the built-in `image` codec.
pub fn image_convert(input: &str, output: &str, options: &ImageCodecOptions) -> JobOutcome<Stage> {
    let options = serde_json::to_value(options)
        .map_err(|e| JobFailure::validation(format!("image options: {e}")))?;
    Ok(Stage::library("convert", "image", options)
        .reads([input])
        .writes([output]))
}
