use camino::Utf8Path;
use image::ImageFormat;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::engine::StepContext;
use crate::task::{Emitted, expand_all, require_dir};
use crate::utils::write_file;

/// Image types picked up from `img/`, at any depth.
pub(crate) const PATTERNS: [&str; 6] = [
    "**/*.png",
    "**/*.jpg",
    "**/*.gif",
    "**/*.ico",
    "**/*.svg",
    "**/*.webp",
];

const JPEG_QUALITY: u8 = 85;

/// Copies `img/**` into the output. In production PNG and JPEG files are
/// re-encoded first, the result is kept only when it is smaller.
pub fn build(ctx: &StepContext<'_>) -> anyhow::Result<Emitted> {
    let env = ctx.env;
    let root = require_dir(env, "img")?;
    let paths = expand_all(&root, &PATTERNS)?;
    let optimize = env.mode.is_production();

    let results: anyhow::Result<Vec<_>> = paths
        .par_iter()
        .map(|path| -> anyhow::Result<_> {
            let rel = path.strip_prefix(&root)?;
            let out = Utf8Path::new("img").join(rel);

            let data = std::fs::read(path)?;
            let data = if optimize {
                shrink(path, &data).unwrap_or(data)
            } else {
                data
            };

            write_file(&env.dist(&out), data)?;
            Ok(out)
        })
        .collect();

    let emitted = Emitted { files: results? };
    tracing::info!(step = ctx.name, "wrote {} images", emitted.len());
    Ok(emitted)
}

/// Re-encodes raster images. `None` keeps the original bytes.
fn shrink(path: &Utf8Path, data: &[u8]) -> Option<Vec<u8>> {
    let format = match path.extension()?.to_ascii_lowercase().as_str() {
        "png" => ImageFormat::Png,
        "jpg" | "jpeg" => ImageFormat::Jpeg,
        _ => return None,
    };

    let encoded = match encode(data, format) {
        Ok(encoded) => encoded,
        Err(e) => {
            tracing::warn!(%path, "couldn't optimize image, copying it as is: {e}");
            return None;
        }
    };

    (encoded.len() < data.len()).then_some(encoded)
}

fn encode(data: &[u8], format: ImageFormat) -> image::ImageResult<Vec<u8>> {
    let img = image::load_from_memory_with_format(data, format)?;
    let mut out = Vec::new();

    match format {
        ImageFormat::Png => {
            let encoder =
                PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive);
            img.write_with_encoder(encoder)?;
        }
        _ => {
            let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
            img.write_with_encoder(encoder)?;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use image::{ImageEncoder, RgbImage};

    use super::*;
    use crate::core::Mode;
    use crate::task::tests::{Project, with_context};

    /// A flat-colored PNG saved with the fastest settings.
    fn loose_png() -> Vec<u8> {
        let img = RgbImage::from_pixel(64, 64, image::Rgb([200, 40, 40]));
        let mut out = Vec::new();
        PngEncoder::new_with_quality(&mut out, CompressionType::Fast, FilterType::NoFilter)
            .write_image(img.as_raw(), 64, 64, image::ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    fn project(png: &[u8]) -> Project {
        let project = Project::new();
        project
            .file("img/icons/logo.png", png)
            .file("img/logo.svg", "<svg xmlns=\"http://www.w3.org/2000/svg\"/>")
            .file("img/broken.jpg", b"not a jpeg")
            .file("img/notes.txt", "skipped");
        project
    }

    #[test]
    fn development_copies_bytes() {
        let png = loose_png();
        let project = project(&png);
        let env = project.env(Mode::Development);

        let emitted = with_context(&env, build).unwrap();
        assert_eq!(
            emitted.files,
            vec![
                Utf8PathBuf::from("img/broken.jpg"),
                Utf8PathBuf::from("img/icons/logo.png"),
                Utf8PathBuf::from("img/logo.svg")
            ]
        );
        assert_eq!(std::fs::read(env.dist("img/icons/logo.png")).unwrap(), png);
        assert!(!project.exists("img/notes.txt"));
    }

    #[test]
    fn production_shrinks_rasters() {
        let png = loose_png();
        let project = project(&png);
        let env = project.env(Mode::Production);

        with_context(&env, build).unwrap();

        let out = std::fs::read(env.dist("img/icons/logo.png")).unwrap();
        assert!(out.len() <= png.len());

        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 64));

        assert_eq!(
            std::fs::read(env.dist("img/broken.jpg")).unwrap(),
            b"not a jpeg"
        );
        assert_eq!(
            project.read("img/logo.svg"),
            "<svg xmlns=\"http://www.w3.org/2000/svg\"/>"
        );
    }
}
