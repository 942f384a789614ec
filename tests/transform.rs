use imgcache::config::OutputFormat;
use imgcache::transform::{ImageTranscoder, Orientation, TranscodeOptions, Transcoder, TransformError};

fn options(width: Option<u32>, height: Option<u32>, format: OutputFormat) -> TranscodeOptions {
    TranscodeOptions { width, height, quality: 80, format }
}

fn jpeg_source(w: u32, h: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(w, h, |x, _| image::Rgb([(x * 4 % 256) as u8, 90, 200]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Jpeg)
        .unwrap();
    out
}

/// Splices a minimal big-endian EXIF block carrying only the Orientation tag
/// right after the JPEG SOI marker.
fn with_orientation(jpeg: &[u8], orientation: Orientation) -> Vec<u8> {
    let mut tiff = Vec::new();
    tiff.extend_from_slice(b"MM\x00\x2a\x00\x00\x00\x08"); // header, IFD0 at 8
    tiff.extend_from_slice(&1u16.to_be_bytes()); // one entry
    tiff.extend_from_slice(&0x0112u16.to_be_bytes()); // Orientation
    tiff.extend_from_slice(&3u16.to_be_bytes()); // SHORT
    tiff.extend_from_slice(&1u32.to_be_bytes()); // count
    tiff.extend_from_slice(&(orientation as u16).to_be_bytes());
    tiff.extend_from_slice(&[0, 0]);
    tiff.extend_from_slice(&0u32.to_be_bytes()); // no IFD1

    let mut payload = b"Exif\x00\x00".to_vec();
    payload.extend_from_slice(&tiff);

    let mut out = jpeg[..2].to_vec();
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&jpeg[2..]);
    out
}

fn encoded_as(w: u32, h: u32, format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbaImage::from_fn(w, h, |x, y| image::Rgba([(x * 3 % 256) as u8, (y * 5 % 256) as u8, 60, 255]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut std::io::Cursor::new(&mut out), format)
        .unwrap();
    out
}

fn dims(encoded: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(encoded).unwrap();
    (img.width(), img.height())
}

#[test]
fn jpeg_source_to_png_cover() {
    let out = ImageTranscoder
        .transcode(&jpeg_source(400, 300), &options(Some(100), Some(100), OutputFormat::Png))
        .unwrap();
    assert_eq!(image::guess_format(&out).unwrap(), image::ImageFormat::Png);
    assert_eq!(dims(&out), (100, 100));
}

#[test]
fn single_dimension_keeps_aspect() {
    let src = jpeg_source(400, 300);
    let out = ImageTranscoder.transcode(&src, &options(Some(200), None, OutputFormat::Jpeg)).unwrap();
    assert_eq!(image::guess_format(&out).unwrap(), image::ImageFormat::Jpeg);
    assert_eq!(dims(&out), (200, 150));

    let out = ImageTranscoder.transcode(&src, &options(None, Some(60), OutputFormat::Jpeg)).unwrap();
    assert_eq!(dims(&out), (80, 60));
}

#[test]
fn no_dimensions_keeps_size() {
    let out = ImageTranscoder
        .transcode(&jpeg_source(123, 45), &options(None, None, OutputFormat::Jpeg))
        .unwrap();
    assert_eq!(dims(&out), (123, 45));
}

#[test]
fn exif_rotation_is_applied_before_resizing() {
    let src = with_orientation(&jpeg_source(80, 40), Orientation::Rotate90);
    assert_eq!(imgcache::transform::read_orientation(&src), Some(Orientation::Rotate90));

    let out = ImageTranscoder.transcode(&src, &options(None, None, OutputFormat::Png)).unwrap();
    assert_eq!(dims(&out), (40, 80));

    // Width applies to the upright image.
    let out = ImageTranscoder.transcode(&src, &options(Some(20), None, OutputFormat::Png)).unwrap();
    assert_eq!(dims(&out), (20, 40));
}

#[test]
fn normal_orientation_is_untouched() {
    let src = with_orientation(&jpeg_source(80, 40), Orientation::Normal);
    let out = ImageTranscoder.transcode(&src, &options(None, None, OutputFormat::Jpeg)).unwrap();
    assert_eq!(dims(&out), (80, 40));
}

#[test]
fn quality_changes_jpeg_size() {
    let src = jpeg_source(256, 256);
    let low = ImageTranscoder
        .transcode(&src, &TranscodeOptions { quality: 10, ..options(None, None, OutputFormat::Jpeg) })
        .unwrap();
    let high = ImageTranscoder
        .transcode(&src, &TranscodeOptions { quality: 100, ..options(None, None, OutputFormat::Jpeg) })
        .unwrap();
    assert!(low.len() < high.len());
}

#[test]
fn garbage_is_a_decode_error() {
    let err = ImageTranscoder
        .transcode(b"definitely not an image", &options(Some(10), None, OutputFormat::Jpeg))
        .unwrap_err();
    assert!(matches!(err, TransformError::Decode(_)));
}

#[test]
fn non_jpeg_png_sources_are_accepted() {
    for format in [image::ImageFormat::Gif, image::ImageFormat::WebP, image::ImageFormat::Bmp, image::ImageFormat::Tiff] {
        let src = encoded_as(64, 32, format);
        assert_eq!(image::guess_format(&src).unwrap(), format);

        let out = ImageTranscoder
            .transcode(&src, &options(Some(32), None, OutputFormat::Jpeg))
            .unwrap_or_else(|e| panic!("{format:?}: {e}"));
        assert_eq!(image::guess_format(&out).unwrap(), image::ImageFormat::Jpeg);
        assert_eq!(dims(&out), (32, 16), "{format:?}");
    }
}
