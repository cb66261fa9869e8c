//! TIFF persistence, correction maps and batch dark correction on disk.

use detector_core::{DetectorError, Frame, FrameSequence};
use detector_storage::{
    capture_path, dark_correct_directory, BatchDarkConfig, CorrectionMaps, CropRegion,
    RasterDepth, TiffStorage, EXTERNAL_TRIGGER_PREFIX, SEQUENCE_CAPTURE_FILE,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

fn random_frame(rng: &mut ChaCha8Rng, width: u32, height: u32, bit_depth: u8) -> Frame {
    let max = detector_core::frame::max_value_for(bit_depth);
    let pixels = (0..width * height).map(|_| rng.gen_range(0..=max)).collect();
    Frame::from_pixels(width, height, bit_depth, pixels).unwrap()
}

#[test]
fn test_frame_planes_survive_both_depths() {
    let dir = TempDir::new().unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    let mut zeros = Frame::new(17, 9).unwrap();
    zeros.fill(0);
    let mut full = Frame::new(17, 9).unwrap();
    full.fill(u16::MAX);
    let noise = random_frame(&mut rng, 17, 9, 16);

    for (name, frame) in [("zeros", &zeros), ("full", &full), ("noise", &noise)] {
        let path = dir.path().join(format!("{}.tif", name));
        TiffStorage::write_frame(&path, frame, RasterDepth::Sixteen).unwrap();
        let restored = TiffStorage::read_frame(&path).unwrap();
        assert_eq!(restored.dimensions(), (17, 9));
        assert_eq!(restored.bit_depth(), 16);
        assert_eq!(restored.pixels(), frame.pixels(), "{}", name);
    }

    let mut dark = Frame::with_bit_depth(31, 5, 8).unwrap();
    dark.fill(0);
    let mut saturated = Frame::with_bit_depth(31, 5, 8).unwrap();
    saturated.fill(255);
    let narrow = random_frame(&mut rng, 31, 5, 8);

    for (name, frame) in [("dark", &dark), ("saturated", &saturated), ("narrow", &narrow)] {
        let path = dir.path().join(format!("{}.tif", name));
        TiffStorage::write_frame(&path, frame, RasterDepth::Eight).unwrap();
        let restored = TiffStorage::read_frame(&path).unwrap();
        assert_eq!(restored.dimensions(), (31, 5));
        assert_eq!(restored.bit_depth(), 8);
        assert_eq!(restored.pixels(), frame.pixels(), "{}", name);
    }
}

#[test]
fn test_sequence_written_as_pages() {
    let dir = TempDir::new().unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let frames: Vec<Frame> = (0..4).map(|_| random_frame(&mut rng, 12, 6, 16)).collect();
    let sequence = FrameSequence::from_frames(frames.clone()).unwrap();

    let path = dir.path().join(SEQUENCE_CAPTURE_FILE);
    TiffStorage::write_sequence(&path, &sequence, RasterDepth::Sixteen).unwrap();

    let restored = TiffStorage::read_sequence(&path).unwrap();
    assert_eq!(restored.depth(), 4);
    for (page, original) in restored.iter().zip(&frames) {
        assert_eq!(page.pixels(), original.pixels());
    }

    // A single-frame reader sees the first page only.
    let first = TiffStorage::read_frame(&path).unwrap();
    assert_eq!(first.pixels(), frames[0].pixels());
}

#[test]
fn test_read_into_checks_dimensions() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("source.tif");
    let mut source = Frame::with_bit_depth(8, 8, 16).unwrap();
    source.fill(40_000);
    TiffStorage::write_frame(&path, &source, RasterDepth::Sixteen).unwrap();

    let mut wrong = Frame::new(4, 8).unwrap();
    wrong.fill(3);
    let err = TiffStorage::read_frame_into(&path, &mut wrong).unwrap_err();
    assert!(matches!(err, DetectorError::DimensionMismatch { .. }));
    assert!(wrong.pixels().iter().all(|&v| v == 3));

    // 14-bit target clamps the 16-bit samples.
    let mut target = Frame::with_bit_depth(8, 8, 14).unwrap();
    TiffStorage::read_frame_into(&path, &mut target).unwrap();
    assert!(target.pixels().iter().all(|&v| v == 16_383));
}

#[test]
fn test_capture_file_naming() {
    let dir = TempDir::new().unwrap();
    let frame = Frame::new(4, 4).unwrap();
    let path = capture_path(dir.path(), EXTERNAL_TRIGGER_PREFIX, 3);
    TiffStorage::write_frame(&path, &frame, RasterDepth::Sixteen).unwrap();
    assert!(dir.path().join("ExternalTriggerCapture3.tif").is_file());
}

#[test]
fn test_correction_maps_share_dimensions() {
    let dir = TempDir::new().unwrap();
    let dark = dir.path().join("dark.tif");
    let gain = dir.path().join("gain.tif");
    let defect = dir.path().join("defect.tif");

    TiffStorage::write_frame(&dark, &Frame::new(6, 6).unwrap(), RasterDepth::Sixteen).unwrap();
    let mut flat = Frame::new(6, 6).unwrap();
    flat.fill(1000);
    TiffStorage::write_frame(&gain, &flat, RasterDepth::Sixteen).unwrap();
    TiffStorage::write_frame(&defect, &Frame::new(6, 6).unwrap(), RasterDepth::Eight).unwrap();

    let maps = CorrectionMaps::load(&dark, &gain, &defect).unwrap();
    assert_eq!(maps.dimensions(), (6, 6));

    let pipeline = maps.into_pipeline(10, 0);
    let mut image = Frame::new(6, 6).unwrap();
    image.fill(500);
    pipeline.apply(&mut image).unwrap();
    assert!(image.pixels().iter().all(|&v| v == 510));

    TiffStorage::write_frame(&defect, &Frame::new(3, 6).unwrap(), RasterDepth::Eight).unwrap();
    let err = CorrectionMaps::load(&dark, &gain, &defect).unwrap_err();
    assert!(matches!(
        err,
        DetectorError::DimensionMismatch {
            operation: "load_defect_map",
            ..
        }
    ));
}

#[test]
fn test_batch_dark_correction() {
    let source = TempDir::new().unwrap();
    let darks = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();

    let mut image = Frame::with_bit_depth(10, 10, 16).unwrap();
    image.fill(1_000);
    let mut dark = Frame::with_bit_depth(10, 10, 16).unwrap();
    dark.fill(200);

    TiffStorage::write_frame(source.path().join("scan_100ms.tif"), &image, RasterDepth::Sixteen)
        .unwrap();
    TiffStorage::write_frame(source.path().join("scan_250ms.tif"), &image, RasterDepth::Sixteen)
        .unwrap();
    TiffStorage::write_frame(source.path().join("untagged.tif"), &image, RasterDepth::Sixteen)
        .unwrap();
    TiffStorage::write_frame(
        darks.path().join("dark_frame_100.tif"),
        &dark,
        RasterDepth::Sixteen,
    )
    .unwrap();

    let config = BatchDarkConfig {
        dark_offset: 50,
        crop: CropRegion {
            x: 2,
            y: 3,
            width: 4,
            height: 5,
        },
        bit_depth: 14,
    };
    let summary =
        dark_correct_directory(source.path(), darks.path(), output.path(), &config).unwrap();

    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.written, vec![output.path().join("cropped_100ms.tif")]);

    let cropped = TiffStorage::read_frame(&summary.written[0]).unwrap();
    assert_eq!(cropped.dimensions(), (4, 5));
    // 16383 - (1000 - 200 + 50)
    assert!(cropped.pixels().iter().all(|&v| v == 15_533));
}

#[test]
fn test_batch_crop_outside_image_fails() {
    let source = TempDir::new().unwrap();
    let image = Frame::new(8, 8).unwrap();
    TiffStorage::write_frame(source.path().join("a_5ms.tif"), &image, RasterDepth::Sixteen)
        .unwrap();
    TiffStorage::write_frame(
        source.path().join("dark_frame_5.tif"),
        &image,
        RasterDepth::Sixteen,
    )
    .unwrap();

    let err = dark_correct_directory(
        source.path(),
        source.path(),
        source.path(),
        &BatchDarkConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, DetectorError::InvalidParameter { .. }));
}
