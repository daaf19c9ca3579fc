use deckfx_core::{
    assets::{DecodeError, DecodedAudioAsset},
    fixtures::write_tone_wav,
};
use tempfile::tempdir;

#[test]
fn decodes_local_wav_by_path_and_file_url() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("tone.wav");
    write_tone_wav(&path, 220.0, 0.5, 48_000, 2).expect("fixture wav");

    let asset = DecodedAudioAsset::load(&path.to_string_lossy()).expect("decode by path");
    assert_eq!(asset.sample_rate(), 48_000);
    assert_eq!(asset.channel_count(), 2);
    assert_eq!(asset.frames(), 24_000);
    assert!((asset.duration_seconds() - 0.5).abs() < 1e-9);

    let peak = asset
        .channel(0)
        .iter()
        .fold(0.0_f32, |peak, sample| peak.max(sample.abs()));
    assert!((peak - 0.5).abs() < 0.01, "peak was {peak}");

    let url = format!("file://{}", path.display());
    let via_url = DecodedAudioAsset::load(&url).expect("decode by file url");
    assert_eq!(via_url.frames(), asset.frames());
    assert_eq!(via_url.url(), url);
    assert_ne!(via_url.id(), asset.id());
}

#[test]
fn decodes_in_memory_bytes() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("mono.wav");
    write_tone_wav(&path, 440.0, 0.25, 22_050, 1).expect("fixture wav");
    let bytes = std::fs::read(&path).expect("fixture bytes");

    let asset =
        DecodedAudioAsset::decode_bytes("mem://mono", bytes, Some("wav")).expect("decode bytes");
    assert_eq!(asset.sample_rate(), 22_050);
    assert_eq!(asset.channel_count(), 1);
    assert_eq!(asset.frames(), 5_513);
}

#[test]
fn load_failures_are_classified() {
    assert!(matches!(
        DecodedAudioAsset::load("https://example.com/track.mp3"),
        Err(DecodeError::UnsupportedScheme(scheme)) if scheme == "https"
    ));

    let temp = tempdir().expect("tempdir should be creatable");
    let missing = temp.path().join("missing.wav");
    assert!(matches!(
        DecodedAudioAsset::load(&missing.to_string_lossy()),
        Err(DecodeError::Unreachable(_))
    ));

    let garbage = temp.path().join("garbage.wav");
    std::fs::write(&garbage, b"definitely not audio").expect("garbage file");
    assert!(matches!(
        DecodedAudioAsset::load(&garbage.to_string_lossy()),
        Err(DecodeError::Malformed(_))
    ));
}

#[test]
fn empty_channels_are_rejected() {
    assert!(matches!(
        DecodedAudioAsset::from_channels("mem://empty", 44_100, vec![Vec::new()]),
        Err(DecodeError::Empty(_))
    ));
    assert!(matches!(
        DecodedAudioAsset::from_channels("mem://ragged", 44_100, vec![vec![0.0; 4], vec![0.0; 3]]),
        Err(DecodeError::Malformed(_))
    ));
}
