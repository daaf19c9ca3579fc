use std::io::Cursor;

use deckfx_core::{
    export::{ExportError, encode_wav, export_file_name, export_to_file, render_offline},
    fixtures::sine_asset,
    model::{EffectsSettings, Field},
};

#[test]
fn render_length_includes_tail() {
    let asset = sine_asset(440.0, 2.0, 44_100, 1);
    let rendered = render_offline(&asset, &EffectsSettings::reset()).expect("render");
    assert_eq!(rendered.sample_rate, 44_100);
    assert_eq!(rendered.channels, 1);
    assert_eq!(rendered.frames(), 88_200 + 44_100);

    let long_delay = EffectsSettings::reset().set(Field::Delay, 500.0);
    let rendered = render_offline(&asset, &long_delay).expect("render");
    assert_eq!(rendered.frames(), 88_200 + 44_100);
}

#[test]
fn tempo_shortens_the_render() {
    let asset = sine_asset(440.0, 2.0, 44_100, 2);
    let settings = EffectsSettings::reset().set(Field::Tempo, 150.0);
    let rendered = render_offline(&asset, &settings).expect("render");
    assert_eq!(rendered.channels, 2);
    assert_eq!(rendered.frames(), 58_800 + 44_100);
}

#[test]
fn reversed_render_plays_the_asset_backwards() {
    let asset = sine_asset(440.0, 0.5, 8_000, 1);
    let forward = render_offline(&asset, &EffectsSettings::reset()).expect("forward");
    let reversed =
        render_offline(&asset, &EffectsSettings::reset().set(Field::Reverse, true)).expect("reverse");
    assert_eq!(forward.frames(), reversed.frames());
    assert_ne!(forward.samples, reversed.samples);
}

#[test]
fn wav_bytes_have_canonical_header() {
    let asset = sine_asset(220.0, 0.25, 22_050, 2);
    let rendered = render_offline(&asset, &EffectsSettings::reset()).expect("render");
    let bytes = encode_wav(&rendered).expect("encode");

    assert_eq!(bytes.len(), 44 + rendered.frames() * 2 * 2);
    assert_eq!(&bytes[0..4], b"RIFF");
    assert_eq!(&bytes[8..12], b"WAVE");

    let reader = hound::WavReader::new(Cursor::new(bytes)).expect("wav should parse");
    let spec = reader.spec();
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.sample_rate, 22_050);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(spec.sample_format, hound::SampleFormat::Int);
    assert_eq!(reader.duration() as usize, rendered.frames());
}

#[test]
fn export_writes_timestamped_file() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let output_dir = temp.path().join("exports");
    let asset = sine_asset(220.0, 0.25, 22_050, 1);

    let path = export_to_file(&asset, &EffectsSettings::reset(), &output_dir).expect("export");
    assert!(path.is_file());
    assert_eq!(path.parent(), Some(output_dir.as_path()));

    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .expect("utf-8 file name");
    let millis = name
        .strip_prefix("modulated-audio-")
        .and_then(|rest| rest.strip_suffix(".wav"))
        .expect("name should follow the export pattern");
    assert!(!millis.is_empty());
    assert!(millis.chars().all(|c| c.is_ascii_digit()));

    let entries = std::fs::read_dir(&output_dir)
        .expect("output dir readable")
        .count();
    assert_eq!(entries, 1, "no temp files should remain");
}

#[test]
fn export_into_unusable_directory_fails_cleanly() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let blocker = temp.path().join("not-a-dir");
    std::fs::write(&blocker, b"occupied").expect("blocker file");

    let asset = sine_asset(220.0, 0.1, 8_000, 1);
    let error = export_to_file(&asset, &EffectsSettings::reset(), &blocker)
        .expect_err("file path is not a directory");
    assert!(matches!(error, ExportError::Io(_)));

    let entries = std::fs::read_dir(temp.path())
        .expect("temp dir readable")
        .count();
    assert_eq!(entries, 1);
}

#[test]
fn file_name_uses_prefix_and_millis() {
    assert_eq!(
        export_file_name("modulated-audio", 1_700_000_000_123),
        "modulated-audio-1700000000123.wav"
    );
}
