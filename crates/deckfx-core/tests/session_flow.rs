use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use deckfx_core::{
    EngineConfig,
    export::ExportError,
    fixtures::sine_asset,
    live::LiveRenderer,
    model::{EffectsSettings, Field},
    session::ModulationSession,
    source::PlaybackError,
};

const SETTLE: Duration = Duration::from_millis(600);

fn session() -> (ModulationSession, LiveRenderer) {
    ModulationSession::new(&EngineConfig::default()).expect("session should build")
}

#[test]
fn observer_sees_every_real_change() {
    let (mut session, _renderer) = session();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    session.on_effects_change(move |settings| {
        sink.lock().expect("observer lock").push(*settings);
    });

    session.set(Field::Drive, 40.0);
    session.set(Field::Drive, 40.0);
    session.set(Field::Pitch, -3.0);

    let seen = seen.lock().expect("observer lock");
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].scalar(Field::Drive), 40.0);
    assert_eq!(seen[1].scalar(Field::Pitch), -3.0);
}

#[test]
fn undo_and_redo_are_not_recorded_again() {
    let (mut session, _renderer) = session();
    let start = Instant::now();

    session.set_at(Field::Drive, 50.0, start);
    assert!(session.tick(start + SETTLE));
    session.set_at(Field::Drive, 80.0, start + SETTLE);
    assert!(session.tick(start + SETTLE * 2));
    assert_eq!(session.history().len(), 3);

    assert!(session.undo());
    assert_eq!(session.settings().scalar(Field::Drive), 50.0);
    assert!(!session.tick(start + SETTLE * 4));
    assert_eq!(session.history().len(), 3);
    assert!(session.can_redo());

    assert!(session.redo());
    assert_eq!(session.settings().scalar(Field::Drive), 80.0);
    assert!(!session.tick(start + SETTLE * 6));
    assert_eq!(session.history().len(), 3);
    assert!(!session.redo());
}

#[test]
fn reset_restores_defaults_and_clears_history() {
    let (mut session, _renderer) = session();
    let start = Instant::now();
    session.set_at(Field::Tempo, 130.0, start);
    session.tick(start + SETTLE);
    session.set_at(Field::Low, 3.0, start + SETTLE);

    session.reset_all();
    assert_eq!(*session.settings(), EffectsSettings::reset());
    assert!(!session.can_undo());
    assert!(!session.can_redo());
    assert!(!session.tick(start + SETTLE * 3));
    assert_eq!(session.history().len(), 1);
}

#[test]
fn toggle_loop_flips_the_flag() {
    let (mut session, _renderer) = session();
    assert!(session.toggle_loop());
    assert!(session.settings().looping());
    assert!(!session.toggle_loop());
    assert!(!session.settings().looping());
}

#[test]
fn toggle_playback_requires_audio() {
    let (mut session, _renderer) = session();
    assert_eq!(session.toggle_playback(), Err(PlaybackError::NoAsset));
    assert!(!session.is_playing());

    session.load_asset(sine_asset(220.0, 1.0, 48_000, 2));
    session.toggle_playback().expect("play");
    assert!(session.is_playing());
    session.toggle_playback().expect("pause");
    assert!(!session.is_playing());
}

#[test]
fn missing_audio_url_leaves_session_unloaded() {
    let (mut session, _renderer) = session();
    assert!(session.set_audio_url(Some("/no/such/file.wav")).is_err());
    assert_eq!(session.audio_url(), None);
    assert!(session.live().asset().is_none());

    session.load_asset(sine_asset(220.0, 0.1, 48_000, 1));
    session.set(Field::Mid, 2.5);
    assert_eq!(session.history().len(), 1);

    session.set_audio_url(None).expect("clearing the url");
    assert!(session.live().asset().is_none());
    assert_eq!(session.history().len(), 2, "teardown commits the pending edit");
}

#[test]
fn export_without_audio_is_rejected() {
    let (mut session, _renderer) = session();
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let error = session
        .export_to(temp.path())
        .expect_err("nothing to export");
    assert!(matches!(error, ExportError::NoAsset));
    assert!(!session.is_exporting());
}

#[test]
fn export_uses_current_snapshot() {
    let (mut session, _renderer) = session();
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    session.load_asset(sine_asset(220.0, 0.25, 22_050, 1));
    session.set(Field::Delay, 100.0);

    let path = session.export_to(temp.path()).expect("export");
    assert!(path.is_file());
    assert!(!session.is_exporting());

    let reader = hound::WavReader::open(&path).expect("exported wav should parse");
    assert_eq!(reader.spec().sample_rate, 22_050);
    assert_eq!(reader.spec().channels, 1);
}
