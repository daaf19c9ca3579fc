use deckfx_core::{
    chain::{ParamId, StageId},
    export::render_offline,
    fixtures::{impulse_asset, sine_asset},
    live::{LiveConfig, LiveEngine, LiveRenderer, PlaybackState, RENDER_QUANTUM, RenderEvent},
    model::{EffectsSettings, Field},
    source::PlaybackError,
};

fn engine(sample_rate: u32, channels: usize) -> (LiveEngine, LiveRenderer) {
    LiveEngine::new(LiveConfig {
        sample_rate,
        channels,
        ..LiveConfig::default()
    })
    .expect("live engine should build")
}

fn pull(renderer: &mut LiveRenderer, frames: usize) -> Vec<f32> {
    let mut block = vec![0.0_f32; frames * renderer.channels()];
    renderer.process(&mut block);
    block
}

#[test]
fn state_machine_walks_through_the_lifecycle() {
    let (mut live, _renderer) = engine(22_050, 2);
    let settings = EffectsSettings::reset();
    assert_eq!(live.state(), PlaybackState::Idle);
    assert!(!live.controls_enabled());

    live.load_asset(sine_asset(220.0, 0.5, 22_050, 2));
    assert_eq!(live.state(), PlaybackState::Loaded);
    assert!(live.controls_enabled());

    live.play(&settings).expect("play should start");
    assert_eq!(live.state(), PlaybackState::Playing);

    live.pause();
    assert_eq!(live.state(), PlaybackState::Paused);

    live.play(&settings).expect("play should resume");
    live.stop();
    assert_eq!(live.state(), PlaybackState::Loaded);

    live.unload();
    assert_eq!(live.state(), PlaybackState::Idle);
    assert!(live.asset().is_none());
}

#[test]
fn play_without_asset_is_rejected() {
    let (mut live, _renderer) = engine(22_050, 2);
    assert_eq!(
        live.play(&EffectsSettings::reset()),
        Err(PlaybackError::NoAsset)
    );
    assert_eq!(live.state(), PlaybackState::Idle);
}

#[test]
fn failed_load_returns_to_idle() {
    let (mut live, _renderer) = engine(22_050, 2);
    live.load_asset(sine_asset(220.0, 0.1, 22_050, 1));

    let error = live
        .load_buffer("/definitely/not/here.wav")
        .expect_err("missing file should fail");
    assert!(matches!(error, deckfx_core::DecodeError::Unreachable(_)));
    assert_eq!(live.state(), PlaybackState::Idle);
    assert!(live.asset().is_none());
}

#[test]
fn restarting_playback_keeps_a_single_voice() {
    let (mut live, mut renderer) = engine(8_000, 1);
    let settings = EffectsSettings::reset();
    live.load_asset(impulse_asset(64, 8_000));

    live.play(&settings).expect("first play");
    live.play(&settings).expect("second play");
    pull(&mut renderer, RENDER_QUANTUM * 2);

    let events = live.poll_events();
    assert_eq!(events, vec![RenderEvent::VoiceEnded { voice_id: 2 }]);
    assert_eq!(live.state(), PlaybackState::Paused);
}

#[test]
fn pause_keeps_the_graph_installed() {
    let (mut live, mut renderer) = engine(8_000, 2);
    live.load_asset(sine_asset(110.0, 1.0, 8_000, 2));
    live.play(&EffectsSettings::reset()).expect("play");
    pull(&mut renderer, RENDER_QUANTUM);
    assert!(renderer.has_graph());
    assert!(renderer.has_voice());

    live.pause();
    pull(&mut renderer, RENDER_QUANTUM);
    assert!(renderer.has_graph());
    assert!(!renderer.has_voice());

    live.unload();
    pull(&mut renderer, RENDER_QUANTUM);
    assert!(!renderer.has_graph());
}

#[test]
fn parameter_update_lands_on_next_quantum() {
    let (mut live, mut renderer) = engine(8_000, 1);
    let settings = EffectsSettings::reset();
    live.load_asset(sine_asset(200.0, 1.0, 8_000, 1));
    live.play(&settings).expect("play");

    let first = pull(&mut renderer, RENDER_QUANTUM);
    assert!(first.iter().any(|sample| sample.abs() > 1e-3));

    let muted = settings.set(Field::Volume, 0.0);
    live.update_field(Field::Volume, &muted);
    assert_eq!(live.control_bank().read(StageId::Output, ParamId::Gain), 0.0);

    let second = pull(&mut renderer, RENDER_QUANTUM);
    assert!(second.iter().all(|sample| *sample == 0.0));
}

#[test]
fn finished_voice_pauses_the_engine() {
    let (mut live, mut renderer) = engine(8_000, 1);
    live.load_asset(impulse_asset(32, 8_000));
    live.play(&EffectsSettings::reset()).expect("play");
    assert_eq!(live.state(), PlaybackState::Playing);

    pull(&mut renderer, RENDER_QUANTUM);
    let events = live.poll_events();
    assert_eq!(events.len(), 1);
    assert_eq!(live.state(), PlaybackState::Paused);
}

#[test]
fn looping_voice_never_ends() {
    let (mut live, mut renderer) = engine(8_000, 1);
    live.load_asset(impulse_asset(32, 8_000));
    live.play(&EffectsSettings::reset().set(Field::Loop, true))
        .expect("play");

    pull(&mut renderer, RENDER_QUANTUM * 4);
    assert!(live.poll_events().is_empty());
    assert_eq!(live.state(), PlaybackState::Playing);
    assert!(renderer.has_voice());
}

#[test]
fn live_output_matches_offline_render() {
    let settings = EffectsSettings::reset()
        .set(Field::Chorus, 40.0)
        .set(Field::Phaser, 70.0)
        .set(Field::Tremolo, 30.0)
        .set(Field::Drive, 25.0)
        .set(Field::Delay, 120.0)
        .set(Field::DelayFeedback, 60.0)
        .set(Field::Compression, 45.0)
        .set(Field::Hpf, 10.0)
        .set(Field::Tempo, 120.0);
    let asset = sine_asset(330.0, 0.5, 22_050, 2);
    let offline = render_offline(&asset, &settings).expect("offline render");

    let (mut live, mut renderer) = engine(22_050, 2);
    live.load_asset(asset);
    live.play(&settings).expect("play");
    let online = pull(&mut renderer, offline.frames());

    assert_eq!(online.len(), offline.samples.len());
    for (index, (a, b)) in online.iter().zip(&offline.samples).enumerate() {
        assert!((a - b).abs() <= 1e-6, "sample {index}: live {a} vs offline {b}");
    }
}

fn engine_with_capacity(command_capacity: usize) -> (LiveEngine, LiveRenderer) {
    LiveEngine::new(LiveConfig {
        sample_rate: 8_000,
        channels: 1,
        command_capacity,
        ..LiveConfig::default()
    })
    .expect("live engine should build")
}

#[test]
fn pause_silences_voice_after_a_burst_of_shaper_edits() {
    let (mut live, mut renderer) = engine_with_capacity(4);
    let mut settings = EffectsSettings::reset();
    live.load_asset(sine_asset(220.0, 5.0, 8_000, 1));
    live.play(&settings).expect("play");

    for drive in 1..=70 {
        settings = settings.set(Field::Drive, drive as f32);
        live.update_field(Field::Drive, &settings);
    }
    live.pause();
    assert_eq!(live.state(), PlaybackState::Paused);

    let block = pull(&mut renderer, 1_024);
    let peak = block.iter().fold(0.0_f32, |peak, sample| peak.max(sample.abs()));
    assert!(!renderer.has_voice());
    assert!(peak < 1e-6, "paused output peaked at {peak}");

    live.play(&settings).expect("play after pause");
    pull(&mut renderer, RENDER_QUANTUM);
    assert!(renderer.has_voice());
}

#[test]
fn stop_and_unload_win_over_a_full_queue() {
    let (mut live, mut renderer) = engine_with_capacity(2);
    live.load_asset(sine_asset(220.0, 5.0, 8_000, 1));
    live.play(&EffectsSettings::reset()).expect("play");
    // graph and voice fill the queue before the renderer runs
    live.stop();
    pull(&mut renderer, RENDER_QUANTUM);
    assert!(renderer.has_graph());
    assert!(!renderer.has_voice());

    live.play(&EffectsSettings::reset()).expect("play again");
    live.unload();
    let block = pull(&mut renderer, RENDER_QUANTUM);
    assert!(!renderer.has_graph());
    assert!(!renderer.has_voice());
    assert!(block.iter().all(|sample| *sample == 0.0));
}

#[test]
fn voice_end_is_reported_without_regular_polling() {
    let (mut live, mut renderer) = engine_with_capacity(2);
    live.load_asset(impulse_asset(32, 8_000));
    let settings = EffectsSettings::reset();

    for _ in 0..10 {
        live.play(&settings).expect("play");
        pull(&mut renderer, RENDER_QUANTUM);
    }

    assert_eq!(
        live.poll_events(),
        vec![RenderEvent::VoiceEnded { voice_id: 10 }]
    );
    assert_eq!(live.state(), PlaybackState::Paused);
    assert!(live.poll_events().is_empty());
}
