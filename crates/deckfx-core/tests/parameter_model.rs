use deckfx_core::model::{
    DEFAULT_SETTINGS, Domain, EffectsSettings, Field, FieldValue, MAX_DELAY_FEEDBACK, wet_dry,
};
use proptest::prelude::*;

fn any_field() -> impl Strategy<Value = Field> {
    prop::sample::select(Field::ALL.to_vec())
}

fn wild_f32() -> impl Strategy<Value = f32> {
    prop_oneof![
        Just(f32::NAN),
        Just(f32::INFINITY),
        Just(f32::NEG_INFINITY),
        -1.0e6_f32..1.0e6_f32,
    ]
}

#[test]
fn defaults_match_the_panel() {
    let defaults = EffectsSettings::reset();
    assert_eq!(defaults, DEFAULT_SETTINGS);
    assert_eq!(defaults.scalar(Field::Volume), 100.0);
    assert_eq!(defaults.scalar(Field::Lpf), 100.0);
    assert_eq!(defaults.scalar(Field::Tempo), 100.0);
    assert_eq!(defaults.scalar(Field::DelayFeedback), 30.0);
    for field in Field::ALL {
        if matches!(
            field,
            Field::Volume | Field::Lpf | Field::Tempo | Field::DelayFeedback
        ) {
            continue;
        }
        assert_eq!(defaults.scalar(field), 0.0, "{field} should default to 0");
    }
}

#[test]
fn nan_resolves_to_default_and_infinity_to_bounds() {
    let settings = EffectsSettings::reset()
        .set(Field::Drive, 40.0)
        .set(Field::Drive, f32::NAN)
        .set(Field::Pitch, f32::INFINITY)
        .set(Field::Low, f32::NEG_INFINITY);
    assert_eq!(settings.scalar(Field::Drive), 0.0);
    assert_eq!(settings.scalar(Field::Pitch), 12.0);
    assert_eq!(settings.scalar(Field::Low), -24.0);
}

#[test]
fn derived_mappings_follow_the_knobs() {
    let settings = EffectsSettings::reset()
        .set(Field::Hpf, 50.0)
        .set(Field::Lpf, 0.0)
        .set(Field::Compression, 100.0)
        .set(Field::Tremolo, 100.0)
        .set(Field::Bitcrusher, 100.0)
        .set(Field::Phaser, 50.0);

    assert!((settings.hpf_hz() - 1_010.0).abs() < 1e-3);
    assert!((settings.lpf_hz() - 2_000.0).abs() < 1e-3);
    assert!((settings.compressor_threshold_db() + 54.0).abs() < 1e-4);
    assert!((settings.tremolo_depth() - 0.5).abs() < 1e-6);
    assert!((settings.bit_depth() - 2.0).abs() < 1e-6);
    assert!((settings.phaser_depth_hz() - 500.0).abs() < 1e-3);
}

#[test]
fn feedback_gain_is_capped_at_half() {
    let settings = EffectsSettings::reset().set(Field::DelayFeedback, 100.0);
    assert_eq!(settings.delay_feedback_gain(), MAX_DELAY_FEEDBACK);
    let over = EffectsSettings::reset().set(Field::DelayFeedback, 1_000.0);
    assert_eq!(over.delay_feedback_gain(), 0.5);
}

#[test]
fn playback_rate_scenarios() {
    let pitched = EffectsSettings::reset()
        .set(Field::Pitch, 12.0)
        .set(Field::Tempo, 150.0);
    assert!((pitched.playback_rate() - 3.0).abs() < 1e-9);

    let locked = pitched.set(Field::KeyLock, true);
    assert!((locked.playback_rate() - 1.5).abs() < 1e-9);

    let reversed = locked.set(Field::Reverse, true);
    assert!((reversed.playback_rate() + 1.5).abs() < 1e-9);

    let down = EffectsSettings::reset().set(Field::Pitch, -12.0);
    assert!((down.playback_rate() - 0.5).abs() < 1e-9);
}

#[test]
fn toggle_and_scalar_values_cross_convert() {
    let settings = EffectsSettings::reset()
        .set(Field::Loop, 0.7)
        .set(Field::Volume, false)
        .set(Field::Drive, true);
    assert!(settings.looping());
    assert_eq!(settings.scalar(Field::Volume), 0.0);
    assert_eq!(settings.get(Field::Drive), FieldValue::Scalar(100.0));
    assert_eq!(settings.get(Field::Loop), FieldValue::Toggle(true));
    assert_eq!(Field::Pitch.step(), Some(0.1));
    assert_eq!(Field::Loop.step(), None);
    assert_eq!("delayFeedback".parse::<Field>(), Ok(Field::DelayFeedback));
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn every_field_stays_in_domain(field in any_field(), raw in wild_f32()) {
        let settings = EffectsSettings::reset().set(field, raw);
        match field.domain() {
            Domain::Range { min, max, step } => {
                let value = settings.scalar(field);
                prop_assert!(value.is_finite());
                prop_assert!(value >= min && value <= max, "{field} = {value}");
                let steps = f64::from(value - min) / f64::from(step);
                prop_assert!((steps - steps.round()).abs() < 1e-3, "{field} = {value} is off-step");
            }
            Domain::Toggle => {
                let value = settings.scalar(field);
                prop_assert!(value == 0.0 || value == 1.0);
            }
        }
    }

    #[test]
    fn setting_one_field_leaves_the_rest(field in any_field(), raw in -500.0_f32..500.0_f32) {
        let before = EffectsSettings::reset();
        let after = before.set(field, raw);
        for other in Field::ALL.into_iter().filter(|other| *other != field) {
            prop_assert_eq!(before.get(other), after.get(other));
        }
    }

    #[test]
    fn wet_and_dry_sum_to_one(amount in 0.0_f32..=100.0_f32) {
        let mix = wet_dry(amount);
        prop_assert!((mix.wet + mix.dry - 1.0).abs() < 1e-6);
        prop_assert!(mix.wet >= 0.0 && mix.wet <= 0.5);

        let settings = EffectsSettings::reset()
            .set(Field::Chorus, amount)
            .set(Field::Flanger, amount)
            .set(Field::Phaser, amount)
            .set(Field::Bitcrusher, amount);
        for pair in [
            settings.chorus_mix(),
            settings.flanger_mix(),
            settings.phaser_mix(),
            settings.bitcrusher_mix(),
        ] {
            prop_assert!((pair.wet + pair.dry - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn json_round_trip_preserves_snapshot(field in any_field(), raw in -500.0_f32..500.0_f32) {
        let settings = EffectsSettings::reset().set(field, raw);
        let json = serde_json::to_string(&settings).expect("settings should serialize");
        let decoded: EffectsSettings = serde_json::from_str(&json).expect("settings should parse");
        prop_assert_eq!(decoded, settings);
    }
}
