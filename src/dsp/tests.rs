use super::identify::{cosine_similarity, normalized_cross_correlation};
use super::{
    argmax, bin_frequency, hann_window, l2_norm, MagnitudeSpectrum, SignalCharacteristics,
    SignalIdentifier, SignalTemplate, SpectralProcessor, Spectrogram, SpectrumAnalyzer,
    TemplateData, TemplateSet, STD_EPSILON,
};
use crate::audio::{AudioFrame, ChannelMode};
use crate::error::EngineError;
use std::f32::consts::PI;

const BINS: usize = 129;

fn approx(a: f32, b: f32, tol: f32) -> bool {
    (a - b).abs() <= tol
}

fn flat(value: f32) -> MagnitudeSpectrum {
    MagnitudeSpectrum::new(vec![value; BINS])
}

/// Noise model with mean 2 and standard deviation 1 in every bin.
fn calibrated_processor() -> SpectralProcessor {
    let mut processor = SpectralProcessor::new(0.1, 1.5);
    let frames: Vec<MagnitudeSpectrum> = (0..20)
        .map(|i| flat(if i % 2 == 0 { 1.0 } else { 3.0 }))
        .collect();
    processor.calibrate(&frames).expect("calibrate");
    processor
}

/// Deterministic N(0, sigma) spectra from a 64-bit LCG and Box-Muller.
fn gaussian_frames(count: usize, sigma: f32, seed: u64) -> Vec<MagnitudeSpectrum> {
    let mut state = seed;
    let mut uniform = move || {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        ((state >> 11) as f64 + 0.5) / (1u64 << 53) as f64
    };
    (0..count)
        .map(|_| {
            let bins: Vec<f32> = (0..BINS)
                .map(|_| {
                    let (u1, u2) = (uniform(), uniform());
                    let normal = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
                    normal as f32 * sigma
                })
                .collect();
            MagnitudeSpectrum::new(bins)
        })
        .collect()
}

fn spectrum_template(name: &str, bins: Vec<f32>) -> SignalTemplate {
    SignalTemplate::new(name, TemplateData::Spectrum { bins }).expect("template")
}

#[test]
fn hann_window_is_symmetric_with_zero_ends() {
    let window = hann_window(5);
    let expected = [0.0, 0.5, 1.0, 0.5, 0.0];
    for (got, want) in window.iter().zip(expected) {
        assert!(approx(*got, want, 1e-6), "{window:?}");
    }
    assert_eq!(hann_window(1), vec![1.0]);
    assert!(hann_window(0).is_empty());
}

#[test]
fn bin_frequency_scales_with_rate_and_size() {
    assert!(approx(bin_frequency(100, 48_000, 4_096), 1_171.875, 1e-3));
    assert_eq!(bin_frequency(3, 48_000, 0), 0.0);
}

#[test]
fn argmax_prefers_first_peak_and_skips_nan() {
    assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), Some(1));
    assert_eq!(argmax(&[f32::NAN, 0.5]), Some(1));
    assert_eq!(argmax(&[]), None);
    assert_eq!(MagnitudeSpectrum::new(vec![0.0, 4.0]).peak_bin(), Some(1));
}

#[test]
fn analyzer_rejects_tiny_fft() {
    let err = SpectrumAnalyzer::new(8, ChannelMode::Mix)
        .err()
        .expect("too small");
    assert!(matches!(err, EngineError::InvalidConfig(_)));
}

#[test]
fn analyzer_finds_tone_bin() {
    let fft_size = 1_024;
    let mut analyzer = SpectrumAnalyzer::new(fft_size, ChannelMode::Mix).expect("analyzer");
    assert_eq!(analyzer.bin_count(), 513);

    let tone: Vec<f32> = (0..fft_size)
        .map(|n| 0.5 * (2.0 * PI * 64.0 * n as f32 / fft_size as f32).sin())
        .collect();
    let (magnitude, complex) = analyzer.push_samples(&tone);
    assert_eq!(magnitude.len(), 513);
    assert_eq!(complex.len(), 513);
    assert_eq!(magnitude.peak_bin(), Some(64));
    assert!(approx(complex.magnitude()[64], magnitude[64], 1e-3));
}

#[test]
fn analyzer_rolls_short_frames_into_window() {
    let mut analyzer = SpectrumAnalyzer::new(64, ChannelMode::Left).expect("analyzer");
    let (silent, _) = analyzer.push_frame(&AudioFrame::new(vec![0; 64], 2));
    assert!(silent.iter().all(|&m| m == 0.0));

    // Right channel is loud but ignored in Left mode.
    let (still_silent, _) = analyzer.push_frame(&AudioFrame::new(vec![0, 20_000, 0, 20_000], 2));
    assert!(still_silent.iter().all(|&m| m == 0.0));

    let (loud, _) = analyzer.push_frame(&AudioFrame::new(vec![20_000; 32], 1));
    assert!(loud.iter().any(|&m| m > 0.0));

    analyzer.reset();
    let (reset, _) = analyzer.push_samples(&[]);
    assert!(reset.iter().all(|&m| m == 0.0));
}

#[test]
fn calibrate_fits_mean_and_std() {
    let processor = calibrated_processor();
    let model = processor.noise_model();
    assert!(model.calibrated);
    assert_eq!(model.bin_count(), BINS);
    assert!(model.mean.iter().all(|&mu| approx(mu, 2.0, 1e-6)));
    assert!(model.std_dev.iter().all(|&sd| approx(sd, 1.0, 1e-6)));
}

#[test]
fn calibrate_floors_zero_variance() {
    let mut processor = SpectralProcessor::default();
    processor
        .calibrate(&[flat(0.5), flat(0.5)])
        .expect("calibrate");
    assert!(processor
        .noise_model()
        .std_dev
        .iter()
        .all(|&sd| sd == STD_EPSILON));
}

#[test]
fn calibrate_rejects_empty_and_ragged_input() {
    let mut processor = calibrated_processor();
    let before = processor.noise_model().clone();

    assert!(matches!(
        processor.calibrate(&[]),
        Err(EngineError::ShapeMismatch { found: 0, .. })
    ));
    let ragged = [flat(1.0), MagnitudeSpectrum::new(vec![1.0; 10])];
    assert!(matches!(
        processor.calibrate(&ragged),
        Err(EngineError::ShapeMismatch {
            expected: BINS,
            found: 10
        })
    ));
    assert_eq!(processor.noise_model(), &before);
}

#[test]
fn gate_passes_through_until_calibrated() {
    let processor = SpectralProcessor::default();
    let input = flat(4.0);
    assert_eq!(processor.gate(&input), input);
    assert_eq!(processor.residual(&input), input);
    assert!(processor.anomaly_score(&input).is_none());
    assert!(!processor.detect_anomaly(&input, 0.0));
}

#[test]
fn gate_subtracts_noise_down_to_floor() {
    let processor = calibrated_processor();
    let mut bins = vec![2.0; BINS];
    bins[10] = 13.0;
    let gated = processor.gate(&MagnitudeSpectrum::new(bins));

    // 13 - 2 * 1.5 = 10
    assert!(approx(gated[10], 10.0, 1e-5));
    // max(2 - 3, 2 * 0.1) = 0.2
    assert!(approx(gated[0], 0.2, 1e-6));
    assert!(gated.iter().all(|&m| m >= 0.0));
}

#[test]
fn gate_never_exceeds_input_or_drops_below_floor() {
    let processor = calibrated_processor();
    let bins: Vec<f32> = (0..BINS).map(|i| (i % 7) as f32 * 1.3).collect();
    let input = MagnitudeSpectrum::new(bins);
    let gated = processor.gate(&input);
    for (&g, &x) in gated.iter().zip(input.iter()) {
        assert!(g <= x + 1e-6);
        assert!(g + 1e-6 >= x * processor.spectral_floor());
    }
}

#[test]
fn gating_twice_never_raises_a_bin() {
    let mut processor = SpectralProcessor::default();
    let magnitudes: Vec<MagnitudeSpectrum> = gaussian_frames(40, 1.0, 7)
        .into_iter()
        .map(|frame| frame.iter().map(|m| m.abs() + 0.5).collect::<Vec<f32>>().into())
        .collect();
    processor.calibrate(&magnitudes[..30]).expect("calibrate");

    for input in &magnitudes[30..] {
        let once = processor.gate(input);
        let twice = processor.gate(&once);
        for (&second, &first) in twice.iter().zip(once.iter()) {
            assert!(second <= first, "{second} > {first}");
        }
    }
}

#[test]
fn gate_without_oversubtraction_is_idempotent() {
    let mut processor = SpectralProcessor::new(0.1, 0.0);
    processor
        .calibrate(&[flat(1.0), flat(3.0), flat(2.0)])
        .expect("calibrate");
    let bins: Vec<f32> = (0..BINS).map(|i| (i % 11) as f32 * 0.7).collect();
    let input = MagnitudeSpectrum::new(bins);

    let once = processor.gate(&input);
    assert_eq!(once, input);
    assert_eq!(processor.gate(&once), once);
}

#[test]
fn gate_ignores_foreign_bin_count() {
    let processor = calibrated_processor();
    let foreign = MagnitudeSpectrum::new(vec![5.0; 7]);
    assert_eq!(processor.gate(&foreign), foreign);
    assert!(processor.anomaly_score(&foreign).is_none());
}

#[test]
fn residual_clips_at_zero() {
    let processor = calibrated_processor();
    let mut bins = vec![1.0; BINS];
    bins[3] = 6.0;
    let residual = processor.residual(&MagnitudeSpectrum::new(bins));
    assert_eq!(residual[0], 0.0);
    assert!(approx(residual[3], 4.0, 1e-6));
}

#[test]
fn impulse_above_ten_sigma_is_detected_at_its_bin() {
    let processor = calibrated_processor();
    let mut bins = vec![2.0; BINS];
    bins[100] = 12.5;
    let spectrum = MagnitudeSpectrum::new(bins);

    let score = processor.anomaly_score(&spectrum).expect("calibrated");
    assert_eq!(score.peak_bin, 100);
    assert!(approx(score.max_z, 10.5, 1e-4));
    assert!(processor.detect_anomaly(&spectrum, 10.0));
    assert!(!processor.detect_anomaly(&spectrum, 11.0));
}

#[test]
fn ten_sigma_impulse_in_gaussian_noise_is_found_at_its_bin() {
    let sigma = 0.25;
    let frames = gaussian_frames(51, sigma, 0x5eed);
    let mut processor = SpectralProcessor::default();
    processor.calibrate(&frames[..50]).expect("calibrate");

    let model = processor.noise_model();
    assert!(model.std_dev.iter().all(|&s| s > sigma * 0.5 && s < sigma * 1.5));

    let mut bins = frames[50].clone().into_inner();
    bins[100] = model.mean[100] + 10.0 * model.std_dev[100];
    let spectrum = MagnitudeSpectrum::new(bins);

    assert!(processor.detect_anomaly(&spectrum, 3.0));
    let score = processor.anomaly_score(&spectrum).expect("calibrated");
    assert_eq!(score.peak_bin, 100);
    assert!(approx(score.max_z, 10.0, 1e-3));
}

#[test]
fn noise_alone_stays_below_threshold() {
    let processor = calibrated_processor();
    assert!(!processor.detect_anomaly(&flat(3.0), 10.0));
    assert!(!processor.detect_anomaly(&flat(1.0), 10.0));
}

#[test]
fn reset_forgets_model() {
    let mut processor = calibrated_processor();
    processor.reset();
    assert!(!processor.is_calibrated());
    assert_eq!(processor.noise_model().bin_count(), 0);
}

#[test]
fn spectrum_templates_are_unit_norm() {
    let template = spectrum_template("beacon", vec![3.0, 4.0]);
    let TemplateData::Spectrum { bins } = template.data() else {
        panic!("expected a spectrum template");
    };
    assert!(approx(l2_norm(bins), 1.0, 1e-6));
    assert_eq!(template.data().dimensions(), 1);
}

#[test]
fn templates_without_energy_or_name_are_rejected() {
    for data in [
        TemplateData::Spectrum { bins: vec![0.0; 4] },
        TemplateData::Spectrum { bins: Vec::new() },
        TemplateData::Tile {
            rows: 2,
            cols: 2,
            data: vec![0.0; 4],
        },
        TemplateData::Tile {
            rows: 2,
            cols: 3,
            data: vec![1.0; 4],
        },
    ] {
        assert!(matches!(
            SignalTemplate::new("x", data),
            Err(EngineError::InvalidTemplate(_))
        ));
    }
    assert!(SignalTemplate::new("  ", TemplateData::Spectrum { bins: vec![1.0] }).is_err());
}

#[test]
fn tile_from_rows_requires_rectangular_rows() {
    let tile = TemplateData::tile_from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).expect("tile");
    assert_eq!(
        tile,
        TemplateData::Tile {
            rows: 2,
            cols: 2,
            data: vec![1.0, 2.0, 3.0, 4.0]
        }
    );
    assert!(TemplateData::tile_from_rows(&[vec![1.0], vec![1.0, 2.0]]).is_err());
}

#[test]
fn template_data_tags_by_dimension() {
    let json = serde_json::to_value(TemplateData::Spectrum { bins: vec![1.0] }).expect("json");
    assert_eq!(json["kind"], "1d");
    let json = serde_json::to_value(TemplateData::Tile {
        rows: 1,
        cols: 1,
        data: vec![1.0],
    })
    .expect("json");
    assert_eq!(json["kind"], "2d");
}

#[test]
fn template_set_replaces_in_place() {
    let mut set: TemplateSet = [
        spectrum_template("a", vec![1.0, 0.0]),
        spectrum_template("b", vec![0.0, 1.0]),
    ]
    .into_iter()
    .collect();
    set.insert(spectrum_template("a", vec![1.0, 1.0]));
    assert_eq!(set.names(), vec!["a", "b"]);
    assert_eq!(set.len(), 2);
    assert!(set.remove("a"));
    assert!(!set.remove("a"));
    assert!(set.get("b").is_some());
}

#[test]
fn cosine_similarity_of_self_is_one_and_orthogonal_is_zero() {
    let live = [0.0, 3.0, 4.0];
    let unit = [0.0, 0.6, 0.8];
    assert!(approx(cosine_similarity(&live, l2_norm(&live), &unit), 1.0, 1e-6));
    assert!(approx(
        cosine_similarity(&[1.0, 0.0, 0.0], 1.0, &unit),
        0.0,
        1e-6
    ));
}

#[test]
fn cross_correlation_needs_energy_and_matching_length() {
    assert_eq!(normalized_cross_correlation(&[1.0], &[1.0, 2.0]), None);
    assert_eq!(normalized_cross_correlation(&[0.0, 0.0], &[1.0, 2.0]), None);
    let score = normalized_cross_correlation(&[2.0, 4.0], &[1.0, 2.0]).expect("score");
    assert!(approx(score, 1.0, 1e-6));
}

#[test]
fn identify_matches_scaled_spectrum() {
    let mut pattern = vec![0.0; BINS];
    pattern[40] = 1.0;
    pattern[41] = 0.5;
    let mut other = vec![0.0; BINS];
    other[90] = 1.0;
    let templates: TemplateSet = [
        spectrum_template("hum", other),
        spectrum_template("beacon", pattern.clone()),
    ]
    .into_iter()
    .collect();

    let live = MagnitudeSpectrum::new(pattern.iter().map(|v| v * 7.0).collect());
    let outcome =
        SignalIdentifier::default().identify(&live, &Spectrogram::new(4, BINS), &templates);
    assert_eq!(outcome.match_name(), Some("beacon"));
    assert!(approx(outcome.best_score, 1.0, 1e-5));
    assert!(outcome.skipped.is_empty());
}

#[test]
fn identify_reports_best_score_below_threshold() {
    let templates: TemplateSet = [spectrum_template("beacon", vec![1.0, 0.0, 0.0])]
        .into_iter()
        .collect();
    let live = MagnitudeSpectrum::new(vec![1.0, 1.0, 1.0]);
    let outcome = SignalIdentifier::new(0.85).identify(&live, &Spectrogram::new(1, 3), &templates);
    assert!(!outcome.matched);
    assert_eq!(outcome.match_name(), None);
    assert_eq!(outcome.best_name.as_deref(), Some("beacon"));
    assert!(approx(outcome.best_score, 1.0 / 3f32.sqrt(), 1e-5));
}

#[test]
fn identify_skips_misaligned_templates() {
    let templates: TemplateSet = [
        spectrum_template("short", vec![1.0, 2.0]),
        SignalTemplate::new(
            "tile",
            TemplateData::Tile {
                rows: 5,
                cols: 2,
                data: vec![1.0; 10],
            },
        )
        .expect("tile"),
    ]
    .into_iter()
    .collect();
    let mut spectrogram = Spectrogram::new(8, BINS);
    spectrogram.push(&flat(1.0));

    let outcome = SignalIdentifier::default().identify(&flat(1.0), &spectrogram, &templates);
    assert_eq!(outcome.skipped, vec!["short".to_string(), "tile".to_string()]);
    assert_eq!(outcome.best_name, None);
    assert!(!outcome.matched);
}

#[test]
fn identify_matches_spectrogram_tile() {
    let mut spectrogram = Spectrogram::new(8, 4);
    for row in 0..3 {
        let bins: Vec<f32> = (0..4).map(|b| (row * 4 + b) as f32 + 1.0).collect();
        spectrogram.push(&MagnitudeSpectrum::new(bins));
    }
    let captured = spectrogram.capture_tile(2, 3).expect("tile");
    assert_eq!(
        captured,
        TemplateData::Tile {
            rows: 2,
            cols: 3,
            data: vec![5.0, 6.0, 7.0, 9.0, 10.0, 11.0]
        }
    );
    let templates: TemplateSet = [SignalTemplate::new("sweep", captured).expect("template")]
        .into_iter()
        .collect();

    let outcome = SignalIdentifier::default().identify(&flat(1.0), &spectrogram, &templates);
    assert_eq!(outcome.match_name(), Some("sweep"));
}

#[test]
fn spectrogram_resets_on_width_change() {
    let mut spectrogram = Spectrogram::new(2, 4);
    spectrogram.push(&MagnitudeSpectrum::new(vec![1.0; 4]));
    spectrogram.push(&MagnitudeSpectrum::new(vec![2.0; 4]));
    spectrogram.push(&MagnitudeSpectrum::new(vec![3.0; 4]));
    assert_eq!(spectrogram.len(), 2);
    assert_eq!(spectrogram.tile(1, 1), Some(vec![3.0]));

    spectrogram.push(&MagnitudeSpectrum::new(vec![9.0; 6]));
    assert_eq!(spectrogram.len(), 1);
    assert_eq!(spectrogram.bins(), 6);
    assert_eq!(spectrogram.tile(2, 1), None);
    assert!(matches!(
        spectrogram.capture_tile(1, 7),
        Err(EngineError::ShapeMismatch { .. })
    ));
}

#[test]
fn characteristics_measure_band_and_centroid() {
    let mut bins = vec![0.0; 20];
    bins[10] = 1.0;
    bins[11] = 2.0;
    bins[12] = 1.0;
    let residual = MagnitudeSpectrum::new(bins);
    // 10 Hz per bin.
    let traits = SignalCharacteristics::measure(&residual, &[1.0; 20], 1_000, 100);

    assert!(approx(traits.bandwidth_hz, 20.0, 1e-4));
    assert!(approx(traits.spectral_centroid_hz, 110.0, 1e-4));
    assert!(approx(traits.peak_frequency_hz, 110.0, 1e-4));
    let snr = traits.snr_db.expect("snr");
    assert!(approx(snr, 10.0 * (6.0f32 / 20.0).log10(), 1e-4));
}

#[test]
fn characteristics_of_silence_are_zero() {
    let traits =
        SignalCharacteristics::measure(&MagnitudeSpectrum::new(vec![0.0; 8]), &[], 48_000, 14);
    assert_eq!(traits, SignalCharacteristics::default());
}
