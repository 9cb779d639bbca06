use criterion::{black_box, criterion_group, criterion_main, Criterion};
use iq_slurper::{
    analysis::{PeakDetector, SpectralAnalyzer},
    codec::{encode, OutputFormat},
    Iq,
};
use rand::prelude::*;

const SAMPLE_RATE: f64 = 2_048_000.0;

fn benchmark(c: &mut Criterion) {
    let mut rng = rand::thread_rng();

    // 100 ms of noise with a tone on top
    let samples: Vec<Iq> = (0..204_800)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * 25_000.0 * i as f32 / SAMPLE_RATE as f32;
            Iq::new(
                0.5 * phase.cos() + rng.gen_range(-0.01..0.01),
                0.5 * phase.sin() + rng.gen_range(-0.01..0.01),
            )
        })
        .collect();
    let analyzer = SpectralAnalyzer::new(SAMPLE_RATE);
    let detector = PeakDetector::default();

    c.bench_function("detect peaks", |b| {
        b.iter(|| analyzer.detect_peaks(black_box(&samples), black_box(&detector)))
    });

    c.bench_function("bandpass", |b| {
        b.iter(|| analyzer.bandpass(black_box(&samples), black_box(10_000.0), black_box(40_000.0)))
    });

    c.bench_function("spectrogram", |b| {
        b.iter(|| analyzer.spectrogram(black_box(&samples), black_box(1024), black_box(512)))
    });

    c.bench_function("modulation estimate", |b| {
        b.iter(|| analyzer.modulation_estimate(black_box(&samples)))
    });

    c.bench_function("wav encode", |b| {
        b.iter(|| encode(black_box(&samples), OutputFormat::Wav, 2_048_000))
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
