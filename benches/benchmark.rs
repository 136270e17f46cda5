use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use lazy_convert::engine::{effective_quality, quantize_colors, render_surface, DecodedBitmap};
use lazy_convert::{ConversionRequest, Converter, SourceAsset};
use std::hint::black_box;
use std::io::Cursor;

fn gradient(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
    })
}

fn png_asset(width: u32, height: u32) -> SourceAsset {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(gradient(width, height))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    SourceAsset::new("bench.png", "image/png", buf)
}

fn bench_convert(c: &mut Criterion) {
    let converter = Converter::default();
    let asset = png_asset(512, 512);
    let mut group = c.benchmark_group("convert_512");
    group.sample_size(20);
    for token in ["jpeg", "png", "webp"] {
        let request = ConversionRequest::new(token).quality(80);
        group.bench_with_input(BenchmarkId::from_parameter(token), &request, |b, request| {
            b.iter(|| converter.convert(black_box(&asset), request).unwrap())
        });
    }
    group.finish();
}

fn bench_resize(c: &mut Criterion) {
    let source = gradient(1024, 768);
    c.bench_function("render_surface 1024x768 -> 320x240", |b| {
        b.iter(|| {
            let bitmap = DecodedBitmap::new(source.clone(), None);
            render_surface(bitmap, Some((320, 240))).unwrap()
        })
    });
}

fn bench_quantize(c: &mut Criterion) {
    let source = gradient(512, 512);
    let mut group = c.benchmark_group("quantize_512");
    for level in [10, 50, 90] {
        group.bench_with_input(BenchmarkId::from_parameter(level), &level, |b, &level| {
            b.iter(|| {
                let mut surface = source.clone();
                quantize_colors(&mut surface, level);
                surface
            })
        });
    }
    group.finish();
}

fn bench_effective_quality(c: &mut Criterion) {
    c.bench_function("effective_quality", |b| {
        b.iter(|| {
            let mut sum = 0.0f32;
            for q in 1..=100 {
                sum += effective_quality(black_box(q), black_box(35));
            }
            sum
        })
    });
}

criterion_group!(
    benches,
    bench_convert,
    bench_resize,
    bench_quantize,
    bench_effective_quality
);
criterion_main!(benches);
