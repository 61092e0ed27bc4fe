//! Phase table builders for each interpolation strategy.
//!
//! A table holds `phases` rows of `width` integer coefficients. Output sample
//! `n + f` (with `f` the row's fraction) is the dot product of a row with
//! input frames `n - (width / 2 - 1) ..= n + width / 2`.

use super::Interpolation;

/// Fixed-point unit of a coefficient row.
pub const FILTER_UNIT: i32 = 1 << FILTER_BITS;
/// Fractional bits of coefficients.
pub const FILTER_BITS: u32 = 15;

const SINC_ROLLOFF: f64 = 0.999;
const KAISER_BETA: f64 = 7.0;

/// Coefficients for one phase, as floating point weights summing to 1.
type Weights = Vec<f64>;

/// Kernel width in input frames for a strategy.
pub fn width(kind: Interpolation) -> usize {
    match kind {
        Interpolation::None | Interpolation::Upsampler => 2,
        Interpolation::Linear | Interpolation::Cubic => 4,
        Interpolation::Sinc => 16,
    }
}

/// Build the integer phase table for `kind` at input/output `ratio`.
pub fn build(kind: Interpolation, ratio: f64, fractions: &[f64]) -> Vec<i32> {
    let width = width(kind);
    let mut table = Vec::with_capacity(fractions.len() * width);
    for &f in fractions {
        let weights = match kind {
            Interpolation::None => nearest(f),
            Interpolation::Upsampler => linear(f),
            Interpolation::Linear => prefiltered_linear(f, ratio),
            Interpolation::Cubic => catmull_rom(f),
            Interpolation::Sinc => windowed_sinc(f, ratio, width),
        };
        table.extend(quantize(&weights));
    }
    table
}

fn nearest(f: f64) -> Weights {
    if f < 0.5 {
        vec![1.0, 0.0]
    } else {
        vec![0.0, 1.0]
    }
}

fn linear(f: f64) -> Weights {
    vec![1.0 - f, f]
}

/// Linear interpolation behind a 1-2-1 low-pass, which only kicks in when
/// downsampling.
fn prefiltered_linear(f: f64, ratio: f64) -> Weights {
    if ratio <= 1.0 {
        return vec![0.0, 1.0 - f, f, 0.0];
    }
    let a = 1.0 - f;
    vec![
        0.25 * a,
        0.5 * a + 0.25 * f,
        0.25 * a + 0.5 * f,
        0.25 * f,
    ]
}

fn catmull_rom(f: f64) -> Weights {
    let f2 = f * f;
    let f3 = f2 * f;
    vec![
        -0.5 * f3 + f2 - 0.5 * f,
        1.5 * f3 - 2.5 * f2 + 1.0,
        -1.5 * f3 + 2.0 * f2 + 0.5 * f,
        0.5 * f3 - 0.5 * f2,
    ]
}

fn windowed_sinc(f: f64, ratio: f64, width: usize) -> Weights {
    let cutoff = (1.0 / ratio).min(1.0) * SINC_ROLLOFF;
    let half = (width / 2) as f64;
    let center = (width / 2 - 1) as f64;
    let mut weights: Weights = (0..width)
        .map(|k| {
            let x = k as f64 - center - f;
            let t = x / half;
            let window = if t.abs() >= 1.0 {
                0.0
            } else {
                bessel_i0(KAISER_BETA * (1.0 - t * t).sqrt()) / bessel_i0(KAISER_BETA)
            };
            cutoff * sinc(cutoff * x) * window
        })
        .collect();
    let total: f64 = weights.iter().sum();
    if total != 0.0 {
        weights.iter_mut().for_each(|w| *w /= total);
    }
    weights
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-9 {
        1.0
    } else {
        let px = std::f64::consts::PI * x;
        px.sin() / px
    }
}

fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut term = 1.0;
    let half = x / 2.0;
    let mut k = 1.0;
    while term > sum * 1e-12 {
        term *= (half / k) * (half / k);
        sum += term;
        k += 1.0;
    }
    sum
}

/// Round weights to integers by differencing their rounded running sum, then
/// push any residual into the largest tap so the row sums to `FILTER_UNIT`.
fn quantize(weights: &[f64]) -> Vec<i32> {
    let unit = FILTER_UNIT as f64;
    let mut out = Vec::with_capacity(weights.len());
    let mut running = 0.0;
    let mut prev = 0.0;
    for &w in weights {
        running += w;
        let rounded = (running * unit + 0.5).floor();
        out.push((rounded - prev) as i32);
        prev = rounded;
    }
    let error = FILTER_UNIT - out.iter().sum::<i32>();
    if let Some(peak) = (0..out.len()).max_by_key(|&i| out[i].abs()) {
        out[peak] += error;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_catmull_rom_partition_of_unity() {
        for i in 0..10 {
            let sum: f64 = catmull_rom(i as f64 / 10.0).iter().sum();
            assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_catmull_rom_hits_sample_at_zero() {
        let w = catmull_rom(0.0);
        assert_abs_diff_eq!(w[1], 1.0);
        assert_abs_diff_eq!(w[0], 0.0);
        assert_abs_diff_eq!(w[2], 0.0);
    }

    #[test]
    fn test_sinc_center_dominates() {
        let w = windowed_sinc(0.0, 1.0, 16);
        let peak = (0..16)
            .max_by(|&a, &b| w[a].partial_cmp(&w[b]).unwrap())
            .unwrap();
        assert_eq!(peak, 7);
    }

    #[test]
    fn test_quantized_rows_sum_to_unit() {
        for kind in [
            Interpolation::None,
            Interpolation::Upsampler,
            Interpolation::Linear,
            Interpolation::Cubic,
            Interpolation::Sinc,
        ] {
            let fractions: Vec<f64> = (0..37).map(|i| i as f64 / 37.0).collect();
            for ratio in [0.5, 0.7256, 1.0, 1.378, 3.0] {
                let table = build(kind, ratio, &fractions);
                for row in table.chunks(width(kind)) {
                    assert_eq!(row.iter().sum::<i32>(), FILTER_UNIT, "{kind:?} {ratio}");
                }
            }
        }
    }
}
