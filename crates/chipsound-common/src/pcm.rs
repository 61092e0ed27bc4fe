//! PCM sample format conversion.

/// Output channel arrangement for float rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelLayout {
    /// Left and right averaged.
    Mono,
    /// Interleaved left, right.
    #[default]
    Stereo,
    /// Front left, front right, rear left, rear right; rears repeat the fronts.
    Quad,
}

impl ChannelLayout {
    /// Samples per frame.
    pub fn channels(self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
            ChannelLayout::Quad => 4,
        }
    }
}

/// Normalize one sample to -1.0..1.0.
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Convert interleaved stereo `src` into `dst` laid out as `layout`.
///
/// Converts as many whole frames as both buffers hold and returns that count.
pub fn convert_stereo(src: &[i16], dst: &mut [f32], layout: ChannelLayout) -> usize {
    let frames = (src.len() / 2).min(dst.len() / layout.channels());
    let src = src.chunks_exact(2).take(frames);
    match layout {
        ChannelLayout::Mono => {
            for (frame, out) in src.zip(dst.iter_mut()) {
                *out = (i16_to_f32(frame[0]) + i16_to_f32(frame[1])) * 0.5;
            }
        }
        ChannelLayout::Stereo => {
            for (frame, out) in src.zip(dst.chunks_exact_mut(2)) {
                out[0] = i16_to_f32(frame[0]);
                out[1] = i16_to_f32(frame[1]);
            }
        }
        ChannelLayout::Quad => {
            for (frame, out) in src.zip(dst.chunks_exact_mut(4)) {
                let l = i16_to_f32(frame[0]);
                let r = i16_to_f32(frame[1]);
                out.copy_from_slice(&[l, r, l, r]);
            }
        }
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mono_downmix_averages() {
        let src = [16384i16, -16384, 8192, 8192];
        let mut dst = [1.0f32; 2];
        assert_eq!(convert_stereo(&src, &mut dst, ChannelLayout::Mono), 2);
        assert_relative_eq!(dst[0], 0.0);
        assert_relative_eq!(dst[1], 0.25);
    }

    #[test]
    fn test_quad_repeats_front_pair() {
        let src = [32767i16, -32768];
        let mut dst = [0.0f32; 4];
        assert_eq!(convert_stereo(&src, &mut dst, ChannelLayout::Quad), 1);
        assert_relative_eq!(dst[2], dst[0]);
        assert_relative_eq!(dst[3], -1.0);
    }

    #[test]
    fn test_conversion_stops_at_shorter_buffer() {
        let src = [1i16; 8];
        let mut dst = [0.0f32; 6];
        assert_eq!(convert_stereo(&src, &mut dst, ChannelLayout::Stereo), 3);
    }
}
