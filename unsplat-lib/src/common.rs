/// Zeroth-order spherical harmonic basis constant, `1 / (2 * sqrt(pi))`.
pub const SH_C0: f64 = 0.282_094_791_773_878_14;

/// Number of consecutive splats that share one set of chunk bounds in a
/// compressed PLY.
pub const CHUNK_SIZE: usize = 256;

/// Entries in every SOG codebook (one per 8-bit index).
pub const CODEBOOK_LEN: usize = 256;

/// Clamp applied before the SOG opacity logit.
pub const OPACITY_EPS: f32 = 1e-6;

pub const SQRT_2: f32 = std::f32::consts::SQRT_2;

/// Tag bytes `252..=255` in the SOG quaternion plane carry the index of the
/// reconstructed component.
pub const QUAT_TAG_BASE: u8 = 252;

// The compressed PLY helpers below work in f64; callers narrow to f32 once,
// when the finished splat is stored.

#[inline]
pub fn unpack_111011(value: u32) -> [f64; 3] {
    [
        f64::from((value >> 21) & 0x7FF) / 2047.0,
        f64::from((value >> 11) & 0x3FF) / 1023.0,
        f64::from(value & 0x7FF) / 2047.0,
    ]
}

#[inline]
pub fn unpack_8888(value: u32) -> [f64; 4] {
    [
        f64::from((value >> 24) & 0xFF) / 255.0,
        f64::from((value >> 16) & 0xFF) / 255.0,
        f64::from((value >> 8) & 0xFF) / 255.0,
        f64::from(value & 0xFF) / 255.0,
    ]
}

/// Decodes a 2.10.10.10 "smallest three" rotation into `(w, x, y, z)`.
///
/// The top two bits name the slot that was dropped by the encoder. The three
/// stored components live in `[-1/sqrt(2), 1/sqrt(2)]`; the dropped one is
/// recovered from the unit-norm constraint and the result is renormalized.
#[inline]
pub fn unpack_rotation(value: u32) -> [f64; 4] {
    let which = ((value >> 30) & 0x3) as usize;
    let unit = |bits: u32| (f64::from(bits & 0x3FF) / 1023.0 - 0.5) * std::f64::consts::SQRT_2;
    let a = unit(value >> 20);
    let b = unit(value >> 10);
    let c = unit(value);

    let m = (1.0 - a * a - b * b - c * c).max(0.0).sqrt();
    let q = match which {
        0 => [m, a, b, c],
        1 => [a, m, b, c],
        2 => [a, b, m, c],
        _ => [a, b, c, m],
    };
    normalize(q)
}

#[inline]
fn normalize(q: [f64; 4]) -> [f64; 4] {
    let norm = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    if norm > 0.0 {
        q.map(|v| v / norm)
    } else {
        q
    }
}

#[inline]
pub fn dequant_linear(v: f64, lo: f64, hi: f64) -> f64 {
    lo + v * (hi - lo)
}

/// Opacity logit used by compressed PLY. The 8-bit alpha is kept away from
/// 0 and 1 so the result stays finite.
#[inline]
pub fn logit_opacity(a: f64) -> f64 {
    let a = a.clamp(1.0 / 255.0, 254.0 / 255.0);
    -(1.0 / a - 1.0).ln()
}

/// Undoes `sign(x) * ln(1 + |x|)`, the compression SOG applies to positions.
#[inline]
pub fn inv_log_transform(v: f32) -> f32 {
    if v == 0.0 {
        return 0.0;
    }
    v.signum() * (v.abs().exp() - 1.0)
}

#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[inline]
pub fn inv_sigmoid(y: f32) -> f32 {
    let y = y.clamp(OPACITY_EPS, 1.0 - OPACITY_EPS);
    (y / (1.0 - y)).ln()
}

#[inline]
pub fn color_to_sh_dc(c: f64) -> f64 {
    (c - 0.5) / SH_C0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(q: [f64; 4]) -> f64 {
        q.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    #[test]
    fn test_unpack_111011_matches_bit_ratios() {
        for value in (0..=u32::MAX).step_by(104_729) {
            let [x, y, z] = unpack_111011(value);
            let ex = ((value >> 21) & 0x7FF) as f64 / 2047.0;
            let ey = ((value >> 11) & 0x3FF) as f64 / 1023.0;
            let ez = (value & 0x7FF) as f64 / 2047.0;
            assert!((dequant_linear(x, 0.0, 1.0) - ex).abs() < 1.0 / 2047.0);
            assert!((dequant_linear(y, 0.0, 1.0) - ey).abs() < 1.0 / 1023.0);
            assert!((dequant_linear(z, 0.0, 1.0) - ez).abs() < 1.0 / 2047.0);
        }
        assert_eq!(unpack_111011(0), [0.0, 0.0, 0.0]);
        assert_eq!(unpack_111011(u32::MAX), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_unpack_8888_extremes() {
        assert_eq!(unpack_8888(0x0000_0000), [0.0, 0.0, 0.0, 0.0]);
        assert_eq!(unpack_8888(0xFFFF_FFFF), [1.0, 1.0, 1.0, 1.0]);
        let [r, g, b, a] = unpack_8888(0xFF00_8000);
        assert_eq!((r, g, a), (1.0, 0.0, 0.0));
        assert_eq!(b, 128.0 / 255.0);
    }

    #[test]
    fn test_unpack_rotation_is_unit_for_every_selector() {
        for which in 0..4u32 {
            for low in (0..(1u32 << 30)).step_by(7919) {
                let q = unpack_rotation((which << 30) | low);
                assert!(
                    (norm(q) - 1.0).abs() < 1e-5,
                    "selector {which}, word {low:#x}: |q| = {}",
                    norm(q)
                );
            }
        }
    }

    #[test]
    fn test_unpack_rotation_places_missing_component() {
        // 511/1023 is as close to the midpoint as the 10-bit fields get.
        let mid = 511u32;
        let stored = (mid << 20) | (mid << 10) | mid;
        for which in 0..4u32 {
            let q = unpack_rotation((which << 30) | stored);
            for (slot, v) in q.iter().enumerate() {
                if slot == which as usize {
                    assert!((v - 1.0).abs() < 1e-4);
                } else {
                    assert!(v.abs() < 1e-3);
                }
            }
        }
    }

    #[test]
    fn test_unpack_rotation_saturated_radicand() {
        // All stored components at the maximum leave nothing for the missing
        // one; renormalization must still produce a unit quaternion.
        let q = unpack_rotation(0x3FFF_FFFF);
        assert_eq!(q[0], 0.0);
        assert!((norm(q) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_dequant_linear_monotonic_and_bounded() {
        let (lo, hi) = (-3.5, 12.25);
        let mut prev = f64::NEG_INFINITY;
        for step in 0..=1000 {
            let v = step as f64 / 1000.0;
            let out = dequant_linear(v, lo, hi);
            assert!(out >= prev);
            assert!((lo..=hi).contains(&out));
            prev = out;
        }
        assert_eq!(dequant_linear(0.0, lo, hi), lo);
        assert_eq!(dequant_linear(1.0, lo, hi), hi);
    }

    #[test]
    fn test_inv_sigmoid_inverts_sigmoid() {
        for step in -80..=80 {
            let x = step as f32 / 10.0;
            assert!((inv_sigmoid(sigmoid(x)) - x).abs() < 1e-3, "x = {x}");
        }
        assert!(inv_sigmoid(0.0).is_finite());
        assert!(inv_sigmoid(1.0).is_finite());
    }

    #[test]
    fn test_logit_opacity_clamps_to_byte_range() {
        assert_eq!(logit_opacity(0.0), logit_opacity(1.0 / 255.0));
        assert_eq!(logit_opacity(1.0), logit_opacity(254.0 / 255.0));
        assert!(logit_opacity(0.5).abs() < 1e-12);
        assert!((logit_opacity(0.8) - f64::from(inv_sigmoid(0.8))).abs() < 1e-5);
    }

    #[test]
    fn test_logit_opacity_matches_double_precision_bytes() {
        // f32 bit patterns of the double-precision logit for selected alpha
        // bytes, narrowed once.
        let expected: [(u8, u32); 6] = [
            (1, 0xC0B1_31D8),
            (64, 0xBF8B_F437),
            (128, 0x3C00_80AC),
            (250, 0x407A_5E96),
            (252, 0x408D_C940),
            (255, 0x40B1_31D8),
        ];
        for (byte, bits) in expected {
            let opacity = logit_opacity(f64::from(byte) / 255.0) as f32;
            assert_eq!(
                opacity.to_bits(),
                bits,
                "alpha byte {byte}: got {opacity}, want {}",
                f32::from_bits(bits)
            );
        }
    }

    #[test]
    fn test_inv_log_transform() {
        assert_eq!(inv_log_transform(0.0), 0.0);
        let x = 3.25f32;
        let encoded = x.signum() * (1.0 + x.abs()).ln();
        assert!((inv_log_transform(encoded) - x).abs() < 1e-5);
        assert!((inv_log_transform(-encoded) + x).abs() < 1e-5);
    }

    #[test]
    fn test_color_to_sh_dc() {
        assert_eq!(color_to_sh_dc(0.5), 0.0);
        assert!((color_to_sh_dc(1.0) * SH_C0 - 0.5).abs() < 1e-12);
    }
}
