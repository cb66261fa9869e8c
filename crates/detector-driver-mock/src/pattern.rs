//! Test pattern generation for simulated frames.

/// Simple pseudo-random number generator (LCG) for reproducible noise.
/// Uses the same algorithm as glibc for predictable cross-platform behavior.
#[inline]
fn prng(seed: u64) -> u64 {
    seed.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fffffff
}

/// Fill `buffer` with a diagnostic pattern for a `width x height` frame.
///
/// The pattern is a diagonal gradient from `dark_level` up to `max_value`
/// with a few counts of per-frame noise. The top-left pixel carries the frame
/// number modulo `max_value + 1`, so a frame can be identified from its pixels.
pub fn fill_test_pattern(
    buffer: &mut [u16],
    width: u32,
    height: u32,
    frame_num: u64,
    dark_level: u16,
    max_value: u16,
) {
    let w = width as usize;
    let h = height as usize;
    let span = u64::from(max_value.saturating_sub(dark_level));
    let diag = (w + h).saturating_sub(2).max(1) as u64;
    let mut seed = frame_num.wrapping_add(0x5eed);

    for (idx, px) in buffer.iter_mut().enumerate().take(w * h) {
        let (x, y) = ((idx % w) as u64, (idx / w) as u64);
        seed = prng(seed);
        let noise = seed % 8;
        let value = u64::from(dark_level) + (x + y) * span / diag + noise;
        *px = value.min(u64::from(max_value)) as u16;
    }

    if let Some(first) = buffer.first_mut() {
        *first = (frame_num % (u64::from(max_value) + 1)) as u16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_within_range() {
        let mut buf = vec![0u16; 32 * 16];
        fill_test_pattern(&mut buf, 32, 16, 7, 100, 4095);
        assert!(buf.iter().all(|&v| v <= 4095));
        assert_eq!(buf[0], 7);
        assert!(buf[1..].iter().all(|&v| v >= 100));
    }

    #[test]
    fn test_pattern_changes_per_frame() {
        let mut a = vec![0u16; 64];
        let mut b = vec![0u16; 64];
        fill_test_pattern(&mut a, 8, 8, 1, 0, u16::MAX);
        fill_test_pattern(&mut b, 8, 8, 2, 0, u16::MAX);
        assert_ne!(a, b);
    }
}
