// src/audio/mixer.rs
// SIMD sample summing for mixdown, overdub and input monitoring

use wide::f32x4;

/// Add `src` into `dest` sample by sample (`dest[i] += src[i]`).
///
/// No gain compensation and no clamping: a mixdown is a plain sum and
/// overdubbing beyond full scale is left to the performer's input gain.
/// REAL-TIME SAFE: no allocations.
#[inline]
pub fn add_into(dest: &mut [f32], src: &[f32]) {
    let len = dest.len().min(src.len());
    let chunks = len / 4;

    for i in 0..chunks {
        let idx = i * 4;
        let dest_vec = f32x4::new([dest[idx], dest[idx + 1], dest[idx + 2], dest[idx + 3]]);
        let src_vec = f32x4::new([src[idx], src[idx + 1], src[idx + 2], src[idx + 3]]);
        let result = (dest_vec + src_vec).to_array();
        dest[idx..idx + 4].copy_from_slice(&result);
    }

    // Handle remainder
    for (d, s) in dest[..len]
        .iter_mut()
        .zip(&src[..len])
        .skip(chunks * 4)
    {
        *d += s;
    }
}

/// Sum `nframes` input samples into a track buffer in place.
#[inline]
pub fn overdub(input: &[f32], track: &mut [f32], nframes: usize) {
    let n = nframes.min(input.len()).min(track.len());
    add_into(&mut track[..n], &input[..n]);
}
