// src/hash.rs
//
// Integer mixing used to derive independent per-region seeds from one batch seed.

#[inline]
pub fn hash_u32(mut v: u32) -> u32 {
    v ^= v >> 16;
    v = v.wrapping_mul(0x7feb_352d);
    v ^= v >> 15;
    v = v.wrapping_mul(0x846c_a68b);
    v ^= v >> 16;
    v
}

/// Seed for region `region` of a batch seeded with `seed`.
///
/// Both halves of the 64-bit seed are mixed so nearby batch seeds do not
/// produce overlapping region streams.
#[inline]
pub fn region_seed(seed: u64, region: u32) -> u64 {
    let lo = seed as u32;
    let hi = (seed >> 32) as u32;
    let r = region.wrapping_mul(0x9e37_79b1);
    let a = hash_u32(lo ^ r);
    let b = hash_u32(hi ^ r.wrapping_mul(0x85eb_ca6b) ^ a);
    ((b as u64) << 32) | (a as u64)
}
