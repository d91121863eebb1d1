use rand::distr::Alphanumeric;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;

/// Length of generated seed strings.
pub const GENERATED_SEED_LEN: usize = 20;

/// Hash an alphanumeric seed string to a 64-bit seed (FNV-1a).
///
/// Stable across platforms and toolchains so seed strings stay reproducible.
pub fn seed_from_str(seed: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    seed.bytes()
        .fold(OFFSET, |hash, b| (hash ^ b as u64).wrapping_mul(PRIME))
}

/// Draw a fresh alphanumeric seed string from OS entropy.
pub fn generate_seed_string() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_SEED_LEN)
        .map(char::from)
        .collect()
}

/// Create a deterministic RNG from a seed string.
pub fn create_rng(seed: &str) -> ChaCha12Rng {
    ChaCha12Rng::seed_from_u64(seed_from_str(seed))
}

/// Independent substream `stream` of the generator seeded with `seed`.
pub fn derive_stream(seed: u64, stream: u64) -> ChaCha12Rng {
    let mut rng = ChaCha12Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}

/// Draw a seed for a child kernel from the master generator.
pub fn derive_seed<R: Rng + ?Sized>(master: &mut R) -> u64 {
    master.random::<u64>()
}
