mod id;

pub use id::*;

/// Generates a shareable room code, like "X7K2P9". Tests use this to
/// avoid colliding on hardcoded codes, production rooms are named by
/// whoever joins them first.
#[cfg(test)]
pub fn random_room_code() -> String {
    use rand::{distributions::Alphanumeric, thread_rng, Rng};

    let mut rng = thread_rng();

    std::iter::repeat(())
        .map(|_| rng.sample(Alphanumeric) as char)
        .take(6)
        .collect::<String>()
        .to_ascii_uppercase()
}
