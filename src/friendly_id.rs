//! Human-readable prefixed identifiers.
//!
//! Every entity gets an opaque primary key plus a `friendly_id` of the form
//! `<prefix>_<key>` (`run_…`, `worker_…`, `attempt_…`, `batch_…`) that is
//! safe to show in UIs and logs.

use rand::Rng;

const ID_LENGTH: usize = 21;
const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a random lowercase alphanumeric identifier.
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

/// Prefix an identifier, e.g. `friendly_id("run", "abc")` → `"run_abc"`.
pub fn friendly_id(prefix: &str, id: &str) -> String {
    format!("{prefix}_{id}")
}

/// Generate a fresh identifier together with its prefixed friendly form.
pub fn generate_friendly_id(prefix: &str) -> (String, String) {
    let id = generate_id();
    let friendly = friendly_id(prefix, &id);
    (id, friendly)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_lowercase_alphanumeric() {
        let id = generate_id();
        assert_eq!(id.len(), 21);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn friendly_ids_carry_the_prefix() {
        let (id, friendly) = generate_friendly_id("run");
        assert_eq!(friendly, format!("run_{id}"));
    }

    #[test]
    fn ids_do_not_collide_trivially() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
    }
}
