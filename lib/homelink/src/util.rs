/// Masks all but the last `keep` characters of a secret so it can appear
/// in log output.
pub fn mask_secret(secret: &str, keep: usize) -> String {
    let total = secret.chars().count();

    secret
        .chars()
        .enumerate()
        .map(|(idx, chr)| if idx + keep < total { '*' } else { chr })
        .collect()
}
