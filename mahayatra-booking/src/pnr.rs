use rand::distributions::Uniform;
use rand::Rng;

const PNR_PREFIX: &str = "MY";
const PNR_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const PNR_SUFFIX_LEN: usize = 8;

/// Passenger name record: `MY` plus 8 upper-case alphanumerics.
pub fn generate_pnr() -> String {
    let mut rng = rand::thread_rng();
    let pick = Uniform::from(0..PNR_ALPHABET.len());
    let suffix: String = (0..PNR_SUFFIX_LEN)
        .map(|_| PNR_ALPHABET[rng.sample(pick)] as char)
        .collect();
    format!("{}{}", PNR_PREFIX, suffix)
}
