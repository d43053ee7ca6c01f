// ✅ CNPJ Validation - Algoritmo Módulo 11
// Both check digits are recomputed from the weighted digit sums and compared
// against the digits actually present in the document.

/// Weights for the first check digit (over the 12 base digits).
pub const PESOS_DV1: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

/// Weights for the second check digit (base digits + first check digit).
pub const PESOS_DV2: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

/// Modulus-11 CNPJ validator.
///
/// The weight tables are injected at construction so tests can exercise the
/// algorithm independently of the official constants.
pub struct CnpjValidator {
    pesos_dv1: [u32; 12],
    pesos_dv2: [u32; 13],
}

impl CnpjValidator {
    pub fn new() -> Self {
        CnpjValidator {
            pesos_dv1: PESOS_DV1,
            pesos_dv2: PESOS_DV2,
        }
    }

    /// Validate a CNPJ in any textual form (punctuation is stripped first).
    ///
    /// Rejects immediately when the cleaned string is not exactly 14 digits or
    /// when all digits are identical ("11111111111111" passes the checksum but
    /// is not a real document).
    pub fn validate(&self, raw: &str) -> bool {
        let digits: Vec<u32> = raw.chars().filter_map(|c| c.to_digit(10)).collect();

        if digits.len() != 14 {
            return false;
        }
        if digits.iter().all(|&d| d == digits[0]) {
            return false;
        }

        let dv1 = check_digit(&digits[..12], &self.pesos_dv1);
        if dv1 != digits[12] {
            return false;
        }

        let dv2 = check_digit(&digits[..13], &self.pesos_dv2);
        dv2 == digits[13]
    }
}

impl Default for CnpjValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Weighted sum modulo 11: remainder below 2 yields 0, otherwise 11 - remainder.
fn check_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let soma: u32 = digits.iter().zip(weights.iter()).map(|(d, p)| d * p).sum();
    let resto = soma % 11;
    if resto < 2 {
        0
    } else {
        11 - resto
    }
}
