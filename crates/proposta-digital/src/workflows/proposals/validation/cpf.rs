/// Strips formatting (dots, dashes, spaces) from a CPF.
pub fn digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Validates the two CPF check digits.
///
/// Input may be formatted (`111.444.777-35`). Anything that is not exactly eleven digits
/// after stripping, or whose digits are all equal, is invalid.
pub fn is_valid(raw: &str) -> bool {
    let digits: Vec<u32> = raw.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 11 || raw.chars().any(|c| c.is_alphabetic()) {
        return false;
    }
    if digits.iter().all(|d| *d == digits[0]) {
        return false;
    }

    check_digit(&digits[..9]) == digits[9] && check_digit(&digits[..10]) == digits[10]
}

fn check_digit(prefix: &[u32]) -> u32 {
    let weight_start = prefix.len() as u32 + 1;
    let sum: u32 = prefix
        .iter()
        .enumerate()
        .map(|(index, digit)| digit * (weight_start - index as u32))
        .sum();
    match (sum * 10) % 11 {
        10 => 0,
        rest => rest,
    }
}

/// Renders eleven digits as `000.000.000-00`; other inputs are returned unchanged.
pub fn format(raw: &str) -> String {
    let digits = digits(raw);
    if digits.len() != 11 {
        return raw.to_string();
    }
    format!(
        "{}.{}.{}-{}",
        &digits[0..3],
        &digits[3..6],
        &digits[6..9],
        &digits[9..11]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_valid_numbers() {
        assert!(is_valid("11144477735"));
        assert!(is_valid("111.444.777-35"));
        assert!(is_valid("529.982.247-25"));
    }

    #[test]
    fn rejects_wrong_check_digits() {
        assert!(!is_valid("11144477736"));
        assert!(!is_valid("11144477725"));
        assert!(!is_valid("52998224724"));
    }

    #[test]
    fn rejects_repeated_digits_and_wrong_lengths() {
        for repeated in 0..=9 {
            let cpf = repeated.to_string().repeat(11);
            assert!(!is_valid(&cpf), "{cpf} should be rejected");
        }
        assert!(!is_valid("1114447773"));
        assert!(!is_valid("111444777350"));
        assert!(!is_valid(""));
        assert!(!is_valid("1114447773a5"));
    }

    #[test]
    fn formats_plain_digits() {
        assert_eq!(format("11144477735"), "111.444.777-35");
        assert_eq!(format("123"), "123");
    }
}
