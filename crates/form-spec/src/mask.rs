//! Input masks. A `9` in the mask is a digit slot; every other character is
//! emitted literally.

pub const CANONICAL_MASKS: &[(&str, &str)] = &[
    ("cpf", "999.999.999-99"),
    ("cnpj", "99.999.999/9999-99"),
    ("phone", "(99) 99999-9999"),
    ("cep", "99999-999"),
    ("date", "99/99/9999"),
    ("time", "99:99"),
    ("creditCard", "9999 9999 9999 9999"),
];

/// Resolves a canonical mask name; anything else is taken as a literal mask.
pub fn resolve_mask(mask: &str) -> &str {
    CANONICAL_MASKS
        .iter()
        .find(|(name, _)| *name == mask)
        .map(|(_, pattern)| *pattern)
        .unwrap_or(mask)
}

/// Formats the digits of `input` into `mask`. Output stops when the digits
/// run out, so partial input yields a partial mask.
pub fn apply_mask(mask: &str, input: &str) -> String {
    let mask = resolve_mask(mask);
    if mask.is_empty() {
        return input.to_string();
    }

    let digits: Vec<char> = input.chars().filter(char::is_ascii_digit).collect();
    let mut masked = String::with_capacity(mask.len());
    let mut next = 0;

    for slot in mask.chars() {
        if next >= digits.len() {
            break;
        }
        if slot == '9' {
            masked.push(digits[next]);
            next += 1;
        } else {
            masked.push(slot);
            if digits[next] == slot {
                next += 1;
            }
        }
    }

    masked
}
