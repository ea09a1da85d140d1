//! Random human-facing codes.
//!
//! Codes avoid look-alike characters (0/O, 1/I) because customers read them
//! out over the phone and type order codes into banking apps as the transfer
//! memo. Uniqueness is enforced by the store; a collision is retried.

use chrono::NaiveDate;
use fieldbook_core::environment::CodeGenerator;
use fieldbook_core::types::{BookingCode, OrderCode};
use rand::Rng;

const ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// `BK{yymmdd}-{6 chars}` and `PO{10 chars}`
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomCodes;

fn random_chars(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect()
}

impl CodeGenerator for RandomCodes {
    fn booking_code(&self, date: NaiveDate) -> BookingCode {
        BookingCode::new(format!("BK{}-{}", date.format("%y%m%d"), random_chars(6)))
    }

    fn order_code(&self) -> OrderCode {
        OrderCode::new(format!("PO{}", random_chars(10)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn booking_code_carries_the_date() {
        let code = RandomCodes.booking_code(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert!(code.as_str().starts_with("BK250101-"));
        assert_eq!(code.as_str().len(), 15);
    }

    #[test]
    fn order_codes_use_the_safe_alphabet() {
        let code = RandomCodes.order_code();
        assert_eq!(code.as_str().len(), 12);
        assert!(code.as_str()[2..].bytes().all(|b| ALPHABET.contains(&b)));
    }
}
