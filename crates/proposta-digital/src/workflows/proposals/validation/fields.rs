use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use super::{cpf, FieldError, ValidationError};

pub(crate) const CPF_INVALID: &str = "CPF inválido. Por favor, verifique e tente novamente.";

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
    })
}

pub fn is_valid_email(value: &str) -> bool {
    email_pattern().is_match(value.trim())
}

/// Accepts ISO (`1990-06-15`) and pt-BR (`15/06/1990`) dates.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%Y"))
        .ok()
}

/// Accumulates field failures for one validation pass.
#[derive(Debug, Default)]
pub(crate) struct Findings {
    errors: Vec<FieldError>,
}

impl Findings {
    pub(crate) fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    pub(crate) fn min_chars(&mut self, field: &str, value: &str, min: usize, message: &str) {
        if value.trim().chars().count() < min {
            self.push(field, message);
        }
    }

    pub(crate) fn email(&mut self, field: &str, value: &str) {
        if !is_valid_email(value) {
            self.push(field, "Email inválido");
        }
    }

    pub(crate) fn cpf(&mut self, field: &str, value: &str) {
        if cpf::digits(value).len() < 11 && value.trim().chars().count() < 11 {
            self.push(field, "CPF inválido");
        } else if !cpf::is_valid(value) {
            self.push(field, CPF_INVALID);
        }
    }

    pub(crate) fn date(&mut self, field: &str, value: &str, required_message: &str) {
        if value.trim().is_empty() {
            self.push(field, required_message);
        } else if parse_date(value).is_none() {
            self.push(field, "Data inválida");
        }
    }

    pub(crate) fn absorb(&mut self, other: Result<(), ValidationError>) {
        if let Err(err) = other {
            self.errors.extend(err.fields);
        }
    }

    pub(crate) fn finish(self) -> Result<(), ValidationError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                fields: self.errors,
            })
        }
    }
}
