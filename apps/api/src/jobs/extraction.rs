//! Field extraction for loosely-typed upstream contact records.
//!
//! HR integrations disagree on field names, sometimes record by record
//! (`phone`, `phone_number`, `mobile`, `Mobile`, `contact_number`, ...). Every
//! job field is extracted with the same policy: configured primary name first,
//! then an ordered fallback list, case-insensitive, first non-empty wins.

use serde_json::{Map, Value};

use crate::models::agent::FieldMapping;

pub const ID_FALLBACKS: &[&str] = &[
    "employee_id",
    "employeeId",
    "emp_id",
    "employee_code",
    "employeeCode",
    "candidate_id",
    "id",
];

pub const PHONE_FALLBACKS: &[&str] = &[
    "phone_number",
    "phone",
    "phoneNumber",
    "mobile",
    "mobile_number",
    "mobileNumber",
    "contact_number",
    "contactNumber",
];

pub const NAME_FALLBACKS: &[&str] = &[
    "name",
    "employee_name",
    "employeeName",
    "full_name",
    "fullName",
    "candidate_name",
];

pub const COMPANY_FALLBACKS: &[&str] = &[
    "company",
    "company_name",
    "companyName",
    "organization",
    "client_name",
    "employer",
];

/// A contact record reduced to the fields a job needs.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub external_id: Option<String>,
    pub phone: String,
    pub name: Option<String>,
    pub company: Option<String>,
    pub raw: Value,
}

/// Returns the first present, non-empty value among `primary` and `fallbacks`.
pub fn extract_field(record: &Map<String, Value>, primary: &str, fallbacks: &[&str]) -> Option<String> {
    std::iter::once(primary)
        .chain(fallbacks.iter().copied())
        .find_map(|name| lookup(record, name).and_then(coerce))
}

fn lookup<'a>(record: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    // Exact key first so `Mobile` and `mobile` can coexist with distinct values.
    if let Some(value) = record.get(name) {
        if coerce(value).is_some() {
            return Some(value);
        }
    }
    record
        .iter()
        .filter(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
        .find(|value| coerce(value).is_some())
}

fn coerce(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
                    Some(f) => f.to_string(),
                    None => return None,
                }
            }
        }
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Maps a raw record onto job fields. Records without a phone number are
/// dropped: a job that can never be dialed carries no value.
pub fn normalize_record(record: &Map<String, Value>, mapping: &FieldMapping) -> Option<NormalizedRecord> {
    let phone = extract_field(record, &mapping.phone_field, PHONE_FALLBACKS)?;
    Some(NormalizedRecord {
        external_id: extract_field(record, &mapping.id_field, ID_FALLBACKS),
        phone,
        name: extract_field(record, &mapping.name_field, NAME_FALLBACKS),
        company: extract_field(record, &mapping.company_field, COMPANY_FALLBACKS),
        raw: Value::Object(record.clone()),
    })
}

/// Canonical form used to match inbound reports to stored phones: digits
/// only, keeping the last 10 so country prefixes (`+91`, `0091`, `0`) drop out.
pub fn normalize_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > 10 {
        digits[digits.len() - 10..].to_string()
    } else {
        digits
    }
}
