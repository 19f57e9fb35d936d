// src/schema.rs

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::LazyLock;
use thiserror::Error;
use time::Date;

/// Primitive shape of a single field as the model should emit it.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    /// Calendar date, `YYYY-MM-DD`.
    Date,
    Record(RecordSchema),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: FieldKind,
}

/// Description of one record type: its fields, their kinds and what each means.
///
/// This is what gets turned into format instructions for the model, so
/// the descriptions double as extraction hints.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub fields: Vec<FieldSchema>,
}

/// Types that can describe their own shape.
pub trait Described {
    fn schema() -> RecordSchema;
}

fn field(name: &'static str, kind: FieldKind, description: &'static str) -> FieldSchema {
    FieldSchema {
        name,
        description,
        kind,
    }
}

const FORMAT_PREFACE: &str = r#"The output should be formatted as a JSON instance that conforms to the JSON schema below.
Every property in the schema is required, including the properties of nested objects. Dates are written as YYYY-MM-DD.

As an example, for the schema {"properties": {"foo": {"title": "Foo", "description": "a list of strings", "type": "array", "items": {"type": "string"}}}}
the object {"foo": ["bar", "baz"]} is a well-formatted instance of the schema. The object {"properties": {"foo": ["bar", "baz"]}} is not well-formatted.

Here is the output schema:"#;

impl RecordSchema {
    /// Render natural-language format instructions for this record.
    ///
    /// Pure: the same schema always yields the same text. Nested records are
    /// inlined, so every field name shows up exactly once as a property key.
    pub fn describe(&self) -> String {
        format!("{FORMAT_PREFACE}\n```\n{:#}\n```", self.json_schema())
    }

    pub fn json_schema(&self) -> Value {
        json!({
            "title": self.name,
            "description": self.description,
            "type": "object",
            "properties": self.properties(),
        })
    }

    fn properties(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|f| (f.name.to_string(), f.json_schema()))
            .collect()
    }
}

impl FieldSchema {
    fn json_schema(&self) -> Value {
        match &self.kind {
            FieldKind::String => json!({"description": self.description, "type": "string"}),
            FieldKind::Integer => json!({"description": self.description, "type": "integer"}),
            FieldKind::Number => json!({"description": self.description, "type": "number"}),
            FieldKind::Boolean => json!({"description": self.description, "type": "boolean"}),
            FieldKind::Date => {
                json!({"description": self.description, "type": "string", "format": "date"})
            }
            FieldKind::Record(record) => json!({
                "title": record.name,
                "description": self.description,
                "type": "object",
                "properties": record.properties(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalDetails {
    pub name: String,
    pub ssn: String,
    #[serde(with = "flexible_date")]
    pub dob: Date,
    pub citizenship: String,
}

impl Described for PersonalDetails {
    fn schema() -> RecordSchema {
        RecordSchema {
            name: "PersonalDetails",
            description: "Personal details of the individual",
            fields: vec![
                field("name", FieldKind::String, "Name of the individual"),
                field("ssn", FieldKind::String, "Social Security Number of the individual"),
                field("dob", FieldKind::Date, "Date of birth of the individual"),
                field("citizenship", FieldKind::String, "Citizenship of the individual"),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraDetails {
    pub type_of_credit: String,
    pub marital_status: String,
    pub cell_phone: String,
}

impl Described for ExtraDetails {
    fn schema() -> RecordSchema {
        RecordSchema {
            name: "ExtraDetails",
            description: "Extra details of the individual",
            fields: vec![
                field("type_of_credit", FieldKind::String, "Type of credit"),
                field("marital_status", FieldKind::String, "Marital status"),
                field("cell_phone", FieldKind::String, "Cell phone number"),
            ],
        }
    }
}

/// `own_house` and `rented_house` are independent flags; both may be set, or neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    #[serde(deserialize_with = "lenient::integer")]
    pub residing_in_addr_since_years: i64,
    #[serde(deserialize_with = "lenient::integer")]
    pub residing_in_addr_since_months: i64,
    #[serde(deserialize_with = "lenient::boolean")]
    pub own_house: bool,
    #[serde(deserialize_with = "lenient::boolean")]
    pub rented_house: bool,
    #[serde(deserialize_with = "lenient::number")]
    pub rent: f64,
    #[serde(deserialize_with = "lenient::boolean")]
    pub mailing_address_different: bool,
}

impl Described for CurrentAddress {
    fn schema() -> RecordSchema {
        RecordSchema {
            name: "CurrentAddress",
            description: "Current address of the individual",
            fields: vec![
                field("street", FieldKind::String, "Street address"),
                field("city", FieldKind::String, "City"),
                field("state", FieldKind::String, "State"),
                field("zip_code", FieldKind::String, "Zip code"),
                field(
                    "residing_in_addr_since_years",
                    FieldKind::Integer,
                    "Number of years residing in the address",
                ),
                field(
                    "residing_in_addr_since_months",
                    FieldKind::Integer,
                    "Number of months residing in the address",
                ),
                field(
                    "own_house",
                    FieldKind::Boolean,
                    "Whether the individual owns the house or not",
                ),
                field(
                    "rented_house",
                    FieldKind::Boolean,
                    "Whether the individual rents the house or not",
                ),
                field("rent", FieldKind::Number, "Rent amount"),
                field(
                    "mailing_address_different",
                    FieldKind::Boolean,
                    "Whether the mailing address is different from the current address or not",
                ),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmploymentDetails {
    #[serde(deserialize_with = "lenient::boolean")]
    pub business_owner_or_self_employed: bool,
    #[serde(deserialize_with = "lenient::boolean")]
    pub ownership_of_25_pct_or_more: bool,
}

impl Described for EmploymentDetails {
    fn schema() -> RecordSchema {
        RecordSchema {
            name: "EmploymentDetails",
            description: "Employment details of the individual",
            fields: vec![
                field(
                    "business_owner_or_self_employed",
                    FieldKind::Boolean,
                    "Whether the individual is a business owner or self-employed",
                ),
                field(
                    "ownership_of_25_pct_or_more",
                    FieldKind::Boolean,
                    "Whether the individual owns 25% or more of a business",
                ),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverLicense {
    pub number: String,
    #[serde(with = "flexible_date")]
    pub issue_date: Date,
    #[serde(with = "flexible_date")]
    pub expiration_date: Date,
    pub issue_state: String,
    pub last_name: String,
    pub first_name: String,
    #[serde(with = "flexible_date")]
    pub dob: Date,
}

impl Described for DriverLicense {
    fn schema() -> RecordSchema {
        RecordSchema {
            name: "DriverLicense",
            description: "Driver's license details of the individual",
            fields: vec![
                field("number", FieldKind::String, "Number of the driver's license"),
                // The ISS / expiry choice is left to the model; nothing checks it here.
                field(
                    "issue_date",
                    FieldKind::Date,
                    "Issue date of the driver's license. The field name of the issue date is \
                     sometimes abbreviated as ISS. Do not pick up the expiry date for this field, \
                     which is later than the issue date.",
                ),
                field(
                    "expiration_date",
                    FieldKind::Date,
                    "Expiration date of the driver's license",
                ),
                field(
                    "issue_state",
                    FieldKind::String,
                    "State of issue of the driver's license in its full form",
                ),
                field("last_name", FieldKind::String, "Last name on the driver's license"),
                field("first_name", FieldKind::String, "First name on the driver's license"),
                field("dob", FieldKind::Date, "Date of birth on the driver's license"),
            ],
        }
    }
}

/// A filled-out 1003 loan application, as recovered from one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form1003 {
    pub personal_details: PersonalDetails,
    pub extra_details: ExtraDetails,
    pub current_address: CurrentAddress,
    pub employment_details: EmploymentDetails,
    pub license: DriverLicense,
}

impl Described for Form1003 {
    fn schema() -> RecordSchema {
        RecordSchema {
            name: "Form1003",
            description: "A filled out 1003 loan application form",
            fields: vec![
                field(
                    "personal_details",
                    FieldKind::Record(PersonalDetails::schema()),
                    "Personal details of the individual",
                ),
                field(
                    "extra_details",
                    FieldKind::Record(ExtraDetails::schema()),
                    "Extra details of the individual",
                ),
                field(
                    "current_address",
                    FieldKind::Record(CurrentAddress::schema()),
                    "Current address of the individual",
                ),
                field(
                    "employment_details",
                    FieldKind::Record(EmploymentDetails::schema()),
                    "Employment details of the individual",
                ),
                field(
                    "license",
                    FieldKind::Record(DriverLicense::schema()),
                    "Driver's license details of the individual",
                ),
            ],
        }
    }
}

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("no JSON object found in model reply")]
    NoJsonObject,
    #[error("model reply does not match the Form1003 schema: {0}")]
    Schema(#[from] serde_json::Error),
}

impl Form1003 {
    /// Parse the model's reply. Either every field is present and well-typed,
    /// or nothing is returned.
    pub fn from_reply(reply: &str) -> Result<Self, ReplyError> {
        let json_str = extract_json_object(reply).ok_or(ReplyError::NoJsonObject)?;
        Ok(serde_json::from_str(json_str)?)
    }
}

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap());

/// Pull the outermost `{ ... }` out of a reply that may be wrapped in a
/// markdown fence or surrounded by commentary. A fence without an object
/// in it does not hide an object elsewhere in the reply.
fn extract_json_object(reply: &str) -> Option<&str> {
    fenced_block(reply)
        .and_then(outermost_object)
        .or_else(|| outermost_object(reply))
}

fn outermost_object(body: &str) -> Option<&str> {
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (end > start).then(|| &body[start..=end])
}

fn fenced_block(reply: &str) -> Option<&str> {
    FENCE_RE
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Lax scalars: models often quote numbers and booleans, or write `3.0`
/// for an integer. `null` and missing fields are still rejected.
mod lenient {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};

    #[derive(Debug, Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Bool(bool),
        Int(i64),
        Float(f64),
        Text(String),
    }

    fn whole(f: f64) -> Option<i64> {
        (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
    }

    pub fn integer<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let value = Scalar::deserialize(deserializer)?;
        let parsed = match &value {
            Scalar::Int(i) => Some(*i),
            Scalar::Float(f) => whole(*f),
            Scalar::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(whole))
            }
            Scalar::Bool(_) => None,
        };
        parsed.ok_or_else(|| D::Error::custom(format!("expected an integer, got {value:?}")))
    }

    pub fn number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let value = Scalar::deserialize(deserializer)?;
        let parsed = match &value {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::Text(s) => s.trim().parse::<f64>().ok(),
            Scalar::Bool(_) => None,
        };
        parsed
            .filter(|f| f.is_finite())
            .ok_or_else(|| D::Error::custom(format!("expected a number, got {value:?}")))
    }

    pub fn boolean<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let value = Scalar::deserialize(deserializer)?;
        let parsed = match &value {
            Scalar::Bool(b) => Some(*b),
            Scalar::Int(0) => Some(false),
            Scalar::Int(1) => Some(true),
            Scalar::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
                "false" | "f" | "no" | "n" | "off" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        };
        parsed.ok_or_else(|| D::Error::custom(format!("expected a boolean, got {value:?}")))
    }
}

/// Dates as `YYYY-MM-DD`; date-times are accepted and cut to their date.
mod flexible_date {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;
    use time::format_description::BorrowedFormatItem;
    use time::macros::format_description;

    const ISO_DATE: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        let text = date
            .format(ISO_DATE)
            .map_err(<S::Error as serde::ser::Error>::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(D::Error::custom)
    }

    pub(super) fn parse(raw: &str) -> Result<Date, time::error::Parse> {
        let raw = raw.trim();
        let date_part = raw.split(['T', ' ']).next().unwrap_or(raw);
        Date::parse(date_part, ISO_DATE)
    }
}
