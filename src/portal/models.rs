//! Application status data models and parsing of the portal payload.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// Status text used when the portal omits one.
pub const UNKNOWN_STATUS: &str = "Unknown";

/// GUIDs are base64 with or without padding.
const GUID_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Portal GUID identifying one tracked application.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationIdentifier(String);

impl ApplicationIdentifier {
    /// Validate a URL-decoded GUID.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let guid = raw.trim();
        let invalid = |reason: &str| ConfigError::InvalidGuid {
            guid: guid.to_string(),
            reason: reason.to_string(),
        };

        if guid.is_empty() {
            return Err(invalid("empty"));
        }
        if guid.contains(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }
        match GUID_ENGINE.decode(guid) {
            Ok(bytes) if !bytes.is_empty() => Ok(Self(guid.to_string())),
            Ok(_) => Err(invalid("decodes to nothing")),
            Err(e) => Err(invalid(&format!("not base64 ({})", e))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApplicationIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A school entry from the schools file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub name: String,
    pub id: ApplicationIdentifier,
}

/// Snapshot of one application's status at fetch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub school_id: Option<String>,
    pub applicant: Applicant,
    pub programs: Vec<ProgramStatus>,
    pub fetched_at: DateTime<Utc>,
}

impl StatusRecord {
    #[allow(dead_code)]
    pub fn program(&self, title: &str) -> Option<&ProgramStatus> {
        self.programs.iter().find(|p| p.title == title)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Applicant {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub lsac_account: String,
    pub final_transcript_received: bool,
}

impl Applicant {
    pub fn full_name(&self) -> String {
        join_words([self.first_name.as_str(), self.last_name.as_str()])
    }
}

/// One program (JD, LLM, ...) within an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramStatus {
    pub title: String,
    pub status: String,
    pub message: Option<String>,
    /// Checklist item name to completion flag.
    pub checklist: BTreeMap<String, bool>,
    pub letters: Vec<RecommendationLetter>,
    pub fee: Option<FeeInfo>,
    pub scholarship: Option<ScholarshipInfo>,
}

impl ProgramStatus {
    pub fn checklist_completed(&self) -> usize {
        self.checklist.values().filter(|done| **done).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecommendationLetter {
    pub name: String,
    /// Date part (`YYYY-MM-DD`) of the recommendation timestamp.
    pub date: String,
    pub signed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeInfo {
    pub description: String,
    pub waived: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScholarshipInfo {
    pub name: String,
    pub amount: f64,
}

/// Result of interpreting a raw status payload.
#[derive(Debug)]
pub enum ParseOutcome {
    Parsed(StatusRecord),
    Malformed(String),
}

/// Interpret the portal's `ApplicationStatus` JSON.
///
/// Missing or null fields take explicit defaults; only a payload that is not an
/// object, or whose fields have the wrong types, is malformed.
pub fn parse_status(payload: Value, fetched_at: DateTime<Utc>) -> ParseOutcome {
    if !payload.is_object() {
        return ParseOutcome::Malformed("expected a JSON object".to_string());
    }

    let raw: RawStatus = match serde_json::from_value(payload) {
        Ok(raw) => raw,
        Err(e) => return ParseOutcome::Malformed(e.to_string()),
    };

    let profile = raw.profile;
    let applicant = Applicant {
        first_name: profile.first_name,
        last_name: profile.last_name,
        email: profile.email_address,
        lsac_account: scalar_to_string(&profile.lsac_acct_no).unwrap_or_default(),
        final_transcript_received: profile.transcript.final_transcript.is_some_and(|v| truthy(&v)),
    };

    let mut bases = Vec::with_capacity(raw.application_status.len());
    let mut programs: Vec<ProgramStatus> = raw
        .application_status
        .into_iter()
        .enumerate()
        .map(|(idx, mut app)| {
            bases.push(
                non_empty(app.application_title.take())
                    .unwrap_or_else(|| format!("Program {}", idx + 1)),
            );
            convert_program(app)
        })
        .collect();

    let titles = disambiguate(bases, |i| {
        (
            programs[i].status.clone(),
            Reverse(programs[i].checklist_completed()),
        )
    });
    for (program, title) in programs.iter_mut().zip(titles) {
        program.title = title;
    }

    ParseOutcome::Parsed(StatusRecord {
        school_id: scalar_to_string(&raw.school_id),
        applicant,
        programs,
        fetched_at,
    })
}

/// Convert one program. The title is assigned by the caller once repeats are numbered.
fn convert_program(app: RawApplication) -> ProgramStatus {
    let status = app
        .status
        .application_status
        .into_iter()
        .next()
        .and_then(|s| non_empty(s.status_display_description))
        .unwrap_or_else(|| UNKNOWN_STATUS.to_string());

    let message = app
        .message
        .and_then(|m| m.message)
        .map(|m| clean_message(&m))
        .filter(|m| !m.is_empty());

    let (item_names, done): (Vec<String>, Vec<bool>) = app
        .checklist
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            let base = non_empty(item.item).unwrap_or_else(|| format!("Item {}", idx + 1));
            (base, item.is_completed)
        })
        .unzip();
    // Completed repeats take the lower numbers.
    let checklist = disambiguate(item_names, |i| !done[i])
        .into_iter()
        .zip(done.iter().copied())
        .collect();

    let letters = app
        .lor
        .into_iter()
        .map(|lor| RecommendationLetter {
            name: join_words([
                lor.prefix.as_str(),
                lor.first_name.as_str(),
                lor.last_name.as_str(),
            ]),
            date: lor
                .recommendation_date
                .split('T')
                .next()
                .unwrap_or_default()
                .to_string(),
            signed: lor.signature_flag,
        })
        .collect();

    let fee = app.fee.into_iter().flatten().next().map(|fee| FeeInfo {
        description: non_empty(fee.display_description)
            .unwrap_or_else(|| UNKNOWN_STATUS.to_string()),
        waived: fee.waived_flag,
    });

    let scholarship = app
        .scholarship
        .into_iter()
        .flatten()
        .next()
        .and_then(|s| {
            non_empty(s.scholarship_type_name).map(|name| ScholarshipInfo {
                name,
                amount: s.amount.unwrap_or(0.0),
            })
        });

    ProgramStatus {
        title: String::new(),
        status,
        message,
        checklist,
        letters,
        fee,
        scholarship,
    }
}

/// Strip HTML tags and non-breaking space entities from a portal message.
pub fn clean_message(html: &str) -> String {
    HTML_TAG
        .replace_all(html, "")
        .replace("&nbsp;", " ")
        .trim()
        .to_string()
}

/// Number repeated names as `name (2)`, `name (3)`, ...
///
/// Repeats are numbered in `rank` order rather than list order, so the same
/// entries in a different order get the same names. Results follow input order.
fn disambiguate<K: Ord>(bases: Vec<String>, rank: impl Fn(usize) -> K) -> Vec<String> {
    let mut order: Vec<usize> = (0..bases.len()).collect();
    order.sort_by(|&a, &b| bases[a].cmp(&bases[b]).then_with(|| rank(a).cmp(&rank(b))));

    let mut seen = HashSet::new();
    let mut names = vec![String::new(); bases.len()];
    for idx in order {
        names[idx] = unique_name(&mut seen, bases[idx].clone());
    }
    names
}

fn unique_name(seen: &mut HashSet<String>, base: String) -> String {
    let mut name = base.clone();
    let mut n = 2;
    while !seen.insert(name.clone()) {
        name = format!("{} ({})", base, n);
        n += 1;
    }
    name
}

fn join_words<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Treat an explicit `null` the same as a missing field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// Wire format of `GET /Schools/000/ApplicationStatus/0`.

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatus {
    #[serde(default)]
    school_id: Value,
    #[serde(default, deserialize_with = "nullable")]
    profile: RawProfile,
    #[serde(default, deserialize_with = "nullable")]
    application_status: Vec<RawApplication>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProfile {
    #[serde(default, deserialize_with = "nullable")]
    first_name: String,
    #[serde(default, deserialize_with = "nullable")]
    last_name: String,
    #[serde(default, deserialize_with = "nullable")]
    email_address: String,
    #[serde(default)]
    lsac_acct_no: Value,
    #[serde(default, deserialize_with = "nullable")]
    transcript: RawTranscript,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTranscript {
    #[serde(default)]
    final_transcript: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawApplication {
    #[serde(default)]
    application_title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    status: RawStatusBlock,
    #[serde(default)]
    message: Option<RawMessage>,
    #[serde(default, deserialize_with = "nullable")]
    checklist: Vec<RawChecklistItem>,
    #[serde(default, deserialize_with = "nullable")]
    lor: Vec<RawLetter>,
    #[serde(default, deserialize_with = "nullable")]
    fee: Vec<Option<RawFee>>,
    #[serde(default, deserialize_with = "nullable")]
    scholarship: Vec<Option<RawScholarship>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatusBlock {
    #[serde(default, deserialize_with = "nullable")]
    application_status: Vec<RawStatusEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatusEntry {
    #[serde(default)]
    status_display_description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMessage {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChecklistItem {
    #[serde(default)]
    item: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    is_completed: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLetter {
    #[serde(default, deserialize_with = "nullable")]
    prefix: String,
    #[serde(default, deserialize_with = "nullable")]
    first_name: String,
    #[serde(default, deserialize_with = "nullable")]
    last_name: String,
    #[serde(default, deserialize_with = "nullable")]
    recommendation_date: String,
    #[serde(default, deserialize_with = "nullable")]
    signature_flag: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFee {
    #[serde(default)]
    display_description: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    waived_flag: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScholarship {
    #[serde(default)]
    scholarship_type_name: Option<String>,
    #[serde(default)]
    amount: Option<f64>,
}
