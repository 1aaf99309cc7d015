use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::contract::{HandoffPrompt, extract_handoff_prompt};
use super::gateway::{GenerationRequest, ProviderTransport, UsageStats};
use super::prompts::{
    PRIVACY_POLICY_BLOCK, PRIVACY_POLICY_HEADER, PRIVACY_REWRITE_SYSTEM_INSTRUCTION,
    privacy_rewrite_prompt,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensitiveCategory {
    Email,
    FirstName,
    LastName,
    Name,
    Address,
    Birthdate,
    Phone,
    NationalId,
    Health,
}

impl SensitiveCategory {
    pub const fn placeholder(self) -> &'static str {
        match self {
            Self::Email => "[E-MAIL]",
            Self::FirstName => "[VORNAME]",
            Self::LastName => "[NACHNAME]",
            Self::Name => "[NAME]",
            Self::Address => "[ADRESSE]",
            Self::Birthdate => "[GEBURTSDATUM]",
            Self::Phone => "[TELEFON]",
            Self::NationalId => "[AUSWEISNUMMER]",
            Self::Health => "[GESUNDHEITSDATEN]",
        }
    }
}

struct PrivacyRule {
    category: SensitiveCategory,
    pattern: &'static str,
}

/// Evaluated in order: specific categories run before the generic name rule
/// so that e.g. "Vornamen" becomes `[VORNAME]` rather than `[NAME]`.
const PRIVACY_RULES: [PrivacyRule; 9] = [
    PrivacyRule {
        category: SensitiveCategory::Email,
        pattern: r"(?i)\be-?mail(?:-?adressen?)?\b|\bemail address(?:es)?\b",
    },
    PrivacyRule {
        category: SensitiveCategory::FirstName,
        pattern: r"(?i)\b(?:vor|ruf)namen?s?\b|\bfirst[ -]?names?\b",
    },
    PrivacyRule {
        category: SensitiveCategory::LastName,
        pattern: r"(?i)\b(?:nach|familien|zu)namen?s?\b|\b(?:last[ -]?names?|surnames?)\b",
    },
    PrivacyRule {
        category: SensitiveCategory::Name,
        pattern: r"(?i)\b\w*namen?s?\b",
    },
    PrivacyRule {
        category: SensitiveCategory::Address,
        pattern: r"(?i)\b(?:wohn)?(?:adressen?|anschriften?)\b|\bwohnort(?:e|s)?\b|\b(?:home )?address(?:es)?\b",
    },
    PrivacyRule {
        category: SensitiveCategory::Birthdate,
        pattern: r"(?i)\bgeburts(?:datum|daten|tag|tage|tags|ort)\b|\b(?:date of birth|birthdays?|birth ?dates?)\b",
    },
    PrivacyRule {
        category: SensitiveCategory::Phone,
        pattern: r"(?i)\b(?:telefon|handy|mobil)(?:nummer|nummern)\b|\btelefon\b|\bphone(?: numbers?)?\b",
    },
    PrivacyRule {
        category: SensitiveCategory::NationalId,
        pattern: r"(?i)\b(?:personalausweis|ausweis|reisepass|pass)(?:nummer|nummern)\b|\bpersonalausweis\b|\bsozialversicherungsnummern?\b|\bsteuer-?id\b|\bsteueridentifikationsnummer\b|\b(?:national id|social security number|passport number)\b",
    },
    PrivacyRule {
        category: SensitiveCategory::Health,
        pattern: r"(?i)\b(?:diagnosen?|krankheit(?:en)?|erkrankung(?:en)?|gesundheitsdaten|gesundheitszustand|medikamente?|medikation|behinderung(?:en)?|adhs|autismus|legasthenie|diagnos[ie]s|medical conditions?|medications?)\b",
    },
];

const NEGATION_WORDS: [&str; 14] = [
    "kein", "keine", "keinen", "keinem", "keiner", "keines", "nicht", "nie", "niemals", "ohne",
    "no", "not", "never", "without",
];

static COMPILED_RULES: LazyLock<Vec<(SensitiveCategory, Regex)>> = LazyLock::new(|| {
    PRIVACY_RULES
        .iter()
        .filter_map(|rule| match Regex::new(rule.pattern) {
            Ok(regex) => Some((rule.category, regex)),
            Err(err) => {
                warn!(category = ?rule.category, "privacy rule failed to compile: {err}");
                None
            }
        })
        .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyOutcome {
    Clean,
    RewrittenByModel,
    RedactedLocally,
}

impl PrivacyOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::RewrittenByModel => "rewritten_by_model",
            Self::RedactedLocally => "redacted_locally",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivacyResolution {
    pub prompt: HandoffPrompt,
    pub outcome: PrivacyOutcome,
    pub rewrite_usage: UsageStats,
}

pub fn sensitive_categories(line: &str) -> Vec<SensitiveCategory> {
    COMPILED_RULES
        .iter()
        .filter(|(_, regex)| regex.is_match(line))
        .map(|(category, _)| *category)
        .collect()
}

pub fn has_safe_marker(line: &str) -> bool {
    contains_placeholder(line)
        || line
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| NEGATION_WORDS.contains(&word.to_lowercase().as_str()))
}

/// A line asks for personal data when it names a sensitive term and carries
/// neither a negation nor a placeholder.
pub fn is_risky_line(line: &str) -> bool {
    !sensitive_categories(line).is_empty() && !has_safe_marker(line)
}

pub fn has_risky_lines(text: &str) -> bool {
    text.lines().any(is_risky_line)
}

/// Replaces every sensitive term that is not already inside brackets with its placeholder.
pub fn redact_line(line: &str) -> String {
    let mut redacted = line.to_string();
    for (category, regex) in COMPILED_RULES.iter() {
        let mut output = String::with_capacity(redacted.len());
        let mut last = 0;
        for found in regex.find_iter(&redacted) {
            if is_bracketed(&redacted, found.start(), found.end()) {
                continue;
            }
            output.push_str(&redacted[last..found.start()]);
            output.push_str(category.placeholder());
            last = found.end();
        }
        output.push_str(&redacted[last..]);
        redacted = output;
    }
    redacted
}

/// Redacts line by line, leaving an existing policy block untouched.
pub fn redact_text(text: &str) -> String {
    let (body, policy) = split_policy_block(text);
    let redacted = body.lines().map(redact_line).collect::<Vec<_>>().join("\n");
    match policy {
        Some(policy) if redacted.trim().is_empty() => policy.to_string(),
        Some(policy) => format!("{redacted}\n\n{policy}"),
        None => redacted,
    }
}

pub fn append_policy_block(text: &str) -> String {
    if text.contains(PRIVACY_POLICY_HEADER) {
        return text.to_string();
    }
    format!("{}\n\n{PRIVACY_POLICY_BLOCK}", text.trim_end())
}

/// Deterministic clean-up: drop risky lines (the opening line is redacted
/// instead, so the prompt keeps its "Du bist" opening), collapse blank-line
/// runs, redact what remains and append the policy block.
pub fn sanitize_locally(text: &str) -> String {
    let mut kept = Vec::new();
    let mut seen_content = false;

    for line in text.lines() {
        let is_content = !line.trim().is_empty();
        if is_risky_line(line) {
            if !seen_content {
                kept.push(redact_line(line));
            }
        } else {
            kept.push(line.to_string());
        }
        seen_content |= is_content;
    }

    let sanitized = append_policy_block(&redact_text(&collapse_blank_runs(&kept)));
    if has_risky_lines(&sanitized) {
        return append_policy_block(&redact_text(&sanitized));
    }
    sanitized
}

/// Neutralises personal-data requests in an already valid handoff prompt. A
/// clean prompt is returned untouched. Otherwise one rewrite call is made and
/// local sanitisation always runs on the result; rewrite failures only
/// downgrade the outcome to local redaction.
pub async fn enforce_privacy<T>(
    transport: &T,
    request: &GenerationRequest,
    prompt: HandoffPrompt,
) -> PrivacyResolution
where
    T: ProviderTransport + ?Sized,
{
    if !has_risky_lines(prompt.as_str()) {
        return PrivacyResolution {
            prompt,
            outcome: PrivacyOutcome::Clean,
            rewrite_usage: UsageStats::default(),
        };
    }

    let risky_lines = prompt.as_str().lines().filter(|line| is_risky_line(line)).count();
    info!(
        provider = %request.provider_kind,
        model = %request.model,
        risky_lines,
        "handoff prompt requests personal data; issuing privacy rewrite call"
    );

    let rewrite_request = request.with_prompts(
        PRIVACY_REWRITE_SYSTEM_INSTRUCTION,
        privacy_rewrite_prompt(prompt.as_str()),
    );
    let (candidate, outcome, rewrite_usage) = match transport.call_once(&rewrite_request).await {
        Ok(response) => match extract_handoff_prompt(&response.text) {
            Some(rewritten) => (rewritten, PrivacyOutcome::RewrittenByModel, response.usage),
            None => {
                warn!(
                    provider = %request.provider_kind,
                    "privacy rewrite returned no valid handoff prompt; redacting locally"
                );
                (prompt.clone(), PrivacyOutcome::RedactedLocally, response.usage)
            }
        },
        Err(err) => {
            warn!(
                provider = %request.provider_kind,
                kind = %err.kind,
                "privacy rewrite call failed; redacting locally: {}",
                err.message
            );
            (prompt.clone(), PrivacyOutcome::RedactedLocally, UsageStats::default())
        }
    };

    let sanitized = HandoffPrompt::parse(&sanitize_locally(candidate.as_str()))
        .or_else(|| HandoffPrompt::parse(&sanitize_locally(prompt.as_str())))
        .unwrap_or_else(|| {
            error!(
                provider = %request.provider_kind,
                "sanitised prompt lost its opening; restoring the default opening"
            );
            HandoffPrompt::with_default_opening(&sanitize_locally(prompt.as_str()))
        });

    PrivacyResolution {
        prompt: sanitized,
        outcome,
        rewrite_usage,
    }
}

fn contains_placeholder(line: &str) -> bool {
    line.split('[').skip(1).any(|rest| {
        rest.split_once(']').is_some_and(|(inner, _)| {
            !inner.is_empty()
                && inner
                    .chars()
                    .all(|c| c.is_uppercase() || c == '_' || c == '-')
        })
    })
}

fn is_bracketed(text: &str, start: usize, end: usize) -> bool {
    text[..start].ends_with('[') && text[end..].starts_with(']')
}

fn split_policy_block(text: &str) -> (&str, Option<&str>) {
    match text.find(PRIVACY_POLICY_HEADER) {
        Some(index) => (text[..index].trim_end(), Some(&text[index..])),
        None => (text, None),
    }
}

fn collapse_blank_runs(lines: &[String]) -> String {
    let mut collapsed: Vec<&str> = Vec::with_capacity(lines.len());
    for line in lines {
        let blank = line.trim().is_empty();
        if blank && collapsed.last().is_none_or(|previous| previous.is_empty()) {
            continue;
        }
        collapsed.push(if blank { "" } else { line.as_str() });
    }
    while collapsed.last().is_some_and(|line| line.is_empty()) {
        collapsed.pop();
    }
    collapsed.join("\n")
}
