//! Pattern tables for the heuristic admission layer

use crate::admission::Severity;
use crate::sector::Sector;
use once_cell::sync::Lazy;
use regex::Regex;

pub struct Rule {
    pub name: &'static str,
    pub severity: Severity,
    pub pattern: Regex,
}

fn rule(name: &'static str, severity: Severity, pattern: &str) -> Rule {
    Rule {
        name,
        severity,
        pattern: Regex::new(pattern).expect("admission rule regex must compile"),
    }
}

pub static INJECTION_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule(
            "instruction_override",
            Severity::Critical,
            r"(?i)\b(?:ignore|disregard|forget|override)\s+(?:all\s+)?(?:of\s+)?(?:the\s+|your\s+|any\s+|my\s+)?(?:(?:previous|prior|above|earlier|preceding|original)\s+)?(?:instructions|system\s+prompt|guidelines|directives)\b",
        ),
        rule(
            "new_instructions",
            Severity::Critical,
            r"(?i)\bnew\s+instructions\s*:",
        ),
        rule(
            "identity_redefinition",
            Severity::Critical,
            r"(?i)\byou\s+are\s+now\s+(?:a|an|the|in)\b",
        ),
        rule(
            "jailbreak",
            Severity::Critical,
            r"(?i)\b(?:dan\s+mode|do\s+anything\s+now|developer\s+mode\s+(?:enabled|activated))\b",
        ),
        rule(
            "prompt_leak",
            Severity::High,
            r"(?i)\b(?:reveal|show|print|repeat|output|display|tell)\s+(?:me\s+)?(?:your|the)\s+(?:system\s+prompt|hidden\s+instructions|initial\s+instructions|instructions|prompt)\b",
        ),
        rule(
            "restriction_bypass",
            Severity::High,
            r"(?i)\b(?:pretend|act)\s+(?:to\s+be|as\s+if|like)\b.{0,40}\b(?:no|without)\s+(?:restrictions|rules|filters|limits)\b",
        ),
        rule(
            "role_separator",
            Severity::High,
            r"(?im)(?:<\|im_(?:start|end)\|>|\[/?INST\]|<</?SYS>>|^\s*#{0,3}\s*system\s*:)",
        ),
        rule(
            "zero_width",
            Severity::Medium,
            r"[\x{200B}\x{200C}\x{200D}\x{2060}\x{FEFF}]",
        ),
        rule("html_comment", Severity::Medium, r"(?s)<!--.*?-->"),
        rule(
            "hidden_style",
            Severity::Medium,
            r"(?i)display\s*:\s*none|visibility\s*:\s*hidden|font-size\s*:\s*0(?:px)?\b",
        ),
        rule("base64_blob", Severity::Low, r"[A-Za-z0-9+/]{40,}={0,2}"),
    ]
});

pub static HALLUCINATION_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule(
            "ai_disclaimer",
            Severity::Medium,
            r"(?i)\bas an ai(?:\s+language)?(?:\s+model)?\b",
        ),
        rule(
            "no_access",
            Severity::Medium,
            r"(?i)\bi\s+(?:don't|do\s+not)\s+have\s+access\s+to\b",
        ),
        rule(
            "cannot_browse",
            Severity::Medium,
            r"(?i)\bi\s+(?:cannot|can't|am\s+unable\s+to|am\s+not\s+able\s+to)\s+(?:browse|access\s+the\s+internet)\b",
        ),
        rule(
            "knowledge_cutoff",
            Severity::Low,
            r"(?i)\bmy\s+(?:knowledge|training)\s+(?:cutoff|cut-off|data)\b",
        ),
    ]
});

static HEALTHCARE_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule("ssn", Severity::Critical, r"\b\d{3}-\d{2}-\d{4}\b"),
        rule(
            "medical_record_number",
            Severity::Critical,
            r"(?i)\b(?:MRN|medical\s+record\s+(?:number|no\.?))\s*[:#]?\s*\d{5,}\b",
        ),
        rule(
            "date_of_birth",
            Severity::High,
            r"(?i)\b(?:date\s+of\s+birth|DOB|born\s+on)\s*[:\-]?\s*\d{1,4}[/\-.]\d{1,2}[/\-.]\d{1,4}\b",
        ),
    ]
});

static FINANCE_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule("card_number", Severity::Critical, r"\b(?:\d{4}[ -]?){3}\d{1,4}\b"),
        rule(
            "guaranteed_returns",
            Severity::High,
            r"(?i)\bguaranteed\s+(?:returns?|profits?|gains?)\b",
        ),
        rule(
            "insider_trading",
            Severity::Critical,
            r"(?i)\binsider\s+(?:trading|information|tips?)\b",
        ),
    ]
});

static LEGAL_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule(
            "privileged",
            Severity::High,
            r"(?i)\battorney[\s-]client\s+privilege(?:d)?\b|\bprivileged\s+(?:and|&)\s+confidential\b",
        ),
        rule(
            "confidential_settlement",
            Severity::Medium,
            r"(?i)\bconfidential\s+settlement\b",
        ),
    ]
});

static GOVERNMENT_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![rule(
        "classification_marking",
        Severity::Critical,
        r"\b(?:TOP\s+SECRET|SECRET//|CONFIDENTIAL//|NOFORN|CLASSIFIED)\b",
    )]
});

static EDUCATION_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![rule(
        "student_record",
        Severity::High,
        r"(?i)\bstudent\s+(?:id|number|record)\s*[:#]?\s*\d{5,}\b",
    )]
});

/// Sector-specific topic rules; sectors without any return an empty slice
pub fn topic_rules(sector: Sector) -> &'static [Rule] {
    match sector {
        Sector::Healthcare => HEALTHCARE_RULES.as_slice(),
        Sector::Finance => FINANCE_RULES.as_slice(),
        Sector::Legal => LEGAL_RULES.as_slice(),
        Sector::Government => GOVERNMENT_RULES.as_slice(),
        Sector::Education => EDUCATION_RULES.as_slice(),
        _ => &[],
    }
}
