//! crates/dictanote_core/src/pseudonym.rs
//!
//! Replaces a subject's real name with a deterministic placeholder before any
//! text leaves the trust boundary, and restores it once the text comes back.

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use tracing::warn;

use crate::domain::UserIdentity;

/// Prefix of every pseudonym, so placeholders are recognizable in generated text.
pub const PSEUDONYM_MARKER: &str = "SUBJ_";

/// Replaces redacted spans.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Hex characters kept from the hash (48 bits).
const TOKEN_LEN: usize = 12;

/// Lowercase particles that are never substituted on their own.
const NAME_PARTICLES: &[&str] = &[
    "de", "du", "des", "la", "le", "les", "van", "von", "der", "den", "di", "da", "del", "dos",
    "ben", "bin", "mac",
];

// Order matters: the narrower identifier shapes run before the broad digit runs.
static REDACTIONS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Email addresses
        r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
        // French social security number (NIR), with or without spacing
        r"\b[12]\s?\d{2}\s?(?:0[1-9]|1[0-2])\s?(?:\d{2}|2[AB])\s?\d{3}\s?\d{3}(?:\s?\d{2})?\b",
        // US social security number
        r"\b\d{3}-\d{2}-\d{4}\b",
        // Card-number-like runs of 13 to 19 digits
        r"\b(?:\d[ -]?){12,18}\d\b",
        // Dates: 12/03/2024, 12.03.24, 12-3-2024, 2024-03-12
        r"\b\d{1,2}[/.-]\d{1,2}[/.-]\d{2,4}\b",
        r"\b\d{4}-\d{2}-\d{2}\b",
        // French phone numbers
        r"(?:\+33\s?|\b0)[1-9](?:[ .-]?\d{2}){4}\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("redaction patterns are valid"))
    .collect()
});

/// A placeholder standing in for one subject's real name during one external call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Pseudonym(String);

impl Pseudonym {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Pseudonym {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A generation request that has been through `Pseudonymizer::prepare_request`.
///
/// This is the only type an `AnnotationService` accepts, and it can only be built
/// inside this crate, so no backend call can be made with unsanitized text.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotationRequest {
    transcript: String,
    subject_context: Option<String>,
    template: Option<String>,
    examples: Vec<String>,
    pseudonym: Pseudonym,
}

impl AnnotationRequest {
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn subject_context(&self) -> Option<&str> {
        self.subject_context.as_deref()
    }

    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    pub fn examples(&self) -> &[String] {
        &self.examples
    }

    pub fn pseudonym(&self) -> &Pseudonym {
        &self.pseudonym
    }

    /// Every text segment that will be sent over the network.
    pub fn outbound_texts(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.transcript.as_str())
            .chain(self.subject_context.as_deref())
            .chain(self.template.as_deref())
            .chain(self.examples.iter().map(String::as_str))
    }
}

/// The unsanitized pieces of a request, as held on the trusted side.
#[derive(Debug, Clone, Copy)]
pub struct RequestParts<'a> {
    pub transcript: &'a str,
    pub subject_context: Option<&'a str>,
    pub template: Option<&'a str>,
    pub examples: &'a [String],
}

#[derive(Debug, Clone)]
pub struct Pseudonymizer {
    pipeline_version: String,
}

impl Default for Pseudonymizer {
    fn default() -> Self {
        Self::new("v1")
    }
}

impl Pseudonymizer {
    pub fn new(pipeline_version: impl Into<String>) -> Self {
        Self {
            pipeline_version: pipeline_version.into(),
        }
    }

    /// Derives the placeholder for `real_name` under `identity`.
    ///
    /// Case and whitespace are normalized first. Returns `None` for a blank name.
    pub fn pseudonymize(&self, real_name: &str, identity: &UserIdentity) -> Option<Pseudonym> {
        let normalized = normalize_name(real_name);
        if normalized.is_empty() {
            return None;
        }

        // The identity is mixed in so the same name yields unrelated tokens in different accounts.
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hasher.update([0x1f]);
        hasher.update(identity.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.pipeline_version.as_bytes());
        let digest = hex::encode_upper(hasher.finalize());

        Some(Pseudonym(format!("{}{}", PSEUDONYM_MARKER, &digest[..TOKEN_LEN])))
    }

    /// Replaces every case-insensitive, whole-word occurrence of `real_name` with the pseudonym.
    pub fn substitute_out(&self, text: &str, real_name: &str, pseudonym: &Pseudonym) -> String {
        replace_whole_word(text, real_name, pseudonym.as_str())
    }

    /// Puts the real name back wherever the pseudonym appears, in any letter case.
    ///
    /// Only the leading edge must be a word boundary: the token has a fixed
    /// length, so text glued after it ("SUBJ_...s") still gets restored.
    pub fn substitute_in(&self, text: &str, pseudonym: &Pseudonym, real_name: &str) -> String {
        let pattern = format!(r"\b{}", regex::escape(pseudonym.as_str()));
        match RegexBuilder::new(&pattern).case_insensitive(true).build() {
            Ok(regex) => regex
                .replace_all(text, regex::NoExpand(real_name))
                .into_owned(),
            Err(e) => {
                warn!(error = %e, "Could not build substitution pattern");
                text.to_string()
            }
        }
    }

    /// Name substitution followed by best-effort redaction of other identifying shapes.
    ///
    /// Besides the full name, each significant part of it is substituted too, so
    /// "Madame Dupont" is covered when the subject is "Marie Dupont".
    pub fn sanitize_for_external_call(
        &self,
        text: &str,
        real_name: &str,
        identity: &UserIdentity,
    ) -> String {
        let Some(pseudonym) = self.pseudonymize(real_name, identity) else {
            return redact(text);
        };
        redact(&self.scrub_name(text, real_name, &pseudonym))
    }

    /// Builds the only request shape a generation backend will accept.
    ///
    /// Returns `None` when `real_name` is blank.
    pub fn prepare_request(
        &self,
        parts: RequestParts<'_>,
        real_name: &str,
        identity: &UserIdentity,
    ) -> Option<AnnotationRequest> {
        let pseudonym = self.pseudonymize(real_name, identity)?;
        let clean = |text: &str| redact(&self.scrub_name(text, real_name, &pseudonym));

        Some(AnnotationRequest {
            transcript: clean(parts.transcript),
            subject_context: parts.subject_context.map(clean),
            template: parts.template.map(clean),
            examples: parts.examples.iter().map(|e| clean(e)).collect(),
            pseudonym,
        })
    }

    fn scrub_name(&self, text: &str, real_name: &str, pseudonym: &Pseudonym) -> String {
        let mut scrubbed = self.substitute_out(text, real_name, pseudonym);
        let parts: Vec<&str> = real_name.split_whitespace().collect();
        if parts.len() > 1 {
            for part in parts {
                let lowered = part.to_lowercase();
                if part.chars().count() < 3 || NAME_PARTICLES.contains(&lowered.as_str()) {
                    continue;
                }
                scrubbed = self.substitute_out(&scrubbed, part, pseudonym);
            }
        }
        scrubbed
    }
}

/// Lowercase, trim and collapse inner whitespace.
fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Builds a case-insensitive pattern matching `literal` as a whole word.
///
/// Word boundaries are only required on sides where the literal itself starts or
/// ends with a word character, so names like "J." still match. Inner
/// whitespace matches any run of whitespace.
fn whole_word_regex(literal: &str) -> Option<Regex> {
    let words: Vec<&str> = literal.split_whitespace().collect();
    let (first, last) = (words.first()?, words.last()?);

    let body = words
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join(r"\s+");
    let lead = if first.chars().next().is_some_and(is_word_char) {
        r"\b"
    } else {
        ""
    };
    let trail = if last.chars().last().is_some_and(is_word_char) {
        r"\b"
    } else {
        ""
    };

    match RegexBuilder::new(&format!("{}{}{}", lead, body, trail))
        .case_insensitive(true)
        .build()
    {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!(error = %e, "Could not build substitution pattern");
            None
        }
    }
}

fn replace_whole_word(text: &str, needle: &str, replacement: &str) -> String {
    match whole_word_regex(needle) {
        Some(regex) => regex
            .replace_all(text, regex::NoExpand(replacement))
            .into_owned(),
        None => text.to_string(),
    }
}

fn redact(text: &str) -> String {
    REDACTIONS.iter().fold(text.to_string(), |acc, regex| {
        regex.replace_all(&acc, REDACTION_MARKER).into_owned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(value: &str) -> UserIdentity {
        UserIdentity::new(value).unwrap()
    }

    #[test]
    fn pseudonym_is_deterministic_and_marked() {
        let p = Pseudonymizer::default();
        let a = p.pseudonymize("Dupont", &identity("u-42")).unwrap();
        let b = p.pseudonymize("Dupont", &identity("u-42")).unwrap();
        assert_eq!(a, b);
        assert!(a.as_str().starts_with(PSEUDONYM_MARKER));
        assert_eq!(a.as_str().len(), PSEUDONYM_MARKER.len() + TOKEN_LEN);
        assert_eq!(a.as_str(), a.as_str().to_uppercase());
    }

    #[test]
    fn pseudonym_normalizes_case_and_whitespace() {
        let p = Pseudonymizer::default();
        let u = identity("u-42");
        let canonical = p.pseudonymize("Marie Dupont", &u).unwrap();
        assert_eq!(p.pseudonymize("  marie   DUPONT ", &u).unwrap(), canonical);
        assert_eq!(p.pseudonymize("Marie\tDupont", &u).unwrap(), canonical);
    }

    #[test]
    fn pseudonym_differs_per_name_account_and_version() {
        let p = Pseudonymizer::default();
        let u1 = identity("u-42");
        let u2 = identity("u-43");
        let base = p.pseudonymize("Dupont", &u1).unwrap();
        assert_ne!(base, p.pseudonymize("Durand", &u1).unwrap());
        assert_ne!(base, p.pseudonymize("Dupont", &u2).unwrap());
        assert_ne!(
            base,
            Pseudonymizer::new("v2").pseudonymize("Dupont", &u1).unwrap()
        );
    }

    #[test]
    fn blank_name_has_no_pseudonym() {
        let p = Pseudonymizer::default();
        assert!(p.pseudonymize("   ", &identity("u-42")).is_none());
    }

    #[test]
    fn substitute_out_removes_every_occurrence() {
        let p = Pseudonymizer::default();
        let pseudonym = p.pseudonymize("Dupont", &identity("u-42")).unwrap();
        let out = p.substitute_out(
            "Madame Dupont a été vue ce matin. DUPONT va mieux, dupont sourit.",
            "Dupont",
            &pseudonym,
        );
        assert!(!out.to_lowercase().contains("dupont"));
        assert_eq!(out.matches(pseudonym.as_str()).count(), 3);
    }

    #[test]
    fn substitute_out_respects_word_boundaries() {
        let p = Pseudonymizer::default();
        let pseudonym = p.pseudonymize("Ann", &identity("u-42")).unwrap();
        let out = p.substitute_out("Ann went to the annual meeting with Anne.", "Ann", &pseudonym);
        assert_eq!(
            out,
            format!("{} went to the annual meeting with Anne.", pseudonym)
        );
    }

    #[test]
    fn round_trip_with_metacharacters() {
        let p = Pseudonymizer::default();
        let u = identity("u-42");
        for (name, text) in [
            ("O'Brien", "Seen O'Brien today; O'Brien reports less pain."),
            ("Müller-Weiss", "Mme Müller-Weiss (born in Bern) is stable. Müller-Weiss agrees."),
            ("J. (Jr.) Smith+", "Visit with J. (Jr.) Smith+ went well."),
            ("Dupont", "Madame Dupont a été vue ce matin"),
        ] {
            let pseudonym = p.pseudonymize(name, &u).unwrap();
            let out = p.substitute_out(text, name, &pseudonym);
            assert!(!out.contains(name), "{} leaked in {}", name, out);
            assert_eq!(p.substitute_in(&out, &pseudonym, name), text);
        }
    }

    #[test]
    fn substitute_in_is_case_insensitive() {
        let p = Pseudonymizer::default();
        let pseudonym = p.pseudonymize("Dupont", &identity("u-42")).unwrap();
        let generated = format!(
            "{} a bien dormi. {} mange seule.",
            pseudonym.as_str().to_lowercase(),
            pseudonym
        );
        assert_eq!(
            p.substitute_in(&generated, &pseudonym, "Dupont"),
            "Dupont a bien dormi. Dupont mange seule."
        );
    }

    #[test]
    fn substitute_in_restores_a_placeholder_with_trailing_letters() {
        let p = Pseudonymizer::default();
        let pseudonym = p.pseudonymize("Dupont", &identity("u-42")).unwrap();
        let generated = format!("Dossier {}s mis a jour.", pseudonym);
        assert_eq!(
            p.substitute_in(&generated, &pseudonym, "Dupont"),
            "Dossier Duponts mis a jour."
        );
    }

    #[test]
    fn sanitize_scrubs_name_parts_and_redacts() {
        let p = Pseudonymizer::default();
        let u = identity("u-42");
        let text = "Visite chez Marie Dupont. Madame Dupont, née le 12/03/1941, \
                    mail marie.dupont@example.fr, tél 06 12 34 56 78, \
                    carte 4970 1012 3456 7890, NIR 2 41 03 75 123 456 78.";
        let out = p.sanitize_for_external_call(text, "Marie de Dupont", &u);

        assert!(!out.to_lowercase().contains("dupont"), "{}", out);
        assert!(!out.contains("12/03/1941"));
        assert!(!out.contains("@example.fr"));
        assert!(!out.contains("06 12 34 56 78"));
        assert!(!out.contains("4970"));
        assert!(!out.contains("456 78"));
        assert!(out.contains(REDACTION_MARKER));
        assert!(out.contains("Visite chez"));
    }

    #[test]
    fn sanitize_keeps_particles() {
        let p = Pseudonymizer::default();
        let out = p.sanitize_for_external_call(
            "La patiente parle de sa fille.",
            "Jeanne de la Tour",
            &identity("u-42"),
        );
        assert_eq!(out, "La patiente parle de sa fille.");
    }

    #[test]
    fn prepared_request_contains_no_real_name() {
        let p = Pseudonymizer::default();
        let u = identity("u-42");
        let examples = vec!["Exemple: Mme Dupont a bien mangé.".to_string()];
        let request = p
            .prepare_request(
                RequestParts {
                    transcript: "Madame Dupont a été vue ce matin",
                    subject_context: Some("Dupont, diabète de type 2"),
                    template: Some("Observation pour {nom}"),
                    examples: &examples,
                },
                "Dupont",
                &u,
            )
            .unwrap();

        for text in request.outbound_texts() {
            assert!(!text.to_lowercase().contains("dupont"), "{}", text);
        }
        assert!(request.transcript().contains(request.pseudonym().as_str()));
        assert_eq!(request.examples().len(), 1);
    }

    #[test]
    fn prepare_request_requires_a_name() {
        let p = Pseudonymizer::default();
        let parts = RequestParts {
            transcript: "Observation",
            subject_context: None,
            template: None,
            examples: &[],
        };
        assert!(p.prepare_request(parts, "", &identity("u-42")).is_none());
    }
}
