// ── Device annotation normalizer ──
//
// Appliance notes are loosely structured:
//
//   WAN 1
//   Comcast
//   300.0M x 35.0M
//   WAN 2
//   AT&T
//   20.0M x 20.0M
//
// Line breaks are preserved until after the text has been segmented by
// slot marker; collapsing whitespace first lets provider text bleed into
// the neighbouring speed line. Provider post-processing is an ordered list
// of declarative rules so carrier quirks are additive table entries.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{Slot, Speed};
use crate::text::{collapse_whitespace, contains_phrase, strip_prefix_phrase};

// ── Rules ────────────────────────────────────────────────────────────

/// Case-insensitive predicate over a cleaned provider line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Pattern {
    /// Whole-word phrase anywhere in the line.
    Contains(String),
    /// Every phrase present.
    AllOf(Vec<String>),
    EndsWith(String),
    Equals(String),
}

impl Pattern {
    pub fn matches(&self, provider: &str) -> bool {
        match self {
            Self::Contains(p) => contains_phrase(provider, p),
            Self::AllOf(ps) => !ps.is_empty() && ps.iter().all(|p| contains_phrase(provider, p)),
            Self::EndsWith(p) => {
                let lower = provider.to_lowercase();
                let suffix = p.to_lowercase();
                lower.ends_with(&suffix)
                    && lower[..lower.len() - suffix.len()]
                        .chars()
                        .next_back()
                        .is_none_or(|c| !c.is_alphanumeric())
            }
            Self::Equals(p) => provider.trim().eq_ignore_ascii_case(p.trim()),
        }
    }
}

/// `pattern` → canonical output. Either half of the output may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRule {
    pub pattern: Pattern,
    /// Replacement provider text; `Some("")` clears the provider.
    #[serde(default)]
    pub provider: Option<String>,
    /// Forced speed, overriding anything parsed from the speed line.
    #[serde(default)]
    pub speed: Option<Speed>,
}

impl AnnotationRule {
    fn new(pattern: Pattern, provider: Option<&str>, speed: Option<Speed>) -> Self {
        Self {
            pattern,
            provider: provider.map(str::to_owned),
            speed,
        }
    }
}

/// Built-in provider rules, in priority order.
pub fn default_rules() -> Vec<AnnotationRule> {
    use Pattern::{AllOf, Contains, EndsWith, Equals};

    let s = |v: &str| v.to_owned();
    vec![
        AnnotationRule::new(Equals(s("unknown")), Some(""), None),
        AnnotationRule::new(Contains(s("cell cell")), Some("VZW Cell"), Some(Speed::Cellular)),
        AnnotationRule::new(Contains(s("vz gateway")), Some("VZW Cell"), Some(Speed::Cellular)),
        AnnotationRule::new(Contains(s("vzg")), Some("VZW Cell"), Some(Speed::Cellular)),
        AnnotationRule::new(Equals(s("dig")), Some("Digi"), Some(Speed::Cellular)),
        AnnotationRule::new(Contains(s("digi")), Some("Digi"), Some(Speed::Cellular)),
        AnnotationRule::new(Contains(s("inseego")), Some("Inseego"), Some(Speed::Cellular)),
        AnnotationRule::new(Contains(s("accelerated")), None, Some(Speed::Cellular)),
        AnnotationRule::new(Equals(s("verizon business")), None, Some(Speed::Cellular)),
        AnnotationRule::new(EndsWith(s("cell")), None, Some(Speed::Cellular)),
        AnnotationRule::new(EndsWith(s("cellular")), None, Some(Speed::Cellular)),
        AnnotationRule::new(Contains(s("lte")), None, Some(Speed::Cellular)),
        AnnotationRule::new(AllOf(vec![s("starlink"), s("satellite")]), Some("Starlink"), Some(Speed::Satellite)),
        AnnotationRule::new(Contains(s("starlink")), Some("Starlink"), Some(Speed::Satellite)),
        AnnotationRule::new(Contains(s("satellite")), None, Some(Speed::Satellite)),
    ]
}

// ── Parsed output ────────────────────────────────────────────────────

/// Provider and speed for one slot. Absent slots are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotNotes {
    pub provider: String,
    pub speed: String,
}

/// Something in the annotation that could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIssue {
    pub slot: Slot,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedAnnotation {
    pub wan1: SlotNotes,
    pub wan2: SlotNotes,
    pub issues: Vec<ParseIssue>,
}

impl ParsedAnnotation {
    pub fn slot(&self, slot: Slot) -> &SlotNotes {
        match slot {
            Slot::Wan1 => &self.wan1,
            Slot::Wan2 => &self.wan2,
        }
    }

    fn slot_mut(&mut self, slot: Slot) -> &mut SlotNotes {
        match slot {
            Slot::Wan1 => &mut self.wan1,
            Slot::Wan2 => &mut self.wan2,
        }
    }
}

/// Render slot notes back into the annotation convention.
pub fn format_annotation(wan1: &SlotNotes, wan2: &SlotNotes) -> String {
    let mut lines = Vec::new();
    for (marker, notes) in [("WAN 1", wan1), ("WAN 2", wan2)] {
        if notes.provider.is_empty() && notes.speed.is_empty() {
            continue;
        }
        lines.push(marker.to_owned());
        if !notes.provider.is_empty() {
            lines.push(notes.provider.clone());
        }
        if !notes.speed.is_empty() {
            lines.push(notes.speed.clone());
        }
    }
    lines.join("\n")
}

// ── Normalizer ───────────────────────────────────────────────────────

/// Parses appliance annotations into per-slot (provider, speed).
#[derive(Debug, Clone)]
pub struct NotesNormalizer {
    rules: Vec<AnnotationRule>,
}

impl Default for NotesNormalizer {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl NotesNormalizer {
    pub fn new(rules: Vec<AnnotationRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[AnnotationRule] {
        &self.rules
    }

    pub fn parse(&self, raw: &str) -> ParsedAnnotation {
        let mut parsed = ParsedAnnotation::default();
        if raw.trim().is_empty() {
            return parsed;
        }

        let (wan1, wan2) = segment(raw);
        for (slot, lines) in [(Slot::Wan1, wan1), (Slot::Wan2, wan2)] {
            let (notes, issue) = self.parse_segment(&lines);
            if let Some(message) = issue {
                debug!(%slot, %message, "annotation parse issue");
                parsed.issues.push(ParseIssue { slot, message });
            }
            *parsed.slot_mut(slot) = notes;
        }
        parsed
    }

    fn parse_segment(&self, lines: &[String]) -> (SlotNotes, Option<String>) {
        let mut provider_raw: Option<String> = None;
        let mut speed: Option<Speed> = None;
        let mut issue = None;

        for line in lines {
            if let Ok(categorical) = line.parse::<Speed>() {
                if speed.is_none() {
                    speed = Some(categorical);
                }
                continue;
            }
            if speed.is_none() {
                if let Some((at, found)) = Speed::find_in(line) {
                    let prefix = line[..at].trim();
                    if provider_raw.is_none() && !prefix.is_empty() {
                        provider_raw = Some(prefix.to_owned());
                    }
                    speed = Some(found);
                    continue;
                }
            }
            if provider_raw.is_none() {
                provider_raw = Some(line.clone());
            } else if issue.is_none() {
                issue = Some(if speed.is_none() && looks_like_speed(line) {
                    format!("unrecognized speed {line:?}")
                } else {
                    format!("extra line {line:?} dropped")
                });
            }
        }

        let mut provider = provider_raw.as_deref().map(clean_provider).unwrap_or_default();
        if let Some(rule) = self.rules.iter().find(|r| r.pattern.matches(&provider)) {
            if let Some(ref replacement) = rule.provider {
                provider.clone_from(replacement);
            }
            if let Some(ref forced) = rule.speed {
                speed = Some(forced.clone());
            }
        }

        let notes = SlotNotes {
            provider,
            speed: speed.as_ref().map(ToString::to_string).unwrap_or_default(),
        };
        (notes, issue)
    }
}

/// Split an annotation into per-slot line lists.
///
/// Text before the first marker is WAN1 only when the annotation carries
/// no markers at all.
fn segment(raw: &str) -> (Vec<String>, Vec<String>) {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");

    let mut preamble = Vec::new();
    let mut slots: [Vec<String>; 2] = [Vec::new(), Vec::new()];
    let mut current: Option<Slot> = None;
    let mut saw_marker = false;

    for line in normalized.lines() {
        let line = collapse_whitespace(line);
        if line.is_empty() {
            continue;
        }

        let mut rest = line.as_str();
        loop {
            match find_marker(rest) {
                Some((start, end, slot)) => {
                    push_fragment(&rest[..start], current, &mut slots, &mut preamble);
                    current = Some(slot);
                    saw_marker = true;
                    rest = &rest[end..];
                }
                None => {
                    push_fragment(rest, current, &mut slots, &mut preamble);
                    break;
                }
            }
        }
    }

    let [wan1, wan2] = slots;
    if saw_marker {
        (wan1, wan2)
    } else {
        (preamble, wan2)
    }
}

fn push_fragment(
    fragment: &str,
    current: Option<Slot>,
    slots: &mut [Vec<String>; 2],
    preamble: &mut Vec<String>,
) {
    let fragment = fragment.trim();
    if fragment.is_empty() {
        return;
    }
    match current {
        Some(slot) => slots[slot.index()].push(fragment.to_owned()),
        None => preamble.push(fragment.to_owned()),
    }
}

/// Locate `WAN1`, `WAN 1`, `wan2:` ... on word boundaries.
///
/// Returns (marker start, end of marker including a trailing colon, slot).
fn find_marker(text: &str) -> Option<(usize, usize, Slot)> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 3 <= bytes.len() {
        let at_word_start = i == 0 || !bytes[i - 1].is_ascii_alphanumeric();
        if at_word_start && bytes[i..i + 3].eq_ignore_ascii_case(b"wan") {
            let mut j = i + 3;
            while j < bytes.len() && bytes[j] == b' ' {
                j += 1;
            }
            let slot = match bytes.get(j) {
                Some(b'1') => Some(Slot::Wan1),
                Some(b'2') => Some(Slot::Wan2),
                _ => None,
            };
            let word_ends = bytes.get(j + 1).is_none_or(|b| !b.is_ascii_alphanumeric());
            if let (Some(slot), true) = (slot, word_ends) {
                let mut end = j + 1;
                while end < bytes.len() && bytes[end] == b' ' {
                    end += 1;
                }
                if bytes.get(end) == Some(&b':') {
                    end += 1;
                }
                return Some((i, end, slot));
            }
        }
        i += 1;
    }
    None
}

/// Drop `DSR` / `NOT DSR` tags and punctuation outside `. & | -`.
fn clean_provider(raw: &str) -> String {
    let mut text = raw.trim();
    for tag in ["not dsr", "dsr"] {
        if let Some(rest) = strip_prefix_phrase(text, tag) {
            text = rest;
            break;
        }
    }
    let replaced: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || matches!(c, '_' | '.' | '&' | '|' | '-') {
                c
            } else {
                ' '
            }
        })
        .collect();
    collapse_whitespace(&replaced)
}

fn looks_like_speed(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.chars().any(|c| c.is_ascii_digit()) && (lower.contains(" x ") || lower.contains("mbps"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(raw: &str) -> ParsedAnnotation {
        NotesNormalizer::default().parse(raw)
    }

    fn notes(provider: &str, speed: &str) -> SlotNotes {
        SlotNotes {
            provider: provider.into(),
            speed: speed.into(),
        }
    }

    #[test]
    fn two_slot_annotation() {
        let parsed = parse("WAN 1\nComcast\n300.0M x 35.0M\nWAN 2\nAT&T\n20.0M x 20.0M");
        assert_eq!(parsed.wan1, notes("Comcast", "300.0M x 35.0M"));
        assert_eq!(parsed.wan2, notes("AT&T", "20.0M x 20.0M"));
        assert!(parsed.issues.is_empty());
    }

    #[test]
    fn mixed_line_endings_and_messy_spacing() {
        let parsed = parse("WAN1:\r\n  Cox   Business \r\n 100M  x 10M\rWAN2 :\nSpectrum\n\n 1G x 35M ");
        assert_eq!(parsed.wan1, notes("Cox Business", "100.0M x 10.0M"));
        assert_eq!(parsed.wan2, notes("Spectrum", "1000.0M x 35.0M"));
    }

    #[test]
    fn lines_are_not_collapsed_before_segmenting() {
        // A provider ending in a digit must not absorb the speed line.
        let parsed = parse("WAN 1\nLevel 3\n500M x 500M\nWAN 2\nCox\n50M x 5M");
        assert_eq!(parsed.wan1, notes("Level 3", "500.0M x 500.0M"));
        assert_eq!(parsed.wan2, notes("Cox", "50.0M x 5.0M"));
    }

    #[test]
    fn single_line_annotation() {
        let parsed = parse("WAN 1 Comcast 300M x 35M WAN 2 AT&T 20M x 20M");
        assert_eq!(parsed.wan1, notes("Comcast", "300.0M x 35.0M"));
        assert_eq!(parsed.wan2, notes("AT&T", "20.0M x 20.0M"));
    }

    #[test]
    fn missing_second_slot_is_empty_not_null() {
        let parsed = parse("WAN 1\nFrontier\n50M x 50M");
        assert_eq!(parsed.wan1, notes("Frontier", "50.0M x 50.0M"));
        assert_eq!(parsed.wan2, SlotNotes::default());
    }

    #[test]
    fn unmarked_text_is_wan1() {
        let parsed = parse("Comcast\n100M x 10M");
        assert_eq!(parsed.wan1, notes("Comcast", "100.0M x 10.0M"));
        assert_eq!(parsed.wan2, SlotNotes::default());
    }

    #[test]
    fn single_value_speed() {
        let parsed = parse("WAN 1\nLumen\n100M");
        assert_eq!(parsed.wan1, notes("Lumen", "100.0M"));
    }

    #[test]
    fn cellular_keyword_overrides_numeric_speed() {
        let parsed = parse("WAN 1\nComcast\n300M x 35M\nWAN 2\nVZW Cell\n50M x 10M");
        assert_eq!(parsed.wan2, notes("VZW Cell", "Cell"));

        let parsed = parse("WAN 2\nDigi\n");
        assert_eq!(parsed.wan2, notes("Digi", "Cell"));

        let parsed = parse("WAN 2\nVZG 4G\n");
        assert_eq!(parsed.wan2, notes("VZW Cell", "Cell"));
    }

    #[test]
    fn satellite_keyword_forces_satellite() {
        let parsed = parse("WAN 2\nStarlink Satellite\n200M x 20M");
        assert_eq!(parsed.wan2, notes("Starlink", "Satellite"));
    }

    #[test]
    fn strips_dsr_tags_and_punctuation() {
        let parsed = parse("WAN 1\nNOT DSR AT&T (ADI)*\n20M x 20M\nWAN 2\nDSR Comcast\n");
        assert_eq!(parsed.wan1, notes("AT&T ADI", "20.0M x 20.0M"));
        assert_eq!(parsed.wan2, notes("Comcast", ""));
    }

    #[test]
    fn unknown_provider_clears() {
        let parsed = parse("WAN 1\nUnknown\n");
        assert_eq!(parsed.wan1, SlotNotes::default());
    }

    #[test]
    fn bad_speed_is_reported_and_left_empty() {
        let parsed = parse("WAN 1\nComcast\n300 x 30\n");
        assert_eq!(parsed.wan1, notes("Comcast", ""));
        assert_eq!(parsed.issues.len(), 1);
        assert_eq!(parsed.issues[0].slot, Slot::Wan1);
    }

    #[test]
    fn dropped_extra_line_is_reported() {
        let parsed = parse("WAN 1\nComcast\nsee ticket 4411\nWAN 2\nAT&T\n20M x 20M\nCKT 77/ABC");
        assert_eq!(parsed.wan1, notes("Comcast", ""));
        assert_eq!(parsed.wan2, notes("AT&T", "20.0M x 20.0M"));
        assert_eq!(parsed.issues.len(), 2);
        assert_eq!(parsed.issues[0].slot, Slot::Wan1);
        assert!(parsed.issues[0].message.contains("see ticket 4411"));
        assert_eq!(parsed.issues[1].slot, Slot::Wan2);
    }

    #[test]
    fn format_then_parse_round_trips() {
        let samples = [
            "WAN 1\nComcast\n300.0M x 35.0M\nWAN 2\nAT&T\n20.0M x 20.0M",
            "WAN1: Cox Business 1G x 35M\nWAN2: Digi",
            "WAN 1\nStarlink\n\nWAN 2\nLevel 3\n100M",
            "WAN 2\nNOT DSR Spectrum\n400M x 20M",
        ];
        let normalizer = NotesNormalizer::default();
        for raw in samples {
            let first = normalizer.parse(raw);
            let rendered = format_annotation(&first.wan1, &first.wan2);
            let second = normalizer.parse(&rendered);
            assert_eq!(first.wan1, second.wan1, "{raw}");
            assert_eq!(first.wan2, second.wan2, "{raw}");
        }
    }

    #[test]
    fn rules_are_additive() {
        let mut rules = vec![AnnotationRule {
            pattern: Pattern::Contains("acme wireless".into()),
            provider: Some("Acme".into()),
            speed: Some(Speed::Cellular),
        }];
        rules.extend(default_rules());
        let parsed = NotesNormalizer::new(rules).parse("WAN 2\nAcme Wireless\n25M x 5M");
        assert_eq!(parsed.wan2, notes("Acme", "Cell"));
    }
}
