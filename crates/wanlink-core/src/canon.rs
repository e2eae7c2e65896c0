// ── Provider name canonicalizer ──
//
// Decides whether two free-text provider names denote the same carrier.
// Rules run first-match-wins:
//
//   1. exact (trimmed, case-insensitive)          -> 100
//   2. alias table, then exact re-compare         -> 95
//   3. shared carrier-family keyword              -> 90
//   4. normalized forms equal                     -> 85
//      fuzzy over normalized forms >= threshold   -> score, capped at 84
//
// The false-positive guard list blocks rules 2-4 for known-distinct
// carriers. Inputs are ordered before evaluation so `compare(a, b)` and
// `compare(b, a)` always agree.

use serde::{Deserialize, Serialize};

use crate::text::{collapse_whitespace, contains_phrase, is_placeholder, strip_prefix_phrase};

pub const EXACT_CONFIDENCE: u8 = 100;
pub const ALIAS_CONFIDENCE: u8 = 95;
pub const KEYWORD_CONFIDENCE: u8 = 90;
pub const NORMALIZED_CONFIDENCE: u8 = 85;
pub const FUZZY_CONFIDENCE_CAP: u8 = 84;

// ── Tables ───────────────────────────────────────────────────────────

/// Names that all contain one of `keywords` belong to the same carrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordFamily {
    pub canonical: String,
    pub keywords: Vec<String>,
}

/// Alias, keyword and guard tables. Built once at startup and passed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTables {
    /// `(alias phrase, canonical brand)`.
    pub aliases: Vec<(String, String)>,
    pub families: Vec<KeywordFamily>,
    /// Pairs of known-distinct carriers that must never fuzzy-match.
    pub guards: Vec<(String, String)>,
    /// Leading tags dropped before fuzzy comparison.
    pub strip_prefixes: Vec<String>,
    /// Trailing corporate/service words dropped before fuzzy comparison.
    pub strip_suffixes: Vec<String>,
    /// Minimum fuzzy score (0-100) for rule 4.
    pub fuzzy_threshold: u8,
}

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(a, b)| ((*a).to_owned(), (*b).to_owned()))
        .collect()
}

fn words(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

impl Default for ProviderTables {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProviderTables {
    pub fn builtin() -> Self {
        let aliases = pairs(&[
            ("spectrum", "Charter Communications"),
            ("charter", "Charter Communications"),
            ("bright house", "Charter Communications"),
            ("time warner cable", "Charter Communications"),
            ("cox business", "Cox Communications"),
            ("cox", "Cox Communications"),
            ("comcast workplace", "Comcast"),
            ("comcast business", "Comcast"),
            ("xfinity", "Comcast"),
            ("comcast", "Comcast"),
            ("at&t", "AT&T"),
            ("at & t", "AT&T"),
            ("att", "AT&T"),
            ("sbc", "AT&T"),
            ("centurylink", "CenturyLink"),
            ("qwest", "CenturyLink"),
            ("embarq", "CenturyLink"),
            ("lumen", "CenturyLink"),
            ("level 3", "CenturyLink"),
            ("level3", "CenturyLink"),
            ("frontier", "Frontier"),
            ("verizon", "Verizon"),
            ("vzw", "Verizon"),
            ("altice", "Optimum"),
            ("suddenlink", "Optimum"),
            ("optimum", "Optimum"),
            ("wide open west", "WideOpenWest"),
            ("wideopenwest", "WideOpenWest"),
            ("wow", "WideOpenWest"),
            ("cableone", "Cable One"),
            ("cable one", "Cable One"),
            ("windstream", "Windstream"),
            ("brightspeed", "Brightspeed"),
            ("mediacom", "Mediacom"),
            ("spacex", "Starlink"),
            ("starlink", "Starlink"),
            ("digi", "Digi"),
            ("inseego", "Inseego"),
        ]);

        let family = |canonical: &str, keywords: &[&str]| KeywordFamily {
            canonical: canonical.to_owned(),
            keywords: words(keywords),
        };
        let families = vec![
            family("AT&T", &["at&t", "att", "at & t"]),
            family("Verizon", &["verizon", "vzw", "vz"]),
            family("Comcast", &["comcast", "xfinity"]),
            family("CenturyLink", &["centurylink", "embarq", "qwest", "lumen"]),
            family("Cox Communications", &["cox"]),
            family("Charter Communications", &["charter", "spectrum"]),
            family("Brightspeed", &["brightspeed"]),
        ];

        let guards = pairs(&[
            ("spectrum", "spectrotel"),
            ("charter communications", "charter oak"),
            ("lumen", "lumos"),
            ("sprint", "spectrum"),
            ("verizon", "viasat"),
            ("windstream", "wideopenwest"),
        ]);

        Self {
            aliases,
            families,
            guards,
            strip_prefixes: words(&["not dsr", "dsr", "eb2-", "comcastagg", "agg", "clink", "--", "-"]),
            strip_suffixes: words(&[
                "inc", "llc", "corp", "corporation", "co", "company", "ltd", "lp",
                "communications", "communication", "comm", "business", "services",
                "enterprises", "group", "cable", "fiber", "dsl", "broadband", "internet",
                "workplace", "extended", "adi", "abf", "boi", "ii",
            ]),
            fuzzy_threshold: 80,
        }
    }

    /// Append configured entries. Added aliases and guards take priority
    /// over built-ins of equal length.
    pub fn extend(
        &mut self,
        aliases: impl IntoIterator<Item = (String, String)>,
        families: impl IntoIterator<Item = KeywordFamily>,
        guards: impl IntoIterator<Item = (String, String)>,
    ) {
        let mut added: Vec<(String, String)> = aliases.into_iter().collect();
        added.append(&mut self.aliases);
        self.aliases = added;
        self.families.extend(families);
        self.guards.extend(guards);
    }
}

// ── Result ───────────────────────────────────────────────────────────

/// Which rule decided a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchRule {
    Exact,
    Alias,
    Keyword,
    Normalized,
    Fuzzy,
    /// Blocked by the guard list.
    Guarded,
    NoMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderMatch {
    pub matched: bool,
    /// 0-100; also meaningful for non-matches so callers can rank.
    pub confidence: u8,
    pub rule: MatchRule,
}

impl ProviderMatch {
    fn hit(rule: MatchRule, confidence: u8) -> Self {
        Self {
            matched: true,
            confidence,
            rule,
        }
    }

    fn miss(rule: MatchRule, confidence: u8) -> Self {
        Self {
            matched: false,
            confidence,
            rule,
        }
    }
}

// ── Canonicalizer ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Canonicalizer {
    tables: ProviderTables,
}

impl Canonicalizer {
    pub fn new(tables: ProviderTables) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &ProviderTables {
        &self.tables
    }

    /// Canonical brand for `name` via the alias table, if any alias applies.
    ///
    /// The longest matching alias phrase wins.
    pub fn canonical(&self, name: &str) -> Option<&str> {
        let cleaned = collapse_whitespace(name);
        self.tables
            .aliases
            .iter()
            .filter(|(alias, _)| contains_phrase(&cleaned, alias))
            .fold(None::<&(String, String)>, |best, entry| match best {
                Some(b) if b.0.len() >= entry.0.len() => Some(b),
                _ => Some(entry),
            })
            .map(|(_, canonical)| canonical.as_str())
    }

    /// Display form: canonical brand when known, otherwise the trimmed input.
    pub fn canonical_or_raw(&self, name: &str) -> String {
        self.canonical(name)
            .map_or_else(|| collapse_whitespace(name), str::to_owned)
    }

    pub fn compare(&self, a: &str, b: &str) -> ProviderMatch {
        if is_placeholder(a) || is_placeholder(b) {
            return ProviderMatch::miss(MatchRule::NoMatch, 0);
        }

        let a = collapse_whitespace(a);
        let b = collapse_whitespace(b);
        let (a, b) = order_pair(a, b);

        // Rule 1
        if a.eq_ignore_ascii_case(&b) || a.to_lowercase() == b.to_lowercase() {
            return ProviderMatch::hit(MatchRule::Exact, EXACT_CONFIDENCE);
        }

        let canon_a = self.canonical(&a);
        let canon_b = self.canonical(&b);

        if self.guarded(&a, canon_a, &b, canon_b) {
            return ProviderMatch::miss(MatchRule::Guarded, 0);
        }

        // Rule 2
        if let (Some(ca), Some(cb)) = (canon_a, canon_b) {
            if ca.eq_ignore_ascii_case(cb) {
                return ProviderMatch::hit(MatchRule::Alias, ALIAS_CONFIDENCE);
            }
        }

        // Rule 3
        let shares_family = self.tables.families.iter().any(|family| {
            let hit = |name: &str| family.keywords.iter().any(|k| contains_phrase(name, k));
            hit(&a) && hit(&b)
        });
        if shares_family {
            return ProviderMatch::hit(MatchRule::Keyword, KEYWORD_CONFIDENCE);
        }

        // Rule 4
        let na = self.normalize(&a);
        let nb = self.normalize(&b);
        if !na.is_empty() && na == nb {
            return ProviderMatch::hit(MatchRule::Normalized, NORMALIZED_CONFIDENCE);
        }
        let score = fuzzy_score(&na, &nb);
        if score >= self.tables.fuzzy_threshold {
            ProviderMatch::hit(MatchRule::Fuzzy, score.min(FUZZY_CONFIDENCE_CAP))
        } else {
            ProviderMatch::miss(MatchRule::NoMatch, score.min(FUZZY_CONFIDENCE_CAP))
        }
    }

    /// Lowercase, drop data-source tags and corporate suffixes.
    pub fn normalize(&self, name: &str) -> String {
        let lowered: String = name
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '&' || c == '-' {
                    c
                } else {
                    ' '
                }
            })
            .collect();
        let mut text = collapse_whitespace(&lowered);

        loop {
            let before = text.len();
            for prefix in &self.tables.strip_prefixes {
                if let Some(rest) = strip_prefix_phrase(&text, prefix) {
                    text = rest.to_owned();
                } else if prefix.ends_with('-') {
                    if let Some(rest) = text.strip_prefix(prefix.as_str()) {
                        text = rest.trim_start().to_owned();
                    }
                }
            }
            if text.len() == before {
                break;
            }
        }

        let mut tokens: Vec<&str> = text.split(' ').filter(|t| !t.is_empty()).collect();
        while tokens.len() > 1
            && tokens
                .last()
                .is_some_and(|last| self.tables.strip_suffixes.iter().any(|s| s == last))
        {
            tokens.pop();
        }
        tokens.join(" ")
    }

    /// A guard `(x, y)` fires when one side names `x` (raw or canonical)
    /// and the other side's raw text names `y` but not `x`.
    fn guarded(&self, a: &str, canon_a: Option<&str>, b: &str, canon_b: Option<&str>) -> bool {
        let names = |raw: &str, canon: Option<&str>, phrase: &str| {
            contains_phrase(raw, phrase) || canon.is_some_and(|c| contains_phrase(c, phrase))
        };

        self.tables.guards.iter().any(|(x, y)| {
            let oriented = |left: &str, left_canon: Option<&str>, right: &str| {
                names(left, left_canon, x)
                    && contains_phrase(right, y)
                    && !contains_phrase(right, x)
                    && !contains_phrase(left, y)
            };
            oriented(a, canon_a, b) || oriented(b, canon_b, a)
        })
    }
}

/// Order a pair so that evaluation never depends on argument order.
fn order_pair(a: String, b: String) -> (String, String) {
    let key = |s: &String| (s.to_lowercase(), s.clone());
    if key(&a) <= key(&b) { (a, b) } else { (b, a) }
}

// ── Fuzzy scoring ────────────────────────────────────────────────────

/// `max(edit-distance ratio, substring-containment ratio)` as 0-100.
fn fuzzy_score(a: &str, b: &str) -> u8 {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let ratio = strsim::normalized_levenshtein(a, b);
    percent(ratio.max(partial_ratio(a, b)))
}

/// Best edit-distance ratio of the shorter string against every
/// equal-length window of the longer one.
fn partial_ratio(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let (short, long) = if a_chars.len() <= b_chars.len() {
        (a_chars, b_chars)
    } else {
        (b_chars, a_chars)
    };
    // Very short names would hit inside almost anything.
    if short.len() < 3 {
        return 0.0;
    }
    let needle: String = short.iter().collect();
    long.windows(short.len())
        .map(|w| strsim::normalized_levenshtein(&needle, &w.iter().collect::<String>()))
        .fold(0.0, f64::max)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
fn percent(ratio: f64) -> u8 {
    (ratio.clamp(0.0, 1.0) * 100.0).round() as u8
}
