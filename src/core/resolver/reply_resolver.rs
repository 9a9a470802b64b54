// Reply resolver - turns a free-text reminder reply into a category template.
//
// Matching order, first hit wins:
// 1. exact match after normalization
// 2. best weighted fuzzy match at or above the similarity threshold
// 3. a template name contained in the reply
//
// This module is pure; journaling of non-exact outcomes happens in the caller.

use crate::core::platform::CategoryTemplate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static SHORTCODE_EMOJI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":\S+?:").expect("shortcode pattern is valid"));

static UNICODE_EMOJI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        "[\u{1F600}-\u{1F64F}\u{1F300}-\u{1F5FF}\u{1F680}-\u{1F6FF}\u{1F1E0}-\u{1F1FF}\u{1F900}-\u{1F9FF}\u{2600}-\u{27BF}\u{FE0F}]",
    )
    .expect("emoji pattern is valid")
});

#[derive(Debug, Clone, PartialEq)]
pub enum MatchKind {
    Exact,
    Fuzzy { score: f64 },
    Contained,
}

impl MatchKind {
    pub fn label(&self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::Fuzzy { .. } => "fuzzy",
            MatchKind::Contained => "contained",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Matched {
        template: CategoryTemplate,
        kind: MatchKind,
    },
    NoMatch,
}

impl Resolution {
    pub fn is_exact(&self) -> bool {
        matches!(
            self,
            Resolution::Matched {
                kind: MatchKind::Exact,
                ..
            }
        )
    }
}

/// Strip markup, emoji and case so replies compare against template names.
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | '>' | '•' | '*' | '`'))
        .map(|c| if c == '|' { '◦' } else { c })
        .collect();
    let cleaned = cleaned.trim().to_lowercase();
    let cleaned = SHORTCODE_EMOJI.replace_all(&cleaned, "");
    let cleaned = UNICODE_EMOJI.replace_all(&cleaned, "");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn indel_ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }

    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            current[j + 1] = if ca == cb {
                previous[j] + 1
            } else {
                current[j].max(previous[j + 1])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    let lcs = previous[b.len()];

    200.0 * lcs as f64 / total as f64
}

/// Indel similarity on a 0-100 scale: `2 * LCS / (len_a + len_b)`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    indel_ratio(&a, &b)
}

/// Best score of the shorter string against any same-length window of the
/// longer one, including windows cut off at either end.
fn partial_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return 0.0;
    }

    let n = short.len();
    let mut best = 0.0f64;
    for k in 1..n {
        best = best
            .max(indel_ratio(&short, &long[..k]))
            .max(indel_ratio(&short, &long[long.len() - k..]));
    }
    for start in 0..=long.len() - n {
        best = best.max(indel_ratio(&short, &long[start..start + n]));
    }
    best
}

fn token_set(text: &str) -> BTreeSet<&str> {
    text.split_whitespace().collect()
}

fn sorted_tokens(text: &str) -> String {
    let mut tokens: Vec<&str> = text.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Word order and repeated words do not matter.
fn token_similarity(a: &str, b: &str) -> f64 {
    let sorted = similarity(&sorted_tokens(a), &sorted_tokens(b));

    let (ta, tb) = (token_set(a), token_set(b));
    let join = |words: Vec<&str>| words.join(" ");
    let common = join(ta.intersection(&tb).copied().collect());
    let only_a = join(ta.difference(&tb).copied().collect());
    let only_b = join(tb.difference(&ta).copied().collect());
    let with_common = |rest: &str| match (common.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (false, true) => common.clone(),
        (false, false) => format!("{} {}", common, rest),
    };
    let (common_a, common_b) = (with_common(&only_a), with_common(&only_b));

    let mut set = similarity(&common_a, &common_b);
    if !common.is_empty() {
        set = set
            .max(similarity(&common, &common_a))
            .max(similarity(&common, &common_b));
    }
    sorted.max(set)
}

fn partial_token_similarity(a: &str, b: &str) -> f64 {
    let (ta, tb) = (token_set(a), token_set(b));
    if ta.intersection(&tb).next().is_some() {
        return 100.0;
    }
    let join = |set: &BTreeSet<&str>| set.iter().copied().collect::<Vec<_>>().join(" ");
    partial_similarity(&join(&ta), &join(&tb))
}

/// Weighted similarity on a 0-100 scale.
///
/// Strings of similar length take the best of the plain and token-based
/// scores. When one is much longer, partial matches count too, scaled down
/// by how lopsided the lengths are.
pub fn weighted_similarity(a: &str, b: &str) -> f64 {
    const TOKEN_SCALE: f64 = 0.95;

    let (len_a, len_b) = (a.chars().count(), b.chars().count());
    if len_a == 0 || len_b == 0 {
        return 0.0;
    }
    let length_ratio = len_a.max(len_b) as f64 / len_a.min(len_b) as f64;
    let plain = similarity(a, b);

    if length_ratio < 1.5 {
        return plain.max(token_similarity(a, b) * TOKEN_SCALE);
    }

    let partial_scale = if length_ratio < 8.0 { 0.9 } else { 0.6 };
    plain
        .max(partial_similarity(a, b) * partial_scale)
        .max(partial_token_similarity(a, b) * TOKEN_SCALE * partial_scale)
}

pub struct ReplyResolver {
    threshold: f64,
}

impl ReplyResolver {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn resolve(&self, reply: &str, templates: &[CategoryTemplate]) -> Resolution {
        let response = normalize(reply);
        if response.is_empty() {
            return Resolution::NoMatch;
        }

        let named: Vec<(String, &CategoryTemplate)> = templates
            .iter()
            .map(|t| (normalize(&t.text), t))
            .filter(|(name, _)| !name.is_empty())
            .collect();

        if let Some((_, template)) = named.iter().find(|(name, _)| *name == response) {
            return Resolution::Matched {
                template: (*template).clone(),
                kind: MatchKind::Exact,
            };
        }

        let best = named
            .iter()
            .map(|(name, template)| (weighted_similarity(name, &response), *template))
            .fold(None::<(f64, &CategoryTemplate)>, |best, candidate| match best {
                Some(b) if b.0 >= candidate.0 => Some(b),
                _ => Some(candidate),
            });
        if let Some((score, template)) = best {
            if score >= self.threshold {
                return Resolution::Matched {
                    template: template.clone(),
                    kind: MatchKind::Fuzzy { score },
                };
            }
        }

        if let Some((_, template)) = named.iter().find(|(name, _)| response.contains(name.as_str()))
        {
            return Resolution::Matched {
                template: (*template).clone(),
                kind: MatchKind::Contained,
            };
        }

        Resolution::NoMatch
    }
}
