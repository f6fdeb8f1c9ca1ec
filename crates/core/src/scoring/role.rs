//! Insider role classification.
//!
//! Titles are split into lowercase alphanumeric words and patterns match whole
//! word sequences, so "Director" never matches inside "Directorate" and
//! "President" is refused when the preceding word is "vice".

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleTier {
    Executive,
    Director,
    Officer,
    Other,
}

impl RoleTier {
    pub fn points(&self) -> u32 {
        match self {
            Self::Executive => 40,
            Self::Director => 25,
            Self::Officer => 15,
            Self::Other => 5,
        }
    }
}

struct RolePattern {
    words: &'static [&'static str],
    /// Words that, immediately before the match, disqualify it.
    not_after: &'static [&'static str],
    tier: RoleTier,
}

const fn pattern(words: &'static [&'static str], tier: RoleTier) -> RolePattern {
    RolePattern {
        words,
        not_after: &[],
        tier,
    }
}

// Ordered: first match wins.
const PATTERNS: &[RolePattern] = &[
    pattern(&["chief", "executive", "officer"], RoleTier::Executive),
    pattern(&["ceo"], RoleTier::Executive),
    RolePattern {
        words: &["president"],
        not_after: &["vice", "vp"],
        tier: RoleTier::Executive,
    },
    pattern(&["chairman"], RoleTier::Executive),
    pattern(&["chairwoman"], RoleTier::Executive),
    pattern(&["chairperson"], RoleTier::Executive),
    RolePattern {
        words: &["chair"],
        not_after: &["vice"],
        tier: RoleTier::Executive,
    },
    pattern(&["chief", "financial", "officer"], RoleTier::Executive),
    pattern(&["cfo"], RoleTier::Executive),
    pattern(&["chief", "operating", "officer"], RoleTier::Executive),
    pattern(&["coo"], RoleTier::Executive),
    pattern(&["director"], RoleTier::Director),
    pattern(&["board", "member"], RoleTier::Director),
    pattern(&["vice", "president"], RoleTier::Officer),
    pattern(&["vp"], RoleTier::Officer),
    pattern(&["svp"], RoleTier::Officer),
    pattern(&["evp"], RoleTier::Officer),
    pattern(&["officer"], RoleTier::Officer),
    pattern(&["chief"], RoleTier::Officer),
    pattern(&["general", "counsel"], RoleTier::Officer),
    pattern(&["treasurer"], RoleTier::Officer),
    pattern(&["secretary"], RoleTier::Officer),
    pattern(&["controller"], RoleTier::Officer),
];

pub fn classify_role(role: &str) -> RoleTier {
    let words = tokenize(role);
    PATTERNS
        .iter()
        .find(|p| matches_pattern(&words, p))
        .map(|p| p.tier)
        .unwrap_or(RoleTier::Other)
}

fn tokenize(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
        .collect()
}

fn matches_pattern(words: &[String], p: &RolePattern) -> bool {
    let n = p.words.len();
    if n == 0 || words.len() < n {
        return false;
    }
    (0..=words.len() - n).any(|start| {
        let hit = words[start..start + n]
            .iter()
            .zip(p.words)
            .all(|(w, pw)| w == pw);
        let blocked = start > 0 && p.not_after.iter().any(|w| *w == words[start - 1]);
        hit && !blocked
    })
}
