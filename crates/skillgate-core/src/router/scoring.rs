//! Heuristic relevance signals.
//!
//! `keyword_score` is the fraction of distinct query terms found among the
//! skill's id, name, description and tag terms. `semantic_score` is the
//! Dice coefficient over character trigrams of the normalized texts, a
//! cheap fuzzy signal that still rewards near-miss spellings and stems.

use std::collections::BTreeSet;

use skillgate_types::skill::SkillDescriptor;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "for", "from", "i", "in", "is", "it",
    "me", "my", "of", "on", "or", "please", "the", "then", "this", "to", "with",
];

/// Lowercased alphanumeric terms with stopwords removed and a trailing
/// plural `s` stripped.
pub fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .map(|t| stem(&t))
        .collect()
}

fn stem(term: &str) -> String {
    if term.len() > 3 && term.ends_with('s') && !term.ends_with("ss") {
        term[..term.len() - 1].to_string()
    } else {
        term.to_string()
    }
}

/// Every searchable term of a descriptor.
pub fn skill_terms(skill: &SkillDescriptor) -> BTreeSet<String> {
    let mut out = terms(skill.id.as_str());
    out.extend(terms(&skill.name));
    out.extend(terms(&skill.description));
    for tag in &skill.tags {
        out.extend(terms(tag));
    }
    out
}

pub fn keyword_score(query_terms: &BTreeSet<String>, skill_terms: &BTreeSet<String>) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let hits = query_terms.intersection(skill_terms).count();
    hits as f64 / query_terms.len() as f64
}

fn trigrams(text: &str) -> BTreeSet<[char; 3]> {
    let mut out = BTreeSet::new();
    for word in text.split_whitespace() {
        let padded: Vec<char> = std::iter::once(' ')
            .chain(word.chars())
            .chain(std::iter::once(' '))
            .collect();
        for window in padded.windows(3) {
            out.insert([window[0], window[1], window[2]]);
        }
    }
    out
}

fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect()
}

pub fn semantic_score(query: &str, skill: &SkillDescriptor) -> f64 {
    let query = trigrams(&normalize(query));
    if query.is_empty() {
        return 0.0;
    }
    let mut document = String::new();
    document.push_str(skill.display_name());
    document.push(' ');
    document.push_str(&skill.description);
    for tag in &skill.tags {
        document.push(' ');
        document.push_str(tag);
    }
    let document = trigrams(&normalize(&document));
    if document.is_empty() {
        return 0.0;
    }
    let shared = query.intersection(&document).count();
    (2 * shared) as f64 / (query.len() + document.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillgate_types::skill::SkillId;

    fn flights() -> SkillDescriptor {
        SkillDescriptor::new(
            SkillId::parse("travel/search_flights").unwrap(),
            "travel:search",
        )
        .with_description("Find flights")
        .with_tags(["travel"])
    }

    #[test]
    fn test_terms_drop_stopwords_and_plurals() {
        let t = terms("Find the Flights to Berlin");
        assert!(t.contains("find"));
        assert!(t.contains("flight"));
        assert!(t.contains("berlin"));
        assert!(!t.contains("the"));
        assert!(!t.contains("to"));
    }

    #[test]
    fn test_keyword_score_fraction_of_query() {
        let skill = skill_terms(&flights());
        assert_eq!(keyword_score(&terms("find flights"), &skill), 1.0);
        assert_eq!(keyword_score(&terms("find hotels"), &skill), 0.5);
        assert_eq!(keyword_score(&terms("convert money"), &skill), 0.0);
        assert_eq!(keyword_score(&terms(""), &skill), 0.0);
    }

    #[test]
    fn test_semantic_score_prefers_related_text() {
        let skill = flights();
        let close = semantic_score("search flight", &skill);
        let far = semantic_score("convert currency", &skill);
        assert!(close > far);
        assert!(close > 0.0 && close <= 1.0);
    }
}
