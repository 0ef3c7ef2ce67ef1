//! Query plan construction.
//!
//! A plan is an ordered list of query strings tried strict-first. The
//! strict tier pairs the title with the primary author and excludes
//! formats this pipeline never wants; the relaxed tier falls back to a
//! loosened title alone for books whose exact metadata finds nothing.

use regex::Regex;

use crate::db::DbBook;

// Indexer-side exclusions for the strict tier. "-part" keeps multi-part
// rar/split uploads out of the first pass.
const NEGATIVE_QUERY_TERMS: &[&str] = &["-audiobook", "-mp3", "-m4b", "-part"];

/// Ordered query strings for one book, strict tier first
pub fn build_query_plan(book: &DbBook) -> Vec<String> {
    let authors = book.authors().unwrap_or_default();
    let primary_author = authors
        .first()
        .map(|a| clean_term(a))
        .unwrap_or_default();

    let strict_title = clean_term(&book.title);
    let mut strict_parts: Vec<&str> = Vec::new();
    if !strict_title.is_empty() {
        strict_parts.push(&strict_title);
    }
    if !primary_author.is_empty() {
        strict_parts.push(&primary_author);
    }
    let negatives = NEGATIVE_QUERY_TERMS.join(" ");
    strict_parts.push(&negatives);
    let strict = strict_parts.join(" ");

    let relaxed = loosen_title(&book.title);

    let mut plan = vec![strict];
    if !relaxed.is_empty() && !plan.contains(&relaxed) {
        plan.push(relaxed);
    }
    plan
}

/// Drop punctuation, collapse whitespace
fn clean_term(text: &str) -> String {
    let stripped = Regex::new(r"[^\w\s]").unwrap().replace_all(text, " ");
    Regex::new(r"\s+")
        .unwrap()
        .replace_all(stripped.trim(), " ")
        .to_string()
}

/// Relaxed form of a title: parentheticals and subtitles removed
fn loosen_title(title: &str) -> String {
    let no_parens = Regex::new(r"\([^)]*\)").unwrap().replace_all(title, " ");
    let before_subtitle = no_parens.split(':').next().unwrap_or("");
    clean_term(before_subtitle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(title: &str, authors: &[&str]) -> DbBook {
        DbBook::new(
            "test",
            title,
            &authors.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
            &[],
        )
        .expect("serialize book")
    }

    #[test]
    fn test_strict_tier_has_author_and_negative_terms() {
        let plan = build_query_plan(&book("Dune", &["Frank Herbert"]));
        assert_eq!(plan.len(), 2);
        assert!(plan[0].contains("Dune"));
        assert!(plan[0].contains("Frank Herbert"));
        assert!(plan[0].contains("-part"));
        assert!(plan[0].contains("-audiobook"));
        assert_ne!(plan[0], plan[1]);
    }

    #[test]
    fn test_relaxed_tier_is_loosened_title_only() {
        let plan = build_query_plan(&book("Dune", &["Frank Herbert"]));
        assert_eq!(plan[1], "Dune");
    }

    #[test]
    fn test_subtitle_stripped_in_relaxed_tier() {
        let plan = build_query_plan(&book(
            "The Hobbit: There and Back Again",
            &["J. R. R. Tolkien"],
        ));
        assert_eq!(plan[1], "The Hobbit");
    }

    #[test]
    fn test_parenthetical_stripped_in_relaxed_tier() {
        let plan = build_query_plan(&book("Dune (Dune Chronicles Book 1)", &[]));
        assert_eq!(plan[1], "Dune");
    }

    #[test]
    fn test_no_author_still_builds_strict_query() {
        let plan = build_query_plan(&book("Anonymous Work", &[]));
        assert!(plan[0].starts_with("Anonymous Work"));
        assert!(plan[0].contains("-m4b"));
    }

    #[test]
    fn test_punctuation_collapsed() {
        let plan = build_query_plan(&book("Hail Mary!", &["A. Weir"]));
        assert!(plan[0].starts_with("Hail Mary A Weir"));
    }
}
