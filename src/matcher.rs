//! Release scoring for catalog items.
//!
//! Pure functions only: given a book, a candidate release title and the
//! configured formats, produce a relevance score or reject the candidate
//! outright. All persistence and ranking across candidates happens in the
//! search aggregator.

use std::collections::HashSet;

use crate::db::{DbBook, DbFormat};

/// Minimum total score for a candidate to survive
pub const ACCEPT_THRESHOLD: f64 = 0.45;

const AUTHOR_PRESENCE_WEIGHT: f64 = 0.25;
const TITLE_SIMILARITY_WEIGHT: f64 = 0.5;
const ISBN_BONUS: f64 = 0.35;
const FORMAT_BONUS: f64 = 0.3;

// Titles carrying any of these are audio/video rips or comic archives,
// not the text formats this pipeline acquires
const FOREIGN_MEDIA_MARKERS: &[&str] = &[
    "audiobook", "mp3", "m4b", "m4a", "flac", "aac", "ogg", "wav", "cbr", "cbz", "mkv", "mp4",
    "avi", "webm", "x264", "x265", "hevc", "bluray", "webrip",
];

/// Score one candidate against a book, or reject it (None).
///
/// Terms, summed then rounded to 2 decimals:
/// 1. rejection on foreign-media markers in the title
/// 2. fixed weight when the book has a known author
/// 3. token overlap between normalized titles
/// 4. fixed bonus when an ISBN-like digit run in the title matches the book
/// 5. format bonus scaled inversely by the format's priority
pub fn score_release(book: &DbBook, release_title: &str, formats: &[DbFormat]) -> Option<f64> {
    let release_tokens = normalize_tokens(release_title);
    if has_foreign_media_marker(&release_tokens) {
        return None;
    }

    let mut score = 0.0;

    let authors = book.authors().unwrap_or_default();
    if !authors.is_empty() {
        score += AUTHOR_PRESENCE_WEIGHT;
    }

    score += title_similarity(&book.title, &release_tokens) * TITLE_SIMILARITY_WEIGHT;

    if isbn_matches(book, release_title) {
        score += ISBN_BONUS;
    }

    score += format_bonus(&release_tokens, formats);

    let score = round2(score);
    if score < ACCEPT_THRESHOLD {
        None
    } else {
        Some(score)
    }
}

/// Lowercase, fold diacritics, split on everything non-alphanumeric
pub fn normalize_tokens(text: &str) -> Vec<String> {
    let folded: String = text
        .to_lowercase()
        .chars()
        .map(fold_diacritic)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    folded.split_whitespace().map(str::to_string).collect()
}

fn fold_diacritic(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'ø' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        'ñ' => 'n',
        'ç' => 'c',
        other => other,
    }
}

fn has_foreign_media_marker(tokens: &[String]) -> bool {
    tokens.iter().any(|token| {
        FOREIGN_MEDIA_MARKERS
            .iter()
            .any(|marker| token == marker || token.trim_end_matches('s') == *marker)
    })
}

/// Share of the book's title tokens present in the release title
fn title_similarity(book_title: &str, release_tokens: &[String]) -> f64 {
    let book_tokens = normalize_tokens(book_title);
    if book_tokens.is_empty() {
        return 0.0;
    }

    let release_set: HashSet<&str> = release_tokens.iter().map(String::as_str).collect();
    let matched = book_tokens
        .iter()
        .filter(|t| release_set.contains(t.as_str()))
        .count();

    matched as f64 / book_tokens.len() as f64
}

fn isbn_matches(book: &DbBook, release_title: &str) -> bool {
    let known: Vec<String> = book
        .isbns()
        .unwrap_or_default()
        .iter()
        .map(|isbn| normalize_isbn(isbn))
        .filter(|isbn| !isbn.is_empty())
        .collect();
    if known.is_empty() {
        return false;
    }

    extract_isbn_candidates(release_title)
        .iter()
        .any(|candidate| known.iter().any(|isbn| isbn == candidate))
}

fn normalize_isbn(isbn: &str) -> String {
    isbn.chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Contiguous 10/13-digit runs in the title (an ISBN-10 may end in 'x')
fn extract_isbn_candidates(title: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    let mut run = String::new();

    for c in title.to_lowercase().chars() {
        if c.is_ascii_digit() {
            run.push(c);
        } else if c == 'x' && run.len() == 9 {
            run.push(c);
            flush_isbn_run(&mut candidates, &mut run);
        } else {
            flush_isbn_run(&mut candidates, &mut run);
        }
    }
    flush_isbn_run(&mut candidates, &mut run);

    candidates
}

fn flush_isbn_run(out: &mut Vec<String>, run: &mut String) {
    if run.len() == 10 || run.len() == 13 {
        out.push(run.clone());
    }
    run.clear();
}

/// Best bonus over all configured formats found in the title. Priority 1
/// earns the full bonus, priority 2 half, and so on.
fn format_bonus(release_tokens: &[String], formats: &[DbFormat]) -> f64 {
    formats
        .iter()
        .filter(|f| f.enabled)
        .filter(|f| release_tokens.iter().any(|t| t == &f.extension))
        .map(|f| FORMAT_BONUS / f.priority.max(1) as f64)
        .fold(0.0, f64::max)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(title: &str, authors: &[&str], isbns: &[&str]) -> DbBook {
        DbBook::new(
            "test-id",
            title,
            &authors.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
            &isbns.iter().map(|i| i.to_string()).collect::<Vec<_>>(),
        )
        .expect("serialize book")
    }

    fn epub_format() -> DbFormat {
        DbFormat::new("EPUB", "epub", "ebooks", 1)
    }

    #[test]
    fn test_rejects_audio_and_video_markers() {
        let dune = book("Dune", &["Frank Herbert"], &[]);
        let formats = [epub_format()];

        assert_eq!(
            score_release(&dune, "Dune - Frank Herbert Audiobook", &formats),
            None
        );
        assert_eq!(score_release(&dune, "Dune Frank Herbert MP3", &formats), None);
        assert_eq!(
            score_release(&dune, "Dune 1984 1080p BluRay x264", &formats),
            None
        );
        assert_eq!(score_release(&dune, "Dune Vol 1 CBZ", &formats), None);
        // Plural marker still rejects
        assert_eq!(
            score_release(&dune, "Dune - Complete Audiobooks", &formats),
            None
        );
    }

    #[test]
    fn test_isbn_match_strictly_increases_score() {
        let dune = book("Dune", &["Frank Herbert"], &["978-0-441-17271-9"]);
        let formats = [epub_format()];

        let without = score_release(&dune, "Dune - Frank Herbert EPUB", &formats)
            .expect("accepted without isbn");
        let with = score_release(&dune, "Dune - Frank Herbert 9780441172719 EPUB", &formats)
            .expect("accepted with isbn");

        assert!(with > without);
        assert!((with - without - ISBN_BONUS).abs() < 0.011);
    }

    #[test]
    fn test_isbn10_with_check_digit_x() {
        let b = book("Example", &["Author"], &["043942089X"]);
        let formats = [epub_format()];

        let with = score_release(&b, "Example 043942089X epub", &formats).unwrap();
        let without = score_release(&b, "Example epub", &formats).unwrap();
        assert!(with > without);
    }

    #[test]
    fn test_title_overlap_drives_score() {
        let b = book("The Left Hand of Darkness", &["Ursula K. Le Guin"], &[]);
        let formats = [epub_format()];

        let exact = score_release(&b, "The Left Hand of Darkness EPUB", &formats).unwrap();
        let partial = score_release(&b, "The Left Hand EPUB retail", &formats).unwrap();
        assert!(exact > partial);
    }

    #[test]
    fn test_diacritics_folded_for_matching() {
        let b = book("Père Goriot", &["Honoré de Balzac"], &[]);
        let formats = [epub_format()];

        let plain = score_release(&b, "Pere Goriot epub", &formats).unwrap();
        let accented = score_release(&b, "Père Goriot epub", &formats).unwrap();
        assert!((plain - accented).abs() < f64::EPSILON);
    }

    #[test]
    fn test_format_priority_scales_bonus() {
        let b = book("Dune", &["Frank Herbert"], &[]);
        let epub = DbFormat::new("EPUB", "epub", "ebooks", 1);
        let mobi = DbFormat::new("MOBI", "mobi", "ebooks", 2);
        let formats = [epub, mobi];

        let preferred = score_release(&b, "Dune Frank Herbert epub", &formats).unwrap();
        let fallback = score_release(&b, "Dune Frank Herbert mobi", &formats).unwrap();
        assert!(preferred > fallback);
    }

    #[test]
    fn test_low_overlap_rejected_by_threshold() {
        let b = book("A Very Specific Long Title Here", &[], &[]);
        let result = score_release(&b, "Completely unrelated thing", &[]);
        assert_eq!(result, None);
    }

    #[test]
    fn test_scores_rounded_to_two_decimals() {
        let b = book("One Two Three", &["Someone"], &[]);
        let score = score_release(&b, "One Two epub retail", &[]).unwrap_or_default();
        assert_eq!(score, round2(score));
    }
}
