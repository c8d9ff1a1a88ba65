/// Cleanup pass: post-processing applied once to the outermost rendering.
///
/// Runs line-break normalization, punctuation snapping, capitalization,
/// whitespace collapsing and indefinite-article correction, in that order.
use crate::schema::settings::CleanupSettings;

/// Punctuation that attaches to the preceding word.
const PUNCTUATION: &[char] = &[',', '.', ';', ':', '!', '?'];

/// Sentence-ending punctuation.
const SENTENCE_ENDERS: &[char] = &['.', '!', '?'];

/// Vowel-initial words pronounced with a leading consonant sound.
const CONSONANT_SOUND: &[&str] = &["once", "uni", "use", "usu", "uti", "eu", "ewe", "ubiq", "uk"];

/// Consonant-initial words pronounced with a leading vowel sound.
const VOWEL_SOUND: &[&str] = &["hour", "honest", "honor", "honour", "heir", "herb"];

/// The cleanup pass applied to rendered text before it is returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupPass {
    settings: CleanupSettings,
}

impl CleanupPass {
    pub fn new(settings: CleanupSettings) -> Self {
        Self { settings }
    }

    pub fn apply(&self, text: &str) -> String {
        let mut text = text.to_string();
        if self.settings.whitespace {
            text = normalize_line_breaks(&text);
        }
        if self.settings.punctuation {
            text = snap_punctuation(&text);
        }
        if self.settings.capitalization {
            text = correct_capitalization(&text);
        }
        if self.settings.whitespace {
            text = collapse_whitespace(&text);
        }
        if self.settings.articles {
            text = correct_articles(&text);
        }
        text
    }
}

/// CRLF and lone CR become LF; runs of blank lines shrink to one.
pub fn normalize_line_breaks(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len());
    let mut blank_run = 0;
    for (i, line) in unified.split('\n').enumerate() {
        if line.trim().is_empty() {
            blank_run += 1;
        } else {
            blank_run = 0;
        }
        if blank_run > 1 {
            continue;
        }
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line);
    }
    out
}

/// Remove horizontal whitespace before attaching punctuation.
pub fn snap_punctuation(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if PUNCTUATION.contains(&c) {
            let kept = out.trim_end_matches(|p| p == ' ' || p == '\t').len();
            out.truncate(kept);
        }
        out.push(c);
    }
    out
}

/// Upper-case the first letter of the text and of every sentence.
pub fn correct_capitalization(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut sentence_start = true;
    let mut after_ender = false;
    for c in text.chars() {
        if sentence_start && c.is_alphabetic() {
            out.extend(c.to_uppercase());
            sentence_start = false;
            after_ender = false;
            continue;
        }
        if SENTENCE_ENDERS.contains(&c) {
            after_ender = true;
        } else if c.is_whitespace() {
            if after_ender {
                sentence_start = true;
            }
        } else if !sentence_start || c.is_alphanumeric() {
            // Digits start a sentence without being capitalized.
            sentence_start = false;
            after_ender = false;
        }
        out.push(c);
    }
    out
}

/// Collapse runs of spaces, trim every line, drop leading and trailing blank
/// lines and end with exactly one line break.
pub fn collapse_whitespace(text: &str) -> String {
    let lines: Vec<String> = text
        .split('\n')
        .map(|line| {
            line.split(|c| c == ' ' || c == '\t')
                .filter(|w| !w.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();
    let first = lines.iter().position(|l| !l.is_empty());
    let last = lines.iter().rposition(|l| !l.is_empty());
    match (first, last) {
        (Some(first), Some(last)) => {
            let mut out = lines[first..=last].join("\n");
            out.push('\n');
            out
        }
        _ => "\n".to_string(),
    }
}

/// Fix `a`/`an` to agree with the sound of the following word.
pub fn correct_articles(text: &str) -> String {
    let words = word_spans(text);
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for pair in words.windows(2) {
        let (start, end) = pair[0];
        let (next_start, next_end) = pair[1];
        let gap = &text[end..next_start];
        if !gap.chars().all(char::is_whitespace) {
            continue;
        }
        let article = &text[start..end];
        let Some(replacement) = fix_article(article, &text[next_start..next_end]) else {
            continue;
        };
        out.push_str(&text[cursor..start]);
        out.push_str(&replacement);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Byte spans of alphanumeric words.
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        let in_word = c.is_alphanumeric() || c == '\'';
        match (in_word, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                spans.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

fn fix_article(article: &str, next: &str) -> Option<String> {
    let lower = article.to_lowercase();
    if lower != "a" && lower != "an" {
        return None;
    }
    let wants_an = starts_with_vowel_sound(next);
    if wants_an == (lower == "an") {
        return None;
    }
    let upper = article.starts_with(char::is_uppercase);
    let fixed = match (wants_an, upper) {
        (true, true) => "An",
        (true, false) => "an",
        (false, true) => "A",
        (false, false) => "a",
    };
    Some(fixed.to_string())
}

fn starts_with_vowel_sound(word: &str) -> bool {
    let lower = word.to_lowercase();
    if VOWEL_SOUND.iter().any(|w| lower.starts_with(w)) {
        return true;
    }
    if lower == "one" || CONSONANT_SOUND.iter().any(|w| lower.starts_with(w)) {
        return false;
    }
    lower.starts_with(|c: char| "aeiou".contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_breaks_are_normalized() {
        assert_eq!(normalize_line_breaks("a\r\nb\rc"), "a\nb\nc");
        assert_eq!(normalize_line_breaks("a\n\n\n\nb"), "a\n\nb");
        assert_eq!(normalize_line_breaks("a\n \n\t\nb"), "a\n \nb");
    }

    #[test]
    fn punctuation_snaps_to_word() {
        assert_eq!(snap_punctuation("hello , world !"), "hello, world!");
        assert_eq!(snap_punctuation("wait ..."), "wait...");
        assert_eq!(snap_punctuation("line\n, next"), "line\n, next");
    }

    #[test]
    fn sentences_are_capitalized() {
        assert_eq!(
            correct_capitalization("silent then. next one! and? yes"),
            "Silent then. Next one! And? Yes"
        );
        assert_eq!(correct_capitalization("pi is 3.14 exactly"), "Pi is 3.14 exactly");
        assert_eq!(correct_capitalization("  leading"), "  Leading");
        assert_eq!(correct_capitalization("one.\ntwo"), "One.\nTwo");
    }

    #[test]
    fn whitespace_collapses() {
        assert_eq!(collapse_whitespace("  a   b \n\n c\t\td  \n\n"), "a b\n\nc d\n");
        assert_eq!(collapse_whitespace(""), "\n");
        assert_eq!(collapse_whitespace("\n\n  \n"), "\n");
    }

    #[test]
    fn articles_agree_with_next_word() {
        assert_eq!(correct_articles("a apple and an pear"), "an apple and a pear");
        assert_eq!(correct_articles("A owl. An dog."), "An owl. A dog.");
        assert_eq!(
            correct_articles("a hour, a unicorn, an university"),
            "an hour, a unicorn, a university"
        );
        assert_eq!(correct_articles("plan a, then"), "plan a, then");
        assert_eq!(correct_articles("an"), "an");
    }

    #[test]
    fn full_pass_in_order() {
        let pass = CleanupPass::default();
        assert_eq!(
            pass.apply("silent  then referenced Alice"),
            "Silent then referenced Alice\n"
        );
        assert_eq!(
            pass.apply("\r\n\r\nthe end , a  ox .\r\n"),
            "The end, an ox.\n"
        );
    }

    #[test]
    fn disabled_passes_leave_text_alone() {
        let pass = CleanupPass::new(CleanupSettings {
            whitespace: false,
            punctuation: false,
            capitalization: false,
            articles: false,
        });
        assert_eq!(pass.apply("  a  apple ,\r\n"), "  a  apple ,\r\n");
    }
}
