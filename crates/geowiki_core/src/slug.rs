use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Characters that never survive into a page slug.
const PAGE_SLUG_DROPPED: &[char] = &['#', '?', '%', '<', '>', '[', ']', '{', '}', '|', '"', '\\'];

pub const TEMPLATES_SLUG: &str = "templates";
pub const TEMPLATE_PREFIX: &str = "templates/";
pub const TEMPLATE_NAME_PREFIX: &str = "Templates/";
pub const FRONT_PAGE_SLUG: &str = "front page";

/// Normalize a page name into its region-unique slug.
///
/// Case and diacritics are folded, underscores read as spaces and whitespace runs collapse to a
/// single space. `/` is kept so namespaced pages such as `templates/foo` stay addressable.
pub fn page_slug(name: &str) -> String {
    let folded = fold(name);
    let mut output = String::with_capacity(folded.len());
    let mut pending_space = false;
    for ch in folded.chars() {
        if ch == '_' || ch.is_whitespace() {
            pending_space = !output.is_empty();
            continue;
        }
        if PAGE_SLUG_DROPPED.contains(&ch) {
            continue;
        }
        if pending_space {
            output.push(' ');
            pending_space = false;
        }
        output.push(ch);
    }
    output
}

/// Normalize a tag name into its slug: folded, alphanumerics only.
pub fn tag_slug(name: &str) -> String {
    fold(name).chars().filter(|ch| ch.is_alphanumeric()).collect()
}

/// Slug as it appears in a page URL.
pub fn slug_to_url(slug: &str) -> String {
    slug.replace(' ', "_")
}

pub fn is_template_slug(slug: &str) -> bool {
    slug == TEMPLATES_SLUG || slug.starts_with(TEMPLATE_PREFIX)
}

/// `Templates/Shelter` → `Shelter`.
pub fn template_short_name(page_name: &str) -> &str {
    page_name
        .strip_prefix(TEMPLATE_NAME_PREFIX)
        .unwrap_or(page_name)
}

fn fold(value: &str) -> String {
    value
        .nfkd()
        .filter(|ch| !is_combining_mark(*ch))
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_slug_folds_case_diacritics_and_whitespace() {
        assert_eq!(page_slug("  Café   de_la  Paix "), "cafe de la paix");
        assert_eq!(page_slug("Templates/Shelter"), "templates/shelter");
        assert_eq!(page_slug("What? #1"), "what 1");
    }

    #[test]
    fn page_slug_keeps_cjk_names() {
        assert_eq!(page_slug("室內避難收容所"), "室內避難收容所");
    }

    #[test]
    fn tag_slug_drops_spaces_and_punctuation() {
        assert_eq!(tag_slug("Supervisorial District"), "supervisorialdistrict");
        assert_eq!(tag_slug("Zip-Code"), "zipcode");
        assert_eq!(tag_slug("Écoles"), "ecoles");
    }

    #[test]
    fn template_slugs_are_recognized() {
        assert!(is_template_slug("templates"));
        assert!(is_template_slug("templates/foo"));
        assert!(!is_template_slug("templated shelter"));
        assert_eq!(template_short_name("Templates/社區"), "社區");
        assert_eq!(template_short_name("Plain"), "Plain");
    }
}
