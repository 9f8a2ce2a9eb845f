//! Derivation of `normalized_id` slugs from human block names.

/// Slug used when a name has no usable characters.
const FALLBACK_SLUG: &str = "block";

/// Kebab-case slug: lowercase ASCII alphanumerics, every other run collapsed to a single `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// First of `base`, `base-2`, `base-3`, ... for which `taken` is false.
pub fn disambiguate(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    let mut n: u32 = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Search Latest  News!"), "search-latest-news");
        assert_eq!(slugify("  --Fetch__Data-- "), "fetch-data");
        assert_eq!(slugify("LLM v2"), "llm-v2");
    }

    #[test]
    fn slugify_empty_falls_back() {
        assert_eq!(slugify(""), "block");
        assert_eq!(slugify("!!!"), "block");
        assert_eq!(slugify("日本"), "block");
    }

    #[test]
    fn disambiguate_picks_first_free_suffix() {
        let taken = ["fetch", "fetch-2"];
        assert_eq!(disambiguate("fetch", |c| taken.contains(&c)), "fetch-3");
        assert_eq!(disambiguate("other", |c| taken.contains(&c)), "other");
    }
}
