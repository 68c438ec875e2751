//! Feature route surface: thin handlers orchestrating the resolver, the
//! cached aggregator, and the transactional write helper.

pub mod admin;
pub mod auth;
pub mod documents;
pub mod projects;
pub mod search;
pub mod system;
pub mod tasks;
pub mod teams;
pub mod workspaces;

/// Lowercase a display name into a slug fragment.
pub(crate) fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let trimmed = slug.trim_end_matches('-').to_string();
    if trimmed.is_empty() {
        "workspace".to_string()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("A"), "a");
        assert_eq!(slugify("Design Team 2"), "design-team-2");
        assert_eq!(slugify("  ~~ "), "workspace");
        assert_eq!(slugify("Ünicode Name"), "nicode-name");
    }
}
