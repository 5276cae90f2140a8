//! Type name inflection
//!
//! Entity type names map to three derived names:
//!
//! | type name   | [`type_key`] / URL path | [`event_name`] |
//! |-------------|-------------------------|----------------|
//! | `widget`    | `widgets`               | `widget`       |
//! | `blog-post` | `blogPosts`             | `blogpost`     |
//! | `category`  | `categories`            | `category`     |

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
];

const UNCOUNTABLE: &[&str] = &["equipment", "information", "news", "series", "species", "sheep"];

/// Convert `dasherized`, `under_scored` or `spaced words` to `lowerCamelCase`
pub fn camelize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if matches!(ch, '-' | '_' | ' ') {
            upper_next = !out.is_empty();
            continue;
        }
        if out.is_empty() {
            out.extend(ch.to_lowercase());
        } else if upper_next {
            out.extend(ch.to_uppercase());
        } else {
            out.push(ch);
        }
        upper_next = false;
    }
    out
}

fn is_vowel(ch: char) -> bool {
    matches!(ch.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u')
}

/// Split a camelCase word into everything before its last hump and the
/// last hump itself, so that `blogPerson` pluralizes as `blogPeople`.
fn split_last_word(word: &str) -> (&str, &str) {
    match word.rfind(|c: char| c.is_uppercase()) {
        Some(idx) if idx > 0 => word.split_at(idx),
        _ => ("", word),
    }
}

/// English plural of a single word
pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }

    let (head, last) = split_last_word(word);
    let lower = last.to_lowercase();

    if UNCOUNTABLE.contains(&lower.as_str()) {
        return word.to_string();
    }

    if let Some((_, plural)) = IRREGULAR.iter().find(|(singular, _)| *singular == lower) {
        let mut out = String::from(head);
        let mut chars = plural.chars();
        if let Some(first) = chars.next() {
            if last.starts_with(|c: char| c.is_uppercase()) {
                out.extend(first.to_uppercase());
            } else {
                out.push(first);
            }
            out.push_str(chars.as_str());
        }
        return out;
    }

    let mut chars = lower.chars().rev();
    let last_char = chars.next();
    let before_last = chars.next();

    match (before_last, last_char) {
        (Some(prev), Some('y')) if !is_vowel(prev) => format!("{}ies", &word[..word.len() - 1]),
        (_, Some('s' | 'x' | 'z')) => format!("{}es", word),
        (Some('c' | 's'), Some('h')) => format!("{}es", word),
        _ => format!("{}s", word),
    }
}

/// Bucket key and URL path segment for an entity type
pub fn type_key(entity_type: &str) -> String {
    pluralize(&camelize(entity_type))
}

/// Name of the socket event the server emits for an entity type
pub fn event_name(entity_type: &str) -> String {
    camelize(entity_type).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camelize() {
        assert_eq!(camelize("widget"), "widget");
        assert_eq!(camelize("blog-post"), "blogPost");
        assert_eq!(camelize("blog_post_comment"), "blogPostComment");
        assert_eq!(camelize("Widget"), "widget");
        assert_eq!(camelize("-leading"), "leading");
    }

    #[test]
    fn test_pluralize_regular() {
        assert_eq!(pluralize("widget"), "widgets");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("status"), "statuses");
        assert_eq!(pluralize("match"), "matches");
        assert_eq!(pluralize("wish"), "wishes");
        assert_eq!(pluralize("blogPost"), "blogPosts");
    }

    #[test]
    fn test_pluralize_irregular() {
        assert_eq!(pluralize("person"), "people");
        assert_eq!(pluralize("blogPerson"), "blogPeople");
        assert_eq!(pluralize("news"), "news");
        assert_eq!(pluralize(""), "");
    }

    #[test]
    fn test_type_key_and_event_name() {
        assert_eq!(type_key("widget"), "widgets");
        assert_eq!(type_key("blog-post"), "blogPosts");
        assert_eq!(event_name("blog-post"), "blogpost");
        assert_eq!(event_name("widget"), "widget");
    }
}
