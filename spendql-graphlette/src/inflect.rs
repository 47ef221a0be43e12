//! GraphQL names derived from SQL identifiers.

fn words(ident: &str) -> impl Iterator<Item = &str> {
    ident
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// `spend_item` → `SpendItem`
pub fn pascal(ident: &str) -> String {
    words(ident).map(capitalize).collect()
}

/// `category_id` → `categoryId`
pub fn camel(ident: &str) -> String {
    let p = pascal(ident);
    let mut chars = p.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// `category_id` → `CATEGORY_ID`
pub fn constant(ident: &str) -> String {
    words(ident)
        .map(str::to_ascii_uppercase)
        .collect::<Vec<_>>()
        .join("_")
}

pub fn pluralize(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    if let Some(stem) = word.strip_suffix('y') {
        let before = stem.chars().last().map(|c| c.to_ascii_lowercase());
        if !matches!(before, Some('a' | 'e' | 'i' | 'o' | 'u') | None) {
            return format!("{stem}ies");
        }
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        return format!("{word}es");
    }
    format!("{word}s")
}

/// `["category_id"]` → `ByCategoryId`; several columns are joined with `And`.
pub fn by_columns(columns: &[String]) -> String {
    let joined = columns
        .iter()
        .map(|c| pascal(c))
        .collect::<Vec<_>>()
        .join("And");
    format!("By{joined}")
}
