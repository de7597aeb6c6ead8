//! Identifier case conversion for link relation names.

/// Convert a single identifier from snake_case to camelCase.
/// e.g. "read_rating" -> "readRating", "add_authors" -> "addAuthors"
pub fn to_camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut capitalize_next = false;
    for c in s.chars() {
        if c == '_' {
            capitalize_next = !out.is_empty();
        } else if capitalize_next {
            out.extend(c.to_uppercase());
            capitalize_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_to_camel() {
        assert_eq!(to_camel_case("read_rating"), "readRating");
        assert_eq!(to_camel_case("create_bulk_import"), "createBulkImport");
        assert_eq!(to_camel_case("_private"), "private");
        assert_eq!(to_camel_case("self"), "self");
    }
}
