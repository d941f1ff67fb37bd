use crate::error::StorageError;

const MAX_NAME_BYTES: usize = 128;

/// Applies the upload name-safety rule: strip any character
/// outside `[A-Za-z0-9._-]`, reject names that start with `.` once stripped,
/// truncate to 128 bytes, and prefix with the batch ordinal so two files
/// named identically in one upload never collide on disk.
pub fn sanitize_name(raw: &str, ordinal: usize) -> Result<String, StorageError> {
    let filtered: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();

    if filtered.is_empty() || filtered.starts_with('.') {
        return Err(StorageError::BadName);
    }

    let mut truncated = filtered;
    if truncated.len() > MAX_NAME_BYTES {
        while !truncated.is_char_boundary(MAX_NAME_BYTES) {
            truncated.pop();
        }
        truncated.truncate(MAX_NAME_BYTES);
    }

    Ok(format!("{}-{}", ordinal, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_unsafe_characters() {
        let name = sanitize_name("inv oice/../../etc#1.pdf", 0).unwrap();
        assert!(!name.contains('/'));
        assert!(!name.contains(' '));
        assert!(!name.contains('#'));
    }

    #[test]
    fn rejects_names_starting_with_dot_after_stripping() {
        assert!(matches!(sanitize_name("../../etc/passwd", 0), Err(StorageError::BadName)));
        assert!(matches!(sanitize_name(".hidden", 0), Err(StorageError::BadName)));
    }

    #[test]
    fn rejects_empty_after_stripping() {
        assert!(matches!(sanitize_name("###", 0), Err(StorageError::BadName)));
    }

    #[test]
    fn prefixes_with_batch_ordinal() {
        let a = sanitize_name("invoice.pdf", 0).unwrap();
        let b = sanitize_name("invoice.pdf", 1).unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("0-"));
        assert!(b.starts_with("1-"));
    }

    #[test]
    fn truncates_to_128_bytes() {
        let long = "a".repeat(500);
        let name = sanitize_name(&long, 3).unwrap();
        assert!(name.len() <= MAX_NAME_BYTES + 2); // + "3-" prefix
    }
}
