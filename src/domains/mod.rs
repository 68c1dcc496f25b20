// Per-app schemas built on the generic store
//
// Each module defines its typed records, its document (storage key,
// expected collections, seed, relation policies), the checks and guards
// its mutations go through, and the derived views its screens show.

pub mod budget;
pub mod college;
pub mod grocery;
pub mod healthcare;
pub mod library;

use crate::error::ValidationError;

/// Tidy a free-text name and reject it when blank
pub(crate) fn required(field: &str, value: &str) -> Result<String, ValidationError> {
    let tidy = crate::views::tidy_name(value);
    if tidy.is_empty() {
        return Err(ValidationError::Required(field.to_string()));
    }
    Ok(tidy)
}

/// Today's date as `YYYY-MM-DD`
pub(crate) fn today_iso() -> String {
    chrono::Local::now().date_naive().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_tidies() {
        assert_eq!(required("name", "  Ada   Lovelace ").unwrap(), "Ada Lovelace");
        assert_eq!(
            required("name", "   ").unwrap_err(),
            ValidationError::Required("name".to_string())
        );
    }

    #[test]
    fn test_today_iso_shape() {
        let today = today_iso();
        assert_eq!(today.len(), 10);
        assert_eq!(&today[4..5], "-");
    }
}
