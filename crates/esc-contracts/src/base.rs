//! Base contract system

use esc_core::error::ValidationErrors;
use validator::ValidationErrorsKind;

/// Result of contract validation
pub type ValidationResult = Result<(), ValidationErrors>;

/// Base contract trait
pub trait Contract<T>: Send + Sync {
    /// Validate the input
    fn validate(&self, input: &T) -> ValidationResult;
}

/// Copy `validator` derive errors into our collection, flattening nested
/// structs (`milestones[1].title`)
pub fn merge_validator_errors(
    errors: &mut ValidationErrors,
    prefix: &str,
    source: &validator::ValidationErrors,
) {
    for (field, kind) in source.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        };

        match kind {
            ValidationErrorsKind::Field(list) => {
                for error in list {
                    let message = error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("is invalid ({})", error.code));
                    errors.add(path.clone(), message);
                }
            }
            ValidationErrorsKind::Struct(inner) => merge_validator_errors(errors, &path, inner),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    merge_validator_errors(errors, &format!("{}[{}]", path, index), inner);
                }
            }
        }
    }
}

/// Blank means empty after trimming
pub fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Inner {
        #[validate(length(min = 1, message = "can't be blank"))]
        name: String,
    }

    #[derive(Validate)]
    struct Outer {
        #[validate(length(max = 3))]
        code: String,
        #[validate]
        items: Vec<Inner>,
    }

    #[test]
    fn test_merge_flattens_nested_paths() {
        let outer = Outer {
            code: "TOOLONG".to_string(),
            items: vec![
                Inner { name: "ok".to_string() },
                Inner { name: String::new() },
            ],
        };
        let source = outer.validate().unwrap_err();

        let mut errors = ValidationErrors::new();
        merge_validator_errors(&mut errors, "", &source);

        assert!(errors.has_error("code"));
        assert_eq!(
            errors.get("items[1].name"),
            Some(&vec!["can't be blank".to_string()])
        );
        assert!(!errors.has_error("items[0].name"));
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank("   "));
        assert!(!is_blank(" x "));
    }
}
