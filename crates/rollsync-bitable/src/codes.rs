/// Operator-facing classification of bitable response codes. Purely
/// diagnostic: callers never branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    FieldMismatch,
    FieldConversion,
    PermissionDenied,
    TableNotFound,
    BatchTooLarge,
    WriteConflict,
    InvalidToken,
    RateLimited,
    Transport,
    Unknown,
}

impl ErrorCategory {
    pub fn from_code(code: i64) -> Self {
        match code {
            1254045 | 1254009 => Self::FieldMismatch,
            1254060..=1254068 => Self::FieldConversion,
            1254302 | 1254303 | 91403 => Self::PermissionDenied,
            1254004 | 1254041 => Self::TableNotFound,
            1254104 => Self::BatchTooLarge,
            1254291 => Self::WriteConflict,
            99991661 | 99991663 | 99991668 => Self::InvalidToken,
            1254290 | 99991400 => Self::RateLimited,
            _ => Self::Unknown,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::FieldMismatch => "field/column mismatch: a source column has no matching table field",
            Self::FieldConversion => "field value conversion failed: value type does not fit the table field",
            Self::PermissionDenied => {
                "permission denied: write target may be a system-managed field"
            }
            Self::TableNotFound => "table not found: check the table id and app token",
            Self::BatchTooLarge => "batch too large for one call",
            Self::WriteConflict => "write conflict on the table",
            Self::InvalidToken => "tenant access token invalid or expired",
            Self::RateLimited => "rate limited by the bitable service",
            Self::Transport => "request did not complete",
            Self::Unknown => "unclassified remote error",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCategory;

    #[test]
    fn known_codes_map_to_named_categories() {
        assert_eq!(ErrorCategory::from_code(1254045), ErrorCategory::FieldMismatch);
        assert_eq!(ErrorCategory::from_code(1254064), ErrorCategory::FieldConversion);
        assert_eq!(ErrorCategory::from_code(1254302), ErrorCategory::PermissionDenied);
        assert_eq!(ErrorCategory::from_code(99991663), ErrorCategory::InvalidToken);
        assert_eq!(ErrorCategory::from_code(42), ErrorCategory::Unknown);
    }

    #[test]
    fn permission_denied_mentions_system_managed_fields() {
        assert!(ErrorCategory::PermissionDenied
            .to_string()
            .contains("system-managed field"));
    }
}
