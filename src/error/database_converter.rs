use diesel::result::{DatabaseErrorKind, Error as DieselError};

use crate::error::Error;

/// Utility for converting Diesel errors into the scheduler error taxonomy.
///
/// Unique violations become [`Error::Conflict`] and foreign key violations
/// become [`Error::InvalidForeignKey`], so the scheduler can treat both as
/// the ordinary outcome of concurrent workers racing on the same rows.
/// Delete statements use [`DatabaseErrorConverter::convert_delete`], which
/// classifies a foreign key violation as
/// [`Error::DeleteViolatesForeignKey`] instead.
pub struct DatabaseErrorConverter;

impl DatabaseErrorConverter {
    /// Converts a Diesel error raised by an insert, update, or select.
    ///
    /// # Arguments
    /// * `error` - The Diesel error to convert
    /// * `operation` - Description of the database operation that failed
    pub fn convert(error: DieselError, operation: &str) -> Error {
        match error {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                Error::Conflict {
                    message: info.message().to_string(),
                }
            }
            DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
                Error::InvalidForeignKey {
                    source: anyhow::Error::msg(info.message().to_string()),
                }
            }
            DieselError::NotFound => Error::NotFound {
                entity: "resource".to_string(),
                field: "id".to_string(),
                value: "unknown".to_string(),
            },
            other => Error::DatabaseError {
                operation: operation.to_string(),
                source: anyhow::Error::from(other),
            },
        }
    }

    /// Converts a Diesel error raised by a delete statement.
    pub fn convert_delete(error: DieselError, operation: &str) -> Error {
        match error {
            DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
                Error::DeleteViolatesForeignKey {
                    source: anyhow::Error::msg(info.message().to_string()),
                }
            }
            other => Self::convert(other, operation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    // Mock database error information for testing
    struct MockDatabaseErrorInfo {
        message: String,
    }

    impl diesel::result::DatabaseErrorInformation for MockDatabaseErrorInfo {
        fn message(&self) -> &str {
            &self.message
        }

        fn details(&self) -> Option<&str> {
            None
        }

        fn hint(&self) -> Option<&str> {
            None
        }

        fn table_name(&self) -> Option<&str> {
            None
        }

        fn column_name(&self) -> Option<&str> {
            None
        }

        fn constraint_name(&self) -> Option<&str> {
            None
        }

        fn statement_position(&self) -> Option<i32> {
            None
        }
    }

    fn db_error(kind: DatabaseErrorKind, message: &str) -> DieselError {
        DieselError::DatabaseError(
            kind,
            Box::new(MockDatabaseErrorInfo {
                message: message.to_string(),
            }),
        )
    }

    #[test]
    fn unique_violation_becomes_conflict() {
        let error = db_error(
            DatabaseErrorKind::UniqueViolation,
            "duplicate key value violates unique constraint \"trigger_pkey\"",
        );

        let result = DatabaseErrorConverter::convert(error, "insert trigger");
        assert!(result.is_conflict());
    }

    #[test]
    fn foreign_key_violation_becomes_invalid_foreign_key() {
        let error = db_error(
            DatabaseErrorKind::ForeignKeyViolation,
            "insert or update on table \"job_data\" violates foreign key constraint \"job_data_trigger_id_fkey\"",
        );

        let result = DatabaseErrorConverter::convert(error, "insert jobs");
        assert!(matches!(result, Error::InvalidForeignKey { .. }));
    }

    #[test]
    fn foreign_key_violation_on_delete_is_classified_separately() {
        let error = db_error(
            DatabaseErrorKind::ForeignKeyViolation,
            "update or delete on table \"trigger\" violates foreign key constraint \"job_data_trigger_id_fkey\"",
        );

        let result = DatabaseErrorConverter::convert_delete(error, "delete trigger");
        assert!(matches!(result, Error::DeleteViolatesForeignKey { .. }));
    }

    #[test]
    fn not_found_maps_to_not_found() {
        let result = DatabaseErrorConverter::convert(DieselError::NotFound, "find job");
        assert!(matches!(result, Error::NotFound { .. }));
    }

    #[test]
    fn other_errors_keep_the_operation_context() {
        let result =
            DatabaseErrorConverter::convert(DieselError::RollbackTransaction, "acquire jobs");

        match result {
            Error::DatabaseError { operation, .. } => assert_eq!(operation, "acquire jobs"),
            other => panic!("expected DatabaseError, got: {:?}", other),
        }
    }
}
