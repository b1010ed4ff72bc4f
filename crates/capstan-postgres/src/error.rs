//! Mapping `sqlx::Error` to the core's [`CapstanError`] taxonomy at the
//! trait-impl boundary (§7 "Rust error shape"), so `sqlx::Error` never
//! leaks past this crate.

use capstan_core::CapstanError;

/// Postgres error code for `undefined_table` (the jobs/peers table is
/// absent, §7 `MissingSchemaError`).
const UNDEFINED_TABLE: &str = "42P01";

pub fn map_sqlx_error(err: sqlx::Error) -> CapstanError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some(UNDEFINED_TABLE) {
            return CapstanError::MissingSchemaError(db_err.message().to_string());
        }
    }
    CapstanError::TransientStorageError(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_transient() {
        let err = map_sqlx_error(sqlx::Error::RowNotFound);
        assert!(matches!(err, CapstanError::TransientStorageError(_)));
    }
}
