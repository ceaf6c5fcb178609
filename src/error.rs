//LICENSE Portions Copyright 2019-2021 ZomboDB, LLC.
//LICENSE
//LICENSE Portions Copyright 2021-2023 Technology Concepts & Design, Inc.
//LICENSE
//LICENSE Portions Copyright 2023-2023 PgCentral Foundation, Inc. <contact@pgcentral.org>
//LICENSE
//LICENSE All rights reserved.
//LICENSE
//LICENSE Use of this source code is governed by the MIT license that can be found in the LICENSE file.
use pgrx::prelude::*;

/// Everything that can stop an audit write.
///
/// None of these are recoverable: the trigger raises them as `ERROR`, which aborts the
/// user's statement along with anything already written to the log table.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TableLogError {
    #[error("table_log: can't process STATEMENT events")]
    StatementLevel,
    #[error("table_log: must be fired after event")]
    NotAfter,
    #[error("table_log: too many arguments to trigger")]
    TooManyArguments,
    #[error("table_log: SPI_connect returned {0}")]
    SpiConnect(i32),
    #[error("table_log: could not read name and schema of the triggering relation")]
    TargetUnavailable,
    #[error("table_log: can this happen? (number columns < 1)")]
    NoLiveColumns,
    #[error("could not get number columns in relation: {0}")]
    LogRelationUnavailable(String),
    #[error("number colums in relation {table}({table_columns}) does not match columns in {log_table}({log_columns})")]
    ColumnCountMismatch { table: String, table_columns: usize, log_table: String, log_columns: usize },
    #[error("could not insert log information into relation {relation} (error: {status})")]
    InsertFailed { relation: String, status: i32 },
    #[error("table_log: audit statement for relation {0} contains a NUL byte")]
    NulInStatement(String),
    #[error("trigger fired by unknown event")]
    UnknownEvent,
}

impl TableLogError {
    pub fn sql_error_code(&self) -> PgSqlErrorCode {
        use TableLogError::*;
        match self {
            StatementLevel | NotAfter | TooManyArguments | UnknownEvent => {
                PgSqlErrorCode::ERRCODE_E_R_I_E_TRIGGER_PROTOCOL_VIOLATED
            }
            NulInStatement(_) => PgSqlErrorCode::ERRCODE_CHARACTER_NOT_IN_REPERTOIRE,
            LogRelationUnavailable(_) => PgSqlErrorCode::ERRCODE_UNDEFINED_TABLE,
            ColumnCountMismatch { .. } => PgSqlErrorCode::ERRCODE_INVALID_TABLE_DEFINITION,
            SpiConnect(_) | TargetUnavailable | NoLiveColumns | InsertFailed { .. } => {
                PgSqlErrorCode::ERRCODE_INTERNAL_ERROR
            }
        }
    }

    /// Raise this error as a Postgres `ERROR`, aborting the current transaction
    pub fn report(self) -> ! {
        ereport!(ERROR, self.sql_error_code(), self.to_string());
    }
}

/// A server-encoded name, made printable for an error message
pub fn lossy(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}
