//LICENSE Portions Copyright 2019-2021 ZomboDB, LLC.
//LICENSE
//LICENSE Portions Copyright 2021-2023 Technology Concepts & Design, Inc.
//LICENSE
//LICENSE Portions Copyright 2023-2023 PgCentral Foundation, Inc. <contact@pgcentral.org>
//LICENSE
//LICENSE All rights reserved.
//LICENSE
//LICENSE Use of this source code is governed by the MIT license that can be found in the LICENSE file.
//! Building and running the `INSERT` that writes one audit row.
//!
//! Statements are assembled as text and run once through SPI, inside the transaction of
//! the DML that fired the trigger.
use core::fmt::{Display, Formatter};
use std::ffi::CString;
use std::fmt;

use crate::columns::{live_columns, ColumnLayout};
use crate::error::{lossy, TableLogError};
use crate::quote::{quote_ident, quote_literal, QuoteMode};

/// `SPI_OK_INSERT`, the only status an audit write may finish with
pub const SPI_OK_INSERT: i32 = pgrx::pg_sys::SPI_OK_INSERT as i32;

/// The DML that fired the trigger, as recorded in `trigger_mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeMode {
    Insert,
    Update,
    Delete,
}

/// Which image of the row an audit record holds, as recorded in `trigger_tuple`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TupleSide {
    Old,
    New,
}

/// Which `TriggerData` tuple pointer a job reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TupleSlot {
    /// `tg_trigtuple`
    Trig,
    /// `tg_newtuple`
    New,
}

impl ChangeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeMode::Insert => "INSERT",
            ChangeMode::Update => "UPDATE",
            ChangeMode::Delete => "DELETE",
        }
    }

    /// The audit rows one fire produces, in the order they must be written
    pub fn plan(&self) -> &'static [(TupleSide, TupleSlot)] {
        match self {
            ChangeMode::Insert => &[(TupleSide::New, TupleSlot::Trig)],
            ChangeMode::Update => {
                &[(TupleSide::Old, TupleSlot::Trig), (TupleSide::New, TupleSlot::New)]
            }
            ChangeMode::Delete => &[(TupleSide::Old, TupleSlot::Trig)],
        }
    }
}

impl TupleSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TupleSide::Old => "old",
            TupleSide::New => "new",
        }
    }
}

impl Display for ChangeMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Display for TupleSide {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where audit rows go and what the trailer looks like.
///
/// Names are kept as the server-encoded bytes they arrived as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTarget {
    pub schema: Vec<u8>,
    pub table: Vec<u8>,
    pub session_user: bool,
}

/// A row whose column values can be rendered as text
pub trait RowImage {
    /// Text form of attribute `attnum` (1-based), or `None` for SQL NULL
    fn text_value(&self, attnum: usize) -> Option<Vec<u8>>;
}

/// Something that can run an audit `INSERT`
pub trait AuditExecutor {
    /// Execute `statement` and return the raw SPI status code
    fn execute(&mut self, statement: &CString) -> i32;
}

/// An `INSERT` statement under construction
#[derive(Debug)]
pub struct InsertStatement {
    buf: Vec<u8>,
    mode: QuoteMode,
}

impl InsertStatement {
    pub fn new(mode: QuoteMode) -> Self {
        Self { buf: Vec::with_capacity(256), mode }
    }

    pub fn raw(&mut self, text: &str) -> &mut Self {
        self.buf.extend_from_slice(text.as_bytes());
        self
    }

    pub fn ident(&mut self, name: &[u8]) -> &mut Self {
        self.buf.extend(quote_ident(name, self.mode));
        self
    }

    /// An escape-string literal: `E'...'`
    pub fn literal(&mut self, value: &[u8]) -> &mut Self {
        self.buf.push(b'E');
        self.buf.extend(quote_literal(value, self.mode));
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Assemble the `INSERT` for one audit row of `row`, whose shape is `layout`
pub fn build_insert<L, R>(
    target: &LogTarget,
    layout: &L,
    row: &R,
    change: ChangeMode,
    side: TupleSide,
    mode: QuoteMode,
) -> InsertStatement
where
    L: ColumnLayout + ?Sized,
    R: RowImage + ?Sized,
{
    let mut stmt = InsertStatement::new(mode);
    stmt.raw("INSERT INTO ")
        .ident(&target.schema)
        .raw(".")
        .ident(&target.table)
        .raw(" (");

    for (_, name) in live_columns(layout) {
        stmt.ident(name).raw(", ");
    }
    if target.session_user {
        stmt.raw("trigger_user, ");
    }
    stmt.raw("trigger_mode, trigger_tuple, trigger_changed) VALUES (");

    for (attnum, _) in live_columns(layout) {
        match row.text_value(attnum) {
            Some(value) => stmt.literal(&value),
            None => stmt.raw("NULL"),
        };
        stmt.raw(", ");
    }
    if target.session_user {
        stmt.raw("SESSION_USER, ");
    }
    stmt.literal(change.as_str().as_bytes())
        .raw(", ")
        .literal(side.as_str().as_bytes())
        .raw(", NOW());");
    stmt
}

/// Write one audit row and insist that it landed
pub fn emit<E, L, R>(
    executor: &mut E,
    target: &LogTarget,
    layout: &L,
    row: &R,
    change: ChangeMode,
    side: TupleSide,
    mode: QuoteMode,
) -> Result<(), TableLogError>
where
    E: AuditExecutor + ?Sized,
    L: ColumnLayout + ?Sized,
    R: RowImage + ?Sized,
{
    let stmt = build_insert(target, layout, row, change, side, mode);
    if crate::gucs::LOG_STATEMENTS.get() {
        pgrx::debug1!("table_log: {}", String::from_utf8_lossy(stmt.as_bytes()));
    }

    let statement = CString::new(stmt.into_bytes())
        .map_err(|_| TableLogError::NulInStatement(lossy(&target.table)))?;

    match executor.execute(&statement) {
        SPI_OK_INSERT => Ok(()),
        status => Err(TableLogError::InsertFailed { relation: lossy(&target.table), status }),
    }
}
