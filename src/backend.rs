//LICENSE Portions Copyright 2019-2021 ZomboDB, LLC.
//LICENSE
//LICENSE Portions Copyright 2021-2023 Technology Concepts & Design, Inc.
//LICENSE
//LICENSE Portions Copyright 2023-2023 PgCentral Foundation, Inc. <contact@pgcentral.org>
//LICENSE
//LICENSE All rights reserved.
//LICENSE
//LICENSE Use of this source code is governed by the MIT license that can be found in the LICENSE file.
//! The parts of the audit path that talk to the running backend: SPI, heap tuples and
//! the server encoding.
use core::ffi::{c_char, CStr};
use std::ffi::CString;
use std::marker::PhantomData;

use pgrx::{pg_sys, PgRelation};

use crate::audit::{AuditExecutor, RowImage};
use crate::error::TableLogError;
use crate::quote::QuoteMode;

/// An open SPI connection, closed with `SPI_finish` when dropped.
///
/// Only one may exist per fire; it must be dropped before an `ERROR` is raised so the
/// connection does not leak into the error path.
pub struct SpiSession<'a> {
    __marker: PhantomData<&'a ()>,
}

impl<'a> SpiSession<'a> {
    pub fn connect() -> Result<Self, TableLogError> {
        // SAFETY: we are inside a function call made by the backend
        let status = unsafe { pg_sys::SPI_connect() };
        if status != pg_sys::SPI_OK_CONNECT as i32 {
            return Err(TableLogError::SpiConnect(status));
        }
        Ok(SpiSession { __marker: PhantomData })
    }
}

impl AuditExecutor for SpiSession<'_> {
    fn execute(&mut self, statement: &CString) -> i32 {
        // SAFETY: `statement` is NUL-terminated and the session is connected.  The write
        // is not read-only and has no row limit
        unsafe { pg_sys::SPI_execute(statement.as_ptr(), false, 0) }
    }
}

impl Drop for SpiSession<'_> {
    fn drop(&mut self) {
        // SPI_finish only fails when nothing is connected, which `connect` rules out
        // SAFETY: paired with the successful SPI_connect in `connect`
        unsafe {
            pg_sys::SPI_finish();
        }
    }
}

/// A heap tuple read through the descriptor it was formed with
pub struct HeapRow<'a> {
    tuple: pg_sys::HeapTuple,
    tupdesc: pg_sys::TupleDesc,
    __marker: PhantomData<&'a pg_sys::HeapTupleData>,
}

impl<'a> HeapRow<'a> {
    /// # Safety
    ///
    /// `tuple` must be a valid, non-null heap tuple laid out according to `tupdesc`, and
    /// both must outlive `'a`.
    pub unsafe fn from_raw(tuple: pg_sys::HeapTuple, tupdesc: pg_sys::TupleDesc) -> Self {
        HeapRow { tuple, tupdesc, __marker: PhantomData }
    }
}

impl RowImage for HeapRow<'_> {
    fn text_value(&self, attnum: usize) -> Option<Vec<u8>> {
        let fnumber = i32::try_from(attnum).ok()?;
        // SAFETY: the tuple and descriptor are valid for our lifetime, per `from_raw`.
        // SPI_getvalue returns NULL for SQL NULL and otherwise a palloc'd string
        unsafe {
            let value = pg_sys::SPI_getvalue(self.tuple, self.tupdesc, fnumber);
            if value.is_null() {
                return None;
            }
            let bytes = CStr::from_ptr(value).to_bytes().to_vec();
            pg_sys::pfree(value.cast());
            Some(bytes)
        }
    }
}

/// Longest character any server encoding produces
const MAX_CHAR_BYTES: usize = 4;

/// Byte length of the character at `bytes[0]` in the server encoding
fn server_char_len(bytes: &[u8]) -> usize {
    // pg_mblen may look past the lead byte, so it gets a NUL-padded copy that is always
    // long enough
    let mut scratch = [0u8; MAX_CHAR_BYTES + 1];
    let n = bytes.len().min(MAX_CHAR_BYTES);
    scratch[..n].copy_from_slice(&bytes[..n]);
    // SAFETY: `scratch` is NUL-terminated and outlives the call
    let len = unsafe { pg_sys::pg_mblen(scratch.as_ptr() as *const c_char) };
    usize::try_from(len).unwrap_or(1)
}

/// The quoting mode for this backend's encoding and `table_log.multibyte_quoting`
pub fn server_quote_mode() -> QuoteMode {
    // SAFETY: reads backend-global encoding state
    let (encoding, max_len) =
        unsafe { (pg_sys::GetDatabaseEncoding(), pg_sys::pg_database_encoding_max_length()) };
    if max_len <= 1 || !crate::gucs::MULTIBYTE_QUOTING.get() {
        QuoteMode::Bytewise
    } else if encoding as u32 == pg_sys::pg_enc::PG_UTF8 {
        QuoteMode::utf8()
    } else {
        QuoteMode::Multibyte(server_char_len)
    }
}

/// Name and schema name of `relation`, as the catalogs store them
pub fn relation_names(relation: pg_sys::Relation) -> Result<(Vec<u8>, Vec<u8>), TableLogError> {
    if relation.is_null() {
        return Err(TableLogError::TargetUnavailable);
    }
    // SAFETY: `relation` is an open relation handed to us by the trigger manager.
    // get_namespace_name returns a palloc'd copy, or NULL if the schema is gone
    unsafe {
        let form = (*relation).rd_rel;
        if form.is_null() {
            return Err(TableLogError::TargetUnavailable);
        }
        let name = CStr::from_ptr((*form).relname.data.as_ptr()).to_bytes().to_vec();
        let namespace = pg_sys::get_namespace_name((*form).relnamespace);
        if namespace.is_null() {
            return Err(TableLogError::TargetUnavailable);
        }
        let schema = CStr::from_ptr(namespace).to_bytes().to_vec();
        pg_sys::pfree(namespace.cast());
        Ok((name, schema))
    }
}

/// Open `schema.table`, both matched exactly, with an `AccessShareLock`
pub fn open_relation(schema: &[u8], table: &[u8]) -> Option<PgRelation> {
    let schema = CString::new(schema).ok()?;
    let table = CString::new(table).ok()?;
    // SAFETY: both names are NUL-terminated; the lookups only read the catalogs
    unsafe {
        let namespace = pg_sys::get_namespace_oid(schema.as_ptr(), true);
        if namespace == pg_sys::InvalidOid {
            return None;
        }
        let oid = pg_sys::get_relname_relid(table.as_ptr(), namespace);
        if oid == pg_sys::InvalidOid {
            return None;
        }
        Some(PgRelation::with_lock(oid, pg_sys::AccessShareLock as pg_sys::LOCKMODE))
    }
}
