//LICENSE Portions Copyright 2019-2021 ZomboDB, LLC.
//LICENSE
//LICENSE Portions Copyright 2021-2023 Technology Concepts & Design, Inc.
//LICENSE
//LICENSE Portions Copyright 2023-2023 PgCentral Foundation, Inc. <contact@pgcentral.org>
//LICENSE
//LICENSE All rights reserved.
//LICENSE
//LICENSE Use of this source code is governed by the MIT license that can be found in the LICENSE file.
//! Run-time settings, all `SET`-able per session.
use pgrx::guc::{GucContext, GucFlags, GucRegistry, GucSetting};

pub static MULTIBYTE_QUOTING: GucSetting<bool> = GucSetting::<bool>::new(true);
pub static DEBUG: GucSetting<bool> = GucSetting::<bool>::new(false);
pub static LOG_STATEMENTS: GucSetting<bool> = GucSetting::<bool>::new(false);

pub fn init() {
    GucRegistry::define_bool_guc(
        "table_log.multibyte_quoting",
        "Quote values one character at a time in multibyte server encodings",
        "When off, quoting examines every byte on its own even if the server encoding is multibyte.",
        &MULTIBYTE_QUOTING,
        GucContext::Userset,
        GucFlags::default(),
    );
    GucRegistry::define_bool_guc(
        "table_log.debug",
        "Trace each step of a table_log trigger fire at DEBUG1",
        "Context checks, resolved options, log table validation and dispatch are reported.",
        &DEBUG,
        GucContext::Userset,
        GucFlags::default(),
    );
    GucRegistry::define_bool_guc(
        "table_log.log_statements",
        "Report every generated audit INSERT at DEBUG1 before it runs",
        "The statement text includes the logged row values.",
        &LOG_STATEMENTS,
        GucContext::Userset,
        GucFlags::default(),
    );
}

/// `debug1!` gated on `table_log.debug`
macro_rules! trace {
    ($($arg:tt)*) => {
        if $crate::gucs::DEBUG.get() {
            ::pgrx::debug1!($($arg)*);
        }
    };
}
pub(crate) use trace;
