//LICENSE Portions Copyright 2019-2021 ZomboDB, LLC.
//LICENSE
//LICENSE Portions Copyright 2021-2023 Technology Concepts & Design, Inc.
//LICENSE
//LICENSE Portions Copyright 2023-2023 PgCentral Foundation, Inc. <contact@pgcentral.org>
//LICENSE
//LICENSE All rights reserved.
//LICENSE
//LICENSE Use of this source code is governed by the MIT license that can be found in the LICENSE file.
//! `table_log()`: an AFTER ROW trigger that copies every inserted, updated or deleted row
//! into a companion log table, inside the same transaction as the change.
//!
//! ```sql
//! CREATE TRIGGER t_log AFTER INSERT OR UPDATE OR DELETE ON t
//!     FOR EACH ROW EXECUTE PROCEDURE table_log();
//! ```
use core::convert::Infallible;

use pgrx::prelude::*;

pub mod audit;
pub mod backend;
pub mod columns;
pub mod error;
pub mod gucs;
pub mod quote;
pub mod trigger;


pub use error::TableLogError;

::pgrx::pg_module_magic!();

#[pg_guard]
pub extern "C" fn _PG_init() {
    gucs::init();
}

/// Every failure is raised as an `ERROR` from inside the fire, so the `Err` arm is never
/// taken.
#[pg_trigger]
fn table_log<'a>(
    trigger: &'a pgrx::PgTrigger<'a>,
) -> Result<Option<PgHeapTuple<'a, AllocatedByPostgres>>, Infallible> {
    match trigger::fire(trigger) {
        Ok(audit::ChangeMode::Insert) => Ok(trigger.new()),
        Ok(_) => Ok(trigger.old()),
        Err(e) => e.report(),
    }
}

#[cfg(test)]
pub mod pg_test {
    pub fn setup(_options: Vec<&str>) {
        // perform one-off initialization when the pg_test framework starts
    }

    pub fn postgresql_conf_options() -> Vec<&'static str> {
        // return any postgresql.conf settings that are required for your tests
        vec![]
    }
}
