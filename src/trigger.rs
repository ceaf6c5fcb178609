//LICENSE Portions Copyright 2019-2021 ZomboDB, LLC.
//LICENSE
//LICENSE Portions Copyright 2021-2023 Technology Concepts & Design, Inc.
//LICENSE
//LICENSE Portions Copyright 2023-2023 PgCentral Foundation, Inc. <contact@pgcentral.org>
//LICENSE
//LICENSE All rights reserved.
//LICENSE
//LICENSE Use of this source code is governed by the MIT license that can be found in the LICENSE file.
//! One fire of the `table_log()` trigger, from the context checks to the last audit row.
use core::ffi::CStr;

use pgrx::pg_sys;
use pgrx::prelude::*;

use crate::audit::{emit, ChangeMode, LogTarget, TupleSlot};
use crate::backend::{open_relation, relation_names, server_quote_mode, HeapRow, SpiSession};
use crate::columns::count_live_columns;
use crate::error::{lossy, TableLogError};
use crate::gucs::trace;

const MAX_ARGS: usize = 3;

/// How the trigger was fired, as far as deciding whether it may run at all.
///
/// A call from anywhere but the trigger manager never gets this far: the `#[pg_trigger]`
/// wrapper refuses it while building the `PgTrigger`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiringContext {
    pub event: u32,
    pub nargs: usize,
}

impl FiringContext {
    pub fn from_trigger(trigger: &PgTrigger<'_>) -> Self {
        FiringContext {
            event: trigger.trigger_data().tg_event,
            nargs: usize::try_from(trigger.trigger().tgnargs).unwrap_or(0),
        }
    }

    /// Refuse anything but an AFTER ROW trigger with at most three arguments
    pub fn check(&self) -> Result<(), TableLogError> {
        if self.event & pg_sys::TRIGGER_EVENT_ROW == 0 {
            return Err(TableLogError::StatementLevel);
        }
        if self.event & pg_sys::TRIGGER_EVENT_TIMINGMASK == pg_sys::TRIGGER_EVENT_BEFORE {
            return Err(TableLogError::NotAfter);
        }
        if self.nargs > MAX_ARGS {
            return Err(TableLogError::TooManyArguments);
        }
        Ok(())
    }
}

impl ChangeMode {
    pub fn from_event(event: u32) -> Result<Self, TableLogError> {
        match event & pg_sys::TRIGGER_EVENT_OPMASK {
            pg_sys::TRIGGER_EVENT_INSERT => Ok(ChangeMode::Insert),
            pg_sys::TRIGGER_EVENT_UPDATE => Ok(ChangeMode::Update),
            pg_sys::TRIGGER_EVENT_DELETE => Ok(ChangeMode::Delete),
            _ => Err(TableLogError::UnknownEvent),
        }
    }
}

/// What `C` `atoi` makes of `text`: leading whitespace, an optional sign, then digits.
/// Anything that does not parse is zero.
fn atoi(text: &[u8]) -> i64 {
    let start = text
        .iter()
        .position(|&b| !matches!(b, b' ' | b'\t'..=b'\r'))
        .unwrap_or(text.len());
    let text = &text[start..];
    let (negative, digits) = match text.first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let value = digits
        .iter()
        .take_while(|d| d.is_ascii_digit())
        .fold(0i64, |acc, d| acc.saturating_mul(10).saturating_add(i64::from(d - b'0')));
    if negative {
        -value
    } else {
        value
    }
}

/// Whether the second trigger argument turns on `trigger_user` capture
pub fn session_user_flag(arg: &[u8]) -> bool {
    atoi(arg) == 1
}

impl LogTarget {
    /// Apply the trigger arguments, left to right, over the defaults derived from the
    /// audited relation
    pub fn resolve(args: &[Vec<u8>], table_name: &[u8], table_schema: &[u8]) -> Self {
        LogTarget {
            table: args.first().cloned().unwrap_or_else(|| [table_name, &b"_log"[..]].concat()),
            session_user: args.get(1).map(|arg| session_user_flag(arg)).unwrap_or(false),
            schema: args.get(2).cloned().unwrap_or_else(|| table_schema.to_vec()),
        }
    }
}

/// The log table must hold every target column plus a trailer of three or four columns,
/// one more of each when `trigger_user` is recorded
pub fn validate_shape(
    table: &[u8],
    table_columns: usize,
    target: &LogTarget,
    log_columns: usize,
) -> Result<(), TableLogError> {
    let trailer = if target.session_user { 4..=5 } else { 3..=4 };
    match log_columns.checked_sub(table_columns) {
        Some(extra) if trailer.contains(&extra) => Ok(()),
        _ => Err(TableLogError::ColumnCountMismatch {
            table: lossy(table),
            table_columns,
            log_table: lossy(&target.table),
            log_columns,
        }),
    }
}

/// The raw trigger arguments, in the server encoding
fn trigger_args(trigger: &PgTrigger<'_>) -> Vec<Vec<u8>> {
    let raw = trigger.trigger();
    let nargs = usize::try_from(raw.tgnargs).unwrap_or(0);
    if nargs == 0 || raw.tgargs.is_null() {
        return Vec::new();
    }
    // SAFETY: Postgres hands us `tgnargs` valid, NUL-terminated argument strings
    let slice = unsafe { core::slice::from_raw_parts(raw.tgargs, nargs) };
    slice.iter().map(|arg| unsafe { CStr::from_ptr(*arg) }.to_bytes().to_vec()).collect()
}

/// Count the live columns of the log relation, which must exist and have some
fn count_log_columns(target: &LogTarget) -> Result<usize, TableLogError> {
    let unavailable = || TableLogError::LogRelationUnavailable(lossy(&target.table));
    let relation = open_relation(&target.schema, &target.table).ok_or_else(unavailable)?;
    let layout = relation.tuple_desc();
    match count_live_columns(&layout) {
        0 => Err(unavailable()),
        n => Ok(n),
    }
}

/// Write the audit rows for one fire and return what kind of change it was.
///
/// The SPI session is closed again before this returns, whether or not it succeeds.
pub fn fire(trigger: &PgTrigger<'_>) -> Result<ChangeMode, TableLogError> {
    let context = FiringContext::from_trigger(trigger);
    trace!("table_log: fired with event {:#x} and {} argument(s)", context.event, context.nargs);
    context.check()?;

    let mut spi = SpiSession::connect()?;

    let data = trigger.trigger_data();
    let relation = trigger.relation().map_err(|_| TableLogError::TargetUnavailable)?;
    let (table_name, table_schema) = relation_names(data.tg_relation)?;
    let layout = relation.tuple_desc();
    let table_columns = count_live_columns(&layout);
    if table_columns < 1 {
        return Err(TableLogError::NoLiveColumns);
    }
    trace!("table_log: {} has {} live column(s)", lossy(&table_name), table_columns);

    let target = LogTarget::resolve(&trigger_args(trigger), &table_name, &table_schema);
    trace!(
        "table_log: logging to {}.{} (session user: {})",
        lossy(&target.schema),
        lossy(&target.table),
        target.session_user
    );

    let log_columns = count_log_columns(&target)?;
    validate_shape(&table_name, table_columns, &target, log_columns)?;

    let change = ChangeMode::from_event(context.event)?;
    let quote_mode = server_quote_mode();
    // SAFETY: the relation is open for the duration of the trigger call
    let tupdesc = unsafe { (*data.tg_relation).rd_att };
    for &(side, slot) in change.plan() {
        let tuple = match slot {
            TupleSlot::Trig => data.tg_trigtuple,
            TupleSlot::New => data.tg_newtuple,
        };
        if tuple.is_null() {
            return Err(TableLogError::UnknownEvent);
        }
        trace!("table_log: writing {} row for {}", side, change);
        // SAFETY: a non-null trigger tuple is formed with the relation's descriptor and
        // lives until the trigger returns
        let row = unsafe { HeapRow::from_raw(tuple, tupdesc) };
        emit(&mut spi, &target, &layout, &row, change, side, quote_mode)?;
    }

    drop(spi);
    trace!("table_log: done");
    Ok(change)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{build_insert, RowImage, TupleSide};
    use crate::columns::tests::Layout;
    use crate::quote::QuoteMode;

    const AFTER_ROW: u32 = pg_sys::TRIGGER_EVENT_ROW | pg_sys::TRIGGER_EVENT_AFTER;

    fn context(event: u32, nargs: usize) -> FiringContext {
        FiringContext { event, nargs }
    }

    fn target(session_user: bool) -> LogTarget {
        LogTarget { schema: b"s1".to_vec(), table: b"t_log".to_vec(), session_user }
    }

    #[test]
    fn after_row_triggers_pass() {
        for op in [
            pg_sys::TRIGGER_EVENT_INSERT,
            pg_sys::TRIGGER_EVENT_UPDATE,
            pg_sys::TRIGGER_EVENT_DELETE,
        ] {
            assert_eq!(context(AFTER_ROW | op, 0).check(), Ok(()));
            assert_eq!(context(AFTER_ROW | op, 3).check(), Ok(()));
        }
    }

    #[test]
    fn guards_fire_in_order() {
        // statement level and before, statement level wins
        assert_eq!(
            context(pg_sys::TRIGGER_EVENT_BEFORE, 9).check(),
            Err(TableLogError::StatementLevel)
        );
        assert_eq!(
            context(pg_sys::TRIGGER_EVENT_ROW | pg_sys::TRIGGER_EVENT_BEFORE, 9).check(),
            Err(TableLogError::NotAfter)
        );
        assert_eq!(context(AFTER_ROW, 4).check(), Err(TableLogError::TooManyArguments));
    }

    #[test]
    fn instead_of_is_not_before() {
        let event = pg_sys::TRIGGER_EVENT_ROW | pg_sys::TRIGGER_EVENT_INSTEAD;
        assert_eq!(context(event, 0).check(), Ok(()));
    }

    #[test]
    fn event_decodes_to_change_mode() {
        assert_eq!(
            ChangeMode::from_event(AFTER_ROW | pg_sys::TRIGGER_EVENT_INSERT),
            Ok(ChangeMode::Insert)
        );
        assert_eq!(
            ChangeMode::from_event(AFTER_ROW | pg_sys::TRIGGER_EVENT_UPDATE),
            Ok(ChangeMode::Update)
        );
        assert_eq!(
            ChangeMode::from_event(AFTER_ROW | pg_sys::TRIGGER_EVENT_DELETE),
            Ok(ChangeMode::Delete)
        );
        assert_eq!(
            ChangeMode::from_event(AFTER_ROW | pg_sys::TRIGGER_EVENT_TRUNCATE),
            Err(TableLogError::UnknownEvent)
        );
    }

    #[test]
    fn flag_follows_atoi() {
        assert!(session_user_flag(b"1"));
        assert!(session_user_flag(b" +1"));
        assert!(session_user_flag(b"01"));
        assert!(session_user_flag(b"1 trailing"));
        assert!(!session_user_flag(b"0"));
        assert!(!session_user_flag(b"-1"));
        assert!(!session_user_flag(b"true"));
        assert!(!session_user_flag(b""));
        assert!(!session_user_flag(b"11"));
    }

    #[test]
    fn defaults_come_from_the_audited_table() {
        let target = LogTarget::resolve(&[], b"t", b"s1");
        assert_eq!(target, LogTarget { schema: b"s1".to_vec(), table: b"t_log".to_vec(), session_user: false });
    }

    #[test]
    fn arguments_override_left_to_right() {
        let only_table = LogTarget::resolve(&[b"audit_t".to_vec()], b"t", b"s1");
        assert_eq!(only_table.table, b"audit_t");
        assert_eq!(only_table.schema, b"s1");
        assert!(!only_table.session_user);

        let args = [b"audit_t".to_vec(), b"1".to_vec(), b"audit".to_vec()];
        let all = LogTarget::resolve(&args, b"t", b"s1");
        assert_eq!(all, LogTarget { schema: b"audit".to_vec(), table: b"audit_t".to_vec(), session_user: true });
    }

    #[test]
    fn flag_skips_every_c_space() {
        assert!(session_user_flag(b"\t\n\x0b\x0c\r 1"));
        assert!(!session_user_flag(b"\xa01"));
    }

    struct Values(Vec<&'static [u8]>);

    impl RowImage for Values {
        fn text_value(&self, attnum: usize) -> Option<Vec<u8>> {
            Some(self.0[attnum - 1].to_vec())
        }
    }

    #[test]
    fn latin1_log_table_argument_reaches_the_statement() {
        // 'journalé' and 'sché' as a LATIN1 database stores them
        let args = [b"journal\xe9".to_vec(), b"0".to_vec(), b"sch\xe9".to_vec()];
        let target = LogTarget::resolve(&args, b"t", b"public");
        assert_eq!(target.table, b"journal\xe9");
        assert_eq!(target.schema, b"sch\xe9");

        let layout = Layout::live(&["id"]);
        let row = Values(vec![&b"caf\xe9"[..]]);
        let stmt = build_insert(
            &target,
            &layout,
            &row,
            ChangeMode::Insert,
            TupleSide::New,
            QuoteMode::Bytewise,
        )
        .into_bytes();
        assert!(stmt.starts_with(b"INSERT INTO \"sch\xe9\".\"journal\xe9\" (\"id\", "));
        assert!(stmt.windows(7).any(|w| w == b"E'caf\xe9'"));
    }

    #[test]
    fn latin1_table_name_gets_the_default_suffix() {
        let target = LogTarget::resolve(&[], b"caf\xe9", b"sch\xe9");
        assert_eq!(target.table, b"caf\xe9_log");
        assert_eq!(target.schema, b"sch\xe9");
        assert_eq!(
            validate_shape(b"caf\xe9", 3, &target, 4),
            Err(TableLogError::ColumnCountMismatch {
                table: "caf\u{fffd}".into(),
                table_columns: 3,
                log_table: "caf\u{fffd}_log".into(),
                log_columns: 4,
            })
        );
    }

    #[test]
    fn trailer_of_three_or_four() {
        assert_eq!(validate_shape(b"t", 2, &target(false), 5), Ok(()));
        assert_eq!(validate_shape(b"t", 2, &target(false), 6), Ok(()));
        assert!(validate_shape(b"t", 2, &target(false), 4).is_err());
        assert!(validate_shape(b"t", 2, &target(false), 7).is_err());
    }

    #[test]
    fn session_user_needs_one_more() {
        assert!(validate_shape(b"t", 2, &target(true), 5).is_err());
        assert_eq!(validate_shape(b"t", 2, &target(true), 6), Ok(()));
        assert_eq!(validate_shape(b"t", 2, &target(true), 7), Ok(()));
        assert!(validate_shape(b"t", 2, &target(true), 8).is_err());
    }

    #[test]
    fn three_column_target_against_a_short_log() {
        assert_eq!(validate_shape(b"t", 3, &target(false), 6), Ok(()));
        assert_eq!(validate_shape(b"t", 3, &target(false), 7), Ok(()));
        assert_eq!(
            validate_shape(b"t", 3, &target(false), 4),
            Err(TableLogError::ColumnCountMismatch {
                table: "t".into(),
                table_columns: 3,
                log_table: "t_log".into(),
                log_columns: 4,
            })
        );
        // fewer log columns than target columns
        assert!(validate_shape(b"t", 3, &target(false), 1).is_err());
    }
}
