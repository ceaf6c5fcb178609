//LICENSE Portions Copyright 2019-2021 ZomboDB, LLC.
//LICENSE
//LICENSE Portions Copyright 2021-2023 Technology Concepts & Design, Inc.
//LICENSE
//LICENSE Portions Copyright 2023-2023 PgCentral Foundation, Inc. <contact@pgcentral.org>
//LICENSE
//LICENSE All rights reserved.
//LICENSE
//LICENSE Use of this source code is governed by the MIT license that can be found in the LICENSE file.
//! Column probing over a relation's tuple descriptor.
//!
//! Attribute numbers are 1-based positions in the *raw* descriptor, dropped columns
//! included, which is what `SPI_getvalue` expects.
use core::ffi::CStr;
use pgrx::PgTupleDesc;

/// Read-only view of a tuple descriptor
pub trait ColumnLayout {
    /// Number of attributes in the raw descriptor, dropped ones included
    fn natts(&self) -> usize;

    /// Whether attribute `attnum` (1-based) has been dropped
    fn is_dropped(&self, attnum: usize) -> bool;

    /// Name of attribute `attnum` (1-based)
    fn column_name(&self, attnum: usize) -> &[u8];
}

/// Number of attributes in `desc` that have not been dropped
pub fn count_live_columns<L: ColumnLayout + ?Sized>(desc: &L) -> usize {
    (1..=desc.natts()).filter(|&attnum| !desc.is_dropped(attnum)).count()
}

/// `(attnum, name)` of every live attribute, in descriptor order
pub fn live_columns<'a, L: ColumnLayout + ?Sized>(
    desc: &'a L,
) -> impl Iterator<Item = (usize, &'a [u8])> + 'a {
    (1..=desc.natts())
        .filter(move |&attnum| !desc.is_dropped(attnum))
        .map(move |attnum| (attnum, desc.column_name(attnum)))
}

impl ColumnLayout for PgTupleDesc<'_> {
    fn natts(&self) -> usize {
        self.len()
    }

    fn is_dropped(&self, attnum: usize) -> bool {
        self.get(attnum - 1).map(|att| att.attisdropped).unwrap_or(true)
    }

    fn column_name(&self, attnum: usize) -> &[u8] {
        match self.get(attnum - 1) {
            // SAFETY: `attname` is a NameData, which Postgres always NUL-terminates within
            // its NAMEDATALEN bytes
            Some(att) => unsafe { CStr::from_ptr(att.attname.data.as_ptr()) }.to_bytes(),
            None => b"",
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// In-memory stand-in for a tuple descriptor
    pub(crate) struct Layout(pub Vec<(&'static str, bool)>);

    impl Layout {
        pub(crate) fn live(names: &[&'static str]) -> Self {
            Layout(names.iter().map(|name| (*name, false)).collect())
        }
    }

    impl ColumnLayout for Layout {
        fn natts(&self) -> usize {
            self.0.len()
        }

        fn is_dropped(&self, attnum: usize) -> bool {
            self.0[attnum - 1].1
        }

        fn column_name(&self, attnum: usize) -> &[u8] {
            self.0[attnum - 1].0.as_bytes()
        }
    }

    #[test]
    fn counts_every_live_column() {
        assert_eq!(count_live_columns(&Layout::live(&["id", "name", "note"])), 3);
    }

    #[test]
    fn empty_descriptor_has_no_columns() {
        assert_eq!(count_live_columns(&Layout(vec![])), 0);
        assert_eq!(live_columns(&Layout(vec![])).count(), 0);
    }

    #[test]
    fn dropped_columns_are_skipped() {
        let layout = Layout(vec![
            ("id", false),
            ("........pg.dropped.2........", true),
            ("name", false),
            ("........pg.dropped.4........", true),
        ]);
        assert_eq!(count_live_columns(&layout), 2);
        let live = live_columns(&layout).collect::<Vec<_>>();
        assert_eq!(live, vec![(1, &b"id"[..]), (3, &b"name"[..])]);
    }

    #[test]
    fn all_dropped_counts_zero() {
        let layout = Layout(vec![("a", true), ("b", true)]);
        assert_eq!(count_live_columns(&layout), 0);
    }
}
