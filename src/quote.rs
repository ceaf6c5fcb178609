//LICENSE Portions Copyright 2019-2021 ZomboDB, LLC.
//LICENSE
//LICENSE Portions Copyright 2021-2023 Technology Concepts & Design, Inc.
//LICENSE
//LICENSE Portions Copyright 2023-2023 PgCentral Foundation, Inc. <contact@pgcentral.org>
//LICENSE
//LICENSE All rights reserved.
//LICENSE
//LICENSE Use of this source code is governed by the MIT license that can be found in the LICENSE file.
//! SQL quoting of identifiers and literals over raw bytes.
//!
//! Column values arrive as whatever bytes the server encoding produced, so nothing here
//! assumes UTF-8 or a trailing NUL.  When the server encoding is multibyte, the interior
//! bytes of a multibyte character are copied through untouched: in encodings such as
//! SJIS or BIG5 a trailing byte may look exactly like `\` or `'`.

/// Reports how many bytes the character starting at `bytes[0]` occupies.
///
/// `bytes` is never empty.  Results outside `1..=bytes.len()` are clamped by the caller.
pub type CharLen = fn(&[u8]) -> usize;

/// How the quoting functions walk their input
#[derive(Debug, Clone, Copy)]
pub enum QuoteMode {
    /// Every byte is examined on its own
    Bytewise,
    /// Input is walked one character at a time; only single-byte characters are examined
    Multibyte(CharLen),
}

impl QuoteMode {
    /// Multibyte walking using UTF-8 lead-byte rules
    pub fn utf8() -> Self {
        QuoteMode::Multibyte(utf8_char_len)
    }

    /// Calls `f` once per character of `input`, with the character's bytes
    #[inline]
    fn for_each_char(self, input: &[u8], mut f: impl FnMut(&[u8])) {
        match self {
            QuoteMode::Bytewise => input.chunks(1).for_each(f),
            QuoteMode::Multibyte(char_len) => {
                let mut rest = input;
                while !rest.is_empty() {
                    let len = char_len(rest).clamp(1, rest.len());
                    let (ch, tail) = rest.split_at(len);
                    f(ch);
                    rest = tail;
                }
            }
        }
    }
}

/// Byte length of a UTF-8 sequence, judged from its lead byte only
pub fn utf8_char_len(bytes: &[u8]) -> usize {
    match bytes[0] {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        // stray continuation byte or invalid lead byte
        _ => 1,
    }
}

/// Returns `ident` as a double-quoted SQL identifier, every embedded `"` doubled.
///
/// The output is never empty; an empty input yields `""`.  No truncation to
/// `NAMEDATALEN` happens here.
pub fn quote_ident(ident: &[u8], mode: QuoteMode) -> Vec<u8> {
    let mut out = Vec::with_capacity(ident.len() + 2);
    out.push(b'"');
    mode.for_each_char(ident, |ch| {
        if ch == b"\"" {
            out.push(b'"');
        }
        out.extend_from_slice(ch);
    });
    out.push(b'"');
    out
}

/// Returns `literal` as a single-quoted SQL string, with a `\` in front of every `'`
/// and `\`.
///
/// The escapes are only honored by Postgres inside an `E'...'` string, so callers that
/// embed the result in a statement prefix it with `E`.
pub fn quote_literal(literal: &[u8], mode: QuoteMode) -> Vec<u8> {
    let mut out = Vec::with_capacity(literal.len() + 2);
    out.push(b'\'');
    mode.for_each_char(literal, |ch| {
        if ch == b"'" || ch == b"\\" {
            out.push(b'\\');
        }
        out.extend_from_slice(ch);
    });
    out.push(b'\'');
    out
}
