// Copyright 2025 Plagio Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Text pipeline: normalization, tokenization and shingle hashing.
//!
//! The builder and the search engine both go through these functions. The
//! on-disk index stores nothing but the resulting hashes, so the mapping
//! from raw text to hashes must stay byte-exact across both paths and
//! across releases. Do not "fix" the folding table without bumping the
//! index format version.

/// Number of consecutive tokens per shingle (canonical index setting).
pub const SHINGLE_K: usize = 9;

const FNV_OFFSET: u64 = 0x14650FB0739D0383;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

/// A token as an (offset, len) byte span into the normalization buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenSpan {
    pub off: u32,
    pub len: u32,
}

/// Unicode spaces that are normalized to ASCII space before anything else.
fn is_exotic_space(c: char) -> bool {
    matches!(
        c,
        '\u{00A0}' | '\u{2001}'..='\u{2007}' | '\u{2009}' | '\u{200A}' | '\u{202F}'
    )
}

/// Case-fold for the supported alphabets: ASCII Latin, base Cyrillic,
/// Kazakh-specific Cyrillic letters and the Turkish Latin letters.
fn fold_lower(c: char) -> char {
    match c {
        'A'..='Z' => c.to_ascii_lowercase(),
        // base Cyrillic А..Я -> а..я
        'А'..='Я' => char::from_u32(c as u32 + 0x20).unwrap_or(c),
        'Ё' => 'ё',
        // Kazakh І and the specific uppercase letters
        'І' => 'і',
        'Ә' => 'ә',
        'Ғ' => 'ғ',
        'Қ' => 'қ',
        'Ң' => 'ң',
        'Ө' => 'ө',
        'Ұ' => 'ұ',
        'Ү' => 'ү',
        'Һ' => 'һ',
        // Turkish letters; İ folds to plain ASCII i
        'Ç' => 'ç',
        'Ö' => 'ö',
        'Ü' => 'ü',
        'Ğ' => 'ğ',
        'Ş' => 'ş',
        'İ' => 'i',
        _ => c,
    }
}

/// A codepoint that may appear inside a token: ASCII letters/digits, `_`,
/// and the Cyrillic block U+0400..U+04FF.
fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || ('\u{0400}'..='\u{04FF}').contains(&c)
}

/// Normalize text for shingling: exotic spaces to ASCII space, case-fold
/// (ru + kk + tr), ё->е, dotless ı->i, combining marks dropped, the
/// extended-Latin block U+00C0..U+02AF replaced by a space, every
/// non-word codepoint collapsed to a single separating space, and the
/// result trimmed.
///
/// Dropping U+00C0..U+02AF (after folding, so Turkish ç/ö/ü/ğ/ş land
/// there too) is a compatibility contract with existing indexes, not a
/// linguistic choice.
pub fn normalize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    // starts true so leading separators never emit a space
    let mut prev_space = true;

    for raw in input.chars() {
        if is_exotic_space(raw) {
            if !prev_space {
                out.push(' ');
                prev_space = true;
            }
            continue;
        }

        let mut c = fold_lower(raw);
        if c == 'ё' {
            c = 'е';
        }
        if c == 'ı' {
            c = 'i';
        }

        // combining accents vanish entirely (no separator)
        if ('\u{0300}'..='\u{036F}').contains(&c) {
            continue;
        }

        if ('\u{00C0}'..='\u{02AF}').contains(&c) || !is_word_char(c) {
            if !prev_space {
                out.push(' ');
                prev_space = true;
            }
            continue;
        }

        out.push(c);
        prev_space = false;
    }

    if out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Split a normalized string on ASCII spaces into (offset, len) spans.
/// Empty tokens are discarded. `out` is cleared first.
pub fn tokenize_spans(norm: &str, out: &mut Vec<TokenSpan>) {
    out.clear();
    let bytes = norm.as_bytes();
    let n = bytes.len();
    let mut i = 0usize;

    while i < n {
        while i < n && bytes[i] == b' ' {
            i += 1;
        }
        if i >= n {
            break;
        }
        let start = i;
        while i < n && bytes[i] != b' ' {
            i += 1;
        }
        out.push(TokenSpan {
            off: start as u32,
            len: (i - start) as u32,
        });
    }
}

fn fnv1a64_seeded(bytes: &[u8], seed: u64) -> u64 {
    let mut h = seed;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

/// FNV-1a 64 over raw bytes.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    fnv1a64_seeded(bytes, FNV_OFFSET)
}

#[inline]
fn span_bytes<'a>(norm: &'a str, span: &TokenSpan) -> &'a [u8] {
    let off = span.off as usize;
    &norm.as_bytes()[off..off + span.len as usize]
}

/// Hash of `k` consecutive tokens starting at `start`, equivalent to
/// FNV-1a of the tokens joined by a single ASCII space, without
/// materializing the joined string.
pub fn hash_shingle(norm: &str, spans: &[TokenSpan], start: usize, k: usize) -> u64 {
    let mut h = FNV_OFFSET;
    for (j, span) in spans[start..start + k].iter().enumerate() {
        if j > 0 {
            h ^= b' ' as u64;
            h = h.wrapping_mul(FNV_PRIME);
        }
        for &b in span_bytes(norm, span) {
            h ^= b as u64;
            h = h.wrapping_mul(FNV_PRIME);
        }
    }
    h
}

/// Fill `out` with the shingle hashes of every k-token window, in text
/// order, stopping after `limit` hashes. `out` is cleared first; it stays
/// empty when there are fewer than `k` tokens.
pub fn fill_shingle_hashes(
    norm: &str,
    spans: &[TokenSpan],
    k: usize,
    limit: usize,
    out: &mut Vec<u64>,
) {
    out.clear();
    if k == 0 || spans.len() < k {
        return;
    }
    let cnt = (spans.len() - k + 1).min(limit);
    out.reserve(cnt);
    for pos in 0..cnt {
        out.push(hash_shingle(norm, spans, pos, k));
    }
}

/// 128-bit simhash over per-token seeded FNV pairs. Returns (hi, lo).
/// Stored in the index for future near-dup heuristics; scoring never
/// reads it.
pub fn simhash128(norm: &str, spans: &[TokenSpan]) -> (u64, u64) {
    let mut v = [0i32; 128];

    for span in spans {
        let bytes = span_bytes(norm, span);
        let lo_bits = fnv1a64_seeded(bytes, FNV_OFFSET);
        let hi_bits = fnv1a64_seeded(bytes, FNV_PRIME);
        for i in 0..64 {
            v[i] += if (lo_bits >> i) & 1 == 1 { 1 } else { -1 };
            v[64 + i] += if (hi_bits >> i) & 1 == 1 { 1 } else { -1 };
        }
    }

    let mut hi = 0u64;
    let mut lo = 0u64;
    for i in 0..64 {
        if v[i] >= 0 {
            lo |= 1u64 << i;
        }
        if v[64 + i] >= 0 {
            hi |= 1u64 << i;
        }
    }
    (hi, lo)
}
